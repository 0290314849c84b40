use reqwest::{header::InvalidHeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bearer token must not be empty")]
    MissingToken,

    #[error("Bearer token is not a valid header value")]
    InvalidToken(#[source] InvalidHeaderValue),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header {name:?}")]
    InvalidHeader { name: String },

    #[error("Failed to serialize request body: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Connection-level failure that outlived the retry budget.
    #[error("{method} {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        method: Method,
        url: Url,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Final response carried a 4xx/5xx status.
    #[error("{method} {url} returned {status}")]
    Http {
        method: Method,
        url: Url,
        status: StatusCode,
        body: Option<String>,
    },

    #[error("Invalid JSON in response from {url}: {source}")]
    Decode {
        url: Url,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to extract response body: {0}")]
    Extraction(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    /// Wraps an extractor failure for extractors that report through `ApiError`.
    pub fn extraction(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ApiError::Extraction(err.into())
    }

    /// Status code of the final response, when there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether trying the same call again later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport { .. } => true,
            ApiError::Http { status, .. } => crate::retry::DEFAULT_RETRY_STATUS_CODES
                .contains(&status.as_u16()),
            _ => false,
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            ApiError::MissingToken | ApiError::InvalidToken(_) => {
                Some("Generate an API access token in Zephyr Scale under Settings > API Access Tokens")
            }
            ApiError::Http { status, .. } => match *status {
                StatusCode::UNAUTHORIZED => Some("Verify your Zephyr Scale API token"),
                StatusCode::FORBIDDEN => {
                    Some("Check that the token's user can access this project")
                }
                StatusCode::NOT_FOUND => Some("Check if the resource key or ID is correct"),
                StatusCode::TOO_MANY_REQUESTS => {
                    Some("Consider reducing request frequency")
                }
                _ => None,
            },
            ApiError::Transport { .. } => {
                Some("Check your network connection or try again later")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http_error(status: u16) -> ApiError {
        ApiError::Http {
            method: Method::GET,
            url: Url::parse("https://api.zephyrscale.smartbear.com/v2/testcases").unwrap(),
            status: StatusCode::from_u16(status).unwrap(),
            body: Some("{}".to_string()),
        }
    }

    #[test]
    fn test_status_only_for_http_errors() {
        assert_eq!(http_error(404).status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(ApiError::MissingToken.status(), None);
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(http_error(code).is_retryable(), "{code} should be retryable");
        }
        for code in [400, 401, 403, 404, 501] {
            assert!(!http_error(code).is_retryable(), "{code} should not be retryable");
        }
    }

    #[test]
    fn test_http_error_display() {
        let message = http_error(404).to_string();
        assert_eq!(
            message,
            "GET https://api.zephyrscale.smartbear.com/v2/testcases returned 404 Not Found"
        );
    }

    #[test]
    fn test_suggestions() {
        assert!(http_error(401).suggestion().unwrap().contains("token"));
        assert!(http_error(418).suggestion().is_none());
        assert!(ApiError::MissingToken.suggestion().is_some());
    }

    #[test]
    fn test_extraction_keeps_source_message() {
        let err = ApiError::extraction("missing X-Custom header");
        assert!(err.to_string().contains("missing X-Custom header"));
    }
}

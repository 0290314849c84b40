pub mod client;
pub mod error;
pub mod request;
pub mod response;
pub mod retry;

use std::collections::BTreeMap;
use std::fmt;

pub use client::{ClientConfig, DEFAULT_BASE_URL};
pub use error::{ApiError, Result};
pub use request::{Body, RequestSpec, TransportOptions};
pub use response::ApiResponse;
pub use retry::RetryPolicy;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use retry::send_with_retry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};
use url::Url;
use zephyr_scale_config::ResolvedProfile;

/// Dispatches requests to the Zephyr Scale API with the bearer token attached
/// and transient failures retried.
///
/// Cloning is cheap and clones share one connection pool.
#[derive(Clone)]
pub struct ZephyrClient {
    client: Client,
    config: ClientConfig,
    base_url: Url,
    retry_policy: RetryPolicy,
}

impl fmt::Debug for ZephyrClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZephyrClient")
            .field("config", &self.config)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl ZephyrClient {
    /// Client for the Zephyr Scale Cloud API.
    pub fn new(bearer_token: impl Into<String>) -> Result<Self> {
        Self::from_config(ClientConfig::new(bearer_token))
    }

    pub fn with_base_url(
        bearer_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Self::from_config(ClientConfig::with_base_url(bearer_token, base_url))
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let token = config.bearer_token().trim();
        if token.is_empty() {
            return Err(ApiError::MissingToken);
        }
        let base_url = normalize_base_url(config.base_url())?;

        let mut authorization =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(ApiError::InvalidToken)?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(format!("zephyr-scale-api/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(ApiError::ClientBuild)?;

        Ok(Self {
            client,
            config,
            base_url,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Builds a client from a resolved configuration profile, applying its
    /// retry overrides.
    pub fn from_profile(profile: &ResolvedProfile) -> Result<Self> {
        let config = ClientConfig::with_base_url(profile.token.clone(), profile.base_url.clone());
        let policy = RetryPolicy::default().with_settings(&profile.retry);
        Ok(Self::from_config(config)?.with_retry_policy(policy))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base URL with a trailing slash; relative request URLs are joined onto it.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Sends `request` and decodes the JSON body of a successful response.
    pub async fn send<T: DeserializeOwned>(&self, request: RequestSpec) -> Result<T> {
        let response = self.dispatch(&request).await?;

        response.json::<T>().map_err(|source| {
            error!(url = %response.url(), "Failed to parse JSON response: {}", source);
            ApiError::Decode {
                url: response.url().clone(),
                body: response.text().into_owned(),
                source,
            }
        })
    }

    /// Sends `request` and hands a successful response to `extract_body`.
    ///
    /// The extractor's error is returned as-is; dispatch failures reach the
    /// caller through `E: From<ApiError>`.
    pub async fn send_with<T, E, F>(
        &self,
        request: RequestSpec,
        extract_body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&ApiResponse) -> std::result::Result<T, E>,
        E: From<ApiError>,
    {
        let response = self.dispatch(&request).await?;
        extract_body(&response)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(RequestSpec::get(path)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body).map_err(ApiError::Serialize)?;
        self.send(RequestSpec::post(path).json(body)).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body).map_err(ApiError::Serialize)?;
        self.send(RequestSpec::put(path).json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(RequestSpec::delete(path)).await
    }

    /// Resolves `url` against the base URL unless it is already absolute.
    pub fn resolve_url(&self, url: &str) -> Result<Url> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self
                .base_url
                .join(url.strip_prefix('/').unwrap_or(url))?),
            Err(err) => Err(ApiError::InvalidUrl(err)),
        }
    }

    async fn dispatch(&self, request: &RequestSpec) -> Result<ApiResponse> {
        let method = request.method.clone();
        let url = self.resolve_url(&request.url)?;
        let headers = match &request.headers {
            Some(headers) => header_map(headers)?,
            None => HeaderMap::new(),
        };
        let timeout = request.transport.as_ref().and_then(|t| t.timeout);

        debug!(method = %method, url = %url, "Sending request");

        let (response, attempts) = send_with_retry(&self.retry_policy, &method, || {
            let mut req = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());

            if let Some(query) = &request.query {
                req = req.query(query);
            }
            match &request.body {
                Some(Body::Form(fields)) => req = req.form(fields),
                Some(Body::Json(value)) => req = req.json(value),
                None => {}
            }
            if let Some(timeout) = timeout {
                req = req.timeout(timeout);
            }

            req.send()
        })
        .await
        .map_err(|failure| ApiError::Transport {
            method: method.clone(),
            url: url.clone(),
            attempts: failure.attempts,
            source: failure.source,
        })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.ok();
            warn!(
                method = %method,
                url = %url,
                status = status.as_u16(),
                attempts,
                "Request failed"
            );
            return Err(ApiError::Http {
                method,
                url,
                status,
                body,
            });
        }

        ApiResponse::read(response)
            .await
            .map_err(|source| ApiError::Transport {
                method,
                url,
                attempts,
                source,
            })
    }
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidUrl(
            url::ParseError::RelativeUrlWithCannotBeABaseBase,
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = || ApiError::InvalidHeader { name: name.clone() };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(ZephyrClient::new(""), Err(ApiError::MissingToken)));
        assert!(matches!(ZephyrClient::new("   "), Err(ApiError::MissingToken)));
    }

    #[test]
    fn test_token_with_newline_rejected() {
        assert!(matches!(
            ZephyrClient::new("tok\n123"),
            Err(ApiError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            ZephyrClient::with_base_url("tok", "not a url"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            ZephyrClient::with_base_url("tok", "mailto:qa@example.com"),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_default_base_url_gets_trailing_slash() {
        let client = ZephyrClient::new("tok").unwrap();
        assert_eq!(
            client.base_url().as_str(),
            "https://api.zephyrscale.smartbear.com/v2/"
        );
        assert_eq!(client.config().base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_relative_urls_join_under_base_path() {
        let client = ZephyrClient::new("tok").unwrap();
        assert_eq!(
            client.resolve_url("testcases").unwrap().as_str(),
            "https://api.zephyrscale.smartbear.com/v2/testcases"
        );
        assert_eq!(
            client.resolve_url("/testcases/PROJ-T1").unwrap().as_str(),
            "https://api.zephyrscale.smartbear.com/v2/testcases/PROJ-T1"
        );
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        let client = ZephyrClient::new("tok").unwrap();
        assert_eq!(
            client
                .resolve_url("https://eu.api.zephyrscale.smartbear.com/v2/projects")
                .unwrap()
                .as_str(),
            "https://eu.api.zephyrscale.smartbear.com/v2/projects"
        );
    }

    #[test]
    fn test_from_profile_applies_retry_settings() {
        let profile = ResolvedProfile {
            name: "work".to_string(),
            base_url: "http://localhost:8080/v2".to_string(),
            token: "tok".to_string(),
            retry: zephyr_scale_config::RetrySettings {
                max_attempts: Some(2),
                idempotent_only: Some(true),
                ..Default::default()
            },
        };

        let client = ZephyrClient::from_profile(&profile).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8080/v2/");
        assert_eq!(client.retry_policy().max_attempts, 2);
        assert!(client.retry_policy().idempotent_only);
        assert_eq!(client.retry_policy().backoff_factor, 1.0);
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let client = ZephyrClient::new("tok123").unwrap();
        assert!(!format!("{client:?}").contains("tok123"));
    }

    #[test]
    fn test_invalid_header_name() {
        let headers = BTreeMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(matches!(
            header_map(&headers),
            Err(ApiError::InvalidHeader { name }) if name == "bad header"
        ));
    }
}

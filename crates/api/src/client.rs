use std::fmt;

pub use zephyr_scale_config::DEFAULT_BASE_URL;

/// Credentials and endpoint a [`crate::ZephyrClient`] is bound to.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    bearer_token: String,
    base_url: String,
}

impl ClientConfig {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self::with_base_url(bearer_token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(bearer_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            base_url: base_url.into(),
        }
    }

    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("bearer_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_cloud_url() {
        let config = ClientConfig::new("tok123");
        assert_eq!(config.base_url(), "https://api.zephyrscale.smartbear.com/v2");
        assert_eq!(config.bearer_token(), "tok123");
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", ClientConfig::new("tok123"));
        assert!(!debug.contains("tok123"));
    }
}

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Zephyr Scale Cloud API root used when neither the environment nor the
/// profile names one.
pub const DEFAULT_BASE_URL: &str = "https://api.zephyrscale.smartbear.com/v2";

/// Environment variable holding the token shared by every profile.
pub const TOKEN_ENV: &str = "ZEPHYR_SCALE_API_TOKEN";

/// Environment variable overriding the profile's base URL.
pub const BASE_URL_ENV: &str = "ZEPHYR_SCALE_BASE_URL";

/// Represents the full client configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Config {
    /// Load configuration from the provided path or the default config file.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let path = path
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or_else(Config::default_path);

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Unable to read config file at {}", path.display()))?;

        serde_yaml::from_str(&raw)
            .with_context(|| format!("Malformed YAML in config file {}", path.display()))
    }

    /// Persist the configuration to disk, creating parent directories if needed.
    pub fn save<P: AsRef<Path>>(&self, path: Option<P>) -> Result<()> {
        let path = path
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or_else(Config::default_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Unable to create config directory {}", parent.display())
            })?;
        }

        let serialized = serde_yaml::to_string(self)?;
        fs::write(&path, serialized)
            .with_context(|| format!("Unable to write config file {}", path.display()))?;

        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Returns either the requested profile or falls back to the default one,
    /// then to whichever profile is configured.
    pub fn resolve_profile<'a>(
        &'a self,
        requested: Option<&'a str>,
    ) -> Option<(&'a str, &'a Profile)> {
        if let Some(name) = requested {
            self.profiles.get(name).map(|profile| (name, profile))
        } else if let Some(default_name) = self.default_profile.as_deref() {
            self.profiles
                .get(default_name)
                .map(|profile| (default_name, profile))
        } else if let Some((name, profile)) = self.profiles.iter().next() {
            Some((name.as_str(), profile))
        } else {
            None
        }
    }

    /// Resolve the active profile against the process environment.
    pub fn resolve(&self, requested: Option<&str>) -> Result<ResolvedProfile> {
        self.resolve_with_env(requested, |key| std::env::var(key).ok())
    }

    /// Resolve the active profile, reading environment overrides through `env`.
    ///
    /// Token lookup order: `ZEPHYR_SCALE_TOKEN_<PROFILE>`, then
    /// `ZEPHYR_SCALE_API_TOKEN`, then the profile's `api_token`. Blank values
    /// are skipped. Without any configured profile the environment alone must
    /// provide the token.
    pub fn resolve_with_env<F>(&self, requested: Option<&str>, env: F) -> Result<ResolvedProfile>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let (name, profile) = match self.resolve_profile(requested) {
            Some((name, profile)) => (name.to_string(), Some(profile)),
            None if requested.is_some() => {
                return Err(anyhow!(
                    "Profile '{}' is not configured",
                    requested.unwrap_or_default()
                ));
            }
            None => ("default".to_string(), None),
        };

        let token = lookup(&token_env_var(&name))
            .or_else(|| lookup(TOKEN_ENV))
            .or_else(|| {
                profile
                    .and_then(|p| p.api_token.clone())
                    .filter(|t| !t.trim().is_empty())
            })
            .ok_or_else(|| {
                anyhow!(
                    "No API token found for profile '{name}'. Set {} or {TOKEN_ENV}, or add api_token to the profile",
                    token_env_var(&name)
                )
            })?;

        let base_url = lookup(BASE_URL_ENV)
            .or_else(|| {
                profile
                    .and_then(|p| p.base_url.clone())
                    .filter(|u| !u.trim().is_empty())
            })
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        debug!(profile = %name, base_url = %base_url, "Resolved profile");

        Ok(ResolvedProfile {
            name,
            base_url,
            token,
            retry: profile.and_then(|p| p.retry.clone()).unwrap_or_default(),
        })
    }

    fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".zephyr-scale");
        path.push("config.yaml");
        path
    }
}

/// Name of the profile-specific token variable, e.g. `ZEPHYR_SCALE_TOKEN_WORK`.
pub fn token_env_var(profile: &str) -> String {
    let suffix: String = profile
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("ZEPHYR_SCALE_TOKEN_{suffix}")
}

/// A single named connection profile. Values are optional so a profile can
/// lean on environment variables for its secrets.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,
}

/// Per-profile overrides for the dispatcher's retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RetrySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Seconds; the wait before retry `n` is `backoff_factor * 2^(n-1)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_only: Option<bool>,
}

/// Everything needed to build a client, after environment overrides.
#[derive(Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub base_url: String,
    pub token: String,
    pub retry: RetrySettings,
}

impl fmt::Debug for ResolvedProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProfile")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

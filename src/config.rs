//! Runtime configuration built from CLI arguments and environment.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cli::Args;
use crate::reconnect::PollSchedule;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("EVOLUTION_API_URL is not configured")]
    MissingBaseUrl,

    #[error("EVOLUTION_API_KEY is not configured")]
    MissingApiKey,
}

/// Gateway credentials held by the proxy. Never sent to the browser.
#[derive(Clone, Default)]
pub struct GatewayConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GatewayConfig {
    /// Return the base URL and key, treating blank values as missing.
    pub fn require(&self) -> Result<(&str, &str), ConfigError> {
        let base_url = non_blank(&self.base_url).ok_or(ConfigError::MissingBaseUrl)?;
        let api_key = non_blank(&self.api_key).ok_or(ConfigError::MissingApiKey)?;
        Ok((base_url, api_key))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Everything web mode needs to serve the proxy and the page
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub web_dir: Option<PathBuf>,
    pub gateway: GatewayConfig,
    pub schedule: PollSchedule,
}

impl ServerConfig {
    pub fn from_args(args: &Args, web_dir: Option<PathBuf>) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            web_dir,
            gateway: GatewayConfig {
                base_url: args.evolution_api_url.clone(),
                api_key: args.evolution_api_key.clone(),
            },
            schedule: schedule_from_args(args),
        }
    }
}

/// Poll cadence shared by both modes
pub fn schedule_from_args(args: &Args) -> PollSchedule {
    PollSchedule {
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
        qr_refresh_interval: Duration::from_secs(args.qr_refresh_interval.max(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_both_values() {
        let full = GatewayConfig {
            base_url: Some("https://gw.example.com".to_string()),
            api_key: Some("k".to_string()),
        };
        assert_eq!(full.require(), Ok(("https://gw.example.com", "k")));

        let no_url = GatewayConfig {
            base_url: None,
            api_key: Some("k".to_string()),
        };
        assert_eq!(no_url.require(), Err(ConfigError::MissingBaseUrl));

        let blank_key = GatewayConfig {
            base_url: Some("https://gw.example.com".to_string()),
            api_key: Some("  ".to_string()),
        };
        assert_eq!(blank_key.require(), Err(ConfigError::MissingApiKey));
    }

    #[test]
    fn test_debug_redacts_key() {
        let cfg = GatewayConfig {
            base_url: Some("https://gw.example.com".to_string()),
            api_key: Some("super-secret".to_string()),
        };
        assert!(!format!("{:?}", cfg).contains("super-secret"));
    }
}

use anyhow::{Context, Result, ensure};
use config_model::EndpointConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Service every request is relayed to.
    #[serde(default)]
    pub upstream: EndpointConfig,
    /// Browser origins allowed to call the relay with credentials. Empty disables CORS.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            upstream: EndpointConfig::default(),
            allowed_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let cfg: Config = serde_yaml::from_slice(&data)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validated(self) -> Result<Self> {
        self.upstream
            .validate()
            .context("invalid upstream configuration")?;
        ensure!(self.max_body_bytes > 0, "max-body-bytes must be greater than zero");
        ensure!(
            !self.request_timeout.is_zero(),
            "request-timeout must be greater than zero"
        );
        for origin in &self.allowed_origins {
            ensure!(
                origin.starts_with("http://") || origin.starts_with("https://"),
                "allowed origin {origin:?} must start with http:// or https://"
            );
        }
        Ok(self)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

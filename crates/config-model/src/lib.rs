use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://tools.qrplus.ai";
pub const DEFAULT_UPLOAD_PATH: &str = "/api/v1/uploadFile";
pub const DEFAULT_GENERATE_PATH: &str = "/api/v1/generate";

/// Location of the variant generation service.
///
/// Shared by the client (which calls it directly) and the relay (which
/// forwards browser traffic to it), so both read the same YAML block.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// Scheme + host (+ optional port and prefix) of the upstream origin.
    pub base_url: String,
    pub upload_path: String,
    /// Prefix under which `{fileId}/{target}` is appended.
    pub generate_path: String,
    /// Tolerate self-signed or otherwise invalid upstream certificates.
    pub accept_invalid_certs: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            upload_path: DEFAULT_UPLOAD_PATH.to_string(),
            generate_path: DEFAULT_GENERATE_PATH.to_string(),
            accept_invalid_certs: false,
        }
    }
}

impl EndpointConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.base()?;
        ensure!(
            matches!(base.scheme(), "http" | "https"),
            "endpoint.base-url must use http or https, got {}",
            base.scheme()
        );
        ensure!(
            self.upload_path.starts_with('/'),
            "endpoint.upload-path must start with '/'"
        );
        ensure!(
            self.generate_path.starts_with('/'),
            "endpoint.generate-path must start with '/'"
        );
        Ok(())
    }

    pub fn base(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .with_context(|| format!("endpoint.base-url {:?} is not a valid URL", self.base_url))
    }

    pub fn upload_url(&self) -> Result<Url> {
        self.join(&self.upload_path, &[])
    }

    /// `<base><generate-path>/{file_id}/{target}` with both segments percent-encoded.
    pub fn generate_url(&self, file_id: &str, target: &str) -> Result<Url> {
        self.join(&self.generate_path, &[file_id, target])
    }

    /// Maps a relay-local path (and optional query) onto the upstream origin unchanged.
    pub fn passthrough_url(&self, path: &str, query: Option<&str>) -> Result<Url> {
        let mut url = self.base()?;
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}{path}"));
        url.set_query(query);
        Ok(url)
    }

    fn join(&self, path: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.passthrough_url(path, None)?;
        if !segments.is_empty() {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| anyhow::anyhow!("endpoint.base-url cannot carry a path"))?;
            parts.pop_if_empty();
            parts.extend(segments);
        }
        Ok(url)
    }
}

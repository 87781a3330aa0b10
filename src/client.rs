//! HTTP exchanges with the variant generation service.

pub mod generate;
pub mod upload;

pub use generate::GenerateClient;
pub use upload::{UploadClient, UploadReceipt};

use anyhow::{Context, Result};
use config_model::EndpointConfig;

/// Shared connection pool for both exchanges.
pub fn http_client(endpoint: &EndpointConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(endpoint.accept_invalid_certs)
        .build()
        .context("failed to build HTTP client")
}

/// First part of an error body, enough for a log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 512;
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

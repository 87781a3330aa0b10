use std::time::Duration;

use config_model::EndpointConfig;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::codec::{self, RawVariant};
use crate::config::{Configuration, GenerateOptions};
use crate::error::{ClientError, DecodeFailure, TransportError};
use crate::events::{ImageHandle, NormalizedVariant, VariantMatrix};

/// Turns a handle plus a free-text target into a [`VariantMatrix`].
#[derive(Debug, Clone)]
pub struct GenerateClient {
    http: Client,
    endpoint: EndpointConfig,
    options: GenerateOptions,
}

impl GenerateClient {
    pub fn new(http: Client, endpoint: EndpointConfig, options: GenerateOptions) -> Self {
        Self {
            http,
            endpoint,
            options,
        }
    }

    pub fn from_config(http: Client, cfg: &Configuration) -> Self {
        Self::new(http, cfg.endpoint.clone(), cfg.generate.clone())
    }

    /// Target used when the caller supplies none (or only whitespace).
    pub fn resolve_target<'a>(&'a self, target: Option<&'a str>) -> &'a str {
        match target.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => &self.options.default_target,
        }
    }

    pub async fn generate(
        &self,
        handle: &ImageHandle,
        target: Option<&str>,
    ) -> Result<VariantMatrix, ClientError> {
        let target = self.resolve_target(target);
        let url = self
            .endpoint
            .generate_url(handle.as_str(), target)
            .map_err(|err| {
                ClientError::GenerateTransport(TransportError::Endpoint(format!("{err:#}")))
            })?;
        info!(%handle, %target, "requesting variants");

        let timeout = self.options.timeout;
        let exchange = async {
            let response = self
                .http
                .get(url)
                .header(ACCEPT, "application/json")
                .send()
                .await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };
        let (status, body) = match tokio::time::timeout(timeout, exchange).await {
            Err(_) => return Err(timed_out(timeout)),
            Ok(Err(err)) if err.is_timeout() => return Err(timed_out(timeout)),
            Ok(Err(err)) => return Err(ClientError::GenerateTransport(err.into())),
            Ok(Ok(reply)) => reply,
        };

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            warn!(%status, body = %super::truncate_body(&text), "generate rejected by server");
            return Err(ClientError::GenerateTransport(TransportError::Status {
                status,
                body: text.into_owned(),
            }));
        }

        let document: Value = serde_json::from_slice(&body).map_err(|err| {
            ClientError::GenerateIntegrity(format!("response is not JSON: {err}"))
        })?;
        let matrix = normalize_variants(document)?;
        info!(%handle, count = matrix.len(), "variants ready");
        Ok(matrix)
    }
}

fn timed_out(timeout: Duration) -> ClientError {
    ClientError::GenerateTransport(TransportError::Timeout(timeout))
}

/// Builds the matrix from a generate response document.
///
/// Undecodable entries are logged and dropped; the call only fails when the
/// document is not a non-empty array or nothing in it survives.
pub fn normalize_variants(document: Value) -> Result<VariantMatrix, ClientError> {
    let Value::Array(entries) = document else {
        return Err(ClientError::GenerateIntegrity(
            "response is not an array".into(),
        ));
    };
    if entries.is_empty() {
        return Err(ClientError::GenerateIntegrity(
            "response contains no variants".into(),
        ));
    }

    let received = entries.len();
    let mut variants = Vec::with_capacity(received);
    for (position, entry) in entries.into_iter().enumerate() {
        match decode_entry(entry) {
            Ok(variant) => variants.push(variant),
            Err(reason) => {
                warn!(position, kind = ?reason.kind(), %reason, "dropping undecodable variant")
            }
        }
    }

    if variants.is_empty() {
        return Err(ClientError::GenerateIntegrity(format!(
            "none of the {received} variants could be decoded"
        )));
    }
    if variants.len() < received {
        warn!(
            kept = variants.len(),
            dropped = received - variants.len(),
            "some variants were dropped"
        );
    }
    Ok(VariantMatrix::new(variants))
}

fn decode_entry(entry: Value) -> Result<NormalizedVariant, DecodeFailure> {
    let raw = RawVariant::deserialize(entry)
        .map_err(|err| DecodeFailure::MalformedRecord(err.to_string()))?;
    let image = codec::try_normalize(&raw.image_data)?;
    Ok(NormalizedVariant {
        settings: raw.settings,
        image,
    })
}

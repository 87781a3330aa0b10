use anyhow::{Context, anyhow};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::{self, RenderableImage};
use crate::config::{Configuration, UploadOptions};
use crate::error::{ClientError, TransportError};
use crate::events::ImageHandle;
use crate::processing::downscale::prepare_upload;

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub handle: ImageHandle,
    /// Server-side view of the uploaded image, when the response carries one.
    pub preview: Option<RenderableImage>,
    /// Dimensions of the bytes actually sent.
    pub width: u32,
    pub height: u32,
}

/// Only `fileId` is required; the preview fields are read loosely and
/// normalized afterwards, so a malformed preview cannot fail the upload.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "fileId")]
    file_id: Option<String>,
    #[serde(default)]
    contents: Option<Value>,
    #[serde(default, rename = "croppedImage")]
    cropped_image: Option<Value>,
}

/// Turns a local image into a server-side [`ImageHandle`].
///
/// One attempt per call; retrying is the caller's decision.
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: Client,
    url: Url,
    options: UploadOptions,
}

impl UploadClient {
    pub fn new(http: Client, url: Url, options: UploadOptions) -> Self {
        Self { http, url, options }
    }

    pub fn from_config(http: Client, cfg: &Configuration) -> anyhow::Result<Self> {
        let url = cfg
            .endpoint
            .upload_url()
            .context("failed to build upload URL")?;
        Ok(Self::new(http, url, cfg.upload.clone()))
    }

    pub async fn upload(
        &self,
        source: &[u8],
        mime_hint: Option<&str>,
    ) -> Result<UploadReceipt, ClientError> {
        let prepared = {
            let source = source.to_vec();
            let hint = mime_hint.map(str::to_owned);
            let max_dimension = self.options.max_dimension;
            let quality = self.options.jpeg_quality;
            tokio::task::spawn_blocking(move || {
                prepare_upload(&source, hint.as_deref(), max_dimension, quality)
            })
            .await
            .map_err(|err| ClientError::InvalidSource(anyhow!(err)))?
            .map_err(ClientError::InvalidSource)?
        };

        let part = Part::bytes(prepared.bytes)
            .file_name(self.options.file_name.clone())
            .mime_str("image/jpeg")
            .map_err(|err| ClientError::UploadTransport(err.into()))?;
        let form = Form::new().part(self.options.field_name.clone(), part);

        info!(
            url = %self.url,
            width = prepared.width,
            height = prepared.height,
            "uploading image"
        );
        let timeout = self.options.timeout;
        let exchange = async {
            let response = self
                .http
                .post(self.url.clone())
                .header(ACCEPT, "application/json")
                .multipart(form)
                .send()
                .await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(timeout, exchange).await {
            Err(_) => return Err(ClientError::UploadTimeout(timeout)),
            Ok(Err(err)) if err.is_timeout() => return Err(ClientError::UploadTimeout(timeout)),
            Ok(Err(err)) => return Err(ClientError::UploadTransport(err.into())),
            Ok(Ok(reply)) => reply,
        };

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            warn!(%status, body = %super::truncate_body(&text), "upload rejected by server");
            return Err(ClientError::UploadTransport(TransportError::Status {
                status,
                body: text.into_owned(),
            }));
        }

        let parsed: UploadResponse = serde_json::from_slice(&body).map_err(|err| {
            ClientError::UploadIntegrity(format!("response is not the expected JSON object: {err}"))
        })?;
        let handle = parsed
            .file_id
            .and_then(ImageHandle::new)
            .ok_or_else(|| ClientError::UploadIntegrity("response is missing fileId".into()))?;

        let preview = [parsed.contents, parsed.cropped_image]
            .into_iter()
            .flatten()
            .find_map(codec::normalize_value);
        if preview.is_none() {
            debug!(%handle, "upload response carries no usable preview");
        }
        info!(%handle, "upload accepted");

        Ok(UploadReceipt {
            handle,
            preview,
            width: prepared.width,
            height: prepared.height,
        })
    }
}

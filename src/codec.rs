//! Normalization of upstream image payloads.
//!
//! The generation service returns variant images in several encodings. They
//! all collapse into one [`RenderableImage`], a JPEG data URI, so nothing
//! downstream needs to know where a payload came from.

use std::fmt;
use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderStringWriter;
use serde::Deserialize;

use crate::error::DecodeFailure;
use crate::events::VariantSetting;

pub const CANONICAL_MIME: &str = "image/jpeg";
const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";
const BUFFER_CHUNK_BYTES: usize = 1024;

/// An image payload as received from upstream.
///
/// Shape detection happens once, at deserialization. Anything unrecognized
/// lands in `Unrecognized` instead of failing the surrounding document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPayload {
    /// `{ "type": "Buffer", "data": [bytes...] }`
    Buffer {
        #[serde(rename = "type")]
        tag: BufferTag,
        data: Vec<u8>,
    },
    /// `{ "Data": "<base64>" }`
    Data {
        #[serde(rename = "Data")]
        data: String,
    },
    /// Bare base64, or a full `data:image/...;base64,` URI.
    Text(String),
    Unrecognized(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BufferTag {
    Buffer,
}

/// One upstream variant record before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVariant {
    pub settings: VariantSetting,
    #[serde(rename = "imageData")]
    pub image_data: RawPayload,
}

/// A decodable image exposed as a `data:image/jpeg;base64,...` URI.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderableImage {
    uri: String,
}

impl RenderableImage {
    fn from_base64(payload: &str) -> Self {
        let mut uri = String::with_capacity(DATA_URI_PREFIX.len() + payload.len());
        uri.push_str(DATA_URI_PREFIX);
        uri.push_str(payload);
        Self { uri }
    }

    pub fn mime(&self) -> &'static str {
        CANONICAL_MIME
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The base64 part of the URI.
    pub fn payload(&self) -> &str {
        &self.uri[DATA_URI_PREFIX.len()..]
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.payload())
    }
}

impl fmt::Debug for RenderableImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderableImage")
            .field("mime", &CANONICAL_MIME)
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// Normalizes any known payload shape, or `None` when it cannot be decoded.
pub fn normalize(raw: &RawPayload) -> Option<RenderableImage> {
    try_normalize(raw).ok()
}

/// Like [`normalize`], but reports why a payload was rejected.
pub fn try_normalize(raw: &RawPayload) -> Result<RenderableImage, DecodeFailure> {
    match raw {
        RawPayload::Buffer { data, .. } => from_bytes(data),
        RawPayload::Data { data } => from_base64(data),
        RawPayload::Text(text) => from_base64(strip_data_uri_prefix(text)),
        RawPayload::Unrecognized(_) => Err(DecodeFailure::UnrecognizedShape),
    }
}

/// Normalizes an arbitrary JSON value, detecting its shape first.
pub fn normalize_value(value: serde_json::Value) -> Option<RenderableImage> {
    match RawPayload::deserialize(value) {
        Ok(raw) => normalize(&raw),
        Err(_) => None,
    }
}

fn from_bytes(bytes: &[u8]) -> Result<RenderableImage, DecodeFailure> {
    if bytes.is_empty() {
        return Err(DecodeFailure::EmptyPayload);
    }
    // streamed in fixed chunks; the writer carries partial groups across writes
    let mut encoder = EncoderStringWriter::new(&STANDARD);
    for chunk in bytes.chunks(BUFFER_CHUNK_BYTES) {
        encoder
            .write_all(chunk)
            .map_err(|err| DecodeFailure::MalformedRecord(err.to_string()))?;
    }
    Ok(RenderableImage::from_base64(&encoder.into_inner()))
}

fn from_base64(payload: &str) -> Result<RenderableImage, DecodeFailure> {
    let compact: String;
    let payload = if payload.bytes().any(|b| b.is_ascii_whitespace()) {
        compact = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        compact.as_str()
    } else {
        payload
    };
    if payload.is_empty() {
        return Err(DecodeFailure::EmptyPayload);
    }
    let decoded = STANDARD.decode(payload)?;
    if decoded.is_empty() {
        return Err(DecodeFailure::EmptyPayload);
    }
    Ok(RenderableImage::from_base64(payload))
}

/// Removes a leading `data:image/<word>;base64,` if present.
fn strip_data_uri_prefix(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("data:image/") else {
        return text;
    };
    let Some((subtype, payload)) = rest.split_once(";base64,") else {
        return text;
    };
    let is_word = !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_word { payload } else { text }
}

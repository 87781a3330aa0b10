use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Stable classification of client failures, cheap to copy across channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UploadTimeout,
    UploadTransportFailure,
    UploadIntegrityFailure,
    GenerateTransportFailure,
    GenerateIntegrityFailure,
    /// One variant payload was unreadable. Logged per entry when the entry is
    /// dropped; never reported as a session failure on its own.
    DecodeFailure,
    /// A generate call was requested before any upload produced a handle.
    MissingHandle,
    /// The source bytes could not be decoded as an image before upload.
    InvalidSource,
}

/// Library error type for the upload/generate exchanges.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The upload did not complete within the configured bound.
    #[error("upload timed out after {0:?}")]
    UploadTimeout(Duration),

    #[error("upload failed: {0}")]
    UploadTransport(#[source] TransportError),

    /// The upload endpoint answered, but not with the expected contract.
    #[error("upload response rejected: {0}")]
    UploadIntegrity(String),

    #[error("generate failed: {0}")]
    GenerateTransport(#[source] TransportError),

    /// Non-array, empty, or fully undecodable variant list.
    #[error("generate response rejected: {0}")]
    GenerateIntegrity(String),

    #[error("no image handle; upload an image before generating variants")]
    MissingHandle,

    #[error("source image could not be prepared for upload: {0}")]
    InvalidSource(#[source] anyhow::Error),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::UploadTimeout(_) => ErrorKind::UploadTimeout,
            ClientError::UploadTransport(_) => ErrorKind::UploadTransportFailure,
            ClientError::UploadIntegrity(_) => ErrorKind::UploadIntegrityFailure,
            ClientError::GenerateTransport(_) => ErrorKind::GenerateTransportFailure,
            ClientError::GenerateIntegrity(_) => ErrorKind::GenerateIntegrityFailure,
            ClientError::MissingHandle => ErrorKind::MissingHandle,
            ClientError::InvalidSource(_) => ErrorKind::InvalidSource,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("upstream answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot build request URL: {0}")]
    Endpoint(String),
}

/// Why a single upstream variant payload was dropped.
///
/// Never fatal on its own; the generate exchange logs it and moves on.
#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("payload matches none of the known image shapes")]
    UnrecognizedShape,

    #[error("payload is empty")]
    EmptyPayload,

    #[error("payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("variant record is malformed: {0}")]
    MalformedRecord(String),
}

impl DecodeFailure {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DecodeFailure
    }
}

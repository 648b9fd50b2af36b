//! Error types for courier.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Every failure a transfer can end with.
///
/// Construction failures are returned as `Err` before anything reaches the
/// transport. Everything else ends up on the response, after the retry
/// policy had its say.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("request construction failed: {0}")]
    RequestConstruction(#[from] ConstructionFailure),

    #[error("response validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("response serialization failed: {0}")]
    Serialization(#[from] SerializationFailure),

    #[error("multipart encoding failed: {0}")]
    Multipart(#[from] courier_multipart::Error),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("session invalidated: {}", .0.as_deref().unwrap_or("no reason given"))]
    SessionInvalidated(Option<String>),

    #[error("file operation on {} failed: {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not start async runtime: {0}")]
    Runtime(#[source] Arc<io::Error>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionFailure {
    #[error("missing URL")]
    MissingUrl,

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("missing HTTP method")]
    MissingMethod,

    #[error("JSON parameter encoding failed: {0}")]
    JsonEncodingFailed(String),

    #[error("resume data at {} is unreadable: {reason}", path.display())]
    ResumeDataUnreadable { path: PathBuf, reason: String },

    #[error("middleware turned a {expected} response into a {actual} response")]
    ResponseKindMismatch {
        expected: &'static str,
        actual:   &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("unacceptable status code {0}")]
    UnacceptableStatusCode(u16),

    #[error("missing content type, expected one of {acceptable:?}")]
    MissingContentType { acceptable: Vec<String> },

    #[error("unacceptable content type `{actual}`, expected one of {acceptable:?}")]
    UnacceptableContentType {
        acceptable: Vec<String>,
        actual:     String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationFailure {
    #[error("response data is nil or zero length")]
    InputDataNilOrZeroLength,

    #[error("download produced no file")]
    InputFileNil,

    #[error("downloaded file {} could not be read", .0.display())]
    InputFileReadFailed(PathBuf),

    #[error("JSON decoding failed: {0}")]
    JsonSerializationFailed(String),
}

/// A failure reported by the transport itself.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("cancelled")]
    Cancelled,

    #[error("timed out")]
    TimedOut,

    #[error("server trust evaluation failed for {host}")]
    ServerTrustRejected { host: String },

    #[error("network error: {0}")]
    Network(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn network(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        TransportError::Network(Arc::new(error))
    }
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path:   path.into(),
            source: Arc::new(source),
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, Error::Transport(TransportError::Cancelled)) }

    /// A trust policy refused the server. Retrying asks the same policy again.
    pub fn is_trust_rejected(&self) -> bool {
        matches!(self, Error::Transport(TransportError::ServerTrustRejected { .. }))
    }

    /// True for failures that never reached the transport.
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::RequestConstruction(_) | Error::Multipart(_))
    }

    /// The rejected status code, for validation failures.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Validation(ValidationFailure::UnacceptableStatusCode(code)) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

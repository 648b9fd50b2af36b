//! Error types for courier-multipart.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Failures raised when a form is encoded.
///
/// Appending never fails by itself: invalid inputs are remembered and the
/// first one is returned by [`encode`](crate::MultipartFormData::encode) or
/// [`write_encoded_data`](crate::MultipartFormData::write_encoded_data).
/// I/O errors are shared behind `Arc` so the error stays `Clone`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("no usable file name in {}", .0.display())]
    FilenameInvalid(PathBuf),

    #[error("file not reachable: {}", .0.display())]
    FileNotReachable(PathBuf),

    #[error("failed to check reachability of {}: {source}", path.display())]
    FileNotReachableWithError {
        path:   PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("path is a directory: {}", .0.display())]
    FileIsDirectory(PathBuf),

    #[error("could not determine size of {}: {source}", path.display())]
    FileSizeUnavailable {
        path:   PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("could not open input stream for {}: {source}", path.display())]
    InputStreamCreationFailed {
        path:   PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("input stream was already consumed by a previous encode")]
    InputStreamConsumed,

    #[error("input stream read failed: {0}")]
    InputStreamReadFailed(#[source] Arc<io::Error>),

    #[error("input stream yielded {actual} bytes, expected {expected}")]
    InputStreamLengthMismatch { expected: u64, actual: u64 },

    #[error("output file already exists: {}", .0.display())]
    OutputFileAlreadyExists(PathBuf),

    #[error("output path has no file name: {}", .0.display())]
    OutputPathInvalid(PathBuf),

    #[error("could not create output file {}: {source}", path.display())]
    OutputStreamCreationFailed {
        path:   PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("output stream write failed: {0}")]
    OutputStreamWriteFailed(#[source] Arc<io::Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Resume data produced by the bundled transports.
///
/// Callers treat it as opaque bytes. It is JSON so it survives being written
/// to disk and handed back through `Session::download_resuming_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    pub url:          String,
    pub partial_path: PathBuf,
    pub offset:       u64,

    /// `ETag` or `Last-Modified` of the original response, sent back as `If-Range`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

impl ResumeData {
    pub fn to_bytes(&self) -> Bytes {
        // Serializing a struct of strings and integers cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> { serde_json::from_slice(bytes).ok() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_round_trip() {
        let data = ResumeData {
            url:          "https://example.com/file.bin".to_string(),
            partial_path: PathBuf::from("/tmp/courier.download/abc.part"),
            offset:       4096,
            validator:    Some("\"etag\"".to_string()),
        };
        assert_eq!(ResumeData::from_bytes(&data.to_bytes()), Some(data));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(ResumeData::from_bytes(b"not json"), None);
    }
}

use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use bytes::Bytes;

use crate::boundary::CRLF;

pub(crate) enum Source {
    Bytes(Bytes),
    File(PathBuf),
    /// Taken on first encode.
    Reader(Option<Box<dyn Read + Send>>),
}

/// One named section of a multipart body.
pub struct BodyPart {
    headers:                     Vec<(String, String)>,
    pub(crate) source:           Source,
    content_length:              u64,
    pub(crate) has_initial_boundary: bool,
    pub(crate) has_final_boundary:   bool,
}

impl BodyPart {
    pub(crate) fn new(headers: Vec<(String, String)>, source: Source, content_length: u64) -> Self {
        Self {
            headers,
            source,
            content_length,
            has_initial_boundary: false,
            has_final_boundary: false,
        }
    }

    pub fn headers(&self) -> &[(String, String)] { &self.headers }

    /// Payload size in bytes, headers and boundaries excluded.
    pub fn content_length(&self) -> u64 { self.content_length }

    pub fn has_initial_boundary(&self) -> bool { self.has_initial_boundary }

    pub fn has_final_boundary(&self) -> bool { self.has_final_boundary }

    /// Header block: one `Name: value\r\n` line per header, then an empty line.
    pub(crate) fn encoded_headers(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str(CRLF);
        }
        out.push_str(CRLF);
        out
    }
}

impl fmt::Debug for BodyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Bytes(_) => "bytes",
            Source::File(_) => "file",
            Source::Reader(_) => "reader",
        };
        f.debug_struct("BodyPart")
            .field("headers", &self.headers)
            .field("source", &source)
            .field("content_length", &self.content_length)
            .field("has_initial_boundary", &self.has_initial_boundary)
            .field("has_final_boundary", &self.has_final_boundary)
            .finish()
    }
}

/// Builds the `Content-Disposition` / `Content-Type` header pair for a part.
pub(crate) fn content_headers(
    name: &str,
    file_name: Option<&str>,
    mime_type: Option<&str>,
) -> Vec<(String, String)> {
    let mut disposition = format!("form-data; name=\"{name}\"");
    if let Some(file_name) = file_name {
        disposition.push_str(&format!("; filename=\"{file_name}\""));
    }

    let mut headers = vec![("Content-Disposition".to_string(), disposition)];
    if let Some(mime_type) = mime_type {
        headers.push(("Content-Type".to_string(), mime_type.to_string()));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_headers() {
        let headers = content_headers("avatar", Some("me.png"), Some("image/png"));
        assert_eq!(
            headers,
            vec![
                (
                    "Content-Disposition".to_string(),
                    "form-data; name=\"avatar\"; filename=\"me.png\"".to_string()
                ),
                ("Content-Type".to_string(), "image/png".to_string()),
            ]
        );

        let headers = content_headers("field", None, None);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].1, "form-data; name=\"field\"");
    }

    #[test]
    fn test_encoded_headers() {
        let part = BodyPart::new(
            content_headers("a", None, Some("text/plain")),
            Source::Bytes(Bytes::from_static(b"x")),
            1,
        );
        assert_eq!(
            part.encoded_headers(),
            "Content-Disposition: form-data; name=\"a\"\r\nContent-Type: text/plain\r\n\r\n"
        );
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::body_part::{BodyPart, Source, content_headers};
use crate::boundary::{BoundaryKind, boundary_marker, random_boundary};
use crate::error::{Error, Result};

/// Chunk size used when streaming file and reader payloads.
pub const STREAM_BUFFER_SIZE: usize = 1024;

/// A `multipart/form-data` body under construction.
///
/// Parts are kept in append order. Nothing is read from disk until the form
/// is encoded, either fully in memory with [`encode`](Self::encode) or
/// streamed into a new file with [`write_encoded_data`](Self::write_encoded_data).
///
/// # Examples
///
/// ```
/// use courier_multipart::MultipartFormData;
///
/// let mut form = MultipartFormData::with_boundary("b");
/// form.append_data("hello", "greeting");
///
/// let body = form.encode().unwrap();
/// assert_eq!(
///     body,
///     b"--b\r\nContent-Disposition: form-data; name=\"greeting\"\r\n\r\nhello\r\n--b--\r\n"
/// );
/// ```
#[derive(Debug)]
pub struct MultipartFormData {
    boundary:    String,
    parts:       Vec<BodyPart>,
    first_error: OnceCell<Error>,
}

impl Default for MultipartFormData {
    fn default() -> Self { Self::new() }
}

impl MultipartFormData {
    pub fn new() -> Self { Self::with_boundary(random_boundary()) }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary:    boundary.into(),
            parts:       Vec::new(),
            first_error: OnceCell::new(),
        }
    }

    pub fn boundary(&self) -> &str { &self.boundary }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Sum of the part payload sizes. Boundaries and part headers are not counted.
    pub fn content_length(&self) -> u64 { self.parts.iter().map(BodyPart::content_length).sum() }

    /// Exact size of the encoded body, boundaries and part headers included.
    pub fn encoded_length(&self) -> u64 {
        let count = self.parts.len();
        self.parts
            .iter()
            .enumerate()
            .map(|(index, part)| {
                let kind = if index == 0 {
                    BoundaryKind::Initial
                } else {
                    BoundaryKind::Encapsulated
                };
                let mut len = boundary_marker(kind, &self.boundary).len() as u64
                    + part.encoded_headers().len() as u64
                    + part.content_length();
                if index + 1 == count {
                    len += boundary_marker(BoundaryKind::Final, &self.boundary).len() as u64;
                }
                len
            })
            .sum()
    }

    pub fn parts(&self) -> &[BodyPart] { &self.parts }

    pub fn is_empty(&self) -> bool { self.parts.is_empty() }

    /// The first append failure, if any. Later failures are dropped.
    pub fn first_error(&self) -> Option<&Error> { self.first_error.get() }

    pub fn append_data(&mut self, data: impl Into<Bytes>, name: &str) {
        self.append_bytes(data.into(), name, None, None);
    }

    pub fn append_data_with_mime(&mut self, data: impl Into<Bytes>, name: &str, mime_type: &str) {
        self.append_bytes(data.into(), name, None, Some(mime_type));
    }

    pub fn append_data_file(
        &mut self,
        data: impl Into<Bytes>,
        name: &str,
        file_name: &str,
        mime_type: &str,
    ) {
        self.append_bytes(data.into(), name, Some(file_name), Some(mime_type));
    }

    /// Append a file, deriving the filename from the last path component and
    /// the mime type from its extension.
    pub fn append_file(&mut self, path: impl AsRef<Path>, name: &str) {
        let path = path.as_ref();
        let file_name = path.file_name().and_then(|n| n.to_str()).filter(|n| !n.is_empty());
        let extension = path.extension().and_then(|e| e.to_str()).filter(|e| !e.is_empty());

        let (Some(file_name), Some(extension)) = (file_name, extension) else {
            self.record_error(Error::FilenameInvalid(path.to_path_buf()));
            return;
        };

        let mime = mime_guess::from_ext(extension).first_or_octet_stream();
        self.append_file_with(path, name, file_name, mime.essence_str());
    }

    pub fn append_file_with(
        &mut self,
        path: impl AsRef<Path>,
        name: &str,
        file_name: &str,
        mime_type: &str,
    ) {
        let path = path.as_ref();

        match path.try_exists() {
            Ok(true) => {}
            Ok(false) => {
                self.record_error(Error::FileNotReachable(path.to_path_buf()));
                return;
            }
            Err(source) => {
                self.record_error(Error::FileNotReachableWithError {
                    path:   path.to_path_buf(),
                    source: Arc::new(source),
                });
                return;
            }
        }

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(source) => {
                self.record_error(Error::FileSizeUnavailable {
                    path:   path.to_path_buf(),
                    source: Arc::new(source),
                });
                return;
            }
        };

        if metadata.is_dir() {
            self.record_error(Error::FileIsDirectory(path.to_path_buf()));
            return;
        }

        self.parts.push(BodyPart::new(
            content_headers(name, Some(file_name), Some(mime_type)),
            Source::File(path.to_path_buf()),
            metadata.len(),
        ));
    }

    /// Append a payload read from `reader`, which must yield exactly `length` bytes.
    ///
    /// The reader is consumed by the first encode.
    pub fn append_reader(
        &mut self,
        reader: impl Read + Send + 'static,
        length: u64,
        name: &str,
        file_name: &str,
        mime_type: &str,
    ) {
        self.parts.push(BodyPart::new(
            content_headers(name, Some(file_name), Some(mime_type)),
            Source::Reader(Some(Box::new(reader))),
            length,
        ));
    }

    /// Encode the whole body into memory.
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        self.check_first_error()?;

        let capacity = usize::try_from(self.encoded_length()).unwrap_or(0);
        let mut out = Vec::with_capacity(capacity);
        self.write_parts(&mut out)?;
        Ok(out)
    }

    /// Stream the encoded body into a new file at `path`.
    ///
    /// Fails with [`Error::OutputFileAlreadyExists`] rather than overwrite.
    pub fn write_encoded_data(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.check_first_error()?;

        if path.file_name().is_none() {
            return Err(Error::OutputPathInvalid(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::AlreadyExists => Error::OutputFileAlreadyExists(path.to_path_buf()),
                _ => Error::OutputStreamCreationFailed {
                    path:   path.to_path_buf(),
                    source: Arc::new(source),
                },
            })?;

        let mut writer = BufWriter::with_capacity(STREAM_BUFFER_SIZE, file);
        self.write_parts(&mut writer)?;
        writer
            .flush()
            .map_err(|e| Error::OutputStreamWriteFailed(Arc::new(e)))?;

        debug!(path = %path.display(), parts = self.parts.len(), "wrote multipart body");
        Ok(())
    }

    fn append_bytes(&mut self, data: Bytes, name: &str, file_name: Option<&str>, mime_type: Option<&str>) {
        let length = data.len() as u64;
        self.parts.push(BodyPart::new(
            content_headers(name, file_name, mime_type),
            Source::Bytes(data),
            length,
        ));
    }

    fn record_error(&self, error: Error) {
        debug!(%error, "multipart append failed");
        let _ = self.first_error.set(error);
    }

    fn check_first_error(&self) -> Result<()> {
        match self.first_error.get() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn write_parts(&mut self, out: &mut impl Write) -> Result<()> {
        let count = self.parts.len();
        for (index, part) in self.parts.iter_mut().enumerate() {
            part.has_initial_boundary = index == 0;
            part.has_final_boundary = index + 1 == count;
        }

        let boundary = &self.boundary;
        for part in &mut self.parts {
            let kind = if part.has_initial_boundary {
                BoundaryKind::Initial
            } else {
                BoundaryKind::Encapsulated
            };
            write_all(out, boundary_marker(kind, boundary).as_bytes())?;
            write_all(out, part.encoded_headers().as_bytes())?;
            write_payload(part, out)?;
            if part.has_final_boundary {
                write_all(out, boundary_marker(BoundaryKind::Final, boundary).as_bytes())?;
            }
        }
        Ok(())
    }
}

fn write_payload(part: &mut BodyPart, out: &mut impl Write) -> Result<()> {
    let expected = part.content_length();
    match &mut part.source {
        Source::Bytes(bytes) => write_all(out, &bytes[..]),
        Source::File(path) => {
            let file = File::open(&*path).map_err(|source| Error::InputStreamCreationFailed {
                path:   path.clone(),
                source: Arc::new(source),
            })?;
            copy_stream(file, out, expected)
        }
        Source::Reader(reader) => {
            let reader = reader.take().ok_or(Error::InputStreamConsumed)?;
            copy_stream(reader, out, expected)
        }
    }
}

fn copy_stream(mut input: impl Read, out: &mut impl Write, expected: u64) -> Result<()> {
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let read = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::InputStreamReadFailed(Arc::new(e))),
        };
        write_all(out, &buffer[..read])?;
        written += read as u64;
    }

    if written != expected {
        return Err(Error::InputStreamLengthMismatch {
            expected,
            actual: written,
        });
    }
    Ok(())
}

fn write_all(out: &mut impl Write, bytes: &[u8]) -> Result<()> {
    out.write_all(bytes)
        .map_err(|e| Error::OutputStreamWriteFailed(Arc::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_exact_layout_two_parts() {
        let mut form = MultipartFormData::with_boundary("XyZ");
        form.append_data("one", "a");
        form.append_data_file("two", "b", "b.txt", "text/plain");

        let body = form.encode().unwrap();
        let expected = concat!(
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"a\"\r\n",
            "\r\n",
            "one",
            "\r\n--XyZ\r\n",
            "Content-Disposition: form-data; name=\"b\"; filename=\"b.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "two",
            "\r\n--XyZ--\r\n",
        );
        assert_eq!(String::from_utf8(body.clone()).unwrap(), expected);
        assert_eq!(form.encoded_length(), body.len() as u64);
        assert_eq!(form.content_length(), 6);
    }

    #[test]
    fn test_boundary_flags_for_any_part_count() {
        for count in 1..=6 {
            let mut form = MultipartFormData::new();
            for i in 0..count {
                form.append_data(vec![b'x'; i], &format!("part{i}"));
            }
            form.encode().unwrap();

            let parts = form.parts();
            assert_eq!(parts.iter().filter(|p| p.has_initial_boundary()).count(), 1);
            assert_eq!(parts.iter().filter(|p| p.has_final_boundary()).count(), 1);
            assert!(parts[0].has_initial_boundary());
            assert!(parts[count - 1].has_final_boundary());
        }
    }

    #[test]
    fn test_empty_form_encodes_nothing() {
        let mut form = MultipartFormData::new();
        assert!(form.is_empty());
        assert!(form.encode().unwrap().is_empty());
        assert_eq!(form.encoded_length(), 0);
    }

    #[test]
    fn test_content_type() {
        let form = MultipartFormData::with_boundary("abc");
        assert_eq!(form.content_type(), "multipart/form-data; boundary=abc");
    }

    #[test]
    fn test_first_error_wins() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.txt");

        let mut form = MultipartFormData::new();
        form.append_file(&missing, "first");
        form.append_file(dir.path(), "second");
        form.append_data("ok", "third");

        assert!(matches!(form.first_error(), Some(Error::FileNotReachable(p)) if *p == missing));
        assert_eq!(form.parts().len(), 1);
        assert!(matches!(form.encode(), Err(Error::FileNotReachable(_))));
        assert!(matches!(
            form.write_encoded_data(dir.path().join("out")),
            Err(Error::FileNotReachable(_))
        ));
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("folder.d");
        fs::create_dir(&sub).unwrap();

        let mut form = MultipartFormData::new();
        form.append_file(&sub, "dir");
        assert!(matches!(form.first_error(), Some(Error::FileIsDirectory(_))));
    }

    #[test]
    fn test_filename_without_extension_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("README");
        fs::write(&path, b"text").unwrap();

        let mut form = MultipartFormData::new();
        form.append_file(&path, "readme");
        assert!(matches!(form.first_error(), Some(Error::FilenameInvalid(_))));
    }

    #[test]
    fn test_append_file_derives_name_and_mime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        fs::write(&path, [0u8; 10]).unwrap();

        let mut form = MultipartFormData::new();
        form.append_file(&path, "avatar");

        let part = &form.parts()[0];
        assert_eq!(part.content_length(), 10);
        assert_eq!(
            part.headers()[0].1,
            "form-data; name=\"avatar\"; filename=\"avatar.png\""
        );
        assert_eq!(part.headers()[1], ("Content-Type".to_string(), "image/png".to_string()));
    }

    #[test]
    fn test_reader_length_mismatch() {
        let mut form = MultipartFormData::new();
        form.append_reader(Cursor::new(vec![1u8; 5]), 8, "blob", "blob.bin", "application/octet-stream");

        assert!(matches!(
            form.encode(),
            Err(Error::InputStreamLengthMismatch { expected: 8, actual: 5 })
        ));
    }

    #[test]
    fn test_reader_is_consumed_once() {
        let mut form = MultipartFormData::new();
        form.append_reader(Cursor::new(vec![1u8; 3]), 3, "blob", "blob.bin", "application/octet-stream");

        assert!(form.encode().is_ok());
        assert!(matches!(form.encode(), Err(Error::InputStreamConsumed)));
    }

    #[test]
    fn test_write_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("body");
        fs::write(&out, b"taken").unwrap();

        let mut form = MultipartFormData::new();
        form.append_data("x", "x");
        assert!(matches!(
            form.write_encoded_data(&out),
            Err(Error::OutputFileAlreadyExists(_))
        ));
        assert_eq!(fs::read(&out).unwrap(), b"taken");
    }

    #[test]
    fn test_large_payload_streams_in_chunks() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("big.bin");
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&input, &payload).unwrap();

        let mut form = MultipartFormData::with_boundary("q");
        form.append_file(&input, "big");

        let out = dir.path().join("encoded");
        form.write_encoded_data(&out).unwrap();

        let written = fs::read(&out).unwrap();
        assert_eq!(written.len() as u64, form.encoded_length());
        assert!(written.windows(payload.len()).any(|w| w == payload.as_slice()));
    }
}

use std::path::PathBuf;

use bytes::Bytes;

use crate::data::{Method, ResponseHead};
use crate::error::{Error, Result, SerializationFailure, ValidationFailure};

/// Returns `true` if the HTTP status code is accepted as a success.
///
/// # Examples
///
/// ```
/// use courier::core::is_acceptable_status;
///
/// assert!(is_acceptable_status(200));
/// assert!(is_acceptable_status(299));
/// assert!(!is_acceptable_status(304));
/// assert!(!is_acceptable_status(503));
/// ```
pub fn is_acceptable_status(status: u16) -> bool { (200..=299).contains(&status) }

/// Returns `true` for statuses that carry no body by definition.
pub fn is_empty_body_status(status: u16) -> bool { matches!(status, 204 | 205) }

pub fn validate_status(head: &ResponseHead) -> Result<()> {
    if is_acceptable_status(head.status) {
        Ok(())
    } else {
        Err(ValidationFailure::UnacceptableStatusCode(head.status).into())
    }
}

/// Check the response MIME type against `acceptable`.
///
/// Entries may use wildcards (`*/*`, `text/*`). An empty body with no
/// `Content-Type` is accepted.
pub fn validate_content_type(head: &ResponseHead, acceptable: &[&str], data: Option<&Bytes>) -> Result<()> {
    let acceptable_owned = || acceptable.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let Some(actual) = head.mime_type() else {
        if data.is_none_or(|d| d.is_empty()) {
            return Ok(());
        }
        return Err(ValidationFailure::MissingContentType {
            acceptable: acceptable_owned(),
        }
        .into());
    };

    let matches = acceptable.iter().any(|pattern| mime_matches(pattern, &actual));
    if matches {
        Ok(())
    } else {
        Err(ValidationFailure::UnacceptableContentType {
            acceptable: acceptable_owned(),
            actual,
        }
        .into())
    }
}

fn mime_matches(pattern: &str, actual: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    if pattern == "*/*" || pattern == "*" {
        return true;
    }
    match (pattern.split_once('/'), actual.split_once('/')) {
        (Some((p_type, p_sub)), Some((a_type, a_sub))) => {
            p_type == a_type && (p_sub == "*" || p_sub == a_sub)
        }
        _ => false,
    }
}

/// Turn the raw outcome of a data task into the response result.
///
/// Transport errors win, then status validation. 204, 205 and HEAD requests
/// succeed with an empty body; any other success without data is an error.
pub fn serialize_data(
    method: Method,
    head: Option<&ResponseHead>,
    data: Option<&Bytes>,
    error: Option<&Error>,
) -> Result<Bytes> {
    if let Some(error) = error {
        return Err(error.clone());
    }

    if let Some(head) = head {
        validate_status(head)?;
        if is_empty_body_status(head.status) {
            return Ok(Bytes::new());
        }
    }

    match data.filter(|data| !data.is_empty()) {
        Some(data) => Ok(data.clone()),
        None if method == Method::Head => Ok(Bytes::new()),
        None => Err(SerializationFailure::InputDataNilOrZeroLength.into()),
    }
}

/// Turn the raw outcome of a download task into the response result.
pub fn serialize_download(head: Option<&ResponseHead>, file: Option<&PathBuf>, error: Option<&Error>) -> Result<PathBuf> {
    if let Some(error) = error {
        return Err(error.clone());
    }

    if let Some(head) = head {
        validate_status(head)?;
    }

    let file = file.ok_or(SerializationFailure::InputFileNil)?;
    if file.exists() {
        Ok(file.clone())
    } else {
        Err(SerializationFailure::InputFileReadFailed(file.clone()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Headers;
    use crate::error::TransportError;
    use url::Url;

    fn head(status: u16, content_type: Option<&str>) -> ResponseHead {
        let mut headers = Headers::new();
        if let Some(value) = content_type {
            headers.insert("Content-Type", value);
        }
        ResponseHead::new(Url::parse("https://example.com/").unwrap(), status, headers)
    }

    #[test]
    fn test_status_ranges() {
        assert!(is_acceptable_status(200));
        assert!(is_acceptable_status(204));
        assert!(!is_acceptable_status(199));
        assert!(!is_acceptable_status(300));
        assert!(!is_acceptable_status(404));
    }

    #[test]
    fn test_empty_body_statuses() {
        assert!(is_empty_body_status(204));
        assert!(is_empty_body_status(205));
        assert!(!is_empty_body_status(200));
    }

    #[test]
    fn test_no_content_succeeds_without_data() {
        let result = serialize_data(Method::Get, Some(&head(204, None)), None, None);
        assert_eq!(result.unwrap(), Bytes::new());

        let result = serialize_data(Method::Get, Some(&head(205, None)), Some(&Bytes::from_static(b"ignored")), None);
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_missing_data_fails() {
        let result = serialize_data(Method::Get, Some(&head(200, None)), None, None);
        assert!(matches!(
            result,
            Err(Error::Serialization(SerializationFailure::InputDataNilOrZeroLength))
        ));

        let empty = serialize_data(Method::Post, Some(&head(200, None)), Some(&Bytes::new()), None);
        assert!(empty.is_err());
    }

    #[test]
    fn test_head_request_allows_empty_body() {
        let result = serialize_data(Method::Head, Some(&head(200, None)), None, None);
        assert_eq!(result.unwrap(), Bytes::new());
    }

    #[test]
    fn test_error_wins_over_status() {
        let error = Error::from(TransportError::TimedOut);
        let result = serialize_data(Method::Get, Some(&head(200, None)), Some(&Bytes::from_static(b"x")), Some(&error));
        assert!(matches!(result, Err(Error::Transport(TransportError::TimedOut))));
    }

    #[test]
    fn test_bad_status_keeps_code() {
        let result = serialize_data(Method::Get, Some(&head(503, None)), Some(&Bytes::from_static(b"down")), None);
        assert_eq!(result.unwrap_err().status_code(), Some(503));
    }

    #[test]
    fn test_content_type_matching() {
        let json = head(200, Some("application/json; charset=utf-8"));
        let body = Bytes::from_static(b"{}");
        assert!(validate_content_type(&json, &["application/json"], Some(&body)).is_ok());
        assert!(validate_content_type(&json, &["application/*"], Some(&body)).is_ok());
        assert!(validate_content_type(&json, &["*/*"], Some(&body)).is_ok());
        assert!(matches!(
            validate_content_type(&json, &["text/html"], Some(&body)),
            Err(Error::Validation(ValidationFailure::UnacceptableContentType { .. }))
        ));

        let untyped = head(200, None);
        assert!(validate_content_type(&untyped, &["text/html"], None).is_ok());
        assert!(matches!(
            validate_content_type(&untyped, &["text/html"], Some(&body)),
            Err(Error::Validation(ValidationFailure::MissingContentType { .. }))
        ));
    }

    #[test]
    fn test_download_serialization() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("file.bin");
        std::fs::write(&present, b"data").unwrap();
        let missing = dir.path().join("missing.bin");

        assert_eq!(serialize_download(Some(&head(200, None)), Some(&present), None).unwrap(), present);
        assert!(matches!(
            serialize_download(None, None, None),
            Err(Error::Serialization(SerializationFailure::InputFileNil))
        ));
        assert!(matches!(
            serialize_download(None, Some(&missing), None),
            Err(Error::Serialization(SerializationFailure::InputFileReadFailed(_)))
        ));
    }
}

use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use url::Url;

use super::builder::WireRequest;
use super::headers::Headers;
use crate::error::{ConstructionFailure, Error, Result, SerializationFailure};

/// Status line and headers of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub url:     Url,
    pub status:  u16,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn new(url: Url, status: u16, headers: Headers) -> Self { Self { url, status, headers } }

    pub fn expected_content_length(&self) -> Option<u64> {
        self.headers.get("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// `Content-Type` without parameters, lowercased.
    pub fn mime_type(&self) -> Option<String> {
        let value = self.headers.get("Content-Type")?;
        let essence = value.split(';').next()?.trim();
        (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
    }

    /// Filename from `Content-Disposition`, else the last URL path segment.
    pub fn suggested_filename(&self) -> Option<String> {
        let from_disposition = self.headers.get("Content-Disposition").and_then(|value| {
            value.split(';').map(str::trim).find_map(|param| {
                let name = param.strip_prefix("filename=")?;
                let name = name.trim_matches('"');
                (!name.is_empty()).then(|| name.to_string())
            })
        });

        from_disposition.or_else(|| {
            self.url
                .path_segments()?
                .next_back()
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
    }
}

/// Timing and volume of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetrics {
    pub started_at:     DateTime<Utc>,
    pub duration:       Duration,
    pub bytes_sent:     u64,
    pub bytes_received: u64,
}

/// Outcome of a data or upload transfer.
#[derive(Debug, Clone)]
pub struct DataResponse {
    /// The request as it was sent.
    pub request:  WireRequest,
    pub response: Option<ResponseHead>,
    data:         Option<Bytes>,
    pub metrics:  Option<TaskMetrics>,
    pub result:   Result<Bytes>,
}

impl DataResponse {
    pub fn new(
        request: WireRequest,
        response: Option<ResponseHead>,
        data: Option<Bytes>,
        metrics: Option<TaskMetrics>,
        result: Result<Bytes>,
    ) -> Self {
        Self {
            request,
            response,
            data,
            metrics,
            result,
        }
    }

    /// HTTP status, or `-1` when no response arrived.
    pub fn status_code(&self) -> i32 { self.response.as_ref().map_or(-1, |r| i32::from(r.status)) }

    pub fn value(&self) -> Option<&Bytes> { self.result.as_ref().ok() }

    pub fn error(&self) -> Option<&Error> { self.result.as_ref().err() }

    pub fn is_success(&self) -> bool { self.result.is_ok() }

    /// Raw body bytes, present even when the result is a failure.
    pub fn data(&self) -> Option<&Bytes> { self.data.as_ref() }

    pub fn response_string(&self) -> Option<String> {
        self.data.as_ref().map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> { self.transform(&JsonTransform::<T>::new()) }

    pub fn transform<T: DataTransform>(&self, transform: &T) -> Result<T::Output> { transform.transform(self) }
}

impl fmt::Display for DataResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Request]: {} {}", self.request.method, self.request.url)?;
        match &self.response {
            Some(head) => writeln!(f, "[Response]: {}", head.status)?,
            None => writeln!(f, "[Response]: none")?,
        }
        if let Some(data) = &self.data {
            writeln!(f, "[Data]: {} bytes", data.len())?;
        }
        if let Some(metrics) = &self.metrics {
            writeln!(f, "[Duration]: {:.3}s", metrics.duration.as_secs_f64())?;
        }
        match &self.result {
            Ok(_) => write!(f, "[Result]: SUCCESS"),
            Err(error) => write!(f, "[Result]: FAILURE: {error}"),
        }
    }
}

/// Converts a finished [`DataResponse`] into a domain value.
pub trait DataTransform {
    type Output;

    fn transform(&self, response: &DataResponse) -> Result<Self::Output>;
}

/// Decodes the body as JSON into `T`.
pub struct JsonTransform<T>(PhantomData<fn() -> T>);

impl<T> JsonTransform<T> {
    pub fn new() -> Self { Self(PhantomData) }
}

impl<T> Default for JsonTransform<T> {
    fn default() -> Self { Self::new() }
}

impl<T: DeserializeOwned> DataTransform for JsonTransform<T> {
    type Output = T;

    fn transform(&self, response: &DataResponse) -> Result<T> {
        let data = response
            .data()
            .filter(|data| !data.is_empty())
            .ok_or(SerializationFailure::InputDataNilOrZeroLength)?;
        serde_json::from_slice(data)
            .map_err(|e| SerializationFailure::JsonSerializationFailed(e.to_string()).into())
    }
}

/// Outcome of a download transfer.
#[derive(Debug, Clone)]
pub struct DownloadResponse {
    /// `None` for downloads resumed from resume data.
    pub request:       Option<WireRequest>,
    pub response:      Option<ResponseHead>,
    pub download_file: Option<PathBuf>,
    pub resume_data:   Option<Bytes>,
    pub metrics:       Option<TaskMetrics>,
    pub result:        Result<PathBuf>,
}

impl DownloadResponse {
    pub fn status_code(&self) -> i32 { self.response.as_ref().map_or(-1, |r| i32::from(r.status)) }

    pub fn value(&self) -> Option<&PathBuf> { self.result.as_ref().ok() }

    pub fn error(&self) -> Option<&Error> { self.result.as_ref().err() }

    pub fn is_success(&self) -> bool { self.result.is_ok() }
}

/// Either response kind, as seen by middlewares.
#[derive(Debug, Clone)]
pub enum Response {
    Data(DataResponse),
    Download(DownloadResponse),
}

impl Response {
    pub fn status_code(&self) -> i32 {
        match self {
            Response::Data(r) => r.status_code(),
            Response::Download(r) => r.status_code(),
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Response::Data(r) => r.error(),
            Response::Download(r) => r.error(),
        }
    }

    pub fn head(&self) -> Option<&ResponseHead> {
        match self {
            Response::Data(r) => r.response.as_ref(),
            Response::Download(r) => r.response.as_ref(),
        }
    }

    pub fn resume_data(&self) -> Option<&Bytes> {
        match self {
            Response::Data(_) => None,
            Response::Download(r) => r.resume_data.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Data(_) => "data",
            Response::Download(_) => "download",
        }
    }

    pub fn into_data(self) -> Result<DataResponse> {
        match self {
            Response::Data(r) => Ok(r),
            other => Err(ConstructionFailure::ResponseKindMismatch {
                expected: "data",
                actual:   other.kind(),
            }
            .into()),
        }
    }

    pub fn into_download(self) -> Result<DownloadResponse> {
        match self {
            Response::Download(r) => Ok(r),
            other => Err(ConstructionFailure::ResponseKindMismatch {
                expected: "download",
                actual:   other.kind(),
            }
            .into()),
        }
    }
}

impl From<DataResponse> for Response {
    fn from(response: DataResponse) -> Self { Response::Data(response) }
}

impl From<DownloadResponse> for Response {
    fn from(response: DownloadResponse) -> Self { Response::Download(response) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RequestBuilder;
    use serde::Deserialize;

    fn head(status: u16, headers: &[(&str, &str)]) -> ResponseHead {
        ResponseHead::new(
            Url::parse("https://example.com/files/report.pdf").unwrap(),
            status,
            headers.iter().copied().collect(),
        )
    }

    fn data_response(data: Option<&'static [u8]>) -> DataResponse {
        let request = RequestBuilder::new("https://example.com").build().unwrap();
        let data = data.map(Bytes::from_static);
        DataResponse::new(request, Some(head(200, &[])), data.clone(), None, Ok(data.unwrap_or_default()))
    }

    #[test]
    fn test_head_accessors() {
        let head = head(
            200,
            &[
                ("Content-Length", "1024"),
                ("Content-Type", "Application/JSON; charset=utf-8"),
                ("Content-Disposition", "attachment; filename=\"data.json\""),
            ],
        );
        assert_eq!(head.expected_content_length(), Some(1024));
        assert_eq!(head.mime_type().as_deref(), Some("application/json"));
        assert_eq!(head.suggested_filename().as_deref(), Some("data.json"));
    }

    #[test]
    fn test_suggested_filename_falls_back_to_url() {
        assert_eq!(head(200, &[]).suggested_filename().as_deref(), Some("report.pdf"));
    }

    #[test]
    fn test_status_code_without_response() {
        let request = RequestBuilder::new("https://example.com").build().unwrap();
        let response = DataResponse::new(request, None, None, None, Ok(Bytes::new()));
        assert_eq!(response.status_code(), -1);
    }

    #[test]
    fn test_json_decoding() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Item {
            id: u32,
        }

        let response = data_response(Some(br#"{"id": 7}"#));
        assert_eq!(response.json::<Item>().unwrap(), Item { id: 7 });

        let empty = data_response(None);
        assert!(matches!(
            empty.json::<Item>(),
            Err(Error::Serialization(SerializationFailure::InputDataNilOrZeroLength))
        ));

        let garbled = data_response(Some(b"{"));
        assert!(matches!(
            garbled.json::<Item>(),
            Err(Error::Serialization(SerializationFailure::JsonSerializationFailed(_)))
        ));
    }

    #[test]
    fn test_into_data_rejects_download() {
        let download = Response::Download(DownloadResponse {
            request:       None,
            response:      None,
            download_file: None,
            resume_data:   None,
            metrics:       None,
            result:        Err(SerializationFailure::InputFileNil.into()),
        });
        assert!(matches!(
            download.into_data(),
            Err(Error::RequestConstruction(ConstructionFailure::ResponseKindMismatch {
                expected: "data",
                actual:   "download",
            }))
        ));
    }

    #[test]
    fn test_display() {
        let text = data_response(Some(b"ok")).to_string();
        assert!(text.starts_with("[Request]: GET https://example.com/"));
        assert!(text.contains("[Response]: 200"));
        assert!(text.ends_with("[Result]: SUCCESS"));
    }
}

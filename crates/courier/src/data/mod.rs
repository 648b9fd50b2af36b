//! Immutable request, response and configuration types.

mod builder;
mod config;
mod headers;
mod ids;
mod method;
mod progress;
mod response;
mod resume;

pub use builder::{RequestBuilder, WireRequest};
pub use config::{DEFAULT_MULTIPART_MEMORY_THRESHOLD, DEFAULT_TIMEOUT, SessionConfig};
pub use headers::{Authorization, Credential, DEFAULT_HEADERS, Headers, quality_encoded};
pub use ids::{RequestId, TaskId};
pub use method::{CacheControl, CachePolicy, ContentEncoding, Method};
pub use progress::Progress;
pub use response::{DataResponse, DataTransform, DownloadResponse, JsonTransform, Response, ResponseHead, TaskMetrics};
pub use resume::ResumeData;

/// Request parameters, encoded by a [`ParameterEncoding`](crate::core::ParameterEncoding).
pub type Parameters = serde_json::Map<String, serde_json::Value>;

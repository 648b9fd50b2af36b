//! Pure transformations: parameter encoding, retry decisions, middleware
//! folding and response validation.
//!
//! Nothing in here touches the network or the file system, except
//! [`serialize_download`] checking that the downloaded file exists.

mod encoding;
mod middleware;
mod retry;
mod validation;

pub use encoding::{Destination, JsonEncoding, ParameterEncoding, UrlEncoding, escape, query, query_components};
pub use middleware::{Middleware, MiddlewareChain, RequestContext};
pub use retry::{DefaultRetryPolicy, ExponentialBackoff, RetryCounter, RetryDecision, RetryPolicy, Retryable};
pub use validation::{
    is_acceptable_status, is_empty_body_status, serialize_data, serialize_download, validate_content_type,
    validate_status,
};

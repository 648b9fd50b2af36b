//! HTTP client runtime over a pluggable transport.
//!
//! # Architecture
//!
//! The crate follows a three-layer pattern:
//! - [`data`] - immutable request, response and configuration types
//! - [`core`] - pure transformations: parameter encoding, retry decisions,
//!   middleware folding and response validation
//! - [`effects`] - sessions, transfers and the [`Transport`](effects::Transport) seam
//!
//! # Key Features
//!
//! - **Middleware**: adapt requests before they are sent and responses after
//!   they arrive, with hooks around every attempt
//! - **Retries**: per-request or session-wide [`RetryPolicy`](core::RetryPolicy),
//!   reusing the same request id across attempts
//! - **Multipart uploads**: small forms are encoded in memory, large ones are
//!   spooled to a temporary file
//! - **Resumable downloads**: cancel with resume data and continue later
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier::data::SessionConfig;
//! use courier::effects::{MockResponse, MockTransport};
//! use courier::{Request, Session};
//!
//! # fn main() -> courier::Result<()> {
//! let transport = Arc::new(MockTransport::new().route("/hello", MockResponse::ok("hi")));
//! let session = Session::new(transport, SessionConfig::default())?;
//!
//! let response = session.data(Request::get("https://example.com/hello")).send_blocking()?;
//! assert_eq!(response.value().map(|b| &b[..]), Some(&b"hi"[..]));
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;
mod request;

pub use effects::{DataTransfer, DownloadTransfer, Session, TransferHandle};
pub use error::{
    ConstructionFailure, Error, Result, SerializationFailure, TransportError, ValidationFailure,
};
pub use request::{ApiRequest, Request, RetrySetting};

//! `multipart/form-data` bodies (RFC 2046 / RFC 7578).
//!
//! A [`MultipartFormData`] collects named parts from byte buffers, files or
//! readers and encodes them either entirely in memory or streamed through a
//! small fixed buffer into a file. Which one to use is left to the caller.
//!
//! File problems found while appending (missing file, directory, unreadable
//! size) do not fail the append. The first one is kept and returned when the
//! form is encoded.

mod body_part;
mod boundary;
mod error;
mod form;

pub use body_part::BodyPart;
pub use boundary::{BoundaryKind, boundary_marker, random_boundary};
pub use error::{Error, Result};
pub use form::{MultipartFormData, STREAM_BUFFER_SIZE};

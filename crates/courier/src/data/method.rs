use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Options,
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Trace,
    Connect,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }

    /// Methods whose parameters go to the query string by default.
    pub fn encodes_parameters_in_url(&self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// How the transport may use cached responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    #[default]
    UseProtocolCachePolicy,
    ReloadIgnoringLocalCacheData,
    ReturnCacheDataElseLoad,
    ReturnCacheDataDontLoad,
}

/// Values for `Accept-Encoding` and `Content-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Br,
    Gzip,
    Deflate,
    Compress,
    Identity,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Br => "br",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Compress => "compress",
            ContentEncoding::Identity => "identity",
        }
    }
}

/// `Cache-Control` request directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheControl {
    NoCache,
    NoStore,
    NoTransform,
    OnlyIfCached,
    MaxAge(u64),
    MaxStale(Option<u64>),
    MinFresh(u64),
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheControl::NoCache => f.write_str("no-cache"),
            CacheControl::NoStore => f.write_str("no-store"),
            CacheControl::NoTransform => f.write_str("no-transform"),
            CacheControl::OnlyIfCached => f.write_str("only-if-cached"),
            CacheControl::MaxAge(seconds) => write!(f, "max-age={seconds}"),
            CacheControl::MaxStale(None) => f.write_str("max-stale"),
            CacheControl::MaxStale(Some(seconds)) => write!(f, "max-stale={seconds}"),
            CacheControl::MinFresh(seconds) => write!(f, "min-fresh={seconds}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_methods() {
        assert!(Method::Get.encodes_parameters_in_url());
        assert!(Method::Head.encodes_parameters_in_url());
        assert!(Method::Delete.encodes_parameters_in_url());
        assert!(!Method::Post.encodes_parameters_in_url());
        assert!(!Method::Patch.encodes_parameters_in_url());
    }

    #[test]
    fn test_cache_control_display() {
        assert_eq!(CacheControl::MaxAge(60).to_string(), "max-age=60");
        assert_eq!(CacheControl::MaxStale(None).to_string(), "max-stale");
        assert_eq!(CacheControl::NoStore.to_string(), "no-store");
    }
}

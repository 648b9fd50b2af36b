use std::time::Duration;

use bytes::Bytes;
use url::Url;

use super::config::DEFAULT_TIMEOUT;
use super::headers::{Authorization, DEFAULT_HEADERS, Headers};
use super::method::{CacheControl, CachePolicy, ContentEncoding, Method};
use crate::error::{ConstructionFailure, Result};

/// Mutable description of a request before it is finalized.
///
/// Typed setters such as [`content_type`](Self::content_type) write straight
/// into [`headers`](Self::headers), so whoever writes a header last wins.
/// Middlewares receive the builder in [`Middleware::prepare`](crate::core::Middleware::prepare).
///
/// # Examples
///
/// ```
/// use courier::data::{Method, RequestBuilder};
///
/// let request = RequestBuilder::new("https://example.com/items")
///     .method(Method::Post)
///     .header("X-Trace", "1")
///     .content_type("application/json")
///     .build()
///     .unwrap();
///
/// assert_eq!(request.method, Method::Post);
/// assert_eq!(request.headers.get("content-type"), Some("application/json"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    /// Target URL, parsed by [`build`](Self::build).
    pub url: String,

    /// `None` fails the build with [`ConstructionFailure::MissingMethod`].
    pub method: Option<Method>,

    pub cache_policy: CachePolicy,

    /// Default: 30 seconds.
    pub timeout: Duration,

    /// Seeded with [`DEFAULT_HEADERS`].
    pub headers: Headers,

    pub allows_cellular_access: bool,

    pub handle_cookies: bool,

    pub use_pipelining: bool,
}

impl RequestBuilder {
    pub fn new(url: impl Into<String>) -> Self { Self::with_headers(url, DEFAULT_HEADERS.clone()) }

    /// Start from `headers` instead of the process defaults.
    pub fn with_headers(url: impl Into<String>, headers: Headers) -> Self {
        Self {
            url: url.into(),
            method: Some(Method::Get),
            cache_policy: CachePolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            headers,
            allows_cellular_access: true,
            handle_cookies: true,
            use_pipelining: false,
        }
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn merge_headers(mut self, headers: &Headers) -> Self {
        self.headers.merge(headers);
        self
    }

    #[must_use]
    pub fn content_type(self, content_type: &str) -> Self { self.header("Content-Type", content_type) }

    #[must_use]
    pub fn content_length(self, length: u64) -> Self { self.header("Content-Length", length.to_string()) }

    #[must_use]
    pub fn accept(self, accept: &str) -> Self { self.header("Accept", accept) }

    #[must_use]
    pub fn accept_encoding(self, encodings: &[ContentEncoding]) -> Self {
        let value = encodings.iter().map(ContentEncoding::as_str).collect::<Vec<_>>().join(", ");
        self.header("Accept-Encoding", value)
    }

    #[must_use]
    pub fn content_encoding(self, encoding: ContentEncoding) -> Self {
        self.header("Content-Encoding", encoding.as_str())
    }

    #[must_use]
    pub fn cache_control(self, directives: &[CacheControl]) -> Self {
        let value = directives.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        self.header("Cache-Control", value)
    }

    /// Set the `Authorization` header. [`Authorization::None`] leaves it untouched.
    #[must_use]
    pub fn authorization(self, authorization: &Authorization) -> Self {
        match authorization.header_value() {
            Some(value) => self.header("Authorization", value),
            None => self,
        }
    }

    #[must_use]
    pub fn allows_cellular_access(mut self, allowed: bool) -> Self {
        self.allows_cellular_access = allowed;
        self
    }

    #[must_use]
    pub fn handle_cookies(mut self, handle: bool) -> Self {
        self.handle_cookies = handle;
        self
    }

    #[must_use]
    pub fn use_pipelining(mut self, pipelining: bool) -> Self {
        self.use_pipelining = pipelining;
        self
    }

    /// Finalize into a wire request.
    ///
    /// # Errors
    ///
    /// [`ConstructionFailure::MissingUrl`] for an empty URL,
    /// [`ConstructionFailure::InvalidUrl`] when it does not parse, and
    /// [`ConstructionFailure::MissingMethod`] when `method` was cleared.
    pub fn build(&self) -> Result<WireRequest> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(ConstructionFailure::MissingUrl.into());
        }

        let url = Url::parse(raw).map_err(|e| ConstructionFailure::InvalidUrl {
            url:    raw.to_string(),
            reason: e.to_string(),
        })?;

        let method = self.method.ok_or(ConstructionFailure::MissingMethod)?;

        Ok(WireRequest {
            url,
            method,
            headers: self.headers.clone(),
            body: None,
            timeout: self.timeout,
            cache_policy: self.cache_policy,
            allows_cellular_access: self.allows_cellular_access,
            handle_cookies: self.handle_cookies,
            use_pipelining: self.use_pipelining,
        })
    }
}

/// A fully resolved, transport-ready request.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url:                    Url,
    pub method:                 Method,
    pub headers:                Headers,
    pub body:                   Option<Bytes>,
    pub timeout:                Duration,
    pub cache_policy:           CachePolicy,
    pub allows_cellular_access: bool,
    pub handle_cookies:         bool,
    pub use_pipelining:         bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults_seeded() {
        let builder = RequestBuilder::new("https://example.com");
        assert_eq!(builder.method, Some(Method::Get));
        assert_eq!(builder.timeout, Duration::from_secs(30));
        assert!(builder.headers.contains("User-Agent"));
        assert!(builder.headers.contains("Accept-Language"));
        assert!(builder.headers.contains("Accept-Encoding"));
    }

    #[test]
    fn test_missing_url() {
        let result = RequestBuilder::new("  ").build();
        assert!(matches!(
            result,
            Err(Error::RequestConstruction(ConstructionFailure::MissingUrl))
        ));
    }

    #[test]
    fn test_invalid_url() {
        let result = RequestBuilder::new("not a url").build();
        assert!(matches!(
            result,
            Err(Error::RequestConstruction(ConstructionFailure::InvalidUrl { .. }))
        ));
    }

    #[test]
    fn test_missing_method() {
        let mut builder = RequestBuilder::new("https://example.com");
        builder.method = None;
        let result = builder.build();
        assert!(matches!(
            result,
            Err(Error::RequestConstruction(ConstructionFailure::MissingMethod))
        ));
    }

    #[test]
    fn test_typed_setters_write_headers() {
        let request = RequestBuilder::with_headers("https://example.com", Headers::new())
            .accept("application/json")
            .accept_encoding(&[ContentEncoding::Br, ContentEncoding::Gzip])
            .content_encoding(ContentEncoding::Gzip)
            .content_length(12)
            .cache_control(&[CacheControl::NoCache, CacheControl::MaxAge(0)])
            .authorization(&Authorization::bearer("t"))
            .build()
            .unwrap();

        assert_eq!(request.headers.get("Accept"), Some("application/json"));
        assert_eq!(request.headers.get("Accept-Encoding"), Some("br, gzip"));
        assert_eq!(request.headers.get("Content-Encoding"), Some("gzip"));
        assert_eq!(request.headers.get("Content-Length"), Some("12"));
        assert_eq!(request.headers.get("Cache-Control"), Some("no-cache, max-age=0"));
        assert_eq!(request.headers.get("Authorization"), Some("Bearer t"));
    }

    #[test]
    fn test_authorization_none_keeps_existing_header() {
        let builder = RequestBuilder::new("https://example.com")
            .header("Authorization", "Token abc")
            .authorization(&Authorization::None);
        assert_eq!(builder.headers.get("Authorization"), Some("Token abc"));
    }
}

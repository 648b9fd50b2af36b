use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::{Middleware, ParameterEncoding, RetryPolicy, UrlEncoding};
use crate::data::{Authorization, Credential, Headers, Method, Parameters, RequestBuilder};
use crate::effects::ServerTrustPolicy;

/// How a request reacts to failures.
#[derive(Clone, Default)]
pub enum RetrySetting {
    /// [`DefaultRetryPolicy`](crate::core::DefaultRetryPolicy) built from the session config.
    #[default]
    SessionDefault,
    Disabled,
    Policy(Arc<dyn RetryPolicy>),
}

impl fmt::Debug for RetrySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrySetting::SessionDefault => f.write_str("SessionDefault"),
            RetrySetting::Disabled => f.write_str("Disabled"),
            RetrySetting::Policy(_) => f.write_str("Policy(..)"),
        }
    }
}

/// A logical request: everything needed to build a wire request, plus the
/// policies that apply to it.
///
/// Only [`url`](Self::url) is required. Implement it on your own endpoint
/// types, or use the ready-made [`Request`].
pub trait ApiRequest: Send + Sync {
    fn url(&self) -> String;

    fn method(&self) -> Method { Method::Get }

    /// `None` uses the session's default timeout.
    fn timeout(&self) -> Option<Duration> { None }

    fn headers(&self) -> Headers { Headers::new() }

    fn parameters(&self) -> Parameters { Parameters::new() }

    fn authorization(&self) -> Authorization { Authorization::None }

    fn encoding(&self) -> Arc<dyn ParameterEncoding> { Arc::new(UrlEncoding::default()) }

    /// Answers HTTP authentication challenges. Takes precedence over
    /// [`authorization`](Self::authorization).
    fn credential(&self) -> Option<Credential> { None }

    fn trust_policy(&self) -> Option<Arc<dyn ServerTrustPolicy>> { None }

    fn middlewares(&self) -> Vec<Arc<dyn Middleware>> { Vec::new() }

    fn retry(&self) -> RetrySetting { RetrySetting::SessionDefault }

    /// Builder-level adjustments applied before request headers.
    fn configure(&self, builder: RequestBuilder) -> RequestBuilder { builder }
}

/// General purpose [`ApiRequest`].
///
/// # Examples
///
/// ```
/// use courier::{ApiRequest, Request};
/// use courier::data::Method;
/// use serde_json::json;
///
/// let request = Request::post("https://example.com/items")
///     .parameter("name", json!("widget"))
///     .header("X-Trace", "1");
///
/// assert_eq!(request.method(), Method::Post);
/// assert_eq!(ApiRequest::parameters(&request).len(), 1);
/// ```
#[derive(Clone)]
pub struct Request {
    url:           String,
    method:        Method,
    timeout:       Option<Duration>,
    headers:       Headers,
    parameters:    Parameters,
    authorization: Authorization,
    encoding:      Arc<dyn ParameterEncoding>,
    credential:    Option<Credential>,
    trust_policy:  Option<Arc<dyn ServerTrustPolicy>>,
    middlewares:   Vec<Arc<dyn Middleware>>,
    retry:         RetrySetting,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            timeout: None,
            headers: Headers::new(),
            parameters: Parameters::new(),
            authorization: Authorization::None,
            encoding: Arc::new(UrlEncoding::default()),
            credential: None,
            trust_policy: None,
            middlewares: Vec::new(),
            retry: RetrySetting::SessionDefault,
        }
    }

    pub fn get(url: impl Into<String>) -> Self { Self::new(Method::Get, url) }

    pub fn post(url: impl Into<String>) -> Self { Self::new(Method::Post, url) }

    pub fn put(url: impl Into<String>) -> Self { Self::new(Method::Put, url) }

    pub fn patch(url: impl Into<String>) -> Self { Self::new(Method::Patch, url) }

    pub fn delete(url: impl Into<String>) -> Self { Self::new(Method::Delete, url) }

    pub fn head(url: impl Into<String>) -> Self { Self::new(Method::Head, url) }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = authorization;
        self
    }

    #[must_use]
    pub fn encoding(mut self, encoding: impl ParameterEncoding + 'static) -> Self {
        self.encoding = Arc::new(encoding);
        self
    }

    #[must_use]
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    #[must_use]
    pub fn trust_policy(mut self, policy: impl ServerTrustPolicy + 'static) -> Self {
        self.trust_policy = Some(Arc::new(policy));
        self
    }

    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetrySetting) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn retry_policy(self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry(RetrySetting::Policy(Arc::new(policy)))
    }

    #[must_use]
    pub fn no_retry(self) -> Self { self.retry(RetrySetting::Disabled) }
}

impl ApiRequest for Request {
    fn url(&self) -> String { self.url.clone() }

    fn method(&self) -> Method { self.method }

    fn timeout(&self) -> Option<Duration> { self.timeout }

    fn headers(&self) -> Headers { self.headers.clone() }

    fn parameters(&self) -> Parameters { self.parameters.clone() }

    fn authorization(&self) -> Authorization { self.authorization.clone() }

    fn encoding(&self) -> Arc<dyn ParameterEncoding> { self.encoding.clone() }

    fn credential(&self) -> Option<Credential> { self.credential.clone() }

    fn trust_policy(&self) -> Option<Arc<dyn ServerTrustPolicy>> { self.trust_policy.clone() }

    fn middlewares(&self) -> Vec<Arc<dyn Middleware>> { self.middlewares.clone() }

    fn retry(&self) -> RetrySetting { self.retry.clone() }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .field("parameters", &self.parameters)
            .field("authorization", &self.authorization)
            .field("credential", &self.credential)
            .field("middlewares", &self.middlewares.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DefaultRetryPolicy;
    use serde_json::json;

    struct Endpoint;

    impl ApiRequest for Endpoint {
        fn url(&self) -> String { "https://example.com/endpoint".to_string() }
    }

    #[test]
    fn test_trait_defaults() {
        let endpoint = Endpoint;
        assert_eq!(endpoint.method(), Method::Get);
        assert_eq!(endpoint.timeout(), None);
        assert!(endpoint.headers().is_empty());
        assert!(endpoint.parameters().is_empty());
        assert_eq!(endpoint.authorization(), Authorization::None);
        assert!(endpoint.credential().is_none());
        assert!(endpoint.middlewares().is_empty());
        assert!(matches!(endpoint.retry(), RetrySetting::SessionDefault));
    }

    #[test]
    fn test_request_setters() {
        let request = Request::delete("https://example.com/items/1")
            .timeout(Duration::from_secs(3))
            .header("X-A", "1")
            .parameter("force", json!(true))
            .retry_policy(DefaultRetryPolicy::new(1, Duration::ZERO));

        assert_eq!(request.method(), Method::Delete);
        assert_eq!(ApiRequest::timeout(&request), Some(Duration::from_secs(3)));
        assert_eq!(request.headers().get("x-a"), Some("1"));
        assert_eq!(ApiRequest::parameters(&request).get("force"), Some(&json!(true)));
        assert!(matches!(ApiRequest::retry(&request), RetrySetting::Policy(_)));
        assert!(matches!(ApiRequest::retry(&request.no_retry()), RetrySetting::Disabled));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let request = Request::get("https://example.com").credential(Credential::new("me", "hunter2"));
        assert!(!format!("{request:?}").contains("hunter2"));
    }
}

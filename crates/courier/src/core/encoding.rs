use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::data::{Parameters, WireRequest};
use crate::error::{ConstructionFailure, Result};

/// Everything but unreserved characters, `/` and `?` gets escaped.
const QUERY_ESCAPE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b'?');

/// Applies request parameters to a finalized request.
pub trait ParameterEncoding: Send + Sync {
    fn encode(&self, request: WireRequest, parameters: &Parameters) -> Result<WireRequest>;
}

/// Where [`UrlEncoding`] puts the encoded parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Query string for GET, HEAD and DELETE, body otherwise.
    #[default]
    MethodDependent,
    QueryString,
    HttpBody,
}

/// `application/x-www-form-urlencoded` parameters.
///
/// Keys are sorted. Nested values use bracket notation (`key[]`,
/// `key[sub]`) and booleans become `1` / `0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlEncoding {
    pub destination: Destination,
}

impl UrlEncoding {
    pub const fn new(destination: Destination) -> Self { Self { destination } }

    pub const fn query_string() -> Self { Self::new(Destination::QueryString) }

    pub const fn http_body() -> Self { Self::new(Destination::HttpBody) }

    fn encodes_in_url(&self, request: &WireRequest) -> bool {
        match self.destination {
            Destination::MethodDependent => request.method.encodes_parameters_in_url(),
            Destination::QueryString => true,
            Destination::HttpBody => false,
        }
    }
}

impl ParameterEncoding for UrlEncoding {
    fn encode(&self, mut request: WireRequest, parameters: &Parameters) -> Result<WireRequest> {
        if parameters.is_empty() {
            return Ok(request);
        }

        let encoded = query(parameters);

        if self.encodes_in_url(&request) {
            let merged = match request.url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
                _ => encoded,
            };
            request.url.set_query(Some(&merged));
        } else {
            if !request.headers.contains("Content-Type") {
                request
                    .headers
                    .insert("Content-Type", "application/x-www-form-urlencoded; charset=utf-8");
            }
            request.headers.insert("Content-Length", encoded.len().to_string());
            request.body = Some(Bytes::from(encoded));
        }

        Ok(request)
    }
}

/// Parameters serialized as a JSON object body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding;

impl ParameterEncoding for JsonEncoding {
    fn encode(&self, mut request: WireRequest, parameters: &Parameters) -> Result<WireRequest> {
        if parameters.is_empty() {
            return Ok(request);
        }

        let body = serde_json::to_vec(parameters)
            .map_err(|e| ConstructionFailure::JsonEncodingFailed(e.to_string()))?;

        if !request.headers.contains("Content-Type") {
            request.headers.insert("Content-Type", "application/json");
        }
        request.headers.insert("Content-Length", body.len().to_string());
        request.body = Some(Bytes::from(body));
        Ok(request)
    }
}

/// Percent-encoded `key=value` pairs joined by `&`, sorted by key.
pub fn query(parameters: &Parameters) -> String {
    let mut entries: Vec<_> = parameters.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    entries
        .into_iter()
        .flat_map(|(key, value)| query_components(key, value))
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Flatten one parameter into escaped `(key, value)` pairs.
pub fn query_components(key: &str, value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries
                .into_iter()
                .flat_map(|(sub, value)| query_components(&format!("{key}[{sub}]"), value))
                .collect()
        }
        Value::Array(items) => items
            .iter()
            .flat_map(|value| query_components(&format!("{key}[]"), value))
            .collect(),
        Value::Bool(flag) => vec![(escape(key), if *flag { "1" } else { "0" }.to_string())],
        Value::Null => vec![(escape(key), String::new())],
        Value::Number(number) => vec![(escape(key), escape(&number.to_string()))],
        Value::String(text) => vec![(escape(key), escape(text))],
    }
}

pub fn escape(text: &str) -> String { utf8_percent_encode(text, QUERY_ESCAPE_SET).to_string() }

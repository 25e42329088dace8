//! Common types for the CogniVerse environment abstraction.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EnvError;

/// HTTP verbs used by the backend API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing HTTP request.
///
/// `url` is absolute; the API client joins the base URL and route before
/// handing the request to a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Correlation id for log lines
    pub request_id: Uuid,

    pub method: Method,

    pub url: String,

    /// Extra headers (e.g. `Authorization`)
    pub headers: Vec<(String, String)>,

    /// Query string parameters
    pub query: Vec<(String, String)>,

    /// JSON body, if any
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Creates a request with no headers, query or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Sets a header, replacing any previous value with the same
    /// (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// Returns the first header value with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the path component of `url` (everything after the authority,
    /// without query string).
    pub fn path(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let path = without_scheme
            .find('/')
            .map(|index| &without_scheme[index..])
            .unwrap_or("/");
        path.split('?').next().unwrap_or(path)
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Builds a response carrying a JSON body.
    pub fn json(status: u16, value: &Value) -> Self {
        // Serializing a `Value` cannot fail
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON. An empty body decodes as `null`.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, EnvError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(Value::Null).map_err(EnvError::serialization);
        }
        serde_json::from_slice(&self.body).map_err(EnvError::serialization)
    }

    /// Returns the body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_path_strips_authority_and_query() {
        let req = HttpRequest::new(Method::Get, "http://localhost:8000/simulations/abc?x=1");
        assert_eq!(req.path(), "/simulations/abc");

        let bare = HttpRequest::new(Method::Get, "http://localhost:8000");
        assert_eq!(bare.path(), "/");
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut req = HttpRequest::new(Method::Get, "http://h/x");
        req.set_header("Authorization", "Bearer a");
        req.set_header("authorization", "Bearer b");

        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("AUTHORIZATION"), Some("Bearer b"));
    }

    #[test]
    fn test_empty_body_decodes_as_null() {
        let resp = HttpResponse::new(204, Vec::new());
        let value: Value = resp.json_body().unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_json_body_roundtrip() {
        let resp = HttpResponse::json(200, &serde_json::json!({"id": 7}));
        let value: Value = resp.json_body().unwrap();
        assert_eq!(value["id"], 7);
        assert!(resp.is_success());
    }
}

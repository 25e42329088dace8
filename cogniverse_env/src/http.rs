//! HTTP transport abstraction for the CogniVerse client.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EnvError;
use crate::types::{HttpRequest, HttpResponse, Method};

/// Abstraction for request/response I/O against the backend.
///
/// # Implementations
///
/// - **Production**: `ReqwestTransport` over a pooled `reqwest::Client`
/// - **Simulation**: in-memory backend with scripted responses and faults
///
/// # Request Flow
///
/// ```text
/// ApiClient                 Transport                  Backend
///   |                           |                          |
///   |-- send(request) --------->|                          |
///   |                           |-- [latency/faults] ----->|
///   |<-- Ok(HttpResponse) ------|<-------------------------|
/// ```
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Sends a request and waits for the full response.
    ///
    /// # Returns
    /// * `Ok(HttpResponse)` - Any HTTP status, including 4xx/5xx
    /// * `Err(EnvError)` - The request never produced a response
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EnvError>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EnvError> {
        tracing::debug!(
            request_id = %request.request_id,
            method = %request.method,
            url = %request.url,
            "sending request"
        );

        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EnvError::Timeout(self.timeout.as_millis() as u64)
            } else {
                EnvError::transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| EnvError::transport(format!("Failed to read body: {}", e)))?;

        tracing::debug!(request_id = %request.request_id, status, "received response");
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reqwest_transport_builds() {
        let transport = ReqwestTransport::new(Duration::from_secs(5));
        assert!(transport.is_ok());
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(ReqwestTransport::method(Method::Patch), reqwest::Method::PATCH);
        assert_eq!(ReqwestTransport::method(Method::Delete), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let transport = ReqwestTransport::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on localhost is closed on virtually every machine
        let result = transport
            .send(HttpRequest::new(Method::Get, "http://127.0.0.1:9/health"))
            .await;
        assert!(result.is_err());
    }
}

//! Authenticated API client.
//!
//! Wraps an [`HttpTransport`] with the session's bearer token and a
//! refresh-on-401 interceptor:
//!
//! ```text
//! request ──► send ──► 401? ──no──► result
//!                       │yes
//!                       ▼
//!              refresh token stored? ──no──► clear tokens, original 401
//!                       │yes
//!                       ▼
//!              POST /auth/refresh ──fail──► clear tokens, original 401
//!                       │ok
//!                       ▼
//!              store access token, resend once ──► result (a second 401 is an error)
//! ```

use cogniverse_env::{HttpRequest, HttpResponse, HttpTransport, Method};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::TokenStore;
use crate::error::ApiError;

/// HTTP client bound to one backend and one token store.
pub struct ApiClient<T: HttpTransport> {
    transport: Arc<T>,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
}

impl<T: HttpTransport> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            base_url: self.base_url.clone(),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(transport: Arc<T>, base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            transport,
            base_url,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Joins the base URL and a route.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(HttpRequest::new(Method::Get, self.url(path))).await
    }

    /// GET with query parameters; `None` values are omitted.
    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, Option<String>)],
    ) -> Result<Value, ApiError> {
        let mut request = HttpRequest::new(Method::Get, self.url(path));
        for (key, value) in query {
            if let Some(value) = value {
                request = request.with_query(*key, value);
            }
        }
        self.execute(request).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(HttpRequest::new(Method::Post, self.url(path)).with_json(body))
            .await
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(HttpRequest::new(Method::Post, self.url(path))).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(HttpRequest::new(Method::Put, self.url(path)).with_json(body))
            .await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(HttpRequest::new(Method::Patch, self.url(path)).with_json(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(HttpRequest::new(Method::Delete, self.url(path))).await
    }

    /// DELETE carrying a JSON body (bulk deletes).
    pub async fn delete_with_body(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.execute(HttpRequest::new(Method::Delete, self.url(path)).with_json(body))
            .await
    }

    /// Sends a request with auth and the one-shot refresh retry.
    pub async fn execute(&self, request: HttpRequest) -> Result<Value, ApiError> {
        let mut first = request.clone();
        if let Some(token) = self.tokens.access_token() {
            first.set_header("Authorization", format!("Bearer {}", token));
        }

        let response = self.transport.send(first).await?;
        if response.status != 401 {
            return Self::into_value(response);
        }

        tracing::debug!(
            request_id = %request.request_id,
            path = request.path(),
            "access token rejected, attempting refresh"
        );
        let Some(access_token) = self.refresh_access_token().await? else {
            // Logged out; the caller still gets the backend's own 401
            return Self::into_value(response);
        };

        let mut retry = request;
        retry.set_header("Authorization", format!("Bearer {}", access_token));
        let response = self.transport.send(retry).await?;
        Self::into_value(response)
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Returns `None` after a forced logout: no refresh token was stored or
    /// the refresh call failed, and both tokens are now cleared.
    async fn refresh_access_token(&self) -> Result<Option<String>, ApiError> {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            tracing::warn!("No refresh token found, logging out");
            self.force_logout();
            return Ok(None);
        };

        let mut request =
            HttpRequest::new(Method::Post, self.url("/auth/refresh")).with_json(json!({}));
        request.set_header("Authorization", format!("Bearer {}", refresh_token));

        match self.transport.send(request).await {
            Ok(response) if response.is_success() => {
                let body: Value = response.json_body().unwrap_or(Value::Null);
                if let Some(token) = body.get("access_token").and_then(Value::as_str) {
                    self.tokens.set_access_token(token)?;
                    tracing::info!("access token refreshed");
                    return Ok(Some(token.to_string()));
                }
                tracing::warn!("refresh response carried no access_token");
            }
            Ok(response) => {
                tracing::warn!(status = response.status, "Refresh token expired or invalid");
            }
            Err(e) => {
                tracing::warn!(error = %e, "refresh request failed");
            }
        }

        self.force_logout();
        Ok(None)
    }

    fn force_logout(&self) {
        if let Err(e) = self.tokens.clear() {
            tracing::error!(error = %e, "failed to clear tokens");
        }
    }

    fn into_value(response: HttpResponse) -> Result<Value, ApiError> {
        if response.is_success() {
            return response
                .json_body()
                .map_err(|e| ApiError::InvalidResponse(e.to_string()));
        }
        Err(ApiError::Status {
            status: response.status,
            detail: error_detail(&response),
        })
    }
}

/// Extracts the human-readable error message from an error body.
fn error_detail(response: &HttpResponse) -> String {
    if let Ok(body) = serde_json::from_slice::<Value>(&response.body) {
        for key in ["detail", "message", "error"] {
            match body.get(key) {
                Some(Value::String(text)) => return text.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    let text = response.text();
    if text.trim().is_empty() {
        format!("request failed with status {}", response.status)
    } else {
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::testing::ScriptedTransport;

    fn client(transport: &Arc<ScriptedTransport>, tokens: MemoryTokenStore) -> ApiClient<ScriptedTransport> {
        ApiClient::new(Arc::clone(transport), "http://api.test/", Arc::new(tokens))
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(200, &json!({"ok": true})));
        let api = client(&transport, MemoryTokenStore::with_tokens(Some("A1"), None));

        let value = api.get("/users/profile").await.unwrap();

        assert_eq!(value["ok"], true);
        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://api.test/users/profile");
        assert_eq!(sent[0].header("Authorization"), Some("Bearer A1"));
    }

    #[tokio::test]
    async fn test_no_token_sends_no_header() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(200, &json!([])));
        let api = client(&transport, MemoryTokenStore::new());

        api.get("/agents/").await.unwrap();

        assert_eq!(transport.requests()[0].header("Authorization"), None);
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_exactly_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(401, &json!({"detail": "expired"})));
        transport.push(HttpResponse::json(200, &json!({"access_token": "A2"})));
        transport.push(HttpResponse::json(200, &json!({"id": 1})));
        let tokens = Arc::new(MemoryTokenStore::with_tokens(Some("A1"), Some("R1")));
        let api = ApiClient::new(Arc::clone(&transport), "http://api.test", tokens.clone());

        let value = api.get("/projects/").await.unwrap();

        assert_eq!(value["id"], 1);
        let sent = transport.requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].path(), "/auth/refresh");
        assert_eq!(sent[1].header("Authorization"), Some("Bearer R1"));
        assert_eq!(sent[2].path(), "/projects/");
        assert_eq!(sent[2].header("Authorization"), Some("Bearer A2"));
        assert_eq!(tokens.access_token().as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn test_second_401_is_not_refreshed_again() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(401, &json!({})));
        transport.push(HttpResponse::json(200, &json!({"access_token": "A2"})));
        transport.push(HttpResponse::json(401, &json!({"detail": "still no"})));
        let api = client(&transport, MemoryTokenStore::with_tokens(Some("A1"), Some("R1")));

        let err = api.get("/projects/").await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_tokens() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(401, &json!({})));
        transport.push(HttpResponse::json(401, &json!({"detail": "refresh expired"})));
        let tokens = Arc::new(MemoryTokenStore::with_tokens(Some("A1"), Some("R1")));
        let api = ApiClient::new(Arc::clone(&transport), "http://api.test", tokens.clone());

        let err = api.get("/projects/").await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_logs_out_without_refresh_call() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(401, &json!({"detail": "Token expired"})));
        let tokens = Arc::new(MemoryTokenStore::with_tokens(Some("A1"), None));
        let api = ApiClient::new(Arc::clone(&transport), "http://api.test", tokens.clone());

        let err = api.get("/projects/").await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "HTTP 401: Token expired");
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(tokens.access_token(), None);
    }

    #[tokio::test]
    async fn test_bad_credentials_login_keeps_backend_message() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(401, &json!({"detail": "Invalid username or password"})));
        let tokens = Arc::new(MemoryTokenStore::new());
        let api = ApiClient::new(Arc::clone(&transport), "http://api.test", tokens.clone());

        let err = api.login("ada", "wrong").await.unwrap_err();

        match err {
            ApiError::Status { status, detail } => {
                assert_eq!(status, 401);
                assert_eq!(detail, "Invalid username or password");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(tokens.access_token(), None);
    }

    #[tokio::test]
    async fn test_error_detail_extracted() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(403, &json!({"detail": "Forbidden module"})));
        let api = client(&transport, MemoryTokenStore::new());

        let err = api.get("/system-logs/").await.unwrap_err();

        match err {
            ApiError::Status { status, detail } => {
                assert_eq!(status, 403);
                assert_eq!(detail, "Forbidden module");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_error("connection refused");
        let api = client(&transport, MemoryTokenStore::new());

        let err = api.get("/agents/").await.unwrap_err();

        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[test]
    fn test_error_detail_falls_back_to_text() {
        let response = HttpResponse::new(500, b"Internal Server Error".to_vec());
        assert_eq!(error_detail(&response), "Internal Server Error");

        let empty = HttpResponse::new(502, Vec::new());
        assert_eq!(error_detail(&empty), "request failed with status 502");
    }
}

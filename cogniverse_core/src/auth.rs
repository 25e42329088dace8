//! Token storage and access-token claims.
//!
//! The backend issues a short-lived access token and a longer-lived refresh
//! token. Both live in a [`TokenStore`]; the API client reads the access
//! token on every request and rewrites it after a refresh.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ApiError;

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage for the session's bearer tokens.
///
/// Implementations must be thread-safe; the persistent one must survive
/// restarts.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    fn set_access_token(&self, token: &str) -> Result<(), ApiError>;

    fn set_refresh_token(&self, token: &str) -> Result<(), ApiError>;

    /// Removes both tokens (logout).
    fn clear(&self) -> Result<(), ApiError>;
}

#[derive(Default)]
struct TokenPair {
    access: Option<String>,
    refresh: Option<String>,
}

/// In-memory token store (tests, one-shot CLI runs).
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<TokenPair>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with a session.
    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        Self {
            tokens: Mutex::new(TokenPair {
                access: access.map(str::to_string),
                refresh: refresh.map(str::to_string),
            }),
        }
    }

    fn with_pair<R>(&self, f: impl FnOnce(&mut TokenPair) -> R) -> Result<R, ApiError> {
        let mut pair = self
            .tokens
            .lock()
            .map_err(|_| ApiError::Storage("token store lock poisoned".to_string()))?;
        Ok(f(&mut pair))
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.with_pair(|pair| pair.access.clone()).ok().flatten()
    }

    fn refresh_token(&self) -> Option<String> {
        self.with_pair(|pair| pair.refresh.clone()).ok().flatten()
    }

    fn set_access_token(&self, token: &str) -> Result<(), ApiError> {
        self.with_pair(|pair| pair.access = Some(token.to_string()))
    }

    fn set_refresh_token(&self, token: &str) -> Result<(), ApiError> {
        self.with_pair(|pair| pair.refresh = Some(token.to_string()))
    }

    fn clear(&self) -> Result<(), ApiError> {
        self.with_pair(|pair| *pair = TokenPair::default())
    }
}

/// Sled-based persistent token store.
///
/// Uses an embedded key-value database so a CLI login survives restarts.
pub struct SledTokenStore {
    db: sled::Db,
}

impl SledTokenStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ApiError> {
        let db = sled::open(path)
            .map_err(|e| ApiError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store (for testing)
    pub fn open_temp() -> Result<Self, ApiError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| ApiError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    fn get(&self, key: &str) -> Option<String> {
        match self.db.get(key) {
            Ok(value) => value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read token");
                None
            }
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), ApiError> {
        self.db
            .insert(key, value.as_bytes())
            .map_err(|e| ApiError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| ApiError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

impl TokenStore for SledTokenStore {
    fn access_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Option<String> {
        self.get(REFRESH_TOKEN_KEY)
    }

    fn set_access_token(&self, token: &str) -> Result<(), ApiError> {
        self.put(ACCESS_TOKEN_KEY, token)
    }

    fn set_refresh_token(&self, token: &str) -> Result<(), ApiError> {
        self.put(REFRESH_TOKEN_KEY, token)
    }

    fn clear(&self) -> Result<(), ApiError> {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            self.db
                .remove(key)
                .map_err(|e| ApiError::Storage(format!("Remove failed: {}", e)))?;
        }
        self.db
            .flush()
            .map_err(|e| ApiError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

/// Claims carried in the access token's payload segment.
///
/// The signature is not verified; the backend does that. The client only
/// reads the claims to show who is logged in and whether the token is stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// Decodes the claims of a JWT. Returns `None` for malformed tokens.
    pub fn decode(token: &str) -> Option<Self> {
        let payload = token.split('.').nth(1)?;
        let trimmed = payload.trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .or_else(|_| STANDARD_NO_PAD.decode(trimmed));
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode token payload");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::warn!(error = %e, "token payload is not a claims object");
                None
            }
        }
    }

    /// `user_id` as a string, whether the backend encoded it as a number or
    /// a string.
    pub fn user_id(&self) -> Option<String> {
        match self.user_id.as_ref()? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Whether `exp` lies at or before `now`. Tokens without `exp` never
    /// expire client-side.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        let Some(exp) = self.exp else {
            return false;
        };
        let now_secs = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        exp <= now_secs
    }
}

/// Returns the claims of the stored access token, if any.
pub fn current_user(store: &dyn TokenStore) -> Option<TokenClaims> {
    TokenClaims::decode(&store.access_token()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_memory_store_set_and_clear() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.access_token(), None);

        store.set_access_token("a1").unwrap();
        store.set_refresh_token("r1").unwrap();
        assert_eq!(store.access_token().as_deref(), Some("a1"));
        assert_eq!(store.refresh_token().as_deref(), Some("r1"));

        store.clear().unwrap();
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
    }

    #[test]
    fn test_sled_store_persists_and_clears() {
        let store = SledTokenStore::open_temp().unwrap();
        store.set_access_token("access").unwrap();
        store.set_refresh_token("refresh").unwrap();

        assert_eq!(store.access_token().as_deref(), Some("access"));
        assert_eq!(store.refresh_token().as_deref(), Some("refresh"));

        store.clear().unwrap();
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
    }

    #[test]
    fn test_decode_claims() {
        let token = jwt(&serde_json::json!({
            "user_id": 42,
            "role": "admin",
            "exp": 2_000_000_000u64,
            "iat": 1_700_000_000u64,
            "email": "ada@example.com"
        }));

        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.user_id().as_deref(), Some("42"));
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert_eq!(claims.extra["email"], "ada@example.com");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TokenClaims::decode("not-a-jwt").is_none());
        assert!(TokenClaims::decode("a.!!!.c").is_none());
    }

    #[test]
    fn test_expiry() {
        let token = jwt(&serde_json::json!({"exp": 1_000u64}));
        let claims = TokenClaims::decode(&token).unwrap();

        assert!(claims.is_expired_at(UNIX_EPOCH + Duration::from_secs(1_000)));
        assert!(!claims.is_expired_at(UNIX_EPOCH + Duration::from_secs(999)));
    }

    #[test]
    fn test_current_user_reads_store() {
        let token = jwt(&serde_json::json!({"user_id": "u-7"}));
        let store = MemoryTokenStore::with_tokens(Some(&token), None);

        let claims = current_user(&store).unwrap();
        assert_eq!(claims.user_id().as_deref(), Some("u-7"));
        assert!(current_user(&MemoryTokenStore::new()).is_none());
    }
}

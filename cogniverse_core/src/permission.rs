//! Module-level access checks for admin views.

use cogniverse_env::HttpTransport;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api_client::ApiClient;

/// Admin modules the backend gates individually.
pub mod modules {
    pub const SYSTEM_LOGS: &str = "SYSTEM_LOGS";
    pub const USER_MANAGEMENT: &str = "USER_MANAGEMENT";
    pub const ANNOUNCEMENTS: &str = "ANNOUNCEMENTS";
    pub const CREDIT_TRANSACTIONS: &str = "CREDIT_TRANSACTIONS";
    pub const ACCESS_CONTROL: &str = "ACCESS_CONTROL";
    pub const MAINTENANCE: &str = "MAINTENANCE";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    None,
    Read,
    Write,
    Full,
}

impl PermissionLevel {
    /// Case-insensitive parse; anything unrecognised is `None`.
    pub fn parse(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "read" => PermissionLevel::Read,
            "write" => PermissionLevel::Write,
            "full" => PermissionLevel::Full,
            _ => PermissionLevel::None,
        }
    }

    pub fn can_read(self) -> bool {
        matches!(self, PermissionLevel::Read | PermissionLevel::Write | PermissionLevel::Full)
    }

    pub fn can_write(self) -> bool {
        matches!(self, PermissionLevel::Write | PermissionLevel::Full)
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PermissionLevel::None => "none",
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Full => "full",
        };
        f.write_str(name)
    }
}

/// The caller's access to one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub module: String,
    pub level: PermissionLevel,
}

impl Permission {
    /// Reads `level` (or `permission`) from a permission response.
    pub fn from_response(module: &str, response: &Value) -> Self {
        let level = ["level", "permission"]
            .iter()
            .find_map(|key| response.get(*key).and_then(Value::as_str))
            .map(PermissionLevel::parse)
            .unwrap_or_default();
        Self {
            module: module.to_string(),
            level,
        }
    }

    pub fn denied(module: &str) -> Self {
        Self {
            module: module.to_string(),
            level: PermissionLevel::None,
        }
    }

    pub fn can_read(&self) -> bool {
        self.level.can_read()
    }

    pub fn can_write(&self) -> bool {
        self.level.can_write()
    }
}

impl<T: HttpTransport> ApiClient<T> {
    /// Resolves the caller's permission. Failures deny access.
    pub async fn permission(&self, module: &str) -> Permission {
        match self.get_permission(module).await {
            Ok(response) => Permission::from_response(module, &response),
            Err(e) => {
                tracing::warn!(module, error = %e, "permission check failed, denying access");
                Permission::denied(module)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::testing::ScriptedTransport;
    use cogniverse_env::HttpResponse;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_level_capabilities() {
        assert!(!PermissionLevel::None.can_read());
        assert!(PermissionLevel::Read.can_read());
        assert!(!PermissionLevel::Read.can_write());
        assert!(PermissionLevel::Write.can_write());
        assert!(PermissionLevel::Full.can_read() && PermissionLevel::Full.can_write());
    }

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!(PermissionLevel::parse("WRITE"), PermissionLevel::Write);
        assert_eq!(PermissionLevel::parse("admin"), PermissionLevel::None);
        let p = Permission::from_response(modules::SYSTEM_LOGS, &json!({"permission": "read"}));
        assert_eq!(p.level, PermissionLevel::Read);
        let missing = Permission::from_response(modules::SYSTEM_LOGS, &json!({}));
        assert_eq!(missing.level, PermissionLevel::None);
    }

    #[tokio::test]
    async fn test_failed_query_denies() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::json(500, &json!({"detail": "boom"})));
        transport.push(HttpResponse::json(200, &json!({"level": "full"})));
        let api = ApiClient::new(Arc::clone(&transport), "http://api.test", Arc::new(MemoryTokenStore::new()));

        let denied = api.permission(modules::USER_MANAGEMENT).await;
        let granted = api.permission(modules::USER_MANAGEMENT).await;

        assert_eq!(denied.level, PermissionLevel::None);
        assert!(granted.can_write());
        assert_eq!(transport.requests()[0].path(), "/permissions/USER_MANAGEMENT");
    }
}

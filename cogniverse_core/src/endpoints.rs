//! One method per backend route.
//!
//! Entities are passed through as `serde_json::Value`; only request shaping
//! that the backend relies on (query params, list splitting, bulk bodies)
//! happens here.

use cogniverse_env::HttpTransport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Display;

use crate::api_client::ApiClient;
use crate::error::ApiError;
use crate::payload::SimulationPayload;

/// A list field that may arrive as a real list or a comma-separated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListInput {
    List(Vec<String>),
    Csv(String),
}

impl ListInput {
    /// Splits on commas, trims, and drops empty entries. Lists pass through.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ListInput::List(items) => items,
            ListInput::Csv(text) => text
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for ListInput {
    fn default() -> Self {
        ListInput::List(Vec::new())
    }
}

impl From<&str> for ListInput {
    fn from(text: &str) -> Self {
        ListInput::Csv(text.to_string())
    }
}

impl From<Vec<String>> for ListInput {
    fn from(items: Vec<String>) -> Self {
        ListInput::List(items)
    }
}

/// Form input for `create_agent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAgent {
    pub agentname: String,
    pub agentpersonality: Option<String>,
    #[serde(default)]
    pub agentskill: ListInput,
    pub agentbiography: Option<String>,
    #[serde(default)]
    pub agentconstraints: ListInput,
    #[serde(default)]
    pub agentquirk: ListInput,
    pub agentmotivation: Option<String>,
}

impl NewAgent {
    /// Request body with list fields split and text fields defaulted.
    pub fn to_body(&self) -> Value {
        json!({
            "agentname": self.agentname,
            "agentpersonality": self.agentpersonality,
            "agentskill": self.agentskill.clone().into_vec(),
            "agentbiography": self.agentbiography.clone().unwrap_or_default(),
            "agentconstraints": self.agentconstraints.clone().into_vec(),
            "agentquirk": self.agentquirk.clone().into_vec(),
            "agentmotivation": self.agentmotivation.clone().unwrap_or_default(),
        })
    }
}

/// Query filters for `GET /system-logs/`.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub level: Option<String>,
}

/// Query filters for `GET /admin/users/`.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub role: Option<String>,
}

impl<T: HttpTransport> ApiClient<T> {
    // ---- auth ----

    pub async fn register(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/auth/register", payload).await
    }

    /// Logs in and stores the returned token pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<Value, ApiError> {
        let response = self
            .post(
                "/auth/login",
                json!({ "username": username, "password": password }),
            )
            .await?;
        self.store_tokens(&response)?;
        Ok(response)
    }

    pub async fn verify_token(&self) -> Result<Value, ApiError> {
        self.get("/auth/verify").await
    }

    /// Calls the logout route, then clears local tokens whatever the outcome.
    pub async fn logout(&self) -> Result<Value, ApiError> {
        let result = self.post_empty("/auth/logout").await;
        self.tokens().clear()?;
        result
    }

    fn store_tokens(&self, response: &Value) -> Result<(), ApiError> {
        let access = response.get("access_token").and_then(Value::as_str);
        let Some(access) = access else {
            return Err(ApiError::InvalidResponse(
                "login response carried no access_token".into(),
            ));
        };
        self.tokens().set_access_token(access)?;
        if let Some(refresh) = response.get("refresh_token").and_then(Value::as_str) {
            self.tokens().set_refresh_token(refresh)?;
        }
        Ok(())
    }

    // ---- user profile ----

    pub async fn get_user_profile(&self) -> Result<Value, ApiError> {
        self.get("/users/profile").await
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<Value, ApiError> {
        self.put(
            "/users/profile/password",
            json!({ "current_password": current_password, "new_password": new_password }),
        )
        .await
    }

    // ---- projects ----

    pub async fn get_projects(
        &self,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Value, ApiError> {
        self.get_with_query(
            "/projects/",
            &[
                ("page", page.map(|p| p.to_string())),
                ("limit", limit.map(|l| l.to_string())),
            ],
        )
        .await
    }

    pub async fn create_project(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/projects/", payload).await
    }

    pub async fn update_project(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/projects/{}", id), payload).await
    }

    pub async fn delete_project(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/projects/{}", id)).await
    }

    // ---- agents ----

    pub async fn get_agents(&self) -> Result<Value, ApiError> {
        self.get("/agents/").await
    }

    pub async fn get_agent(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/agents/{}", id)).await
    }

    pub async fn create_agent(&self, agent: &NewAgent) -> Result<Value, ApiError> {
        self.post("/agents/", agent.to_body()).await
    }

    pub async fn update_agent(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/agents/{}", id), payload).await
    }

    pub async fn delete_agent(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/agents/{}", id)).await
    }

    pub async fn get_agents_by_user(
        &self,
        user_id: impl Display,
        page: u32,
        q: &str,
    ) -> Result<Value, ApiError> {
        self.get_with_query(
            &format!("/agents/user/{}", user_id),
            &[("page", Some(page.to_string())), ("q", Some(q.to_string()))],
        )
        .await
    }

    // ---- project-agent links ----

    pub async fn create_project_agent(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/project-agents/", payload).await
    }

    pub async fn get_project_agents(&self) -> Result<Value, ApiError> {
        self.get("/project-agents/").await
    }

    pub async fn update_project_agent(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/project-agents/{}", id), payload).await
    }

    pub async fn delete_project_agent(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/project-agents/{}", id)).await
    }

    // ---- agent relations ----

    pub async fn get_agent_relations(&self) -> Result<Value, ApiError> {
        self.get("/agent-relations/").await
    }

    pub async fn create_agent_relation(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/agent-relations/", payload).await
    }

    pub async fn update_agent_relation(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/agent-relations/{}", id), payload).await
    }

    pub async fn delete_agent_relation(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/agent-relations/{}", id)).await
    }

    // ---- scenarios ----

    pub async fn get_scenarios(&self) -> Result<Value, ApiError> {
        self.get("/scenarios/").await
    }

    pub async fn get_scenario(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/scenarios/{}", id)).await
    }

    pub async fn create_scenario(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/scenarios/", payload).await
    }

    pub async fn update_scenario(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/scenarios/{}", id), payload).await
    }

    pub async fn delete_scenario(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/scenarios/{}", id)).await
    }

    // ---- results ----

    pub async fn get_results(&self) -> Result<Value, ApiError> {
        self.get("/results/").await
    }

    pub async fn get_result(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/results/{}", id)).await
    }

    pub async fn create_result(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/results/", payload).await
    }

    pub async fn update_result(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/results/{}", id), payload).await
    }

    pub async fn delete_result(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/results/{}", id)).await
    }

    pub async fn get_results_by_agent_scenario_type(
        &self,
        project_agent_id: impl Display,
        scenario_id: impl Display,
        result_type: &str,
    ) -> Result<Value, ApiError> {
        self.get(&format!(
            "/results/agent/{}/scenario/{}/type/{}",
            project_agent_id, scenario_id, result_type
        ))
        .await
    }

    // ---- memory ----

    pub async fn create_memory(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/memory/", payload).await
    }

    pub async fn get_memory(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/memory/{}", id)).await
    }

    pub async fn list_memories_by_project(&self, project_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/memory/project/{}", project_id)).await
    }

    pub async fn list_memories_by_agent(&self, agent_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/memory/agent/{}", agent_id)).await
    }

    pub async fn update_memory(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/memory/{}", id), payload).await
    }

    pub async fn delete_memory(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/memory/{}", id)).await
    }

    // ---- weaver ----

    pub async fn create_weaver(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/weaver/", payload).await
    }

    pub async fn get_weaver(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/weaver/{}", id)).await
    }

    pub async fn list_weavers_by_project(&self, project_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/weaver/project/{}", project_id)).await
    }

    pub async fn list_weavers_by_agent(&self, agent_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/weaver/agent/{}", agent_id)).await
    }

    pub async fn update_weaver(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/weaver/{}", id), payload).await
    }

    pub async fn delete_weaver(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/weaver/{}", id)).await
    }

    // ---- configs ----

    pub async fn get_configs(&self) -> Result<Value, ApiError> {
        self.get("/configs/").await
    }

    pub async fn get_config(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/configs/{}", id)).await
    }

    pub async fn create_config(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/configs/", payload).await
    }

    pub async fn update_config(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/configs/{}", id), payload).await
    }

    pub async fn delete_config(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/configs/{}", id)).await
    }

    // ---- announcements ----

    pub async fn get_announcements(&self) -> Result<Value, ApiError> {
        self.get("/announcements/").await
    }

    pub async fn create_announcement(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/announcements/", payload).await
    }

    pub async fn update_announcement(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/announcements/{}", id), payload).await
    }

    pub async fn delete_announcement(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/announcements/{}", id)).await
    }

    // ---- system logs ----

    /// Returns `{ items, page, total_pages, ... }`.
    pub async fn get_system_logs(&self, query: &LogQuery) -> Result<Value, ApiError> {
        self.get_with_query(
            "/system-logs/",
            &[
                ("page", query.page.map(|p| p.to_string())),
                ("limit", query.limit.map(|l| l.to_string())),
                ("search", query.search.clone()),
                ("level", query.level.clone()),
            ],
        )
        .await
    }

    pub async fn create_system_log(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/system-logs/", payload).await
    }

    pub async fn delete_system_log(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/system-logs/{}", id)).await
    }

    pub async fn delete_system_logs(&self, log_ids: &[Value]) -> Result<Value, ApiError> {
        self.delete_with_body("/system-logs/bulk", json!({ "log_ids": log_ids }))
            .await
    }

    // ---- access controls ----

    pub async fn get_access_controls(&self) -> Result<Value, ApiError> {
        self.get("/access-controls/").await
    }

    pub async fn get_access_control(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/access-controls/{}", id)).await
    }

    pub async fn create_access_control(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/access-controls/", payload).await
    }

    pub async fn update_access_control(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/access-controls/{}", id), payload).await
    }

    pub async fn delete_access_control(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/access-controls/{}", id)).await
    }

    // ---- maintenance ----

    pub async fn get_maintenance(&self) -> Result<Value, ApiError> {
        self.get("/maintenance/").await
    }

    pub async fn update_maintenance(&self, module_key: &str, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/maintenance/{}", module_key), payload).await
    }

    pub async fn get_global_maintenance(&self) -> Result<Value, ApiError> {
        self.get("/maintenance/global").await
    }

    // ---- permissions ----

    pub async fn get_permission(&self, module_key: &str) -> Result<Value, ApiError> {
        self.get(&format!("/permissions/{}", module_key)).await
    }

    // ---- user management ----

    pub async fn get_users(&self, query: &UserQuery) -> Result<Value, ApiError> {
        self.get_with_query(
            "/admin/users/",
            &[
                ("page", query.page.map(|p| p.to_string())),
                ("limit", query.limit.map(|l| l.to_string())),
                ("search", query.search.clone()),
                ("status", query.status.clone()),
                ("role", query.role.clone()),
            ],
        )
        .await
    }

    pub async fn get_user(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/admin/users/{}", id)).await
    }

    pub async fn create_user(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/admin/users/", payload).await
    }

    pub async fn update_user(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/admin/users/{}", id), payload).await
    }

    pub async fn change_user_status(&self, id: impl Display, status: &str) -> Result<Value, ApiError> {
        self.patch(&format!("/admin/users/{}/status", id), json!({ "status": status }))
            .await
    }

    pub async fn delete_user(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/admin/users/{}", id)).await
    }

    pub async fn hard_delete_user(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/admin/users/{}/hard", id)).await
    }

    pub async fn bulk_change_user_status(&self, user_ids: &[Value], status: &str) -> Result<Value, ApiError> {
        self.post(
            "/admin/users/bulk/status",
            json!({ "user_ids": user_ids, "status": status }),
        )
        .await
    }

    pub async fn bulk_delete_users(&self, user_ids: &[Value]) -> Result<Value, ApiError> {
        self.post("/admin/users/bulk/delete", json!({ "user_ids": user_ids }))
            .await
    }

    // ---- credit configs ----

    pub async fn get_credit_configs(&self) -> Result<Value, ApiError> {
        self.get("/credit-configs/").await
    }

    pub async fn get_credit_config(&self, id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/credit-configs/{}", id)).await
    }

    pub async fn create_credit_config(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/credit-configs/", payload).await
    }

    pub async fn update_credit_config(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/credit-configs/{}", id), payload).await
    }

    pub async fn delete_credit_config(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/credit-configs/{}", id)).await
    }

    /// Public list of active credit packs.
    pub async fn get_active_credit_packs(&self) -> Result<Value, ApiError> {
        self.get("/credit-configs/credit-list").await
    }

    // ---- billing ----

    pub async fn get_my_billing(&self) -> Result<Value, ApiError> {
        self.get("/billing/me").await
    }

    pub async fn get_billing_by_user(&self, user_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/billing/{}", user_id)).await
    }

    pub async fn get_billings(&self) -> Result<Value, ApiError> {
        self.get("/billing/").await
    }

    pub async fn create_billing(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/billing/", payload).await
    }

    pub async fn update_billing(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/billing/{}", id), payload).await
    }

    pub async fn delete_billing(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/billing/{}", id)).await
    }

    // ---- credit transactions ----

    pub async fn get_transactions(&self) -> Result<Value, ApiError> {
        self.get("/credit-transactions/").await
    }

    pub async fn get_transactions_by_user(&self, user_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/credit-transactions/user/{}", user_id)).await
    }

    pub async fn create_transaction(&self, payload: Value) -> Result<Value, ApiError> {
        self.post("/credit-transactions/", payload).await
    }

    pub async fn update_transaction(&self, id: impl Display, payload: Value) -> Result<Value, ApiError> {
        self.put(&format!("/credit-transactions/{}", id), payload).await
    }

    pub async fn delete_transaction(&self, id: impl Display) -> Result<Value, ApiError> {
        self.delete(&format!("/credit-transactions/{}", id)).await
    }

    /// Applies a transaction to the billing balance.
    pub async fn apply_transaction(&self, id: impl Display) -> Result<Value, ApiError> {
        self.post_empty(&format!("/credit-transactions/{}/apply", id)).await
    }

    pub async fn reverse_transaction(&self, id: impl Display) -> Result<Value, ApiError> {
        self.post_empty(&format!("/credit-transactions/{}/reverse", id)).await
    }

    // ---- payments ----

    pub async fn create_payment_session(&self, pack_key: &str) -> Result<Value, ApiError> {
        self.post("/payments/create-session", json!({ "pack_key": pack_key }))
            .await
    }

    pub async fn verify_payment_session(&self, session_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/payments/verify-session/{}", session_id)).await
    }

    // ---- simulations ----

    pub async fn create_simulation(&self, payload: &SimulationPayload) -> Result<Value, ApiError> {
        let body = serde_json::to_value(payload)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        self.post("/simulations", body).await
    }

    pub async fn get_simulation(&self, id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/simulations/{}", id)).await
    }

    pub async fn advance_simulation(&self, id: &str, steps: u32) -> Result<Value, ApiError> {
        self.post(&format!("/simulations/{}/advance", id), json!({ "steps": steps }))
            .await
    }

    /// Injects a fate twist; `None` lets the backend pick one.
    pub async fn trigger_fate(&self, id: &str, prompt: Option<&str>) -> Result<Value, ApiError> {
        let body = match prompt {
            Some(prompt) => json!({ "prompt": prompt }),
            None => json!({}),
        };
        self.post(&format!("/simulations/{}/fate", id), body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryTokenStore, TokenStore};
    use crate::testing::ScriptedTransport;
    use cogniverse_env::{HttpResponse, Method};
    use std::sync::Arc;

    fn setup() -> (Arc<ScriptedTransport>, Arc<MemoryTokenStore>, ApiClient<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let tokens = Arc::new(MemoryTokenStore::new());
        let api = ApiClient::new(Arc::clone(&transport), "http://api.test", tokens.clone());
        (transport, tokens, api)
    }

    #[test]
    fn test_list_input_splits_csv() {
        let list = ListInput::from(" rust, ,go ,");
        assert_eq!(list.into_vec(), vec!["rust".to_string(), "go".to_string()]);

        let list = ListInput::from(vec!["a, b".to_string()]);
        assert_eq!(list.into_vec(), vec!["a, b".to_string()]);
    }

    #[tokio::test]
    async fn test_create_agent_body() {
        let (transport, _, api) = setup();
        transport.push(HttpResponse::json(201, &json!({"agentid": 1})));

        let agent = NewAgent {
            agentname: "Ada".into(),
            agentskill: "math, poetry".into(),
            ..Default::default()
        };
        api.create_agent(&agent).await.unwrap();

        let sent = &transport.requests()[0];
        let body = sent.body.as_ref().unwrap();
        assert_eq!(body["agentskill"], json!(["math", "poetry"]));
        assert_eq!(body["agentconstraints"], json!([]));
        assert_eq!(body["agentbiography"], "");
        assert_eq!(body["agentmotivation"], "");
    }

    #[tokio::test]
    async fn test_get_projects_only_sends_set_params() {
        let (transport, _, api) = setup();
        transport.push(HttpResponse::json(200, &json!([])));
        transport.push(HttpResponse::json(200, &json!([])));

        api.get_projects(Some(2), None).await.unwrap();
        api.get_projects(None, Some(50)).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent[0].query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(sent[1].query, vec![("limit".to_string(), "50".to_string())]);
    }

    #[tokio::test]
    async fn test_bulk_log_delete_uses_body() {
        let (transport, _, api) = setup();
        transport.push(HttpResponse::json(200, &json!({"deleted": 2})));

        api.delete_system_logs(&[json!(4), json!(9)]).await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::Delete);
        assert_eq!(sent.path(), "/system-logs/bulk");
        assert_eq!(sent.body, Some(json!({"log_ids": [4, 9]})));
    }

    #[tokio::test]
    async fn test_login_stores_tokens() {
        let (transport, tokens, api) = setup();
        transport.push(HttpResponse::json(
            200,
            &json!({"access_token": "A", "refresh_token": "R"}),
        ));

        api.login("ada", "pw").await.unwrap();

        assert_eq!(tokens.access_token().as_deref(), Some("A"));
        assert_eq!(tokens.refresh_token().as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_logout_clears_tokens_even_on_failure() {
        let (transport, tokens, api) = setup();
        tokens.set_access_token("A").unwrap();
        transport.push(HttpResponse::json(500, &json!({"detail": "down"})));

        assert!(api.logout().await.is_err());
        assert_eq!(tokens.access_token(), None);
    }

    #[tokio::test]
    async fn test_simulation_routes() {
        let (transport, _, api) = setup();
        for _ in 0..3 {
            transport.push(HttpResponse::json(200, &json!({})));
        }

        api.advance_simulation("s1", 3).await.unwrap();
        api.trigger_fate("s1", Some("storm")).await.unwrap();
        api.trigger_fate("s1", None).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent[0].path(), "/simulations/s1/advance");
        assert_eq!(sent[0].body, Some(json!({"steps": 3})));
        assert_eq!(sent[1].body, Some(json!({"prompt": "storm"})));
        assert_eq!(sent[2].body, Some(json!({})));
    }

    #[tokio::test]
    async fn test_admin_status_patch() {
        let (transport, _, api) = setup();
        transport.push(HttpResponse::json(200, &json!({})));

        api.change_user_status(7, "suspended").await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::Patch);
        assert_eq!(sent.path(), "/admin/users/7/status");
        assert_eq!(sent.body, Some(json!({"status": "suspended"})));
    }
}

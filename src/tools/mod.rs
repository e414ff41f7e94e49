//! Tool trait and registry
//!
//! Every capability declares a name, a JSON-schema argument contract and
//! an invocation returning the uniform `{status, data, message}` envelope.
//! The registry is built once at startup and read-only afterwards.

use crate::config::ToolCredentials;
use crate::llm::ToolDefinition;
use crate::models::ToolEnvelope;
use crate::Result;
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod expenses;
pub mod feedback;
pub mod ledger;
pub mod market;
pub mod validation;

pub use expenses::{AddExpenseTool, AddGoalTool, ExpenseSummaryTool, QueryExpensesTool};
pub use ledger::{InMemoryLedger, LedgerStore, PostgresLedger};
pub use market::{StockPriceTool, WebSearchTool};

/// Per-invocation context handed to a tool by the dispatcher.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub call_id: String,
    /// Stable across re-dispatch of the same call after a crash.
    pub idempotency_key: String,
}

impl ToolContext {
    pub fn new(session_id: &str, call_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            call_id: call_id.to_string(),
            idempotency_key: idempotency_key(session_id, call_id),
        }
    }
}

/// hex(sha256(session_id ‖ 0x00 ‖ call_id))
pub fn idempotency_key(session_id: &str, call_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(call_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Trait for a single capability
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Argument that identifies the acting user. The dispatcher overwrites
    /// it with the session id.
    fn identity_field(&self) -> Option<&'static str> {
        None
    }

    /// Arguments arrive validated against `parameters()`. Domain failures
    /// belong in an error envelope; `Err` is for infrastructure failures.
    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<ToolEnvelope>;
}

/// Tool registry for looking up capabilities by name
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Definitions advertised to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared HTTP client for the market and search tools.
pub(crate) fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Create the registry with the bookkeeping and market capabilities.
pub fn create_default_registry(
    ledger: Arc<dyn LedgerStore>,
    credentials: &ToolCredentials,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    let client = http_client()?;

    registry.register(Arc::new(AddExpenseTool::new(ledger.clone())));
    registry.register(Arc::new(QueryExpensesTool::new(ledger.clone())));
    registry.register(Arc::new(ExpenseSummaryTool::new(ledger.clone())));
    registry.register(Arc::new(AddGoalTool::new(ledger)));

    registry.register(Arc::new(StockPriceTool::new(
        client.clone(),
        credentials.alpha_vantage_api_key.clone(),
        credentials.alpha_vantage_base_url.clone(),
    )));
    registry.register(Arc::new(WebSearchTool::new(
        client,
        credentials.serper_api_key.clone(),
        credentials.serper_base_url.clone(),
    )));

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let registry = create_default_registry(
            Arc::new(InMemoryLedger::new()),
            &ToolCredentials::default(),
        )
        .unwrap();

        assert_eq!(
            registry.list(),
            vec![
                "add_expense",
                "add_goal",
                "expense_summary",
                "get_stock_price",
                "query_expenses",
                "web_search",
            ]
        );

        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 6);
        assert!(definitions
            .iter()
            .all(|d| d.parameters["type"] == "object"));
    }

    #[test]
    fn test_idempotency_key_is_stable_and_scoped() {
        assert_eq!(idempotency_key("u1", "call_1"), idempotency_key("u1", "call_1"));
        assert_ne!(idempotency_key("u1", "call_1"), idempotency_key("u2", "call_1"));
        assert_eq!(idempotency_key("u1", "call_1").len(), 64);
    }
}

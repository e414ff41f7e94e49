//! Language-model boundary
//!
//! A model invocation is a single-pass stream: zero or more text fragments
//! followed by exactly one `Completed` event carrying the structured result.

use crate::models::{Message, ToolCallRequest};
use crate::Result;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::pin::Pin;
use uuid::Uuid;

pub mod openai;
pub mod scripted;

pub use openai::OpenAiChatModel;
pub use scripted::{ScriptedModel, ScriptedReply};

/// Tool description advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Final structured output of one model invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelResponse {
    /// Give every call an id unique within the turn. Empty or repeated ids
    /// are replaced.
    pub fn normalize_call_ids(&mut self, seen: &mut HashSet<String>) {
        for call in &mut self.tool_calls {
            if call.call_id.trim().is_empty() || seen.contains(&call.call_id) {
                call.call_id = format!("call_{}", Uuid::new_v4().simple());
            }
            seen.insert(call.call_id.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Fragment(String),
    Completed(ModelResponse),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent>> + Send>>;

/// Trait for chat models able to request tool calls
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream>;
}

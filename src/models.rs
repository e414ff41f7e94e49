//! Core data models for the conversation engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

//
// ================= Tool I/O =================
//

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Uniform envelope every capability returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEnvelope {
    pub status: ToolStatus,
    #[serde(default)]
    pub data: Option<Value>,
    pub message: String,
}

impl ToolEnvelope {
    pub fn success(data: Value, message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            data: Some(data),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            data: None,
            message: message.into(),
        }
    }
}

/// Outcome of one `ToolCallRequest`, linked back by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub status: ToolStatus,
    #[serde(default)]
    pub data: Option<Value>,
    pub message: String,
}

impl ToolCallResult {
    pub fn from_envelope(call_id: impl Into<String>, envelope: ToolEnvelope) -> Self {
        Self {
            call_id: call_id.into(),
            status: envelope.status,
            data: envelope.data,
            message: envelope.message,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            status: ToolStatus::Error,
            data: None,
            message: message.into(),
        }
    }
}

//
// ================= Message =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolCallResult>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_result: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        let mut message = Self::new(Role::Assistant, content.into());
        message.tool_calls = tool_calls;
        message
    }

    /// Tool-role message carrying a result. The content is the JSON envelope the
    /// model reads back.
    pub fn tool(result: ToolCallResult) -> Self {
        let content = serde_json::json!({
            "status": result.status,
            "data": result.data,
            "message": result.message,
        })
        .to_string();

        let mut message = Self::new(Role::Tool, content);
        message.tool_result = Some(result);
        message
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.call_id.as_str())
    }
}

//
// ================= Conversation State =================
//

/// Ordered, append-only message log for one (session, namespace).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Reducer form: prior sequence followed by `batch`.
    pub fn appended(&self, batch: impl IntoIterator<Item = Message>) -> Self {
        let mut next = self.clone();
        next.messages.extend(batch);
        next
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.messages.iter().any(|m| m.message_id == message_id)
    }

    /// Tool calls of the last assistant message that have no result yet, in
    /// request order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCallRequest> {
        let Some(position) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };

        let resolved: HashSet<&str> = self.messages[position + 1..]
            .iter()
            .filter_map(Message::tool_call_id)
            .collect();

        self.messages[position]
            .tool_calls
            .iter()
            .filter(|call| !resolved.contains(call.call_id.as_str()))
            .cloned()
            .collect()
    }

    /// Replays a turn's messages on top of a freshly loaded state.
    ///
    /// Messages already present (by id) are skipped. Those must form the
    /// tail of `self`; otherwise another writer appended after them and the
    /// turn cannot be placed without interleaving, so `None` is returned.
    pub fn rebase_turn(&self, turn: &[Message]) -> Option<Self> {
        let applied = turn
            .iter()
            .take_while(|m| self.contains(m.message_id))
            .count();

        if turn[applied..].iter().any(|m| self.contains(m.message_id)) {
            return None;
        }

        if applied > 0 {
            let tail = &self.messages[self.messages.len().saturating_sub(applied)..];
            let matches_tail = tail
                .iter()
                .zip(&turn[..applied])
                .all(|(stored, ours)| stored.message_id == ours.message_id);
            if tail.len() != applied || !matches_tail {
                return None;
            }
        }

        Some(self.appended(turn[applied..].iter().cloned()))
    }
}

//
// ================= Checkpoint =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub namespace: String,
    /// 0 until the first successful save.
    pub version: u64,
    pub state: ConversationState,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn empty(session_id: &str, namespace: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            namespace: namespace.to_string(),
            version: 0,
            state: ConversationState::new(),
            updated_at: Utc::now(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.to_string(),
            name: "add_expense".to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn test_pending_tool_calls_after_assistant_request() {
        let mut state = ConversationState::new();
        state.push(Message::user("log two expenses"));
        state.push(Message::assistant("", vec![call("a"), call("b")]));
        state.push(Message::tool(ToolCallResult::error("a", "boom")));

        let pending = state.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].call_id, "b");
    }

    #[test]
    fn test_no_pending_calls_once_answered() {
        let mut state = ConversationState::new();
        state.push(Message::user("hello"));
        state.push(Message::assistant("Hi there!", vec![]));
        assert!(state.pending_tool_calls().is_empty());
    }

    #[test]
    fn test_appended_leaves_prior_state_untouched() {
        let prior = ConversationState::from_messages(vec![Message::user("one")]);
        let next = prior.appended(vec![Message::assistant("two", vec![])]);
        assert_eq!(prior.len(), 1);
        assert_eq!(next.len(), 2);
        assert_eq!(next.messages()[0], prior.messages()[0]);
    }

    #[test]
    fn test_rebase_skips_already_applied_messages() {
        let user = Message::user("hello");
        let reply = Message::assistant("Hi!", vec![]);
        let latest = ConversationState::from_messages(vec![user.clone()]);

        let rebased = latest.rebase_turn(&[user, reply.clone()]).unwrap();
        assert_eq!(rebased.len(), 2);
        assert_eq!(rebased.messages()[1].message_id, reply.message_id);
    }

    #[test]
    fn test_rebase_appends_after_foreign_turn() {
        let foreign = ConversationState::from_messages(vec![
            Message::user("other"),
            Message::assistant("other reply", vec![]),
        ]);
        let ours = vec![Message::user("mine"), Message::assistant("my reply", vec![])];

        let rebased = foreign.rebase_turn(&ours).unwrap();
        assert_eq!(rebased.len(), 4);
        assert_eq!(rebased.messages()[2].content, "mine");
    }

    #[test]
    fn test_rebase_rejects_interleaving() {
        let user = Message::user("mine");
        let latest = ConversationState::from_messages(vec![
            user.clone(),
            Message::user("someone else"),
        ]);
        let turn = vec![user, Message::assistant("reply", vec![])];
        assert!(latest.rebase_turn(&turn).is_none());
    }

    #[test]
    fn test_tool_message_content_is_envelope_json() {
        let message = Message::tool(ToolCallResult {
            call_id: "c1".into(),
            status: ToolStatus::Success,
            data: Some(json!({"amount": 200.0})),
            message: "added".into(),
        });
        let parsed: Value = serde_json::from_str(&message.content).unwrap();
        assert_eq!(parsed["status"], "success");
        assert_eq!(parsed["message"], "added");
        assert_eq!(message.tool_call_id(), Some("c1"));
    }
}

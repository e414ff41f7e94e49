//! Scripted model for development & testing
//!
//! Plays back a queue of prepared replies and records every history it was
//! shown. Keeps the orchestrator runnable without a model endpoint.

use crate::error::OrchestrationError;
use crate::llm::{ChatModel, ModelEvent, ModelResponse, ModelStream, ToolDefinition};
use crate::models::{Message, ToolCallRequest};
use crate::Result;
use futures::stream;
use std::collections::VecDeque;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Reply {
        fragments: Vec<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    /// Streams `fragments`, then fails with `error`.
    Fail {
        fragments: Vec<String>,
        error: String,
    },
    /// Never completes.
    Hang,
}

impl ScriptedReply {
    pub fn text(fragments: &[&str]) -> Self {
        Self::Reply {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Reply {
            fragments: Vec::new(),
            tool_calls,
        }
    }

    pub fn failure(error: &str) -> Self {
        Self::Fail {
            fragments: Vec::new(),
            error: error.to_string(),
        }
    }
}

pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            histories: Mutex::new(Vec::new()),
        }
    }

    /// Histories passed to each invocation, oldest first.
    pub async fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().await.clone()
    }

    pub async fn invocations(&self) -> usize {
        self.histories.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(
        &self,
        _system_prompt: &str,
        history: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ModelStream> {
        self.histories.lock().await.push(history.to_vec());

        let reply = self.replies.lock().await.pop_front().ok_or_else(|| {
            OrchestrationError::ModelError("scripted model has no replies left".to_string())
        })?;

        let stream: ModelStream = match reply {
            ScriptedReply::Reply {
                fragments,
                tool_calls,
            } => {
                let content = fragments.concat();
                let mut events: Vec<Result<ModelEvent>> = fragments
                    .into_iter()
                    .map(|f| Ok(ModelEvent::Fragment(f)))
                    .collect();
                events.push(Ok(ModelEvent::Completed(ModelResponse {
                    content,
                    tool_calls,
                })));
                Box::pin(stream::iter(events))
            }
            ScriptedReply::Fail { fragments, error } => {
                let mut events: Vec<Result<ModelEvent>> = fragments
                    .into_iter()
                    .map(|f| Ok(ModelEvent::Fragment(f)))
                    .collect();
                events.push(Err(OrchestrationError::ModelError(error)));
                Box::pin(stream::iter(events))
            }
            ScriptedReply::Hang => Box::pin(stream::pending::<Result<ModelEvent>>()),
        };

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_plays_back_in_order() {
        let model = ScriptedModel::new(vec![ScriptedReply::text(&["Hel", "lo"])]);
        let mut stream = model.stream("", &[Message::user("hi")], &[]).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ModelEvent::Fragment("Hel".into()));
        match &events[2] {
            ModelEvent::Completed(response) => assert_eq!(response.content, "Hello"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(model.invocations().await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let model = ScriptedModel::new(Vec::new());
        assert!(model.stream("", &[], &[]).await.is_err());
    }
}

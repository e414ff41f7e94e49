//! OpenAI-compatible streaming chat client
//!
//! Speaks `/chat/completions` with `stream: true` and tool binding.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::ModelConfig;
use crate::error::OrchestrationError;
use crate::llm::{ChatModel, ModelEvent, ModelResponse, ModelStream, ToolDefinition};
use crate::models::{Message, Role, ToolCallRequest};
use crate::Result;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error};

pub struct OpenAiChatModel {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            OrchestrationError::ConfigError("OPENAI_API_KEY is not configured".to_string())
        })?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn build_request_body(
        &self,
        system_prompt: &str,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Value {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        messages.extend(history.iter().map(to_wire_message));

        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": true,
            "messages": messages,
        });

        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        body
    }
}

fn to_wire_message(message: &Message) -> Value {
    match message.role {
        Role::System => json!({ "role": "system", "content": message.content }),
        Role::User => json!({ "role": "user", "content": message.content }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.call_id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            json!({
                "role": "assistant",
                "content": content,
                "tool_calls": calls,
            })
        }
        Role::Assistant => json!({ "role": "assistant", "content": message.content }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id().unwrap_or_default(),
            "content": message.content,
        }),
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(system_prompt, history, tools);

        debug!(model = %self.model, messages = history.len(), "Calling chat completions");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Model request failed: {}", e);
                OrchestrationError::ModelError(format!("Model request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Model endpoint error response: {}", error_text);
            return Err(OrchestrationError::ModelError(format!(
                "Model endpoint returned {}: {}",
                status, error_text
            )));
        }

        let bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            futures::pin_mut!(bytes);
            let mut buffer: Vec<u8> = Vec::new();
            let mut accumulator = StreamAccumulator::default();
            let mut done = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(OrchestrationError::ModelError(format!(
                            "Model stream interrupted: {}",
                            e
                        )));
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);

                while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&raw);

                    match parse_sse_line(line.trim()) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            done = true;
                            break 'read;
                        }
                        SseLine::Data(data) => match accumulator.apply(data) {
                            Ok(Some(fragment)) => {
                                yield Ok(ModelEvent::Fragment(fragment));
                            }
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        },
                    }
                }
            }

            if done {
                yield Ok(ModelEvent::Completed(accumulator.finish()));
            } else {
                yield Err(OrchestrationError::ModelError(
                    "Model stream ended before completion".to_string(),
                ));
            }
        };

        Ok(Box::pin(stream))
    }
}

enum SseLine<'a> {
    Skip,
    Done,
    Data(&'a str),
}

fn parse_sse_line(line: &str) -> SseLine<'_> {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };

    match data.trim() {
        "" => SseLine::Skip,
        "[DONE]" => SseLine::Done,
        payload => SseLine::Data(payload),
    }
}

/// Folds streamed deltas into the final response.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    calls: BTreeMap<usize, PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    /// Returns the text fragment carried by this chunk, if any.
    fn apply(&mut self, data: &str) -> Result<Option<String>> {
        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            OrchestrationError::ModelError(format!("Malformed model stream chunk: {}", e))
        })?;

        if let Some(err) = chunk.error {
            return Err(OrchestrationError::ModelError(format!(
                "Model stream reported an error: {}",
                err
            )));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };

        for delta in choice.delta.tool_calls {
            let partial = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                partial.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    partial.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial.arguments.push_str(&arguments);
                }
            }
        }

        match choice.delta.content {
            Some(text) if !text.is_empty() => {
                self.content.push_str(&text);
                Ok(Some(text))
            }
            _ => Ok(None),
        }
    }

    fn finish(self) -> ModelResponse {
        let tool_calls = self
            .calls
            .into_values()
            .map(|partial| ToolCallRequest {
                call_id: partial.id,
                name: partial.name,
                arguments: parse_arguments(&partial.arguments),
            })
            .collect();

        ModelResponse {
            content: self.content,
            tool_calls,
        }
    }
}

/// Malformed argument JSON is kept as a string so schema validation rejects it.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

//! OpenRouter chat-completions provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::base::{Provider, Usage};
use crate::credentials::{ProviderConfig, Secret};
use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const REFERER: &str = "https://pymol.org";
const APP_TITLE: &str = "PyMOL AI Assistant";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    api_key: Secret,
    model: String,
}

impl OpenRouterProvider {
    /// Build from a resolved config. Fails with `CredentialUnavailable`
    /// when no routing credential resolved.
    pub fn from_config(config: &ProviderConfig) -> AgentResult<Self> {
        let api_key = config
            .routing
            .value
            .clone()
            .ok_or_else(|| AgentError::CredentialUnavailable("OpenRouter".to_string()))?;
        Self::new(OPENROUTER_BASE_URL, api_key, config.model.clone())
    }

    pub fn new<S: Into<String>>(base_url: S, api_key: Secret, model: String) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    /// Cheap authenticated request used by explicit key-test flows.
    pub async fn validate_key(&self) -> AgentResult<()> {
        let url = format!("{}/key", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.api_key.expose())
            .send()
            .await
            .map_err(|e| AgentError::NetworkFailure(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                AgentError::AuthenticationRejected("API key was rejected".to_string()),
            ),
            status => Err(AgentError::NetworkFailure(format!(
                "key check failed with status {}",
                status.as_u16()
            ))),
        }
    }

    async fn post(&self, payload: &Value) -> AgentResult<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .header("HTTP-Referer", REFERER)
            .header("X-Title", APP_TITLE)
            .json(payload)
            .send()
            .await
            .map_err(|e| AgentError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or_else(|_| json!({}));

        match status {
            status if status.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                AgentError::AuthenticationRejected(wire_error_message(&body, status)),
            ),
            status => Err(AgentError::NetworkFailure(wire_error_message(&body, status))),
        }
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> AgentResult<(Message, Usage)> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages_to_wire(system, messages),
        });
        if !tools.is_empty() {
            payload["tools"] = tools_to_wire(tools);
        }

        debug!(model = %self.model, turns = messages.len(), "requesting completion");
        let body = self.post(&payload).await?;
        parse_completion(&body)
    }
}

fn wire_error_message(body: &Value, status: StatusCode) -> String {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()))
}

fn tools_to_wire(tools: &[Tool]) -> Value {
    let entries: Vec<Value> = tools
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
        .collect();
    Value::Array(entries)
}

/// Convert internal history to chat-completions messages.
///
/// Tool responses become `role: tool` entries keyed by call id; any
/// image a tool produced rides in a follow-up user message because the
/// tool role only carries text on this wire.
fn messages_to_wire(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut wire = vec![json!({"role": "system", "content": system})];

    for message in messages {
        match message.role {
            Role::User => wire.push(user_to_wire(message)),
            Role::Assistant => wire.push(assistant_to_wire(message)),
            Role::Tool => tool_to_wire(message, &mut wire),
        }
    }
    wire
}

fn user_to_wire(message: &Message) -> Value {
    let mut parts = Vec::new();
    for entry in &message.content {
        match entry {
            MessageContent::Text(text) => {
                parts.push(json!({"type": "text", "text": text.text}));
            }
            MessageContent::Image(image) => {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", image.mime_type, image.data)
                    }
                }));
            }
            _ => {}
        }
    }
    // Plain-text turns stay a string; multimodal turns need the array
    // form.
    if parts.len() == 1 && parts[0]["type"] == "text" {
        json!({"role": "user", "content": parts[0]["text"]})
    } else {
        json!({"role": "user", "content": parts})
    }
}

fn assistant_to_wire(message: &Message) -> Value {
    let mut entry = json!({"role": "assistant"});
    let text = message.text();
    entry["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };

    let tool_calls: Vec<Value> = message
        .tool_requests()
        .iter()
        .filter_map(|request| {
            let call = request.tool_call.as_ref().ok()?;
            Some(json!({
                "id": request.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                }
            }))
        })
        .collect();
    if !tool_calls.is_empty() {
        entry["tool_calls"] = Value::Array(tool_calls);
    }
    entry
}

fn tool_to_wire(message: &Message, wire: &mut Vec<Value>) {
    for entry in &message.content {
        let Some(response) = entry.as_tool_response() else {
            continue;
        };
        match &response.tool_result {
            Ok(contents) => {
                let text: Vec<&str> = contents.iter().filter_map(|c| c.as_text()).collect();
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": response.id,
                    "content": text.join("\n"),
                }));
                for content in contents {
                    if let Some((data, mime)) = content.as_image() {
                        wire.push(json!({
                            "role": "user",
                            "content": [{
                                "type": "image_url",
                                "image_url": {
                                    "url": format!("data:{};base64,{}", mime, data)
                                }
                            }]
                        }));
                    }
                }
            }
            Err(error) => {
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": response.id,
                    "content": format!("Error: {}", error),
                }));
            }
        }
    }
}

fn parse_completion(body: &Value) -> AgentResult<(Message, Usage)> {
    let wire_message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| AgentError::Internal("completion carried no message".to_string()))?;

    let mut message = Message::assistant();
    if let Some(text) = wire_message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(calls) = wire_message.get("tool_calls").and_then(Value::as_array) {
        for (idx, call) in calls.iter().enumerate() {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", idx));
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let raw_arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");

            // A malformed arguments blob is recorded as a failed request
            // so the session can report it back to the model.
            let tool_call = match serde_json::from_str::<Value>(raw_arguments) {
                Ok(arguments) if arguments.is_object() => Ok(ToolCall::new(&name, arguments)),
                Ok(_) | Err(_) => Err(AgentError::InvalidParameters(format!(
                    "arguments for {} are not a JSON object",
                    name
                ))),
            };
            message = message.with_tool_request(id, tool_call);
        }
    }

    let usage = Usage::new(
        body.pointer("/usage/prompt_tokens").and_then(Value::as_i64),
        body.pointer("/usage/completion_tokens")
            .and_then(Value::as_i64),
        body.pointer("/usage/total_tokens").and_then(Value::as_i64),
    );
    Ok((message, usage))
}

//! Chat model client.
//!
//! Messages, tool specs and tool calls use the OpenAI chat-completions wire
//! format directly, so the agent loop can hand the model's `tool_calls`
//! back verbatim on the next turn.
//!
//! | Provider | Type |
//! |----------|------|
//! | `openai` | [`OpenAiChat`] (`POST {base_url}/chat/completions`) |
//! | `disabled` | [`DisabledChat`] |

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::AssistantError;
use crate::remote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Result of one tool call, addressed to the call's id.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A function the model may call, in OpenAI `tools` format.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion. The returned assistant message carries either text
    /// content or `tool_calls`.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage>;
}

/// Single-prompt completion; returns the text content.
pub async fn complete_prompt(model: &dyn ChatModel, prompt: &str) -> Result<String> {
    let reply = model.complete(&[ChatMessage::user(prompt)], &[]).await?;
    Ok(reply.content.unwrap_or_default().trim().to_string())
}

// ============ Disabled ============

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatMessage> {
        Err(AssistantError::external("LLM", "LLM provider is disabled").into())
    }
}

// ============ OpenAI ============

pub struct OpenAiChat {
    model: String,
    temperature: f32,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            client: remote::client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Value> {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": serde_json::to_value(messages)?,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_wire).collect());
            body["tool_choice"] = Value::String("auto".to_string());
        }
        Ok(body)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage> {
        let body = self.request_body(messages, tools)?;
        let json = remote::post_json(
            &self.client,
            "OpenAI chat",
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &Value) -> Result<ChatMessage> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| AssistantError::external("OpenAI chat", "response has no choices"))?;
    serde_json::from_value(message.clone()).map_err(|e| {
        AssistantError::external("OpenAI chat", format!("malformed message: {}", e)).into()
    })
}

/// Build the configured chat model.
///
/// Missing credentials do not stop the service: the model is replaced by
/// [`DisabledChat`] and every call reports an external-service error.
pub fn create_chat_model(config: &LlmConfig) -> Arc<dyn ChatModel> {
    match config.provider.as_str() {
        "openai" => match OpenAiChat::new(config) {
            Ok(chat) => Arc::new(chat),
            Err(e) => {
                tracing::warn!(error = %e, "LLM unavailable, answers will fail until configured");
                Arc::new(DisabledChat)
            }
        },
        _ => Arc::new(DisabledChat),
    }
}

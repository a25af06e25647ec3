//! Wire types and the provider trait for the remote tool-calling model.
//!
//! Tool-calling and schema-constrained output are mutually exclusive: a
//! request is either a `ToolCompletionRequest` (free-form final text, tools
//! offered) or a `SchemaCompletionRequest` (no tools, output constrained to
//! a JSON schema). A provider implementation must not attempt to combine
//! the two in a single call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A primitive-only parameter schema: no nested objects, no free-form JSON.
/// `parameters` holds a JSON Schema object whose property types are limited
/// to string/number/boolean/enum and arrays thereof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    Unknown,
}

/// A completion request in tool mode: tools are offered, the final reply is
/// free-form text.
#[derive(Debug, Clone)]
pub struct ToolCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ToolCompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            max_tokens: Some(4096),
            temperature: Some(0.7),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A completion request in schema mode: no tools, the final reply is
/// constrained to `schema` (a JSON Schema object).
#[derive(Debug, Clone)]
pub struct SchemaCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub schema: serde_json::Value,
    pub max_tokens: Option<u32>,
}

impl SchemaCompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, schema: serde_json::Value) -> Self {
        Self {
            messages,
            schema,
            max_tokens: Some(1024),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaCompletionResponse {
    pub value: serde_json::Value,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Uniform wrapper over a remote tool-calling language model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete_with_tools(
        &self,
        req: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError>;

    async fn complete_with_schema(
        &self,
        req: SchemaCompletionRequest,
    ) -> Result<SchemaCompletionResponse, LlmError>;
}

//! Anthropic Messages API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::LlmError;

use super::provider::{
    ChatMessage, FinishReason, LlmProvider, Role, SchemaCompletionRequest,
    SchemaCompletionResponse, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};

pub struct AnthropicProvider {
    client: Client,
    config: LlmConfig,
}

impl AnthropicProvider {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        use secrecy::ExposeSecret;

        self.config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .ok_or_else(|| LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: "missing LLM_API_KEY".to_string(),
            })
    }

    async fn send<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        body: &T,
    ) -> Result<R, LlmError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key()?)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let reason = if status.as_u16() == 429 {
                format!("rate limit: HTTP 429: {text}")
            } else if status.as_u16() == 408 || status.as_u16() == 504 {
                format!("timeout: HTTP {status}: {text}")
            } else {
                format!("HTTP {status}: {text}")
            };
            return Err(LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason,
            });
        }

        serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
            provider: "anthropic".to_string(),
            reason: format!("{e}: {text}"),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete_with_tools(
        &self,
        req: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let (system, messages) = split_system(&req.messages);
        let tools: Vec<AnthropicTool> = req
            .tools
            .into_iter()
            .map(|t| AnthropicTool {
                name: t.name,
                description: t.description,
                input_schema: t.parameters,
            })
            .collect();

        let body = AnthropicRequest {
            model: self.config.model_id.clone(),
            system,
            messages,
            max_tokens: req.max_tokens.unwrap_or(4096),
            temperature: req.temperature,
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let response: AnthropicResponse = self.send(&body).await?;

        let mut content_text = None;
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                AnthropicContentBlock::Text { text } => content_text = Some(text),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
            }
        }

        let finish_reason = match response.stop_reason.as_deref() {
            Some("tool_use") => FinishReason::ToolUse,
            Some("max_tokens") => FinishReason::Length,
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            _ => FinishReason::Unknown,
        };

        Ok(ToolCompletionResponse {
            content: content_text,
            tool_calls,
            finish_reason,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }

    async fn complete_with_schema(
        &self,
        req: SchemaCompletionRequest,
    ) -> Result<SchemaCompletionResponse, LlmError> {
        let (system, messages) = split_system(&req.messages);

        // Schema mode is implemented as a single forced tool call with the
        // requested schema as its input shape; no other tools are offered,
        // keeping tool-calling and schema-constrained output mutually
        // exclusive as far as any single request is concerned.
        let tool = AnthropicTool {
            name: "emit_result".to_string(),
            description: "Emit the structured result.".to_string(),
            input_schema: req.schema,
        };

        let body = AnthropicRequest {
            model: self.config.model_id.clone(),
            system,
            messages,
            max_tokens: req.max_tokens.unwrap_or(1024),
            temperature: Some(0.0),
            tools: Some(vec![tool]),
        };

        let response: AnthropicResponse = self.send(&body).await?;

        let value = response
            .content
            .into_iter()
            .find_map(|block| match block {
                AnthropicContentBlock::ToolUse { input, .. } => Some(input),
                AnthropicContentBlock::Text { .. } => None,
            })
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "anthropic".to_string(),
                reason: "schema-mode response contained no structured output".to_string(),
            })?;

        Ok(SchemaCompletionResponse {
            value,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }
}

fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system = None;
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::System => system = Some(msg.content.clone()),
            Role::User | Role::Tool => out.push(AnthropicMessage {
                role: "user".to_string(),
                content: msg.content.clone(),
            }),
            Role::Assistant => out.push(AnthropicMessage {
                role: "assistant".to_string(),
                content: msg.content.clone(),
            }),
        }
    }
    (system, out)
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

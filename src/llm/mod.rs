//! The model client: wire types, provider trait, and the turn-based loop.

mod anthropic;
mod model_loop;
mod openai;
mod provider;

pub use anthropic::AnthropicProvider;
pub use model_loop::{ModelLoop, TurnOutcome};
pub use openai::OpenAiProvider;
pub use provider::{
    ChatMessage, FinishReason, LlmProvider, Role, SchemaCompletionRequest,
    SchemaCompletionResponse, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
    ToolDefinition,
};

use std::sync::Arc;

use crate::config::{LlmConfig, LlmProviderType};
use crate::error::LlmError;

/// Create a provider for the configured backend.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider {
        LlmProviderType::Anthropic => Ok(Arc::new(AnthropicProvider::new(config.clone())?)),
        LlmProviderType::OpenAi => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
    }
}

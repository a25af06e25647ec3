//! Per-worker tool registry: the side-effecting functions exposed to the
//! model during a worker's turn loop.

mod chart;
mod narrative;
mod registry;
mod retirement;

pub use chart::CreateChartTool;
pub use narrative::{CommitReportTool, FetchKnowledgeTool};
pub use registry::{ToolRegistry, ToolRegistryError};
pub use retirement::CommitRetirementTool;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStore;
use crate::knowledge::KnowledgeLookup;

/// Error returned by a tool's `execute`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Output from a successful tool execution: a short textual result handed
/// back to the model as a tool-response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    #[serde(skip)]
    pub duration: Duration,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            text: text.into(),
            duration,
        }
    }
}

/// Declares a tool's parameter schema. Limited by construction to the
/// primitive types and lists thereof that the model client accepts — no
/// nested objects, no free-form JSON strings.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Shared context handed to every tool invocation: the job this worker run
/// belongs to, and handles to the collaborators a tool may need.
pub struct ToolContext {
    pub job_id: Uuid,
    pub job_store: Arc<dyn JobStore>,
    pub knowledge: Arc<dyn KnowledgeLookup>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

pub(crate) fn require_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{key}' parameter")))
}

pub(crate) fn require_str_array(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<String>, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{key}' parameter")))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidParameters(format!("'{key}' must be strings")))
        })
        .collect()
}

pub(crate) fn require_f64_array(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<f64>, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{key}' parameter")))?
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| ToolError::InvalidParameters(format!("'{key}' must be numbers")))
        })
        .collect()
}

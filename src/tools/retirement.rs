use std::time::Instant;

use async_trait::async_trait;

use crate::job::SlotValue;

use super::{require_str, Tool, ToolContext, ToolError, ToolOutput};

/// `commit_retirement(markdown, projection_json)`. The Monte-Carlo
/// projection itself is computed deterministically outside the model loop
/// and injected into the worker's prompt; this tool only records the
/// model's narrative gloss alongside the projection it was given.
pub struct CommitRetirementTool;

#[async_trait]
impl Tool for CommitRetirementTool {
    fn name(&self) -> &str {
        "commit_retirement"
    }

    fn description(&self) -> &str {
        "Commit the retirement analysis: a short markdown narrative plus the projection JSON it is based on."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "markdown": { "type": "string" },
                "projection_json": { "type": "string", "description": "The projection, as a JSON-encoded string" }
            },
            "required": ["markdown", "projection_json"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let markdown = require_str(&params, "markdown")?;
        let projection_json = require_str(&params, "projection_json")?;

        let mut projection: serde_json::Value = serde_json::from_str(projection_json)
            .map_err(|e| ToolError::InvalidParameters(format!("invalid projection_json: {e}")))?;

        if let Some(obj) = projection.as_object_mut() {
            obj.insert(
                "narrative".to_string(),
                serde_json::Value::String(markdown.to_string()),
            );
        } else {
            return Err(ToolError::InvalidParameters(
                "projection_json must decode to a JSON object".to_string(),
            ));
        }

        ctx.job_store
            .set_slot(ctx.job_id, SlotValue::Retirement(projection))
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::text(
            "retirement projection committed".to_string(),
            started.elapsed(),
        ))
    }
}

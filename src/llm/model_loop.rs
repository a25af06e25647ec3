//! The turn-based tool-calling loop and its backoff policy.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::LlmError;
use crate::observability;

use super::provider::{
    ChatMessage, LlmProvider, SchemaCompletionRequest, ToolCall, ToolCompletionRequest,
    ToolDefinition,
};

const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_MAX: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 5;

/// Outcome of one tool-mode model turn.
pub enum TurnOutcome {
    /// The model produced a final textual reply; the loop is done.
    Done(String),
    /// The model requested these tool calls; the caller should invoke them
    /// and append the results before calling `run_turn` again.
    ToolCalls(Vec<ToolCall>),
}

/// Drives the tool-mode turn loop for one worker. Does not itself invoke
/// tools — that's the worker runtime's job, since tool execution may write
/// to the job store or other side-effecting resources the loop should stay
/// agnostic to.
pub struct ModelLoop {
    provider: Arc<dyn LlmProvider>,
}

impl ModelLoop {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Run a single turn: send `messages` with `tools` offered, retrying
    /// transient failures with exponential backoff. Returns before
    /// incrementing the turn counter; callers own the turn budget.
    pub async fn run_turn(
        &self,
        job_id: Uuid,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, LlmError> {
        let request = ToolCompletionRequest::new(messages, tools.to_vec());
        let response = self.call_with_backoff(Some(job_id), cancel, "tool_mode", || {
            self.provider.complete_with_tools(request.clone())
        }).await?;

        if !response.tool_calls.is_empty() {
            return Ok(TurnOutcome::ToolCalls(response.tool_calls));
        }

        Ok(TurnOutcome::Done(response.content.unwrap_or_default()))
    }

    /// Run a single schema-mode turn (no tools offered). Used by the
    /// classifier, which never enters the tool loop.
    pub async fn run_schema(
        &self,
        messages: Vec<ChatMessage>,
        schema: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, LlmError> {
        let request = SchemaCompletionRequest::new(messages, schema);
        let response = self
            .call_with_backoff(None, cancel, "schema_mode", || {
                self.provider.complete_with_schema(request.clone())
            })
            .await?;
        Ok(response.value)
    }

    async fn call_with_backoff<T, F, Fut>(
        &self,
        job_id: Option<Uuid>,
        cancel: &CancellationToken,
        mode: &str,
        make_call: F,
    ) -> Result<T, LlmError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        let mut delay = BACKOFF_BASE;

        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            attempt += 1;
            match make_call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(mode, attempt, reason = %err, "model call retrying after transient error");
                    if let Some(job_id) = job_id {
                        observability::model_retry(job_id, attempt, &err.to_string());
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    }
                    delay = (delay * 2).min(BACKOFF_MAX);
                }
                Err(err) if err.is_transient() => {
                    return Err(LlmError::RateLimitExhausted {
                        provider: mode.to_string(),
                        attempts: attempt,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::llm::provider::{SchemaCompletionResponse, ToolCompletionResponse, FinishReason};

    struct FlakyProvider {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn complete_with_tools(
            &self,
            _req: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(LlmError::RequestFailed {
                    provider: "test".to_string(),
                    reason: "rate limit: 429".to_string(),
                });
            }
            Ok(ToolCompletionResponse {
                content: Some("done".to_string()),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                input_tokens: 1,
                output_tokens: 1,
            })
        }

        async fn complete_with_schema(
            &self,
            _req: SchemaCompletionRequest,
        ) -> Result<SchemaCompletionResponse, LlmError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures_within_attempt_budget() {
        let provider = Arc::new(FlakyProvider {
            fail_times: 2,
            calls: AtomicU32::new(0),
        });
        let model_loop = ModelLoop::new(provider);
        let cancel = CancellationToken::new();

        let outcome = model_loop
            .run_turn(Uuid::new_v4(), vec![ChatMessage::user("hi")], &[], &cancel)
            .await
            .unwrap();

        match outcome {
            TurnOutcome::Done(text) => assert_eq!(text, "done"),
            TurnOutcome::ToolCalls(_) => panic!("expected a final reply"),
        }
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_rate_limit_exhausted() {
        let provider = Arc::new(FlakyProvider {
            fail_times: 10,
            calls: AtomicU32::new(0),
        });
        let model_loop = ModelLoop::new(provider);
        let cancel = CancellationToken::new();

        let err = model_loop
            .run_turn(Uuid::new_v4(), vec![ChatMessage::user("hi")], &[], &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::RateLimitExhausted { .. }));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_loop() {
        let provider = Arc::new(FlakyProvider {
            fail_times: 10,
            calls: AtomicU32::new(0),
        });
        let model_loop = ModelLoop::new(provider);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = model_loop
            .run_turn(Uuid::new_v4(), vec![ChatMessage::user("hi")], &[], &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Cancelled));
    }
}

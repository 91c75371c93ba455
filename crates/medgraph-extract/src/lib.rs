//! Medgraph Extract - Batched extraction-and-consolidation pipeline
//!
//! Drives repeated text-generation calls in bounded batches with
//! retry/backoff and partial-failure isolation, accumulating typed records
//! (cleaned paragraphs, entities, relations) with merged page provenance,
//! and consolidating noisy per-batch alias suggestions by majority vote.
//!
//! The pipeline is intentionally sequential: externally imposed rate
//! limits are respected by pacing sleeps between batches, never by
//! parallel calls.

pub mod batch;
pub mod clean;
pub mod decode;
pub mod entities;
pub mod llm;
pub mod normalize;
pub mod paragraph;
pub mod relations;

pub use batch::{BatchOutcome, BatchRunner, BatchTransform};
pub use clean::CleanStage;
pub use entities::EntityStage;
pub use llm::GeminiClient;
pub use normalize::NormalizeStage;
pub use paragraph::reconstruct_paragraphs;
pub use relations::RelationStage;

use std::time::Duration;

use medgraph_core::{LlmClient, PipelineError, Result};

// ============================================================================
// Retrying Caller
// ============================================================================

/// Fault-tolerance wrapper around one external-service invocation.
///
/// Performs no batching and no parsing: it retries a transport-level
/// failure up to `attempts` total tries with a fixed backoff in between,
/// and re-raises the last failure once attempts are exhausted. A fully
/// exhausted failure is never swallowed.
#[derive(Debug, Clone)]
pub struct RetryingCaller {
    attempts: u32,
    backoff: Duration,
}

impl RetryingCaller {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Invoke `op` until it succeeds or attempts run out.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;

        for attempt in 1..=self.attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "LLM call attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| PipelineError::Llm("no attempts configured".to_string())))
    }

    /// Convenience wrapper for the common generate-one-prompt case.
    pub async fn generate(&self, client: &dyn LlmClient, prompt: &str) -> Result<String> {
        self.call(|| client.generate(prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn caller(attempts: u32) -> RetryingCaller {
        RetryingCaller::new(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn returns_first_success_without_further_attempts() {
        let calls = AtomicU32::new(0);
        let result = caller(3)
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, PipelineError>(42)
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_on_second_of_three_allowed_attempts() {
        let calls = AtomicU32::new(0);
        let result = caller(3)
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(PipelineError::Llm("transient".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "ok");
        // Attempt 3 never runs
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_exactly_the_configured_attempts_then_reraises() {
        let calls = AtomicU32::new(0);
        let err = caller(3)
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(PipelineError::Llm("down".into())) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, PipelineError::Llm(_)));
    }
}

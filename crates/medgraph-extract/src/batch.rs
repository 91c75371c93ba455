//! Generic bounded-batch driver.
//!
//! Partitions an item sequence into contiguous batches, invokes a
//! per-batch transform (which internally uses `RetryingCaller`), isolates
//! per-batch failure, and paces between batches to respect external
//! call-rate limits. A single batch's unrecoverable failure never aborts
//! the run; results already accumulated are preserved and the failure is
//! reported in the outcome.

use std::time::Duration;

use async_trait::async_trait;

use medgraph_core::Result;

/// One stage's per-batch unit of work.
#[async_trait]
pub trait BatchTransform<T: Sync, R>: Send + Sync {
    /// Transform one batch into output records.
    ///
    /// An error here fails the whole batch: no partial records are
    /// emitted for it and the runner moves on to the next batch.
    async fn apply(&self, batch_index: usize, batch: &[T]) -> Result<Vec<R>>;
}

/// Results of a full batched run.
#[derive(Debug)]
pub struct BatchOutcome<R> {
    /// Records concatenated in batch order
    pub records: Vec<R>,
    /// Total batches attempted
    pub batches_run: usize,
    /// Batches skipped after exhausted retries or a malformed response
    pub batches_failed: usize,
}

/// Drives a transform over fixed-size contiguous batches.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    batch_size: usize,
    pacing: Duration,
}

impl BatchRunner {
    pub fn new(batch_size: usize, pacing: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pacing,
        }
    }

    /// Run `transform` over `items` in batches of at most `batch_size`.
    ///
    /// Output order always matches input batch order; downstream
    /// provenance matching and resume logic depend on monotonic progress.
    pub async fn run<T, R>(
        &self,
        items: &[T],
        transform: &dyn BatchTransform<T, R>,
    ) -> BatchOutcome<R>
    where
        T: Sync,
        R: Send,
    {
        let total_batches = items.len().div_ceil(self.batch_size);
        let mut outcome = BatchOutcome {
            records: Vec::new(),
            batches_run: 0,
            batches_failed: 0,
        };

        for (batch_index, batch) in items.chunks(self.batch_size).enumerate() {
            outcome.batches_run += 1;
            tracing::info!(
                batch = batch_index + 1,
                total_batches,
                items = batch.len(),
                "Processing batch"
            );

            match transform.apply(batch_index, batch).await {
                Ok(records) => outcome.records.extend(records),
                Err(e) => {
                    outcome.batches_failed += 1;
                    tracing::warn!(
                        batch = batch_index + 1,
                        total_batches,
                        error = %e,
                        "Batch failed after retries, skipping"
                    );
                }
            }

            // Pacing delay between batches, not after the last one
            if batch_index + 1 < total_batches {
                tokio::time::sleep(self.pacing).await;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medgraph_core::PipelineError;

    struct Doubler;

    #[async_trait]
    impl BatchTransform<u32, u32> for Doubler {
        async fn apply(&self, _batch_index: usize, batch: &[u32]) -> Result<Vec<u32>> {
            Ok(batch.iter().map(|n| n * 2).collect())
        }
    }

    struct FailSecondBatch;

    #[async_trait]
    impl BatchTransform<u32, u32> for FailSecondBatch {
        async fn apply(&self, batch_index: usize, batch: &[u32]) -> Result<Vec<u32>> {
            if batch_index == 1 {
                return Err(PipelineError::Llm("exhausted".into()));
            }
            Ok(batch.to_vec())
        }
    }

    fn runner(batch_size: usize) -> BatchRunner {
        BatchRunner::new(batch_size, Duration::ZERO)
    }

    #[tokio::test]
    async fn partitions_with_short_final_batch() {
        let outcome = runner(2).run(&[1, 2, 3, 4, 5], &Doubler).await;
        assert_eq!(outcome.batches_run, 3);
        assert_eq!(outcome.batches_failed, 0);
        assert_eq!(outcome.records, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn failed_batch_is_isolated_and_order_preserved() {
        // Batch 2 of 3 always fails: batches 1 and 3 survive, in order.
        let outcome = runner(2).run(&[1, 2, 3, 4, 5, 6], &FailSecondBatch).await;
        assert_eq!(outcome.batches_run, 3);
        assert_eq!(outcome.batches_failed, 1);
        assert_eq!(outcome.records, vec![1, 2, 5, 6]);
    }

    #[tokio::test]
    async fn empty_input_runs_no_batches() {
        let outcome = runner(5).run(&[], &Doubler).await;
        assert_eq!(outcome.batches_run, 0);
        assert!(outcome.records.is_empty());
    }
}

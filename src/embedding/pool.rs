//! Fixed-size worker pool for embedding tasks.
//!
//! Workers pull tasks from a shared channel, split each task's chunks under
//! the token ceiling, call the provider once per sub-batch, and emit one
//! output per task. Each submission carries its own reply channel, so
//! outputs route back to the caller that submitted the task; concurrent
//! callers never see each other's results. Within one caller outputs
//! arrive in completion order, not submission order; callers match them
//! up by task id.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::embedding::batching::split_by_token_budget;
use crate::embedding::provider::EmbeddingProvider;
use crate::embedding::task::{TaskId, VectorResult, VectorTask};
use crate::embedding::{PipelineError, PipelineResult};

/// One completed (or failed) task.
#[derive(Debug)]
pub struct TaskOutput {
    pub task_id: TaskId,
    pub outcome: PipelineResult<VectorResult>,
}

/// A task paired with the channel its output goes back on.
struct Job {
    task: VectorTask,
    reply: Sender<TaskOutput>,
}

/// Thread pool turning [`VectorTask`]s into [`VectorResult`]s.
///
/// Dropping the pool closes the task channel and joins every worker.
pub struct EmbeddingPool {
    job_tx: Option<Sender<Job>>,
    output_tx: Sender<TaskOutput>,
    output_rx: Receiver<TaskOutput>,
    workers: Vec<JoinHandle<()>>,
}

impl EmbeddingPool {
    /// Spawns `workers` threads sharing one provider.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        workers: usize,
        max_tokens_per_request: usize,
    ) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = unbounded::<Job>();
        let (output_tx, output_rx) = unbounded::<TaskOutput>();

        let handles = (0..workers)
            .map(|worker_id| {
                let job_rx = job_rx.clone();
                let provider = Arc::clone(&provider);

                std::thread::Builder::new()
                    .name(format!("embed-worker-{worker_id}"))
                    .spawn(move || {
                        // Channel disconnect is the shutdown signal
                        while let Ok(job) = job_rx.recv() {
                            let task_id = job.task.id;
                            let outcome =
                                process_task(provider.as_ref(), job.task, max_tokens_per_request);
                            // A caller that gave up on its reply channel is
                            // not a reason to stop serving other callers
                            let _ = job.reply.send(TaskOutput { task_id, outcome });
                        }
                        debug!(worker_id, "embedding worker exiting");
                    })
                    .unwrap_or_else(|e| panic!("failed to spawn embedding worker: {e}"))
            })
            .collect();

        info!(workers, "embedding pool started");
        Self {
            job_tx: Some(job_tx),
            output_tx,
            output_rx,
            workers: handles,
        }
    }

    /// Pool sized and budgeted from configuration.
    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::new(provider, config.workers, config.max_tokens_per_request)
    }

    /// Submits a task whose output goes to the shared [`Self::outputs`]
    /// channel.
    pub fn submit(&self, task: VectorTask) -> PipelineResult<()> {
        self.dispatch(task, self.output_tx.clone())
    }

    /// Channel of outputs for tasks submitted via [`Self::submit`], in
    /// completion order.
    #[must_use]
    pub fn outputs(&self) -> &Receiver<TaskOutput> {
        &self.output_rx
    }

    /// Submits a batch of tasks and blocks until every one has completed,
    /// returning outputs sorted by task id.
    ///
    /// Each call gets a private reply channel, so concurrent `run_all`
    /// callers sharing the pool receive exactly their own outputs.
    pub fn run_all(&self, tasks: Vec<VectorTask>) -> PipelineResult<Vec<TaskOutput>> {
        let expected = tasks.len();
        let (reply_tx, reply_rx) = unbounded::<TaskOutput>();
        for task in tasks {
            self.dispatch(task, reply_tx.clone())?;
        }
        drop(reply_tx);

        let mut outputs = Vec::with_capacity(expected);
        for _ in 0..expected {
            outputs.push(reply_rx.recv().map_err(|_| PipelineError::WorkerGone)?);
        }
        outputs.sort_by_key(|o| o.task_id);
        Ok(outputs)
    }

    fn dispatch(&self, task: VectorTask, reply: Sender<TaskOutput>) -> PipelineResult<()> {
        self.job_tx
            .as_ref()
            .ok_or(PipelineError::WorkerGone)?
            .send(Job { task, reply })
            .map_err(|_| PipelineError::WorkerGone)
    }
}

impl Drop for EmbeddingPool {
    fn drop(&mut self) {
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Embeds one task: split under the token ceiling, request per sub-batch,
/// concatenate in original chunk order.
fn process_task(
    provider: &dyn EmbeddingProvider,
    task: VectorTask,
    max_tokens_per_request: usize,
) -> PipelineResult<VectorResult> {
    let mut embeddings = Vec::with_capacity(task.chunks.len());

    for (batch_no, range) in split_by_token_budget(&task.chunks, max_tokens_per_request)
        .into_iter()
        .enumerate()
    {
        let offset = range.start;
        let batch = provider.embed(&task.chunks[range]).map_err(|e| match e {
            // Report the request batch and the item's position in the whole
            // task, not the sub-batch-local index
            PipelineError::NullEmbedding { item, .. } => PipelineError::NullEmbedding {
                batch: batch_no,
                item: offset + item,
            },
            other => other,
        })?;
        embeddings.extend(batch);
    }

    if embeddings.len() != task.chunks.len() {
        return Err(PipelineError::ResponseMismatch {
            expected: task.chunks.len(),
            actual: embeddings.len(),
        });
    }

    Ok(VectorResult {
        task_id: task.id,
        embeddings,
        metadata: task.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic provider: embeds each text as [len, word_count].
    struct FakeProvider {
        requests: AtomicUsize,
        /// Texts that should come back with a null embedding.
        null_for: Option<String>,
        seen_batches: Mutex<Vec<usize>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                requests: AtomicUsize::new(0),
                null_for: None,
                seen_batches: Mutex::new(Vec::new()),
            }
        }
    }

    impl EmbeddingProvider for FakeProvider {
        fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.seen_batches.lock().unwrap().push(texts.len());

            texts
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    if self.null_for.as_deref() == Some(text.as_str()) {
                        Err(PipelineError::NullEmbedding { batch: 0, item: i })
                    } else {
                        Ok(vec![
                            text.len() as f32,
                            text.split_whitespace().count() as f32,
                        ])
                    }
                })
                .collect()
        }
    }

    #[test]
    fn test_single_task_roundtrip() {
        let provider = Arc::new(FakeProvider::new());
        let pool = EmbeddingPool::new(provider, 2, 1000);

        let outputs = pool
            .run_all(vec![VectorTask::single(TaskId(1), "hello world")])
            .unwrap();
        assert_eq!(outputs.len(), 1);

        let result = outputs[0].outcome.as_ref().unwrap();
        assert_eq!(result.task_id, TaskId(1));
        assert_eq!(result.embedding().unwrap(), &[11.0, 2.0]);
    }

    #[test]
    fn test_token_budget_splits_into_multiple_requests() {
        let provider = Arc::new(FakeProvider::new());
        // Each 3-word chunk is ~4 tokens; ceiling 10 forces >1 request
        let pool = EmbeddingPool::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>, 1, 10);

        let chunks: Vec<String> = (0..6).map(|i| format!("chunk number {i}")).collect();
        let outputs = pool
            .run_all(vec![VectorTask::batch(TaskId(7), chunks.clone())])
            .unwrap();

        assert!(provider.requests.load(Ordering::SeqCst) > 1);

        // One embedding per input, in original order
        let result = outputs[0].outcome.as_ref().unwrap();
        assert_eq!(result.embeddings.len(), 6);
        for (i, embedding) in result.embeddings.iter().enumerate() {
            assert_eq!(embedding[0], chunks[i].len() as f32);
        }
    }

    #[test]
    fn test_null_embedding_names_original_item_index() {
        let provider = Arc::new(FakeProvider {
            null_for: Some("poison".to_string()),
            ..FakeProvider::new()
        });
        // Tight ceiling so "poison" lands in a later sub-batch
        let pool = EmbeddingPool::new(provider, 1, 5);

        let chunks: Vec<String> = vec![
            "a b c".to_string(),
            "d e f".to_string(),
            "g h i".to_string(),
            "poison".to_string(),
        ];
        let outputs = pool.run_all(vec![VectorTask::batch(TaskId(1), chunks)]).unwrap();

        match &outputs[0].outcome {
            Err(PipelineError::NullEmbedding { batch, item }) => {
                assert_eq!(*item, 3);
                assert_eq!(*batch, 3);
            }
            other => panic!("expected NullEmbedding, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrent_run_all_keeps_outputs_separate() {
        let provider = Arc::new(FakeProvider::new());
        let pool = Arc::new(EmbeddingPool::new(provider, 4, 1000));

        // Every caller numbers its tasks 0..n; only the text length tells
        // the callers apart, so any cross-delivery shows up in the vectors
        let handles: Vec<_> = (0..4)
            .map(|caller| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let text = "x".repeat(10 + caller);
                    let tasks: Vec<VectorTask> = (0..8)
                        .map(|i| VectorTask::single(TaskId(i), text.clone()))
                        .collect();

                    let outputs = pool.run_all(tasks).unwrap();
                    assert_eq!(outputs.len(), 8);
                    for (i, output) in outputs.iter().enumerate() {
                        assert_eq!(output.task_id, TaskId(i as u64));
                        let result = output.outcome.as_ref().unwrap();
                        assert_eq!(result.embedding().unwrap()[0], (10 + caller) as f32);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_results_tracked_by_id_across_workers() {
        let provider = Arc::new(FakeProvider::new());
        let pool = EmbeddingPool::new(provider, 4, 1000);

        let tasks: Vec<VectorTask> = (0..20)
            .map(|i| VectorTask::single(TaskId(i), format!("text {i}")))
            .collect();
        let outputs = pool.run_all(tasks).unwrap();

        assert_eq!(outputs.len(), 20);
        for (i, output) in outputs.iter().enumerate() {
            assert_eq!(output.task_id, TaskId(i as u64));
            assert!(output.outcome.is_ok());
        }
    }

    #[test]
    fn test_submit_after_drop_is_worker_gone() {
        let provider = Arc::new(FakeProvider::new());
        let pool = EmbeddingPool::new(provider, 1, 1000);
        let outputs = pool.outputs().clone();
        drop(pool);

        // All workers exited; the output channel is disconnected
        assert!(outputs.recv().is_err());
    }
}

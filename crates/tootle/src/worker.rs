//! The bridge between the blocking generator and a session's async loop.
//!
//! Each streaming request gets one worker: a blocking task that pulls tokens
//! from the generator and pushes them through a bounded channel. A full
//! channel blocks the producer. The worker checks its cancellation token
//! between tokens and stops quietly once cancelled or once the receiving
//! side is gone.

use miditok::{Generator, SamplingParams, Token};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the worker hands to the session, in production order.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Event {
        /// 1-based.
        index: u64,
        token: Token,
    },
    Complete,
    Error(String),
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Event { .. })
    }
}

/// Everything one generation run needs.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub prompt: Vec<Token>,
    pub gen_events: u64,
    pub params: SamplingParams,
    pub seed: u64,
}

impl GenerationJob {
    /// Total sequence length the generator may reach, prompt included.
    pub fn max_len(&self) -> usize {
        self.prompt
            .len()
            .saturating_add(usize::try_from(self.gen_events).unwrap_or(usize::MAX))
    }
}

/// Owns a running worker. Dropping the handle cancels it.
pub struct WorkerHandle {
    rx: mpsc::Receiver<WorkerMessage>,
    cancel: CancellationToken,
}

impl WorkerHandle {
    pub fn spawn(
        generator: Arc<dyn Generator>,
        job: GenerationJob,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker_cancel = cancel.clone();
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            run(generator.as_ref(), job, &tx, &worker_cancel);
        });

        Self { rx, cancel }
    }

    /// Next message, or `None` once the worker has stopped and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.rx.recv().await
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drive the generator to exhaustion on the current (blocking) thread.
fn run(
    generator: &dyn Generator,
    job: GenerationJob,
    tx: &mpsc::Sender<WorkerMessage>,
    cancel: &CancellationToken,
) {
    let max_len = job.max_len();
    let rng = Pcg32::seed_from_u64(job.seed);
    let mut index = 0u64;

    tracing::debug!(max_len, seed = job.seed, "generation started");

    for item in generator.generate(job.prompt, max_len, job.params, rng) {
        if cancel.is_cancelled() {
            tracing::debug!(produced = index, "generation cancelled");
            return;
        }
        let message = match item {
            Ok(token) => {
                index += 1;
                WorkerMessage::Event { index, token }
            }
            Err(e) => {
                tracing::warn!(error = %e, produced = index, "generation failed");
                let _ = tx.blocking_send(WorkerMessage::Error(e.to_string()));
                return;
            }
        };
        if tx.blocking_send(message).is_err() {
            tracing::debug!(produced = index, "receiver dropped, stopping generation");
            return;
        }
    }

    if !cancel.is_cancelled() {
        tracing::debug!(produced = index, "generation finished");
        let _ = tx.blocking_send(WorkerMessage::Complete);
    }
}

/// Run a job to completion and collect every token, for callers that want
/// the whole result at once.
pub async fn generate_all(
    generator: Arc<dyn Generator>,
    job: GenerationJob,
    cancel: CancellationToken,
) -> Result<Vec<Token>, String> {
    let span = tracing::Span::current();
    let joined = tokio::task::spawn_blocking(move || {
        let _enter = span.enter();
        let max_len = job.max_len();
        let rng = Pcg32::seed_from_u64(job.seed);
        let mut tokens = Vec::new();
        for item in generator.generate(job.prompt, max_len, job.params, rng) {
            if cancel.is_cancelled() {
                return Err("generation cancelled".to_string());
            }
            tokens.push(item.map_err(|e| e.to_string())?);
        }
        Ok(tokens)
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => Err(format!("generation task failed: {}", e)),
    }
}

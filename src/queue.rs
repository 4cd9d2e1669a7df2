//! Ingestion Queue
//!
//! Per-user FIFO of pending media tasks for features that collect many
//! photos before producing one artifact. Each user's queue is drained by at
//! most one worker at a time; different users drain concurrently.
//!
//! Worker loop:
//! 1. pop the head task
//! 2. wait out the remainder of `min_spacing` since the previous item
//! 3. run it through the [`TaskExecutor`]
//! 4. count success/failure, emit a progress notice every `progress_every` items
//! 5. when the queue is empty, emit a summary and release the queue
//!
//! A failed item is logged and counted; it never stops the loop.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{BotError, BotResult};
use crate::mode::{Mode, UserId};

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Minimum delay between two items of one user (default: 100ms)
    pub min_spacing: Duration,
    /// Progress notice cadence in handled items (default: 10)
    pub progress_every: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(100),
            progress_every: 10,
        }
    }
}

/// One pending media item
#[derive(Debug, Clone, PartialEq)]
pub struct QueueTask {
    pub media_ref: String,
    pub target_name: String,
    pub owner: UserId,
    /// Mode that consumes the item when it completes
    pub consumer: Mode,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

impl QueueTask {
    pub fn new(owner: UserId, consumer: Mode, media_ref: &str, target_name: &str) -> Self {
        Self {
            media_ref: media_ref.to_string(),
            target_name: target_name.to_string(),
            owner,
            consumer,
            enqueued_at: chrono::Utc::now(),
        }
    }
}

/// Runs one task: acquisition plus the feature's per-item completion
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &QueueTask) -> BotResult<()>;
}

/// Progress reported to the owning user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressNotice {
    Progress {
        processed: u64,
        errors: u64,
        pending: usize,
    },
    Completed {
        processed: u64,
        errors: u64,
    },
}

impl ProgressNotice {
    pub fn message(&self) -> String {
        match self {
            Self::Progress {
                processed,
                errors,
                pending,
            } => {
                let mut msg = format!("Processed {} photos so far", processed + errors);
                if *errors > 0 {
                    msg.push_str(&format!(" ({} failed)", errors));
                }
                msg.push_str(&format!(", {} still queued.", pending));
                msg
            }
            Self::Completed { processed, errors } => {
                let total = processed + errors;
                if *errors == 0 {
                    format!("Done: all {} photos processed.", total)
                } else {
                    format!(
                        "Done: {} of {} photos processed, {} of {} failed. Please resend the failed ones.",
                        processed, total, errors, total
                    )
                }
            }
        }
    }
}

/// Where progress notices go
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn notify(&self, user_id: UserId, notice: ProgressNotice);
}

/// Snapshot of one user's queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub consumer: Option<Mode>,
    pub pending: usize,
    pub is_draining: bool,
    pub processed: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct PerUserQueueState {
    consumer: Option<Mode>,
    pending: VecDeque<QueueTask>,
    is_draining: bool,
    last_processed_at: Option<Instant>,
    processed: u64,
    errors: u64,
    /// Items handled since the last completion summary
    unreported: u64,
    /// Bumped by `clear` so an in-flight item does not touch reset counters
    generation: u64,
}

pub struct IngestionQueue {
    queues: Mutex<HashMap<UserId, PerUserQueueState>>,
    executor: Arc<dyn TaskExecutor>,
    progress: Arc<dyn ProgressSink>,
    config: QueueConfig,
}

impl IngestionQueue {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        progress: Arc<dyn ProgressSink>,
        config: QueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            executor,
            progress,
            config,
        })
    }

    /// Start accepting tasks for `consumer`. Counters restart from zero
    /// when the consumer changes.
    pub fn open(&self, user_id: UserId, consumer: Mode) {
        let mut queues = self.queues.lock();
        let state = queues.entry(user_id).or_default();
        if state.consumer != Some(consumer) {
            state.pending.clear();
            state.processed = 0;
            state.errors = 0;
            state.unreported = 0;
            state.generation += 1;
        }
        state.consumer = Some(consumer);
    }

    /// Append a task; starts a worker if none is draining this user's queue.
    /// Returns the number of tasks now pending.
    pub fn enqueue(self: &Arc<Self>, task: QueueTask) -> BotResult<usize> {
        let user_id = task.owner;
        let (pending, start_worker) = {
            let mut queues = self.queues.lock();
            let state = queues.entry(user_id).or_default();
            if state.consumer != Some(task.consumer) {
                return Err(BotError::invalid(format!(
                    "Not collecting photos for {} right now. Choose the feature again to start.",
                    task.consumer
                )));
            }
            state.pending.push_back(task);
            let start_worker = !state.is_draining;
            state.is_draining = true;
            (state.pending.len(), start_worker)
        };

        if start_worker {
            debug!("Starting ingestion worker for user {}", user_id);
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain(user_id).await });
        }
        Ok(pending)
    }

    /// Stop accepting tasks and drop everything pending. An item already
    /// being processed finishes, nothing after it runs.
    /// Returns how many pending tasks were dropped.
    pub fn clear(&self, user_id: UserId) -> usize {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(&user_id) else {
            return 0;
        };
        let dropped = state.pending.len();
        if state.is_draining {
            state.pending.clear();
            state.consumer = None;
            state.processed = 0;
            state.errors = 0;
            state.unreported = 0;
            state.generation += 1;
        } else {
            queues.remove(&user_id);
        }
        if dropped > 0 {
            info!("Cleared {} queued tasks for user {}", dropped, user_id);
        }
        dropped
    }

    pub fn stats(&self, user_id: UserId) -> QueueStats {
        self.queues
            .lock()
            .get(&user_id)
            .map(|s| QueueStats {
                consumer: s.consumer,
                pending: s.pending.len(),
                is_draining: s.is_draining,
                processed: s.processed,
                errors: s.errors,
            })
            .unwrap_or_default()
    }

    /// Forget idle queues of users `is_live` no longer reports, e.g. after
    /// their session was evicted without a reset. Returns how many went.
    pub fn prune(&self, is_live: impl Fn(UserId) -> bool) -> usize {
        let mut queues = self.queues.lock();
        let before = queues.len();
        queues.retain(|user_id, state| state.is_draining || is_live(*user_id));
        before - queues.len()
    }

    async fn drain(self: Arc<Self>, user_id: UserId) {
        loop {
            let next = {
                let mut queues = self.queues.lock();
                let Some(state) = queues.get_mut(&user_id) else {
                    return;
                };
                match state.pending.pop_front() {
                    Some(task) => {
                        let wait = state
                            .last_processed_at
                            .map(|at| self.config.min_spacing.saturating_sub(at.elapsed()))
                            .unwrap_or(Duration::ZERO);
                        Ok((task, wait, state.generation))
                    }
                    None => {
                        state.is_draining = false;
                        let summary = (state.unreported > 0).then(|| ProgressNotice::Completed {
                            processed: state.processed,
                            errors: state.errors,
                        });
                        state.unreported = 0;
                        if state.consumer.is_none() {
                            queues.remove(&user_id);
                        }
                        Err(summary)
                    }
                }
            };

            let (task, wait, generation) = match next {
                Ok(item) => item,
                Err(summary) => {
                    if let Some(notice) = summary {
                        self.progress.notify(user_id, notice).await;
                    }
                    debug!("Ingestion worker for user {} finished", user_id);
                    return;
                }
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let outcome = self.run_isolated(&task).await;

            let notice = {
                let mut queues = self.queues.lock();
                let Some(state) = queues.get_mut(&user_id) else {
                    return;
                };
                state.last_processed_at = Some(Instant::now());
                if state.generation != generation {
                    debug!(
                        "Queue for user {} was cleared while {} was in flight",
                        user_id, task.target_name
                    );
                    continue;
                }

                match outcome {
                    Ok(()) => state.processed += 1,
                    Err(reason) => {
                        state.errors += 1;
                        warn!(
                            "Queue item {} for user {} failed: {}",
                            task.target_name, user_id, reason
                        );
                    }
                }
                state.unreported += 1;

                let handled = state.processed + state.errors;
                (handled % self.config.progress_every == 0 && !state.pending.is_empty()).then(|| {
                    ProgressNotice::Progress {
                        processed: state.processed,
                        errors: state.errors,
                        pending: state.pending.len(),
                    }
                })
            };

            if let Some(notice) = notice {
                self.progress.notify(user_id, notice).await;
            }
        }
    }

    /// Run the executor in its own task so a panic counts as one failed item
    async fn run_isolated(&self, task: &QueueTask) -> Result<(), String> {
        let executor = Arc::clone(&self.executor);
        let owned = task.clone();
        match tokio::spawn(async move { executor.execute(&owned).await }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("task aborted: {}", e)),
        }
    }
}

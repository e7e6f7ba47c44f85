//! Per-target command queue with coalescing.
//!
//! Each target owns an independent FIFO of waiting commands drained by a
//! single task at a time. Same-kind commands that arrive within the coalesce
//! window are merged into the waiting entry (last write wins) and every
//! contributing request is settled by the one execution.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use lumagate_core::{QueueConfig, UpstreamError};

use crate::command::{Command, Settled, TargetId};

/// Outcome delivered to every request a command answers for.
pub type Settlement<T> = Result<Settled<T>, QueueError>;

/// Boxed executor future.
pub type ExecutorFuture<T> = BoxFuture<'static, Result<T, UpstreamError>>;

/// Caller-supplied executor, invoked once per (possibly merged) command.
pub type Executor<T> = Arc<dyn Fn(TargetId, Command) -> ExecutorFuture<T> + Send + Sync>;

/// Queue error types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue cleared before the command was executed")]
    Cleared,

    #[error("Command execution timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Command executor panicked: {0}")]
    ExecutorPanicked(String),

    #[error("Command was dropped without settlement")]
    Dropped,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Commands waiting across all targets (excluding executing ones)
    pub total_depth: usize,
    /// Targets with waiting or executing commands
    pub active_targets: usize,
    /// Executor invocations that succeeded
    pub executed_count: u64,
    /// Executor invocations that failed, timed out or panicked
    pub failed_count: u64,
    /// Requests absorbed into an already waiting command
    pub merged_count: u64,
    /// Waiting commands rejected by `clear`
    pub cleared_count: u64,
}

/// A waiting command and the completion handles of every request behind it.
struct PendingEntry<T> {
    command: Command,
    waiters: Vec<oneshot::Sender<Settlement<T>>>,
}

/// Waiting entries for one target plus its drain guard.
struct TargetQueue<T> {
    waiting: VecDeque<PendingEntry<T>>,
    draining: bool,
}

impl<T> Default for TargetQueue<T> {
    fn default() -> Self {
        Self {
            waiting: VecDeque::new(),
            draining: false,
        }
    }
}

struct QueueState<T> {
    targets: HashMap<TargetId, TargetQueue<T>>,
    /// Bumped by `clear`; drain loops from an older epoch stop touching state.
    epoch: u64,
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    merged: AtomicU64,
    cleared: AtomicU64,
}

struct Inner<T> {
    state: Mutex<QueueState<T>>,
    executor: Executor<T>,
    coalesce_window: Duration,
    executor_timeout: Option<Duration>,
    counters: Counters,
}

/// Per-target command queue.
pub struct CommandQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CommandQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for CommandQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("coalesce_window", &self.inner.coalesce_window)
            .field("executor_timeout", &self.inner.executor_timeout)
            .finish()
    }
}

impl<T: Clone + Send + 'static> CommandQueue<T> {
    /// Create a queue from configuration.
    pub fn new<F, Fut>(config: &QueueConfig, executor: F) -> Self
    where
        F: Fn(TargetId, Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        Self::with_settings(config.coalesce_window(), config.executor_timeout(), executor)
    }

    /// Create a queue with explicit settings. A zero window disables coalescing.
    pub fn with_settings<F, Fut>(
        coalesce_window: Duration,
        executor_timeout: Option<Duration>,
        executor: F,
    ) -> Self
    where
        F: Fn(TargetId, Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let executor: Executor<T> = Arc::new(move |target, command| executor(target, command).boxed());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    targets: HashMap::new(),
                    epoch: 0,
                }),
                executor,
                coalesce_window,
                executor_timeout,
                counters: Counters::default(),
            }),
        }
    }

    /// Enqueue a command and wait for its settlement.
    pub async fn enqueue(&self, target: impl Into<TargetId>, command: Command) -> Settlement<T> {
        self.submit(target, command).await
    }

    /// Enqueue a command now and return a future resolving on settlement.
    ///
    /// The command is queued (or merged) before this function returns, so
    /// the order of `submit` calls is the queue order. Must be called inside
    /// a Tokio runtime.
    pub fn submit(
        &self,
        target: impl Into<TargetId>,
        command: Command,
    ) -> impl Future<Output = Settlement<T>> + Send + 'static {
        let target = target.into();
        let (tx, rx) = oneshot::channel();

        let start_drain = {
            let mut state = self.inner.state.lock();
            let epoch = state.epoch;
            let queue = state.targets.entry(target.clone()).or_default();

            match merge_position(queue, &command, self.inner.coalesce_window) {
                Some(index) => {
                    let entry = &mut queue.waiting[index];
                    debug!(
                        target_id = %target,
                        kind = %command.kind(),
                        absorbed = %entry.command.correlation_id,
                        correlation_id = %command.correlation_id,
                        "Coalescing command into waiting entry"
                    );
                    entry.command.absorb(command);
                    entry.waiters.push(tx);
                    self.inner.counters.merged.fetch_add(1, Ordering::Relaxed);
                }
                None => queue.waiting.push_back(PendingEntry {
                    command,
                    waiters: vec![tx],
                }),
            }

            if queue.draining {
                None
            } else {
                queue.draining = true;
                Some(epoch)
            }
        };

        if let Some(epoch) = start_drain {
            tokio::spawn(drain(Arc::clone(&self.inner), target, epoch));
        }

        async move { rx.await.unwrap_or(Err(QueueError::Dropped)) }
    }

    /// Commands waiting for `target`, excluding the one executing.
    pub fn depth(&self, target: &str) -> usize {
        self.inner
            .state
            .lock()
            .targets
            .get(target)
            .map_or(0, |queue| queue.waiting.len())
    }

    /// Commands waiting across all targets.
    pub fn total_depth(&self) -> usize {
        self.inner
            .state
            .lock()
            .targets
            .values()
            .map(|queue| queue.waiting.len())
            .sum()
    }

    /// Whether a drain loop is running for `target`.
    pub fn is_draining(&self, target: &str) -> bool {
        self.inner
            .state
            .lock()
            .targets
            .get(target)
            .is_some_and(|queue| queue.draining)
    }

    /// Targets with waiting or executing commands, sorted.
    pub fn active_targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self.inner.state.lock().targets.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// Snapshot of queue statistics.
    pub fn stats(&self) -> QueueStats {
        let (total_depth, active_targets) = {
            let state = self.inner.state.lock();
            let depth = state.targets.values().map(|q| q.waiting.len()).sum();
            (depth, state.targets.len())
        };
        let counters = &self.inner.counters;
        QueueStats {
            total_depth,
            active_targets,
            executed_count: counters.executed.load(Ordering::Relaxed),
            failed_count: counters.failed.load(Ordering::Relaxed),
            merged_count: counters.merged.load(Ordering::Relaxed),
            cleared_count: counters.cleared.load(Ordering::Relaxed),
        }
    }

    /// Reject every waiting command with [`QueueError::Cleared`] and reset all
    /// per-target state. Executing commands are not interrupted.
    ///
    /// Returns the number of waiting commands rejected.
    pub fn clear(&self) -> usize {
        let rejected: Vec<PendingEntry<T>> = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state
                .targets
                .drain()
                .flat_map(|(_, queue)| queue.waiting)
                .collect()
        };

        let count = rejected.len();
        for entry in rejected {
            for waiter in entry.waiters {
                let _ = waiter.send(Err(QueueError::Cleared));
            }
        }

        self.inner
            .counters
            .cleared
            .fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            info!(rejected = count, "Command queue cleared");
        }
        count
    }
}

/// Index of the waiting entry `command` should merge into, scanning from the
/// most recently added entry backwards.
fn merge_position<T>(queue: &TargetQueue<T>, command: &Command, window: Duration) -> Option<usize> {
    if window.is_zero() {
        return None;
    }
    queue
        .waiting
        .iter()
        .enumerate()
        .rev()
        .find(|(_, entry)| {
            entry.command.kind() == command.kind()
                && command
                    .timestamp
                    .saturating_duration_since(entry.command.timestamp)
                    <= window
        })
        .map(|(index, _)| index)
}

async fn drain<T: Clone + Send + 'static>(inner: Arc<Inner<T>>, target: TargetId, epoch: u64) {
    loop {
        let entry = {
            let mut state = inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            let next = state
                .targets
                .get_mut(&target)
                .and_then(|queue| queue.waiting.pop_front());
            match next {
                Some(entry) => entry,
                None => {
                    state.targets.remove(&target);
                    return;
                }
            }
        };

        let PendingEntry { command, waiters } = entry;
        let correlation_ids = command.correlation_ids();
        debug!(
            target_id = %target,
            command = %command.action,
            correlation_id = %command.correlation_id,
            requests = waiters.len(),
            "Executing command"
        );

        let settlement = match inner.execute(&target, command).await {
            Ok(value) => {
                inner.counters.executed.fetch_add(1, Ordering::Relaxed);
                Ok(Settled {
                    value,
                    correlation_ids,
                })
            }
            Err(error) => {
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(target_id = %target, error = %error, "Command failed");
                Err(error)
            }
        };

        for waiter in waiters {
            let _ = waiter.send(settlement.clone());
        }
    }
}

impl<T> Inner<T> {
    async fn execute(&self, target: &str, command: Command) -> Result<T, QueueError> {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            (self.executor)(target.to_string(), command)
        })) {
            Ok(future) => future,
            Err(panic) => return Err(QueueError::ExecutorPanicked(panic_message(&*panic))),
        };

        let guarded = AssertUnwindSafe(future).catch_unwind();
        let result = match self.executor_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(result) => result,
                Err(_) => return Err(QueueError::Timeout(limit)),
            },
            None => guarded.await,
        };

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(QueueError::Upstream(error)),
            Err(panic) => Err(QueueError::ExecutorPanicked(panic_message(&*panic))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

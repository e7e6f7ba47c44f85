//! Resilience primitives for upstream light control.
//!
//! Provides:
//! - Failure classification and jittered exponential backoff
//! - Retry executor with pluggable classifier and log sink
//! - Command data structures
//! - Per-target command queue with coalescing

pub mod backoff;
pub mod command;
pub mod queue;
pub mod retry;

// Re-exports
pub use backoff::{backoff_delay, is_rate_limit, is_retryable, jittered_delay};

pub use command::{Command, CorrelationId, Settled, TargetId};

pub use queue::{CommandQueue, Executor, QueueError, QueueStats, Settlement};

pub use retry::{Classifier, RetryExecutor, RetryOutcome, RetryPolicy};

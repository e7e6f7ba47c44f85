//! Command data structures.
//!
//! Defines the write commands flowing through the per-target queue.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use lumagate_core::{ActionKind, LightAction};

/// Identifier of the request that produced a command. Supplied by callers.
pub type CorrelationId = String;

/// Target identifier owning one independent queue.
pub type TargetId = String;

/// One requested or merged write operation.
///
/// Mutated only while waiting in a queue; immutable once handed to the
/// executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Action to apply. Its variant determines the command kind.
    pub action: LightAction,
    /// Logical enqueue time, used for ordering and the coalescing window.
    pub timestamp: Instant,
    /// Request that produced this command (the latest one after a merge).
    pub correlation_id: CorrelationId,
    /// Requests absorbed into this command, most recently absorbed first.
    pub merged_correlation_ids: Vec<CorrelationId>,
}

impl Command {
    /// Create a command stamped with the current time.
    pub fn new(action: LightAction, correlation_id: impl Into<CorrelationId>) -> Self {
        Self {
            action,
            timestamp: Instant::now(),
            correlation_id: correlation_id.into(),
            merged_correlation_ids: Vec::new(),
        }
    }

    /// Override the enqueue timestamp.
    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// Whether any request has been merged into this command.
    pub fn is_merged(&self) -> bool {
        !self.merged_correlation_ids.is_empty()
    }

    /// Every correlation id this command answers for, primary first.
    pub fn correlation_ids(&self) -> Vec<CorrelationId> {
        std::iter::once(self.correlation_id.clone())
            .chain(self.merged_correlation_ids.iter().cloned())
            .collect()
    }

    /// Merge `newer` into this command. The newer payload and correlation id
    /// win; this command's ids move to the merged list.
    pub fn absorb(&mut self, newer: Command) {
        let mut merged = Vec::with_capacity(self.merged_correlation_ids.len() + 1);
        merged.push(std::mem::take(&mut self.correlation_id));
        merged.append(&mut self.merged_correlation_ids);

        self.action = newer.action;
        self.timestamp = newer.timestamp;
        self.correlation_id = newer.correlation_id;
        self.merged_correlation_ids = merged;
    }
}

/// Successful settlement of a (possibly merged) command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settled<T> {
    /// Executor result.
    pub value: T,
    /// Every request the command answered for, primary first.
    pub correlation_ids: Vec<CorrelationId>,
}

impl<T> Settled<T> {
    /// Whether more than one request was answered by this settlement.
    pub fn was_coalesced(&self) -> bool {
        self.correlation_ids.len() > 1
    }
}

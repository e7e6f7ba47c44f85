//! Light service: the gateway surface over the resilience pipeline.
//!
//! This service provides a high-level API for:
//! - Listing lights and reading single-light state through the read cache
//! - Power, brightness and color control through the per-target queue
//! - Retrying upstream calls with classified backoff
//!
//! Writes to one light are serialized and coalesced; a successful write
//! invalidates that light's cached state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lumagate_commands::backoff::is_retryable;
use lumagate_commands::{
    Command, CommandQueue, CorrelationId, QueueError, QueueStats, RetryExecutor, RetryPolicy,
};
use lumagate_core::{
    GatewayConfig, LightAction, LightDevice, LightState, LightUpstream, LogSink, PowerState, Rgb,
    TracingSink, UpstreamError,
};

use crate::cache::{CacheStats, ReadCache};

/// Cache key for the device list.
const DEVICES_KEY: &str = "devices";

/// Service-level error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Transient upstream trouble that outlived the retry budget, a cleared
    /// queue, or an execution timeout.
    #[error("Light API temporarily unavailable, retry later: {0}")]
    Unavailable(String),

    /// The upstream rejected the request as invalid.
    #[error("Light API rejected the request: {0}")]
    Rejected(UpstreamError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<UpstreamError> for GatewayError {
    fn from(error: UpstreamError) -> Self {
        if is_retryable(&error) {
            GatewayError::Unavailable(error.to_string())
        } else {
            GatewayError::Rejected(error)
        }
    }
}

impl From<QueueError> for GatewayError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Upstream(error) => error.into(),
            QueueError::Cleared | QueueError::Timeout(_) => {
                GatewayError::Unavailable(error.to_string())
            }
            QueueError::ExecutorPanicked(_) | QueueError::Dropped => {
                GatewayError::Internal(error.to_string())
            }
        }
    }
}

/// A read answered either from the cache or from upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse<T> {
    pub value: T,
    /// Whether the value came from the cache.
    pub cached: bool,
    /// Age of the cached value in whole seconds; absent for fresh reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_secs: Option<u64>,
}

/// Result of a completed control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReceipt {
    pub device_id: String,
    /// Action actually sent upstream. Differs from the requested one when a
    /// later request was merged into it.
    pub action: LightAction,
    /// Every request answered by the upstream call, latest first.
    pub correlation_ids: Vec<CorrelationId>,
    pub coalesced: bool,
    pub completed_at: DateTime<Utc>,
}

struct ServiceInner {
    upstream: Arc<dyn LightUpstream>,
    retry: RetryExecutor,
    devices: ReadCache<Vec<LightDevice>>,
    states: ReadCache<LightState>,
    /// Successful writes per light. A state read only populates the cache if
    /// no write landed while it was in flight.
    write_generations: Mutex<HashMap<String, u64>>,
}

impl ServiceInner {
    fn write_generation(&self, device_id: &str) -> u64 {
        self.write_generations
            .lock()
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    /// Bump the light's generation and drop its cached state.
    fn record_write(&self, device_id: &str) {
        let mut generations = self.write_generations.lock();
        *generations.entry(device_id.to_string()).or_insert(0) += 1;
        self.states.delete(device_id);
    }

    /// Cache `state` unless a write landed after `generation` was taken.
    fn cache_state(&self, device_id: &str, generation: u64, state: LightState) -> bool {
        let generations = self.write_generations.lock();
        if generations.get(device_id).copied().unwrap_or(0) != generation {
            return false;
        }
        self.states.set(device_id, state);
        true
    }

    /// Queue executor: one upstream control call under retry.
    async fn apply(&self, device_id: &str, command: Command) -> Result<LightAction, UpstreamError> {
        let action = command.action;
        let upstream = &self.upstream;
        self.retry
            .execute_with_correlation(&command.correlation_id, || {
                upstream.control(device_id, &action)
            })
            .await?;

        self.record_write(device_id);
        info!(
            device_id = %device_id,
            action = %action,
            correlation_id = %command.correlation_id,
            coalesced = command.is_merged(),
            merged = command.merged_correlation_ids.len(),
            "Light updated"
        );
        Ok(action)
    }
}

/// Gateway over a [`LightUpstream`].
pub struct LightService {
    inner: Arc<ServiceInner>,
    queue: CommandQueue<LightAction>,
}

impl LightService {
    /// Create a service that reports retry decisions to `tracing`.
    pub fn new(upstream: Arc<dyn LightUpstream>, config: &GatewayConfig) -> Self {
        Self::with_log_sink(upstream, config, Some(Arc::new(TracingSink)))
    }

    /// Create a service with an explicit retry log sink (or none).
    pub fn with_log_sink(
        upstream: Arc<dyn LightUpstream>,
        config: &GatewayConfig,
        sink: Option<Arc<dyn LogSink>>,
    ) -> Self {
        let mut retry = RetryExecutor::new(RetryPolicy::from(&config.retry));
        if let Some(sink) = sink {
            retry = retry.with_log_sink(sink);
        }

        let inner = Arc::new(ServiceInner {
            upstream,
            retry,
            devices: ReadCache::from_config(&config.cache),
            states: ReadCache::from_config(&config.cache),
            write_generations: Mutex::new(HashMap::new()),
        });

        let executor_inner = Arc::clone(&inner);
        let queue = CommandQueue::new(&config.queue, move |device_id, command| {
            let inner = Arc::clone(&executor_inner);
            async move { inner.apply(&device_id, command).await }
        });

        Self { inner, queue }
    }

    /// List every light, served from the cache while fresh.
    pub async fn list_devices(
        &self,
        correlation_id: &str,
    ) -> Result<ReadResponse<Vec<LightDevice>>, GatewayError> {
        if let Some(entry) = self.inner.devices.get(DEVICES_KEY) {
            debug!(correlation_id, age_ms = entry.age_ms(), "Device list cache hit");
            return Ok(ReadResponse {
                cache_age_secs: Some(entry.age_secs()),
                value: entry.value,
                cached: true,
            });
        }

        let upstream = &self.inner.upstream;
        let devices = self
            .inner
            .retry
            .execute_with_correlation(correlation_id, || upstream.list_devices())
            .await?;

        self.inner.devices.set(DEVICES_KEY, devices.clone());
        Ok(ReadResponse {
            value: devices,
            cached: false,
            cache_age_secs: None,
        })
    }

    /// Read the state of one light, served from the cache while fresh.
    pub async fn device_state(
        &self,
        device_id: &str,
        correlation_id: &str,
    ) -> Result<ReadResponse<LightState>, GatewayError> {
        validate_device_id(device_id)?;

        if let Some(entry) = self.inner.states.get(device_id) {
            debug!(device_id, correlation_id, age_ms = entry.age_ms(), "Light state cache hit");
            return Ok(ReadResponse {
                cache_age_secs: Some(entry.age_secs()),
                value: entry.value,
                cached: true,
            });
        }

        let generation = self.inner.write_generation(device_id);
        let upstream = &self.inner.upstream;
        let state = self
            .inner
            .retry
            .execute_with_correlation(correlation_id, || upstream.device_state(device_id))
            .await?;

        if !self.inner.cache_state(device_id, generation, state.clone()) {
            debug!(device_id, correlation_id, "Light written during read, state not cached");
        }
        Ok(ReadResponse {
            value: state,
            cached: false,
            cache_age_secs: None,
        })
    }

    pub async fn set_power(
        &self,
        device_id: &str,
        power: PowerState,
        correlation_id: &str,
    ) -> Result<ControlReceipt, GatewayError> {
        self.control(device_id, LightAction::Turn(power), correlation_id)
            .await
    }

    /// Set brightness, 0-100.
    pub async fn set_brightness(
        &self,
        device_id: &str,
        level: u8,
        correlation_id: &str,
    ) -> Result<ControlReceipt, GatewayError> {
        self.control(device_id, LightAction::Brightness(level), correlation_id)
            .await
    }

    pub async fn set_color(
        &self,
        device_id: &str,
        color: Rgb,
        correlation_id: &str,
    ) -> Result<ControlReceipt, GatewayError> {
        self.control(device_id, LightAction::Color(color), correlation_id)
            .await
    }

    /// Queue one control action and wait until it (or the command it was
    /// merged into) has been applied.
    pub async fn control(
        &self,
        device_id: &str,
        action: LightAction,
        correlation_id: &str,
    ) -> Result<ControlReceipt, GatewayError> {
        validate_device_id(device_id)?;
        if correlation_id.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "correlation id must not be empty".to_string(),
            ));
        }
        if let LightAction::Brightness(level) = action {
            if level > LightAction::MAX_BRIGHTNESS {
                return Err(GatewayError::InvalidRequest(format!(
                    "brightness {} out of range 0-{}",
                    level,
                    LightAction::MAX_BRIGHTNESS
                )));
            }
        }

        let settled = self
            .queue
            .enqueue(device_id, Command::new(action, correlation_id))
            .await?;

        Ok(ControlReceipt {
            device_id: device_id.to_string(),
            action: settled.value,
            coalesced: settled.was_coalesced(),
            correlation_ids: settled.correlation_ids,
            completed_at: Utc::now(),
        })
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let devices = self.inner.devices.stats();
        let states = self.inner.states.stats();
        CacheStats {
            entries: devices.entries + states.entries,
            capacity: devices.capacity + states.capacity,
            hits: devices.hits + states.hits,
            misses: devices.misses + states.misses,
        }
    }

    /// Drop every cached read.
    pub fn invalidate_cache(&self) {
        self.inner.devices.clear();
        self.inner.states.clear();
    }

    /// Reject queued control requests. Requests already executing finish on
    /// their own. Returns the number rejected.
    pub fn shutdown(&self) -> usize {
        let rejected = self.queue.clear();
        info!(rejected, "Light service shut down");
        rejected
    }
}

fn validate_device_id(device_id: &str) -> Result<(), GatewayError> {
    if device_id.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "device id must not be empty".to_string(),
        ));
    }
    Ok(())
}

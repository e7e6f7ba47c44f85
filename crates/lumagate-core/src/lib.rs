//! Core traits and types for Lumagate.
//!
//! This crate defines the foundational abstractions shared by the command
//! pipeline, the read cache and the light service: configuration, errors,
//! the structured logging hook, light domain types and the upstream trait.

pub mod config;
pub mod error;
pub mod light;
pub mod log;
pub mod upstream;

pub use config::{CacheConfig, GatewayConfig, QueueConfig, RetryConfig};
pub use error::{Error, Result};
pub use light::{ActionKind, DeviceId, LightAction, LightDevice, LightState, PowerState, Rgb};
pub use log::{LogContext, LogLevel, LogSink, TracingSink};
pub use upstream::{LightUpstream, UpstreamError};


//! Light gateway crate.
//!
//! ## Architecture
//!
//! - **ReadCache**: bounded TTL/LRU cache answering reads without an upstream call
//! - **LightService**: gateway over a `LightUpstream`, writes through the
//!   per-target command queue and every upstream call under retry
//! - **SimulatedUpstream**: in-memory light fleet with scripted failures
//!
//! Reads check the cache first; writes are serialized per light, coalesced
//! within the configured window, and invalidate the light's cached state.

pub mod cache;
pub mod service;
pub mod simulator;

pub use cache::{CacheEntry, CacheStats, ReadCache};
pub use service::{ControlReceipt, GatewayError, LightService, ReadResponse};
pub use simulator::{CallCounts, SimulatedLight, SimulatedUpstream};

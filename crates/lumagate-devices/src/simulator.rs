//! Simulated upstream light API.
//!
//! Keeps an in-memory fleet and applies control actions to it. Failures can
//! be scripted (consumed in order by the next calls) or drawn at random, and
//! every call can be delayed, so the resilience pipeline can be exercised
//! without a vendor account.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use lumagate_core::{
    ActionKind, DeviceId, LightAction, LightDevice, LightState, LightUpstream, PowerState, Rgb,
    UpstreamError,
};

/// A light held by the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedLight {
    pub device: LightDevice,
    pub state: LightState,
}

impl SimulatedLight {
    /// A controllable, retrievable light supporting every command, powered off.
    pub fn new(id: impl Into<DeviceId>, model: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let model = model.into();
        Self {
            device: LightDevice {
                id: id.clone(),
                model: model.clone(),
                name: name.into(),
                controllable: true,
                retrievable: true,
                supported_commands: vec![ActionKind::Turn, ActionKind::Brightness, ActionKind::Color],
            },
            state: LightState {
                id,
                model,
                online: true,
                power: PowerState::Off,
                brightness: 100,
                color: Rgb::new(255, 255, 255),
            },
        }
    }

    pub fn offline(mut self) -> Self {
        self.state.online = false;
        self
    }

    pub fn with_commands(mut self, commands: Vec<ActionKind>) -> Self {
        self.device.supported_commands = commands;
        self
    }

    pub fn not_retrievable(mut self) -> Self {
        self.device.retrievable = false;
        self
    }
}

/// Upstream calls observed by the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounts {
    pub list_devices: u64,
    pub device_state: u64,
    pub control: u64,
}

impl CallCounts {
    pub fn total(&self) -> u64 {
        self.list_devices + self.device_state + self.control
    }
}

#[derive(Default)]
struct Counters {
    list_devices: AtomicU64,
    device_state: AtomicU64,
    control: AtomicU64,
}

/// In-memory [`LightUpstream`].
#[derive(Default)]
pub struct SimulatedUpstream {
    fleet: Mutex<BTreeMap<DeviceId, SimulatedLight>>,
    scripted_failures: Mutex<VecDeque<UpstreamError>>,
    failure_rate: Mutex<f64>,
    latency: Mutex<Duration>,
    counters: Counters,
}

impl SimulatedUpstream {
    /// Create an empty simulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a simulator holding `lights`.
    pub fn with_fleet(lights: impl IntoIterator<Item = SimulatedLight>) -> Self {
        let simulator = Self::new();
        for light in lights {
            simulator.add_light(light);
        }
        simulator
    }

    /// A small household fleet used by the CLI.
    pub fn demo() -> Self {
        Self::with_fleet([
            SimulatedLight::new("living-room", "H6159", "Living Room Strip"),
            SimulatedLight::new("kitchen", "H6003", "Kitchen Bulb"),
            SimulatedLight::new("porch", "H7021", "Porch Light")
                .with_commands(vec![ActionKind::Turn, ActionKind::Brightness]),
            SimulatedLight::new("garage", "H6008", "Garage Bulb").offline(),
        ])
    }

    pub fn add_light(&self, light: SimulatedLight) {
        self.fleet.lock().insert(light.device.id.clone(), light);
    }

    /// Current simulated state of `device_id`.
    pub fn light_state(&self, device_id: &str) -> Option<LightState> {
        self.fleet.lock().get(device_id).map(|light| light.state.clone())
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: UpstreamError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Fail the next `times` calls with `error`.
    pub fn fail_times(&self, times: usize, error: UpstreamError) {
        let mut failures = self.scripted_failures.lock();
        failures.extend(std::iter::repeat(error).take(times));
    }

    /// Fail a random fraction of calls with HTTP 503. Scripted failures take
    /// precedence.
    pub fn set_failure_rate(&self, rate: f64) {
        *self.failure_rate.lock() = rate.clamp(0.0, 1.0);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            list_devices: self.counters.list_devices.load(Ordering::SeqCst),
            device_state: self.counters.device_state.load(Ordering::SeqCst),
            control: self.counters.control.load(Ordering::SeqCst),
        }
    }

    async fn begin_call(&self, counter: &AtomicU64) -> Result<(), UpstreamError> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }

        let rate = *self.failure_rate.lock();
        if rate > 0.0 && rand::thread_rng().gen_bool(rate) {
            return Err(UpstreamError::status(503, "simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl LightUpstream for SimulatedUpstream {
    async fn list_devices(&self) -> Result<Vec<LightDevice>, UpstreamError> {
        self.begin_call(&self.counters.list_devices).await?;
        Ok(self
            .fleet
            .lock()
            .values()
            .map(|light| light.device.clone())
            .collect())
    }

    async fn device_state(&self, device_id: &str) -> Result<LightState, UpstreamError> {
        self.begin_call(&self.counters.device_state).await?;

        let fleet = self.fleet.lock();
        let light = fleet
            .get(device_id)
            .ok_or_else(|| UpstreamError::DeviceNotFound(device_id.to_string()))?;
        if !light.device.retrievable {
            return Err(UpstreamError::InvalidRequest(format!(
                "device {} does not report state",
                device_id
            )));
        }
        Ok(light.state.clone())
    }

    async fn control(&self, device_id: &str, action: &LightAction) -> Result<(), UpstreamError> {
        self.begin_call(&self.counters.control).await?;

        let mut fleet = self.fleet.lock();
        let light = fleet
            .get_mut(device_id)
            .ok_or_else(|| UpstreamError::DeviceNotFound(device_id.to_string()))?;

        if !light.device.controllable || !light.device.supports(action.kind()) {
            return Err(UpstreamError::InvalidRequest(format!(
                "device {} does not support {}",
                device_id,
                action.kind()
            )));
        }
        if let LightAction::Brightness(level) = action {
            if *level > LightAction::MAX_BRIGHTNESS {
                return Err(UpstreamError::vendor(400, "brightness out of range"));
            }
        }
        if !light.state.online {
            return Err(UpstreamError::vendor(400, "device offline"));
        }

        light.state.apply(action);
        Ok(())
    }
}

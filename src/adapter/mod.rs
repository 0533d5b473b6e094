//! Hardware adapters
//!
//! Concrete [`DeviceAdapter`](crate::device::DeviceAdapter) implementations
//! and the helpers they share.

pub mod gilrs;

pub use self::gilrs::{GamepadInfo, GilrsAdapter, GilrsSettings, GilrsTransport};

use std::time::{Duration, Instant};

/// Lets an operation through at most once per interval
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_event_time: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last_event_time: None,
        }
    }

    /// Whether the operation may run now; records the time if so
    pub fn should_process(&mut self) -> bool {
        let now = Instant::now();
        match self.last_event_time {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_event_time = Some(now);
                true
            }
        }
    }
}

/// Largest deadzone that still leaves a usable range of travel
pub const MAX_DEADZONE: f32 = 0.95;

/// `deadzone` limited to `[0, MAX_DEADZONE]`; NaN counts as no deadzone
pub fn clamp_deadzone(deadzone: f32) -> f32 {
    if deadzone.is_nan() {
        0.0
    } else {
        deadzone.clamp(0.0, MAX_DEADZONE)
    }
}

/// Applies a radial deadzone to one axis and rescales the rest to `[-1, 1]`
///
/// The deadzone goes through [`clamp_deadzone`] first, and a NaN reading
/// yields `0.0`.
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    let deadzone = clamp_deadzone(deadzone);
    if value.is_nan() || value.abs() < deadzone {
        0.0
    } else {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        (sign * (value.abs() - deadzone) / (1.0 - deadzone)).clamp(-1.0, 1.0)
    }
}

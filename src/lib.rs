//! Hardware input features
//!
//! A device is described as a set of features (buttons, sticks, triggers,
//! rumble motors). The [`feature`] registry owns their state, adapters bind
//! each feature to the raw hardware data it is refreshed from, and the
//! [`driver`] runs the update pass at a fixed rate.

pub mod adapter;
pub mod config;
pub mod device;
pub mod driver;
pub mod feature;

pub use config::{ConfigError, InputConfig};
pub use device::{Controller, ControllerState, DeviceAdapter, DeviceError, IoDevice, Pollable};
pub use driver::{DriverError, DriverHandle, DriverSettings, PollStats, PollingDriver};
pub use feature::{FeatureError, FeatureId, IoFeature, MappedFeatureRegistry};

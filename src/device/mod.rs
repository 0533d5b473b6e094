//! Devices and device adapters
//!
//! An [`IoDevice`] owns a [`MappedFeatureRegistry`] and the [`DeviceAdapter`]
//! that talks to the hardware. Polling a device first lets the adapter refresh
//! its raw snapshot, then runs the registry update pass that moves the
//! snapshot into feature states.

pub mod catalog;
pub mod controller;
pub mod rumble;

pub use catalog::{
    AnalogStick, AnalogTrigger, ButtonState, ButtonView, DeviceButton, Direction, RumbleMotor,
    StickPosition, StickState, StickView, TriggerState, TriggerView, Vibration, VibrationView,
};
pub use controller::{Controller, ControllerState, StandardLayout};
pub use rumble::{HapticSink, MotorSlot, RumbleChannel, RumbleError};

use crate::feature::{FeatureError, MappedFeatureRegistry};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unsupported input source: {0}")]
    UnsupportedSource(String),

    #[error("Mapping error: {0}")]
    Mapping(#[from] FeatureError),

    #[error("Rumble error: {0}")]
    Rumble(#[from] RumbleError),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
}

/// Hardware side of a device
///
/// `init` is called once with the device registry, after the device has
/// registered its features, and maps them to adapter updaters. `poll` is
/// called once per driver tick, right before the update pass.
pub trait DeviceAdapter: Send {
    fn init(&mut self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError>;

    fn poll(&mut self) -> Result<(), AdapterError>;

    fn is_connected(&self) -> bool;
}

/// Anything a polling driver can tick
pub trait Pollable: Send + 'static {
    fn device_id(&self) -> &str;

    fn poll(&mut self) -> Result<(), DeviceError>;
}

pub struct IoDevice {
    id: String,
    registry: Arc<MappedFeatureRegistry>,
    adapter: Box<dyn DeviceAdapter>,
    connected: bool,
}

impl IoDevice {
    /// Creates a device over an already populated registry and initializes
    /// the adapter against it.
    pub fn new(
        id: &str,
        registry: Arc<MappedFeatureRegistry>,
        mut adapter: Box<dyn DeviceAdapter>,
    ) -> Result<Self, DeviceError> {
        adapter.init(&registry)?;
        info!(
            "Device \"{}\" initialized with {} features",
            id,
            registry.size()
        );
        Ok(Self {
            id: id.to_string(),
            registry,
            adapter,
            connected: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<MappedFeatureRegistry> {
        &self.registry
    }

    /// Connection status as of the last poll
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Polls the adapter, then runs the update pass.
    ///
    /// An adapter failure skips the update pass so feature states keep
    /// their previous values.
    pub fn poll(&mut self) -> Result<(), DeviceError> {
        self.adapter.poll()?;

        let connected = self.adapter.is_connected();
        if connected != self.connected {
            if connected {
                info!("Device \"{}\" connected", self.id);
            } else {
                warn!("Device \"{}\" disconnected", self.id);
            }
            self.connected = connected;
        }

        self.registry.update_all()?;
        Ok(())
    }
}

impl Pollable for IoDevice {
    fn device_id(&self) -> &str {
        self.id()
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        IoDevice::poll(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Adapter driving a single button from a shared flag
    pub(crate) struct FlagAdapter {
        pub(crate) button: Arc<DeviceButton>,
        pub(crate) pressed: Arc<AtomicBool>,
        pub(crate) fail_polls: Arc<AtomicBool>,
        pub(crate) polls: Arc<AtomicUsize>,
    }

    impl FlagAdapter {
        pub(crate) fn new(button: Arc<DeviceButton>) -> Self {
            Self {
                button,
                pressed: Arc::default(),
                fail_polls: Arc::default(),
                polls: Arc::default(),
            }
        }
    }

    impl DeviceAdapter for FlagAdapter {
        fn init(&mut self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
            let pressed = self.pressed.clone();
            registry.map_fn(&self.button, move |state: &ButtonState| {
                state.set_pressed(pressed.load(Ordering::SeqCst));
                Ok(())
            })?;
            Ok(())
        }

        fn poll(&mut self) -> Result<(), AdapterError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail_polls.load(Ordering::SeqCst) {
                return Err(AdapterError::Transport("read timed out".to_string()));
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    pub(crate) fn flag_device() -> (IoDevice, Arc<DeviceButton>, Arc<AtomicBool>, Arc<AtomicBool>) {
        let registry = Arc::new(MappedFeatureRegistry::new());
        let button = DeviceButton::new("a").unwrap();
        registry.register(&button).unwrap();

        let adapter = FlagAdapter::new(button.clone());
        let pressed = adapter.pressed.clone();
        let fail = adapter.fail_polls.clone();
        let device = IoDevice::new("flag", registry, Box::new(adapter)).unwrap();
        (device, button, pressed, fail)
    }

    #[test]
    fn test_poll_moves_adapter_data_into_states() {
        let (mut device, button, pressed, _) = flag_device();
        let view = device.registry().state(&button).unwrap();

        assert!(!device.is_connected());
        pressed.store(true, Ordering::SeqCst);
        device.poll().unwrap();
        assert!(device.is_connected());
        assert!(view.is_pressed());
        assert_eq!(view.presses(), 1);
    }

    #[test]
    fn test_adapter_failure_skips_update_pass() {
        let (mut device, button, pressed, fail) = flag_device();
        let view = device.registry().state(&button).unwrap();

        fail.store(true, Ordering::SeqCst);
        pressed.store(true, Ordering::SeqCst);
        assert!(matches!(device.poll(), Err(DeviceError::Adapter(_))));
        assert!(!view.is_pressed());

        fail.store(false, Ordering::SeqCst);
        device.poll().unwrap();
        assert!(view.is_pressed());
    }

    #[test]
    fn test_updater_failure_surfaces_as_feature_error() {
        let registry = Arc::new(MappedFeatureRegistry::new());
        let trigger = AnalogTrigger::new("lt").unwrap();
        registry.register(&trigger).unwrap();

        struct Broken(Arc<AnalogTrigger>, Mutex<usize>);
        impl DeviceAdapter for Broken {
            fn init(&mut self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
                registry.map_fn(&self.0, |_: &TriggerState| Err("bad sample".into()))?;
                Ok(())
            }
            fn poll(&mut self) -> Result<(), AdapterError> {
                *self.1.lock().unwrap() += 1;
                Ok(())
            }
            fn is_connected(&self) -> bool {
                true
            }
        }

        let adapter = Broken(trigger.clone(), Mutex::new(0));
        let mut device = IoDevice::new("broken", registry, Box::new(adapter)).unwrap();
        assert!(matches!(
            device.poll(),
            Err(DeviceError::Feature(FeatureError::UpdaterFailure { .. }))
        ));
    }

    #[test]
    fn test_init_failure_is_reported() {
        let registry = Arc::new(MappedFeatureRegistry::new());
        // never registered, so init cannot map it
        let button = DeviceButton::new("a").unwrap();
        let result = IoDevice::new("flag", registry, Box::new(FlagAdapter::new(button)));
        assert!(matches!(
            result,
            Err(DeviceError::Adapter(AdapterError::Mapping(
                FeatureError::NotRegistered(_)
            )))
        ));
    }
}

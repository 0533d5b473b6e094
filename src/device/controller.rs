//! Standard controller
//!
//! Fifteen buttons, two sticks, two analog triggers and a coarse/fine pair of
//! rumble motors, registered under fixed IDs.

use super::catalog::{
    AnalogStick, AnalogTrigger, ButtonView, DeviceButton, Direction, RumbleMotor, StickView,
    TriggerView, Vibration, VibrationView,
};
use super::{DeviceAdapter, DeviceError, IoDevice, Pollable};
use crate::feature::{Capability, FeatureError, MappedFeatureRegistry};
use std::sync::Arc;
use tracing::debug;

/// Feature objects of a standard controller
#[derive(Debug)]
pub struct StandardLayout {
    pub a: Arc<DeviceButton>,
    pub b: Arc<DeviceButton>,
    pub x: Arc<DeviceButton>,
    pub y: Arc<DeviceButton>,
    pub lb: Arc<DeviceButton>,
    pub rb: Arc<DeviceButton>,
    pub back: Arc<DeviceButton>,
    pub start: Arc<DeviceButton>,
    pub guide: Arc<DeviceButton>,
    pub l_thumb: Arc<DeviceButton>,
    pub r_thumb: Arc<DeviceButton>,
    pub up: Arc<DeviceButton>,
    pub down: Arc<DeviceButton>,
    pub left: Arc<DeviceButton>,
    pub right: Arc<DeviceButton>,
    pub ls: Arc<AnalogStick>,
    pub rs: Arc<AnalogStick>,
    pub lt: Arc<AnalogTrigger>,
    pub rt: Arc<AnalogTrigger>,
    pub coarse: Arc<RumbleMotor>,
    pub fine: Arc<RumbleMotor>,
}

impl StandardLayout {
    pub fn new() -> Result<Self, FeatureError> {
        Ok(Self {
            a: DeviceButton::new("a")?,
            b: DeviceButton::new("b")?,
            x: DeviceButton::new("x")?,
            y: DeviceButton::new("y")?,
            lb: DeviceButton::new("lb")?,
            rb: DeviceButton::new("rb")?,
            back: DeviceButton::new("back")?,
            start: DeviceButton::new("start")?,
            guide: DeviceButton::new("guide")?,
            l_thumb: DeviceButton::new("l_thumb")?,
            r_thumb: DeviceButton::new("r_thumb")?,
            up: DeviceButton::with_direction("up", Direction::Up)?,
            down: DeviceButton::with_direction("down", Direction::Down)?,
            left: DeviceButton::with_direction("left", Direction::Left)?,
            right: DeviceButton::with_direction("right", Direction::Right)?,
            ls: AnalogStick::new("ls")?,
            rs: AnalogStick::new("rs")?,
            lt: AnalogTrigger::new("lt")?,
            rt: AnalogTrigger::new("rt")?,
            coarse: RumbleMotor::new("coarse")?,
            fine: RumbleMotor::new("fine")?,
        })
    }

    pub fn buttons(&self) -> [&Arc<DeviceButton>; 15] {
        [
            &self.a,
            &self.b,
            &self.x,
            &self.y,
            &self.lb,
            &self.rb,
            &self.back,
            &self.start,
            &self.guide,
            &self.l_thumb,
            &self.r_thumb,
            &self.up,
            &self.down,
            &self.left,
            &self.right,
        ]
    }

    fn register_all(&self, registry: &MappedFeatureRegistry) -> Result<(), FeatureError> {
        for button in self.buttons() {
            registry.register(button)?;
        }
        registry.register(&self.ls)?;
        registry.register(&self.rs)?;
        registry.register(&self.lt)?;
        registry.register(&self.rt)?;
        registry.register(&self.coarse)?;
        registry.register(&self.fine)?;
        Ok(())
    }
}

/// Cloneable consumer handle onto a controller's feature states
#[derive(Debug, Clone)]
pub struct ControllerState {
    registry: Arc<MappedFeatureRegistry>,
    layout: Arc<StandardLayout>,
    pub ls: Arc<StickView>,
    pub rs: Arc<StickView>,
    pub lt: Arc<TriggerView>,
    pub rt: Arc<TriggerView>,
    pub coarse: Arc<VibrationView>,
    pub fine: Arc<VibrationView>,
}

impl ControllerState {
    fn new(
        registry: Arc<MappedFeatureRegistry>,
        layout: Arc<StandardLayout>,
    ) -> Result<Self, FeatureError> {
        Ok(Self {
            ls: registry.state(&layout.ls)?,
            rs: registry.state(&layout.rs)?,
            lt: registry.state(&layout.lt)?,
            rt: registry.state(&layout.rt)?,
            coarse: registry.state(&layout.coarse)?,
            fine: registry.state(&layout.fine)?,
            registry,
            layout,
        })
    }

    pub fn layout(&self) -> &Arc<StandardLayout> {
        &self.layout
    }

    /// View of one of the layout's buttons, `None` if it is not registered
    pub fn button(&self, button: &Arc<DeviceButton>) -> Option<Arc<ButtonView>> {
        self.registry.request_state(button)
    }

    /// Buttons currently held, in layout order
    pub fn pressed(&self) -> Vec<Arc<DeviceButton>> {
        self.layout
            .buttons()
            .into_iter()
            .filter(|button| self.button(button).is_some_and(|view| view.is_pressed()))
            .cloned()
            .collect()
    }

    /// Sets every rumble motor of the controller to `force`, clamped to `[0, 1]`
    pub fn rumble(&self, force: f32) {
        let mut motors = 0;
        for state in self.registry.internal_states_with(Capability::Rumble) {
            if let Ok(vibration) = state.downcast::<Vibration>() {
                vibration.set_force(force);
                motors += 1;
            }
        }
        debug!("Rumble force {:.2} requested on {} motors", force, motors);
    }
}

pub struct Controller {
    device: IoDevice,
    state: ControllerState,
}

impl Controller {
    /// Registers the standard layout and attaches the adapter built by
    /// `make_adapter`.
    pub fn new<A>(id: &str, make_adapter: A) -> Result<Self, DeviceError>
    where
        A: FnOnce(&Arc<StandardLayout>) -> Box<dyn DeviceAdapter>,
    {
        let layout = Arc::new(StandardLayout::new()?);
        let registry = Arc::new(MappedFeatureRegistry::new());
        layout.register_all(&registry)?;

        let state = ControllerState::new(registry.clone(), layout.clone())?;
        let device = IoDevice::new(id, registry, make_adapter(&layout))?;
        Ok(Self { device, state })
    }

    pub fn state(&self) -> ControllerState {
        self.state.clone()
    }

    pub fn layout(&self) -> &Arc<StandardLayout> {
        &self.state.layout
    }

    pub fn device(&self) -> &IoDevice {
        &self.device
    }

    pub fn rumble(&self, force: f32) {
        self.state.rumble(force);
    }
}

impl Pollable for Controller {
    fn device_id(&self) -> &str {
        self.device.id()
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        self.device.poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::catalog::{ButtonState, StickState, TriggerState};
    use crate::device::rumble::tests::RecordingSink;
    use crate::device::rumble::{MotorSlot, RumbleChannel, RUMBLE_MAX};
    use crate::device::AdapterError;
    use std::sync::Mutex;

    #[derive(Debug, Default, Clone, Copy)]
    struct Frame {
        a: bool,
        ls: (f32, f32),
        rt: f32,
    }

    struct ScriptedAdapter {
        layout: Arc<StandardLayout>,
        frame: Arc<Mutex<Frame>>,
        rumble: RumbleChannel,
    }

    impl DeviceAdapter for ScriptedAdapter {
        fn init(&mut self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
            let frame = self.frame.clone();
            registry.map(&self.layout.a, frame.clone(), |state: &ButtonState, frame| {
                state.set_pressed(frame.lock().unwrap().a);
                Ok(())
            })?;
            registry.map(&self.layout.ls, frame.clone(), |state: &StickState, frame| {
                let (x, y) = frame.lock().unwrap().ls;
                state.set(x, y, 0.0);
                Ok(())
            })?;
            registry.map(&self.layout.rt, frame, |state: &TriggerState, frame| {
                state.set_force(frame.lock().unwrap().rt);
                Ok(())
            })?;
            for (motor, slot) in [
                (&self.layout.coarse, MotorSlot::Coarse),
                (&self.layout.fine, MotorSlot::Fine),
            ] {
                registry.map(
                    motor,
                    (self.rumble.clone(), slot),
                    |vibration: &Vibration, (channel, slot)| {
                        channel.send(*slot, vibration.force())?;
                        Ok(())
                    },
                )?;
            }
            Ok(())
        }

        fn poll(&mut self) -> Result<(), AdapterError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn scripted() -> (Controller, Arc<Mutex<Frame>>, RecordingSink) {
        let frame = Arc::new(Mutex::new(Frame::default()));
        let sink = RecordingSink::default();
        let rumble = RumbleChannel::new(sink.clone());
        let adapter_frame = frame.clone();
        let controller = Controller::new("scripted", move |layout| {
            Box::new(ScriptedAdapter {
                layout: layout.clone(),
                frame: adapter_frame,
                rumble,
            })
        })
        .unwrap();
        (controller, frame, sink)
    }

    #[test]
    fn test_registers_standard_layout() {
        let (controller, _, _) = scripted();
        let registry = controller.device().registry();
        assert_eq!(registry.size(), 21);
        assert_eq!(registry.internal_states_with(Capability::Rumble).len(), 2);
        assert_eq!(controller.layout().up.direction(), Some(Direction::Up));
        assert!(registry.lookup_id("l_thumb").is_some());
    }

    #[test]
    fn test_state_follows_polls() {
        let (mut controller, frame, _) = scripted();
        let state = controller.state();

        *frame.lock().unwrap() = Frame {
            a: true,
            ls: (0.0, 0.75),
            rt: 0.4,
        };
        controller.poll().unwrap();

        let a = state.button(&state.layout().a).unwrap();
        assert!(a.is_pressed());
        assert_eq!(state.pressed().len(), 1);
        assert!(state.ls.holds(Direction::Up));
        assert_eq!(state.rt.force(), 0.4);
        assert!(!state.rt.is_pressed());
    }

    #[test]
    fn test_rumble_reaches_sink_once() {
        let (mut controller, _, sink) = scripted();
        let state = controller.state();

        state.rumble(2.0);
        assert_eq!(state.coarse.force(), 1.0);
        assert_eq!(state.fine.force(), 1.0);

        controller.poll().unwrap();
        controller.poll().unwrap();
        let writes = sink.writes.lock().unwrap().clone();
        assert_eq!(writes, vec![(RUMBLE_MAX, 0), (RUMBLE_MAX, RUMBLE_MAX)]);

        controller.rumble(0.0);
        controller.poll().unwrap();
        assert_eq!(sink.writes.lock().unwrap().last(), Some(&(0, 0)));
    }
}

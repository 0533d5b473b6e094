//! Gamepad adapter on top of gilrs
//!
//! [`GilrsTransport`] owns the gilrs context and produces one [`PadSnapshot`]
//! per poll. [`GilrsAdapter`] maps every feature of a
//! [`StandardLayout`] to a slot of that snapshot, so the update pass only ever
//! reads plain values and never touches gilrs.

use super::{apply_deadzone, clamp_deadzone, RateLimiter};
use crate::device::catalog::{ButtonState, DeviceButton, StickState, TriggerState, Vibration};
use crate::device::rumble::{HapticSink, MotorSlot, RumbleChannel, RumbleError};
use crate::device::{AdapterError, DeviceAdapter, StandardLayout};
use crate::feature::MappedFeatureRegistry;
use gilrs::ff::{BaseEffect, BaseEffectType, Effect, EffectBuilder, Repeat, Replay, Ticks};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, trace, warn};

/// Minimum time between two gamepad enumerations of the same transport
pub const SCAN_INTERVAL_MS: u64 = 1000;

const PAD_BUTTONS: [Button; 15] = [
    Button::South,
    Button::East,
    Button::West,
    Button::North,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
    Button::DPadUp,
    Button::DPadDown,
    Button::DPadLeft,
    Button::DPadRight,
];

const PAD_AXES: [Axis; 6] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::RightStickX,
    Axis::RightStickY,
    Axis::LeftZ,
    Axis::RightZ,
];

const PAD_TRIGGERS: [Button; 2] = [Button::LeftTrigger2, Button::RightTrigger2];

fn slot<T: PartialEq + std::fmt::Debug>(table: &[T], item: T) -> Result<usize, AdapterError> {
    table
        .iter()
        .position(|candidate| *candidate == item)
        .ok_or_else(|| AdapterError::UnsupportedSource(format!("{:?}", item)))
}

/// Raw state of one gamepad as read on a single poll
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PadSnapshot {
    pub connected: bool,
    buttons: [bool; PAD_BUTTONS.len()],
    axes: [f32; PAD_AXES.len()],
    triggers: [f32; PAD_TRIGGERS.len()],
}

impl PadSnapshot {
    pub fn button(&self, source: ButtonSource) -> bool {
        self.buttons[source.0]
    }

    /// Stick position with `deadzone` applied to each axis
    pub fn stick(&self, source: StickSource, deadzone: f32) -> (f32, f32, f32) {
        let x = apply_deadzone(self.axes[source.x], deadzone);
        let y = apply_deadzone(self.axes[source.y], deadzone);
        let z = if self.button(source.click) { -1.0 } else { 0.0 };
        (x, y, z)
    }

    pub fn trigger(&self, source: TriggerSource) -> f32 {
        match source {
            TriggerSource::Analog(slot) => self.triggers[slot],
            TriggerSource::Signed(slot) => remap_signed_trigger(self.axes[slot]),
        }
    }
}

/// Maps a trigger reported as a `[-1, 1]` axis to `[0, 1]`
pub fn remap_signed_trigger(value: f32) -> f32 {
    ((value + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonSource(usize);

impl ButtonSource {
    pub fn new(button: Button) -> Result<Self, AdapterError> {
        slot(&PAD_BUTTONS, button).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StickSource {
    x: usize,
    y: usize,
    click: ButtonSource,
}

impl StickSource {
    pub fn new(x: Axis, y: Axis, click: Button) -> Result<Self, AdapterError> {
        Ok(Self {
            x: slot(&PAD_AXES, x)?,
            y: slot(&PAD_AXES, y)?,
            click: ButtonSource::new(click)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Analog button value in `[0, 1]`
    Analog(usize),
    /// Axis in `[-1, 1]` with `-1` at rest
    Signed(usize),
}

impl TriggerSource {
    pub fn analog(button: Button) -> Result<Self, AdapterError> {
        slot(&PAD_TRIGGERS, button).map(Self::Analog)
    }

    pub fn signed(axis: Axis) -> Result<Self, AdapterError> {
        slot(&PAD_AXES, axis).map(Self::Signed)
    }
}

#[derive(Debug, Clone)]
pub struct GamepadInfo {
    pub id: GamepadId,
    pub name: String,
    pub force_feedback: bool,
}

struct ScanCache {
    limiter: RateLimiter,
    gamepads: Vec<GamepadInfo>,
}

fn nth_gamepad<T: Clone>(gamepads: &[T], index: usize) -> Result<T, AdapterError> {
    gamepads.get(index).cloned().ok_or_else(|| {
        AdapterError::NotFound(format!(
            "no gamepad at index {} ({} connected)",
            index,
            gamepads.len()
        ))
    })
}

/// Shared gilrs context
///
/// Cloning is cheap; all clones talk to the same context.
#[derive(Clone)]
pub struct GilrsTransport {
    gilrs: Arc<Mutex<Gilrs>>,
    scans: Arc<Mutex<ScanCache>>,
}

impl GilrsTransport {
    pub fn new() -> Result<Self, AdapterError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(AdapterError::Transport(e.to_string()));
            }
        };

        Ok(Self {
            gilrs: Arc::new(Mutex::new(gilrs)),
            scans: Arc::new(Mutex::new(ScanCache {
                limiter: RateLimiter::new(SCAN_INTERVAL_MS),
                gamepads: Vec::new(),
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Gilrs> {
        self.gilrs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connected gamepads
    ///
    /// Enumerates at most once per [`SCAN_INTERVAL_MS`]; calls inside that
    /// window get the cached list.
    pub fn gamepads(&self) -> Vec<GamepadInfo> {
        let mut scans = self.scans.lock().unwrap_or_else(PoisonError::into_inner);
        if !scans.limiter.should_process() {
            trace!("Returning cached gamepad list");
            return scans.gamepads.clone();
        }

        let mut gilrs = self.lock();
        pump_events(&mut gilrs);
        scans.gamepads = gilrs
            .gamepads()
            .map(|(id, gamepad)| GamepadInfo {
                id,
                name: gamepad.name().to_string(),
                force_feedback: gamepad.is_ff_supported(),
            })
            .collect();

        info!("Found {} gamepads", scans.gamepads.len());
        for (idx, info) in scans.gamepads.iter().enumerate() {
            info!(
                "  [{}] ID: {}, Name: {}, force feedback: {}",
                idx, info.id, info.name, info.force_feedback
            );
        }
        scans.gamepads.clone()
    }

    /// The gamepad at `index` in [`gamepads`](Self::gamepads)
    pub fn gamepad(&self, index: usize) -> Result<GamepadInfo, AdapterError> {
        nth_gamepad(&self.gamepads(), index)
    }

    pub fn supports_force_feedback(&self, id: GamepadId) -> bool {
        self.lock()
            .connected_gamepad(id)
            .is_some_and(|gamepad| gamepad.is_ff_supported())
    }

    /// Drains pending gilrs events and reads the current state of `id`.
    pub fn read(&self, id: GamepadId) -> PadSnapshot {
        let mut gilrs = self.lock();
        pump_events(&mut gilrs);

        let Some(gamepad) = gilrs.connected_gamepad(id) else {
            return PadSnapshot::default();
        };

        let mut snapshot = PadSnapshot {
            connected: true,
            ..Default::default()
        };
        for (slot, button) in PAD_BUTTONS.iter().enumerate() {
            snapshot.buttons[slot] = gamepad.is_pressed(*button);
        }
        for (slot, axis) in PAD_AXES.iter().enumerate() {
            snapshot.axes[slot] = gamepad.value(*axis);
        }
        for (slot, button) in PAD_TRIGGERS.iter().enumerate() {
            snapshot.triggers[slot] = gamepad
                .button_data(*button)
                .map(|data| data.value())
                .unwrap_or_default();
        }
        snapshot
    }
}

fn pump_events(gilrs: &mut Gilrs) {
    while let Some(Event { id, event, .. }) = gilrs.next_event() {
        match event {
            EventType::Connected => info!("Gamepad {} connected", id),
            EventType::Disconnected => warn!("Gamepad {} disconnected", id),
            _ => trace!("Gamepad {} event: {:?}", id, event),
        }
    }
}

/// Force feedback through gilrs, one looping effect per motor pair
pub struct GilrsHapticSink {
    transport: GilrsTransport,
    gamepad: GamepadId,
    effect: Option<Effect>,
}

impl GilrsHapticSink {
    pub fn new(transport: GilrsTransport, gamepad: GamepadId) -> Self {
        Self {
            transport,
            gamepad,
            effect: None,
        }
    }
}

impl HapticSink for GilrsHapticSink {
    fn set_vibration(&mut self, coarse: u16, fine: u16) -> Result<(), RumbleError> {
        // dropping the effect stops it
        self.effect = None;
        if coarse == 0 && fine == 0 {
            return Ok(());
        }

        let scheduling = Replay {
            play_for: Ticks::from_ms(100),
            ..Default::default()
        };
        let mut gilrs = self.transport.lock();
        let effect = EffectBuilder::new()
            .add_effect(BaseEffect {
                kind: BaseEffectType::Strong { magnitude: coarse },
                scheduling,
                ..Default::default()
            })
            .add_effect(BaseEffect {
                kind: BaseEffectType::Weak { magnitude: fine },
                scheduling,
                ..Default::default()
            })
            .repeat(Repeat::Infinitely)
            .gamepads(&[self.gamepad])
            .finish(&mut gilrs)
            .map_err(|e| match e {
                gilrs::ff::Error::FfNotSupported(id) => RumbleError::Unsupported(id.to_string()),
                other => RumbleError::Transport(other.to_string()),
            })?;
        effect
            .play()
            .map_err(|e| RumbleError::Transport(e.to_string()))?;
        self.effect = Some(effect);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GilrsSettings {
    pub stick_deadzone: f32,
    /// Read triggers from the Z axes instead of the analog trigger buttons
    pub signed_triggers: bool,
    pub rumble: bool,
}

impl Default for GilrsSettings {
    fn default() -> Self {
        Self {
            stick_deadzone: 0.05,
            signed_triggers: false,
            rumble: true,
        }
    }
}

type SharedSnapshot = Arc<RwLock<PadSnapshot>>;

fn current(snapshot: &RwLock<PadSnapshot>) -> PadSnapshot {
    *snapshot.read().unwrap_or_else(PoisonError::into_inner)
}

/// [`DeviceAdapter`] for one gilrs gamepad driving a [`StandardLayout`]
pub struct GilrsAdapter {
    transport: GilrsTransport,
    gamepad: GamepadId,
    layout: Arc<StandardLayout>,
    settings: GilrsSettings,
    snapshot: SharedSnapshot,
}

impl GilrsAdapter {
    pub fn new(
        transport: GilrsTransport,
        gamepad: GamepadId,
        layout: Arc<StandardLayout>,
        mut settings: GilrsSettings,
    ) -> Self {
        let deadzone = clamp_deadzone(settings.stick_deadzone);
        if deadzone != settings.stick_deadzone {
            warn!(
                "Stick deadzone {} out of range, using {}",
                settings.stick_deadzone, deadzone
            );
            settings.stick_deadzone = deadzone;
        }
        debug!(
            "Creating gilrs adapter for gamepad {} with settings: {:?}",
            gamepad, settings
        );
        Self {
            transport,
            gamepad,
            layout,
            settings,
            snapshot: SharedSnapshot::default(),
        }
    }

    fn map_buttons(&self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
        for (button, source) in button_sources(&self.layout) {
            let snapshot = self.snapshot.clone();
            registry.map(
                button,
                ButtonSource::new(source)?,
                move |state: &ButtonState, source| {
                    state.set_pressed(current(&snapshot).button(*source));
                    Ok(())
                },
            )?;
        }
        Ok(())
    }

    fn map_sticks(&self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
        let sticks = [
            (
                &self.layout.ls,
                StickSource::new(Axis::LeftStickX, Axis::LeftStickY, Button::LeftThumb)?,
            ),
            (
                &self.layout.rs,
                StickSource::new(Axis::RightStickX, Axis::RightStickY, Button::RightThumb)?,
            ),
        ];
        for (stick, source) in sticks {
            let snapshot = self.snapshot.clone();
            let deadzone = self.settings.stick_deadzone;
            registry.map(stick, source, move |state: &StickState, source| {
                let (x, y, z) = current(&snapshot).stick(*source, deadzone);
                state.set(x, y, z);
                Ok(())
            })?;
        }
        Ok(())
    }

    fn map_triggers(&self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
        let (left, right) = if self.settings.signed_triggers {
            (
                TriggerSource::signed(Axis::LeftZ)?,
                TriggerSource::signed(Axis::RightZ)?,
            )
        } else {
            (
                TriggerSource::analog(Button::LeftTrigger2)?,
                TriggerSource::analog(Button::RightTrigger2)?,
            )
        };
        for (trigger, source) in [(&self.layout.lt, left), (&self.layout.rt, right)] {
            let snapshot = self.snapshot.clone();
            registry.map(trigger, source, move |state: &TriggerState, source| {
                state.set_force(current(&snapshot).trigger(*source));
                Ok(())
            })?;
        }
        Ok(())
    }

    fn map_rumble(&self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
        if !self.settings.rumble {
            info!("Rumble disabled for gamepad {}", self.gamepad);
            return Ok(());
        }
        if !self.transport.supports_force_feedback(self.gamepad) {
            warn!(
                "Gamepad {} does not support force feedback, rumble motors stay unmapped",
                self.gamepad
            );
            return Ok(());
        }

        let channel = RumbleChannel::new(GilrsHapticSink::new(
            self.transport.clone(),
            self.gamepad,
        ));
        for (motor, slot) in [
            (&self.layout.coarse, MotorSlot::Coarse),
            (&self.layout.fine, MotorSlot::Fine),
        ] {
            registry.map(
                motor,
                (channel.clone(), slot),
                |vibration: &Vibration, (channel, slot)| {
                    channel.send(*slot, vibration.force())?;
                    Ok(())
                },
            )?;
        }
        Ok(())
    }
}

impl DeviceAdapter for GilrsAdapter {
    fn init(&mut self, registry: &MappedFeatureRegistry) -> Result<(), AdapterError> {
        self.map_buttons(registry)?;
        self.map_sticks(registry)?;
        self.map_triggers(registry)?;
        self.map_rumble(registry)?;
        info!("Gilrs adapter for gamepad {} initialized", self.gamepad);
        Ok(())
    }

    fn poll(&mut self) -> Result<(), AdapterError> {
        let snapshot = self.transport.read(self.gamepad);
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        current(&self.snapshot).connected
    }
}

fn button_sources(layout: &StandardLayout) -> [(&Arc<DeviceButton>, Button); 15] {
    [
        (&layout.a, Button::South),
        (&layout.b, Button::East),
        (&layout.x, Button::West),
        (&layout.y, Button::North),
        (&layout.lb, Button::LeftTrigger),
        (&layout.rb, Button::RightTrigger),
        (&layout.back, Button::Select),
        (&layout.start, Button::Start),
        (&layout.guide, Button::Mode),
        (&layout.l_thumb, Button::LeftThumb),
        (&layout.r_thumb, Button::RightThumb),
        (&layout.up, Button::DPadUp),
        (&layout.down, Button::DPadDown),
        (&layout.left, Button::DPadLeft),
        (&layout.right, Button::DPadRight),
    ]
}

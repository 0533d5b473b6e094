//! Generic feature catalog
//!
//! Buttons, analog sticks, analog triggers and rumble motors, each with an
//! internal state the adapter writes and a container view handed to
//! consumers. Scalar fields are atomic and a stick position is published as
//! one snapshot, so a consumer thread can read a view while the polling
//! thread runs an update pass.

use crate::feature::{AtomicF32, Capability, FeatureError, FeatureId, IoFeature};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Stick deflection past which a direction counts as held
pub const DIRECTION_THRESHOLD: f32 = 0.5;

/// Force past which an analog trigger counts as pressed
pub const TRIGGER_THRESHOLD: f32 = 0.5;

// Direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Direction {
    pub const NORTH: Direction = Direction::Up;
    pub const SOUTH: Direction = Direction::Down;
    pub const WEST: Direction = Direction::Left;
    pub const EAST: Direction = Direction::Right;

    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Self, FeatureError> {
        Self::ALL
            .into_iter()
            .find(|direction| direction.id() == id)
            .ok_or_else(|| FeatureError::InvalidArgument(format!("no direction with ID {}", id)))
    }

    fn bit(self) -> u8 {
        1 << self.id()
    }
}

// Buttons

/// A digital button, optionally tied to a direction (d-pad)
#[derive(Debug)]
pub struct DeviceButton {
    id: FeatureId,
    direction: Option<Direction>,
}

impl DeviceButton {
    pub fn new(id: &str) -> Result<Arc<Self>, FeatureError> {
        Ok(Arc::new(Self {
            id: FeatureId::new(id)?,
            direction: None,
        }))
    }

    pub fn with_direction(id: &str, direction: Direction) -> Result<Arc<Self>, FeatureError> {
        Ok(Arc::new(Self {
            id: FeatureId::new(id)?,
            direction: Some(direction),
        }))
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }
}

#[derive(Debug, Default)]
pub struct ButtonState {
    pressed: AtomicBool,
    // value seen by the previous update pass, for edge detection
    previous: AtomicBool,
    presses: AtomicU64,
}

impl ButtonState {
    pub fn set_pressed(&self, pressed: bool) {
        self.pressed.store(pressed, Ordering::Relaxed);
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}

/// Consumer view of a [`DeviceButton`]
#[derive(Debug)]
pub struct ButtonView(Arc<ButtonState>);

impl ButtonView {
    pub fn is_pressed(&self) -> bool {
        self.0.is_pressed()
    }

    /// Number of presses (rising edges) seen since registration
    pub fn presses(&self) -> u64 {
        self.0.presses.load(Ordering::Relaxed)
    }
}

impl IoFeature for DeviceButton {
    type Internal = ButtonState;
    type Container = ButtonView;

    fn id(&self) -> &FeatureId {
        &self.id
    }

    fn create_internal(&self) -> Arc<ButtonState> {
        Arc::default()
    }

    fn create_container(&self, internal: &Arc<ButtonState>) -> Arc<ButtonView> {
        Arc::new(ButtonView(internal.clone()))
    }

    fn update(&self, state: &ButtonState) {
        let pressed = state.is_pressed();
        let was_pressed = state.previous.swap(pressed, Ordering::Relaxed);
        if pressed && !was_pressed {
            state.presses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// Analog sticks

#[derive(Debug)]
pub struct AnalogStick {
    id: FeatureId,
}

impl AnalogStick {
    pub fn new(id: &str) -> Result<Arc<Self>, FeatureError> {
        Ok(Arc::new(Self {
            id: FeatureId::new(id)?,
        }))
    }
}

/// One published stick reading; `z` is `-1.0` while the stick is clicked in
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct StickPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    held: u8,
}

impl StickPosition {
    pub fn is_clicked(&self) -> bool {
        self.z < 0.0
    }

    pub fn holds(&self, direction: Direction) -> bool {
        self.held & direction.bit() != 0
    }

    fn held_directions(&self) -> u8 {
        let mut held = 0;
        if self.y > DIRECTION_THRESHOLD {
            held |= Direction::Up.bit();
        }
        if self.y < -DIRECTION_THRESHOLD {
            held |= Direction::Down.bit();
        }
        if self.x < -DIRECTION_THRESHOLD {
            held |= Direction::Left.bit();
        }
        if self.x > DIRECTION_THRESHOLD {
            held |= Direction::Right.bit();
        }
        held
    }
}

/// Stick position, written and read as a whole
#[derive(Debug, Default)]
pub struct StickState {
    position: RwLock<StickPosition>,
}

impl StickState {
    pub fn set(&self, x: f32, y: f32, z: f32) {
        let mut position = self.position.write().unwrap_or_else(PoisonError::into_inner);
        position.x = x;
        position.y = y;
        position.z = z;
    }

    pub fn position(&self) -> StickPosition {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn x(&self) -> f32 {
        self.position().x
    }

    pub fn y(&self) -> f32 {
        self.position().y
    }

    pub fn z(&self) -> f32 {
        self.position().z
    }
}

/// Consumer view of an [`AnalogStick`]
///
/// Read [`position`](Self::position) when more than one axis is needed; the
/// single-axis accessors each take a separate snapshot.
#[derive(Debug)]
pub struct StickView(Arc<StickState>);

impl StickView {
    pub fn position(&self) -> StickPosition {
        self.0.position()
    }

    pub fn x(&self) -> f32 {
        self.0.x()
    }

    pub fn y(&self) -> f32 {
        self.0.y()
    }

    pub fn z(&self) -> f32 {
        self.0.z()
    }

    pub fn is_clicked(&self) -> bool {
        self.position().is_clicked()
    }

    /// Whether the stick was pushed towards `direction` on the last update pass
    pub fn holds(&self, direction: Direction) -> bool {
        self.position().holds(direction)
    }
}

impl IoFeature for AnalogStick {
    type Internal = StickState;
    type Container = StickView;

    fn id(&self) -> &FeatureId {
        &self.id
    }

    fn create_internal(&self) -> Arc<StickState> {
        Arc::default()
    }

    fn create_container(&self, internal: &Arc<StickState>) -> Arc<StickView> {
        Arc::new(StickView(internal.clone()))
    }

    fn update(&self, state: &StickState) {
        let mut position = state.position.write().unwrap_or_else(PoisonError::into_inner);
        position.held = position.held_directions();
    }
}

// Analog triggers

#[derive(Debug)]
pub struct AnalogTrigger {
    id: FeatureId,
}

impl AnalogTrigger {
    pub fn new(id: &str) -> Result<Arc<Self>, FeatureError> {
        Ok(Arc::new(Self {
            id: FeatureId::new(id)?,
        }))
    }
}

#[derive(Debug, Default)]
pub struct TriggerState {
    force: AtomicF32,
}

impl TriggerState {
    /// Stores `force` clamped to `[0, 1]`
    pub fn set_force(&self, force: f32) {
        self.force.store(clamp_unit(force));
    }

    pub fn force(&self) -> f32 {
        self.force.load()
    }
}

/// Consumer view of an [`AnalogTrigger`]
#[derive(Debug)]
pub struct TriggerView(Arc<TriggerState>);

impl TriggerView {
    pub fn force(&self) -> f32 {
        self.0.force()
    }

    pub fn is_pressed(&self) -> bool {
        self.0.force() >= TRIGGER_THRESHOLD
    }
}

impl IoFeature for AnalogTrigger {
    type Internal = TriggerState;
    type Container = TriggerView;

    fn id(&self) -> &FeatureId {
        &self.id
    }

    fn create_internal(&self) -> Arc<TriggerState> {
        Arc::default()
    }

    fn create_container(&self, internal: &Arc<TriggerState>) -> Arc<TriggerView> {
        Arc::new(TriggerView(internal.clone()))
    }
}

// Rumble motors

/// A rumble motor. Consumers write the requested force, the adapter forwards it.
#[derive(Debug)]
pub struct RumbleMotor {
    id: FeatureId,
}

impl RumbleMotor {
    pub fn new(id: &str) -> Result<Arc<Self>, FeatureError> {
        Ok(Arc::new(Self {
            id: FeatureId::new(id)?,
        }))
    }
}

#[derive(Debug, Default)]
pub struct Vibration {
    force: AtomicF32,
}

impl Vibration {
    /// Stores `force` clamped to `[0, 1]`
    pub fn set_force(&self, force: f32) {
        self.force.store(clamp_unit(force));
    }

    pub fn force(&self) -> f32 {
        self.force.load()
    }
}

/// Consumer view of a [`RumbleMotor`]
#[derive(Debug)]
pub struct VibrationView(Arc<Vibration>);

impl VibrationView {
    pub fn force(&self) -> f32 {
        self.0.force()
    }

    pub fn set_force(&self, force: f32) {
        self.0.set_force(force);
    }
}

impl IoFeature for RumbleMotor {
    type Internal = Vibration;
    type Container = VibrationView;

    fn id(&self) -> &FeatureId {
        &self.id
    }

    fn create_internal(&self) -> Arc<Vibration> {
        Arc::default()
    }

    fn create_container(&self, internal: &Arc<Vibration>) -> Arc<VibrationView> {
        Arc::new(VibrationView(internal.clone()))
    }

    fn capability(&self) -> Capability {
        Capability::Rumble
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

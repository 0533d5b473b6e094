//! Rumble output channel
//!
//! Converts the `[0, 1]` force stored in a [`Vibration`](super::catalog::Vibration)
//! into the 16 bit magnitude haptic transports expect and forwards it to a
//! [`HapticSink`]. Both motors of a device share one channel, so writes are
//! serialized and a value that did not change since the last write is not
//! sent again.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

pub const RUMBLE_MIN: u16 = 0;
pub const RUMBLE_MAX: u16 = 0xFFFF;

#[derive(Debug, Error)]
pub enum RumbleError {
    #[error("Haptic transport error: {0}")]
    Transport(String),

    #[error("Force feedback not supported by {0}")]
    Unsupported(String),
}

/// Low level haptic output, written with the magnitudes of both motors at once
pub trait HapticSink: Send {
    fn set_vibration(&mut self, coarse: u16, fine: u16) -> Result<(), RumbleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorSlot {
    Coarse,
    Fine,
}

/// Scales a `[0, 1]` force to a motor magnitude, clamping out of range input.
pub fn scale_force(force: f32) -> u16 {
    let scaled = (force * RUMBLE_MAX as f32).round();
    if scaled.is_nan() || scaled <= RUMBLE_MIN as f32 {
        RUMBLE_MIN
    } else if scaled >= RUMBLE_MAX as f32 {
        RUMBLE_MAX
    } else {
        scaled as u16
    }
}

struct ChannelInner {
    sink: Box<dyn HapticSink>,
    coarse: u16,
    fine: u16,
}

/// Shared, serialized rumble output of one device
#[derive(Clone)]
pub struct RumbleChannel {
    inner: Arc<Mutex<ChannelInner>>,
}

impl RumbleChannel {
    pub fn new(sink: impl HapticSink + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                sink: Box::new(sink),
                coarse: RUMBLE_MIN,
                fine: RUMBLE_MIN,
            })),
        }
    }

    /// Sets the force of one motor
    ///
    /// Returns `Ok(false)` when the scaled magnitude equals the last value
    /// written for that motor and nothing was sent.
    pub fn send(&self, slot: MotorSlot, force: f32) -> Result<bool, RumbleError> {
        let magnitude = scale_force(force);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let (coarse, fine) = match slot {
            MotorSlot::Coarse => (magnitude, inner.fine),
            MotorSlot::Fine => (inner.coarse, magnitude),
        };
        if coarse == inner.coarse && fine == inner.fine {
            trace!("Rumble unchanged for {:?} motor", slot);
            return Ok(false);
        }

        inner.sink.set_vibration(coarse, fine)?;
        inner.coarse = coarse;
        inner.fine = fine;
        debug!("Rumble set to coarse={:#06x} fine={:#06x}", coarse, fine);
        Ok(true)
    }

    /// Last magnitudes successfully written, as `(coarse, fine)`
    pub fn last(&self) -> (u16, u16) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (inner.coarse, inner.fine)
    }
}

impl fmt::Debug for RumbleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (coarse, fine) = self.last();
        f.debug_struct("RumbleChannel")
            .field("coarse", &coarse)
            .field("fine", &fine)
            .finish()
    }
}

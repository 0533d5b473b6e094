use std::sync::atomic::{AtomicU32, Ordering};

/// An `f32` that can be shared between the polling thread and readers.
///
/// Stored as its bit pattern in an [`AtomicU32`]. Every access is a single
/// relaxed load or store, which is enough for values that are overwritten
/// once per tick and never read-modify-written from two threads.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_load() {
        let value = AtomicF32::new(0.25);
        assert_eq!(value.load(), 0.25);

        value.store(-1.0);
        assert_eq!(value.load(), -1.0);

        assert_eq!(AtomicF32::default().load(), 0.0);
    }
}

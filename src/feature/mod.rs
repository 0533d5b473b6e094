//! Feature registry for input devices
//!
//! Tracks which features (buttons, sticks, triggers, motors) a device instance
//! has, owns the state object of each feature and drives the per-tick update
//! pass that pushes fresh hardware data into those states.
//!
//! 1. [`table`] - Device feature table, registration bookkeeping and lookup
//! 2. [`registry`] - Mapped feature registry, updater binding and update pass
//! 3. [`record`] - Registration records and their typed views
//!
//! # Architecture
//!
//! ```text
//! Adapter ──► map(feature, params, updater)
//!                     │
//! Polling Driver ──► update_all() ──► updater(internal, params) ──► feature.update(internal)
//!                                          │
//! Consumers ◄── container state ◄──────────┘ (same allocation, atomics)
//! ```
//!
//! State objects are created exactly once per registration and are only ever
//! mutated in place, so `Arc`s handed out to consumers stay valid for the
//! lifetime of the registration.

pub mod atomic;
pub mod error;
pub mod record;
pub mod registry;
pub mod table;

pub use atomic::AtomicF32;
pub use error::{BoxError, FeatureError, StateKind};
pub use record::{RegisteredFeature, Registration};
pub use registry::{MappedFeatureRegistry, UpdateResult};
pub use table::{DeviceFeatureTable, States};

use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Type-erased state object shared between a registration and its readers
pub type AnyState = Arc<dyn Any + Send + Sync + 'static>;

/// Stable identifier of a feature, unique per device instance
///
/// Must be non-empty and must not contain whitespace.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FeatureId(Arc<str>);

impl FeatureId {
    pub fn new(id: impl AsRef<str>) -> Result<Self, FeatureError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(FeatureError::InvalidArgument(
                "feature ID cannot be empty".to_string(),
            ));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(FeatureError::InvalidArgument(format!(
                "feature ID \"{}\" cannot contain whitespace",
                id
            )));
        }
        Ok(Self(Arc::from(id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FeatureId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureId({:?})", &*self.0)
    }
}

/// Capability marker evaluated once at registration time
///
/// Features carrying a marker other than [`Capability::Generic`] are placed
/// into a secondary index of the table, so aggregate operations (e.g. "set
/// every rumble motor") never need to inspect feature types at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Capability {
    #[default]
    Generic,
    Rumble,
}

/// One logical capability of a device
///
/// Implementations are catalog data: they name the feature and know how to
/// allocate its states. Identity is the identity of the `Arc<Self>` handed to
/// the registry, not the ID alone.
pub trait IoFeature: Send + Sync + 'static {
    /// Mutable state owned by the adapter side
    type Internal: Send + Sync + 'static;

    /// Read-oriented facade over [`IoFeature::Internal`] for consumers
    type Container: Send + Sync + 'static;

    fn id(&self) -> &FeatureId;

    /// Allocates a fresh internal state. Must not return a shared object.
    fn create_internal(&self) -> Arc<Self::Internal>;

    /// Builds the container state around a freshly created internal state.
    fn create_container(&self, internal: &Arc<Self::Internal>) -> Arc<Self::Container>;

    fn capability(&self) -> Capability {
        Capability::Generic
    }

    /// Self-update hook, fired after the adapter updater on every update pass
    ///
    /// Used by features that derive part of their state from values the
    /// adapter just wrote. Runs even when the feature is unmapped.
    fn update(&self, _internal: &Self::Internal) {}
}

/// Object-safe view of an [`IoFeature`] as stored inside a registration
pub(crate) trait DynFeature: Send + Sync {
    fn feature_id(&self) -> &FeatureId;
    fn feature_capability(&self) -> Capability;
    fn type_name(&self) -> &'static str;
    fn self_update(&self, internal: &(dyn Any + Send + Sync + 'static));
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static>;
}

impl<F: IoFeature> DynFeature for F {
    fn feature_id(&self) -> &FeatureId {
        IoFeature::id(self)
    }

    fn feature_capability(&self) -> Capability {
        IoFeature::capability(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<F>()
    }

    fn self_update(&self, internal: &(dyn Any + Send + Sync + 'static)) {
        if let Some(internal) = internal.downcast_ref::<F::Internal>() {
            IoFeature::update(self, internal);
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync + 'static> {
        self
    }
}

/// Cloneable, type-erased handle to a registered feature
#[derive(Clone)]
pub struct FeatureHandle(pub(crate) Arc<dyn DynFeature>);

impl FeatureHandle {
    pub fn id(&self) -> &FeatureId {
        self.0.feature_id()
    }

    pub fn capability(&self) -> Capability {
        self.0.feature_capability()
    }

    /// Returns the concrete feature if it is an `F`.
    pub fn downcast<F: IoFeature>(&self) -> Option<Arc<F>> {
        self.0.clone().into_any().downcast::<F>().ok()
    }

    /// Whether this handle refers to exactly the feature object `feature`.
    pub fn is<F: IoFeature>(&self, feature: &Arc<F>) -> bool {
        address(&self.0) == address(feature)
    }
}

impl fmt::Debug for FeatureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureHandle")
            .field("id", self.id())
            .field("type", &self.0.type_name())
            .finish()
    }
}

/// Address of the allocation behind an `Arc`, used as object identity.
pub(crate) fn address<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

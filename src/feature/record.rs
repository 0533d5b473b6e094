//! Registration records
//!
//! A [`RegisteredFeature`] is the live binding of one feature to its internal
//! state, its container state and its current updater. Records are owned by
//! the [`DeviceFeatureTable`](super::DeviceFeatureTable); what leaves the table
//! is always a clone of the `Arc`s, never the record itself.

use super::{address, AnyState, DynFeature, FeatureHandle, FeatureId, IoFeature, StateKind};
use super::registry::UpdateResult;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased updater closure with its mapping parameters captured
pub(crate) type Updater =
    Arc<dyn Fn(&(dyn Any + Send + Sync + 'static)) -> UpdateResult + Send + Sync + 'static>;

/// Live binding of one feature inside a device feature table
///
/// `updater == None` is the no-op updater: the feature is registered but
/// unmapped. Unmapping drops the closure and with it the parameters.
#[derive(Clone)]
pub struct RegisteredFeature {
    pub(crate) feature: Arc<dyn DynFeature>,
    pub(crate) internal: AnyState,
    pub(crate) container: AnyState,
    pub(crate) updater: Option<Updater>,
}

impl RegisteredFeature {
    pub(crate) fn new<F: IoFeature>(
        feature: &Arc<F>,
        internal: Arc<F::Internal>,
        container: Arc<F::Container>,
    ) -> Self {
        Self {
            feature: feature.clone(),
            internal,
            container,
            updater: None,
        }
    }

    pub fn id(&self) -> &FeatureId {
        self.feature.feature_id()
    }

    pub fn feature(&self) -> FeatureHandle {
        FeatureHandle(self.feature.clone())
    }

    /// Whether an updater other than the no-op is bound
    pub fn has_mapping(&self) -> bool {
        self.updater.is_some()
    }

    pub fn internal_state(&self) -> AnyState {
        self.internal.clone()
    }

    pub fn container_state(&self) -> AnyState {
        self.container.clone()
    }

    /// Whether this record was created for exactly the object `feature`.
    pub(crate) fn is_feature<F: IoFeature>(&self, feature: &Arc<F>) -> bool {
        address(&self.feature) == address(feature)
    }

    /// Which of this record's states, if any, lives at `addr`.
    pub(crate) fn state_at(&self, addr: usize) -> Option<StateKind> {
        if address(&self.internal) == addr {
            Some(StateKind::Internal)
        } else if address(&self.container) == addr {
            Some(StateKind::Container)
        } else {
            None
        }
    }

    /// Typed view of this record, `None` if it was not registered for an `F`.
    pub(crate) fn typed<F: IoFeature>(&self) -> Option<Registration<F>> {
        let feature = self.feature.clone().into_any().downcast::<F>().ok()?;
        let internal = self.internal.clone().downcast::<F::Internal>().ok()?;
        let container = self.container.clone().downcast::<F::Container>().ok()?;
        Some(Registration {
            feature,
            internal,
            container,
            mapped: self.updater.is_some(),
        })
    }
}

impl fmt::Debug for RegisteredFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFeature")
            .field("id", self.id())
            .field("type", &self.feature.type_name())
            .field("mapped", &self.has_mapping())
            .finish()
    }
}

/// Typed snapshot of a registration
///
/// The states are the very objects owned by the registration; `mapped` is
/// the mapping status at the time the snapshot was taken.
pub struct Registration<F: IoFeature> {
    pub feature: Arc<F>,
    pub internal: Arc<F::Internal>,
    pub container: Arc<F::Container>,
    pub mapped: bool,
}

impl<F: IoFeature> Clone for Registration<F> {
    fn clone(&self) -> Self {
        Self {
            feature: self.feature.clone(),
            internal: self.internal.clone(),
            container: self.container.clone(),
            mapped: self.mapped,
        }
    }
}

impl<F: IoFeature> fmt::Debug for Registration<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", self.feature.id())
            .field("mapped", &self.mapped)
            .finish()
    }
}

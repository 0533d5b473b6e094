//! Device feature table
//!
//! Owns every [`RegisteredFeature`] of one device instance and enforces the
//! identity rules of registration:
//!
//! - at most one live record per ID
//! - registering the same feature object twice returns the existing state
//! - no new state may be an object already owned by another record
//!
//! # Locking
//!
//! The table is the unit of mutual exclusion. Structural operations take the
//! write lock, lookups and iteration take the read lock. Nothing here calls
//! adapter code while holding a lock; the only foreign code run under the
//! write lock are the state factories of the feature being registered.

use super::record::{RegisteredFeature, Updater};
use super::{
    address, AnyState, Capability, FeatureError, FeatureHandle, FeatureId, IoFeature,
    Registration, StateKind,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

#[derive(Default)]
struct TableInner {
    by_id: HashMap<FeatureId, RegisteredFeature>,
    // registration order, always the same membership as `by_id`
    ordered: Vec<FeatureId>,
    by_capability: HashMap<Capability, Vec<FeatureId>>,
}

impl TableInner {
    /// Record for `feature`, only if it was registered for that very object.
    fn record_of<F: IoFeature>(&self, feature: &Arc<F>) -> Option<&RegisteredFeature> {
        self.by_id
            .get(feature.id())
            .filter(|record| record.is_feature(feature))
    }

    fn collision(&self, addr: usize, kind: StateKind, id: &FeatureId) -> Option<FeatureError> {
        self.ordered.iter().find_map(|existing| {
            let record = self.by_id.get(existing)?;
            record
                .state_at(addr)
                .map(|existing_kind| FeatureError::StateCollision {
                    id: id.clone(),
                    kind,
                    existing: existing.clone(),
                    existing_kind,
                })
        })
    }
}

/// Container states of a table in registration order
///
/// Snapshot of the membership at the moment [`DeviceFeatureTable::iterate_states`]
/// was called. Call it again to restart.
pub struct States {
    inner: std::vec::IntoIter<AnyState>,
}

impl Iterator for States {
    type Item = AnyState;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for States {}

/// Owning collection of all feature registrations for one device instance
#[derive(Default)]
pub struct DeviceFeatureTable {
    inner: RwLock<TableInner>,
}

impl DeviceFeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic under the write lock can only come from a state factory, which
    // runs before anything is inserted, so a poisoned table is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `feature` and returns its internal state
    ///
    /// Registering the same object again is idempotent and returns the state
    /// created the first time.
    ///
    /// # Errors
    ///
    /// * [`FeatureError::AlreadyRegistered`] - the ID is bound to another feature object
    /// * [`FeatureError::StateCollision`] - a factory returned a state already owned
    ///   by another registration
    pub fn register<F: IoFeature>(&self, feature: &Arc<F>) -> Result<Arc<F::Internal>, FeatureError> {
        let mut inner = self.write();
        let id = feature.id().clone();

        if let Some(current) = inner.by_id.get(&id) {
            if !current.is_feature(feature) {
                warn!("Feature ID \"{}\" is already bound to another feature", id);
                return Err(FeatureError::AlreadyRegistered(id));
            }
            debug!("Feature \"{}\" already registered, reusing state", id);
            return current
                .typed::<F>()
                .map(|registration| registration.internal)
                .ok_or(FeatureError::AlreadyRegistered(id));
        }

        let internal = feature.create_internal();
        let container = feature.create_container(&internal);

        for (addr, kind) in [
            (address(&internal), StateKind::Internal),
            (address(&container), StateKind::Container),
        ] {
            if let Some(err) = inner.collision(addr, kind, &id) {
                warn!("Rejecting feature \"{}\": {}", id, err);
                return Err(err);
            }
        }

        let capability = feature.capability();
        inner.by_id.insert(
            id.clone(),
            RegisteredFeature::new(feature, internal.clone(), container),
        );
        inner.ordered.push(id.clone());
        if capability != Capability::Generic {
            inner
                .by_capability
                .entry(capability)
                .or_default()
                .push(id.clone());
        }

        debug!(
            "Registered feature \"{}\" ({:?}), {} features total",
            id,
            capability,
            inner.ordered.len()
        );
        Ok(internal)
    }

    /// Removes the registration of `feature`
    ///
    /// Any mapping bound to it is dropped together with the record.
    pub fn unregister<F: IoFeature>(&self, feature: &Arc<F>) -> Result<(), FeatureError> {
        let mut inner = self.write();
        let id = feature.id().clone();

        if inner.record_of(feature).is_none() {
            return Err(FeatureError::NotRegistered(id));
        }

        inner.by_id.remove(&id);
        inner.ordered.retain(|existing| existing != &id);
        for ids in inner.by_capability.values_mut() {
            ids.retain(|existing| existing != &id);
        }

        debug!("Unregistered feature \"{}\"", id);
        Ok(())
    }

    pub fn is_registered<F: IoFeature>(&self, feature: &Arc<F>) -> bool {
        self.read().record_of(feature).is_some()
    }

    /// Typed view of the registration of `feature`, if registered
    pub fn lookup<F: IoFeature>(&self, feature: &Arc<F>) -> Option<Registration<F>> {
        self.read().record_of(feature)?.typed::<F>()
    }

    /// Snapshot of the record bound to `id`, whatever its feature type
    pub fn lookup_id(&self, id: &str) -> Option<RegisteredFeature> {
        self.read().by_id.get(id).cloned()
    }

    /// Record bound to `id`, only if its feature is an `F`
    pub fn lookup_as<F: IoFeature>(&self, id: &str) -> Option<Registration<F>> {
        self.read().by_id.get(id)?.typed::<F>()
    }

    pub fn size(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Registered features in registration order
    pub fn list(&self) -> Vec<FeatureHandle> {
        let inner = self.read();
        inner
            .ordered
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .map(RegisteredFeature::feature)
            .collect()
    }

    /// Container states in registration order
    pub fn iterate_states(&self) -> States {
        let inner = self.read();
        let states: Vec<AnyState> = inner
            .ordered
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .map(RegisteredFeature::container_state)
            .collect();
        States {
            inner: states.into_iter(),
        }
    }

    /// Internal states of every feature registered with `capability`
    pub fn internal_states_with(&self, capability: Capability) -> Vec<AnyState> {
        let inner = self.read();
        if capability == Capability::Generic {
            return inner
                .ordered
                .iter()
                .filter_map(|id| inner.by_id.get(id))
                .filter(|record| record.feature().capability() == Capability::Generic)
                .map(RegisteredFeature::internal_state)
                .collect();
        }
        inner
            .by_capability
            .get(&capability)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .map(RegisteredFeature::internal_state)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn has_updater<F: IoFeature>(&self, feature: &Arc<F>) -> bool {
        self.read()
            .record_of(feature)
            .is_some_and(RegisteredFeature::has_mapping)
    }

    /// Replaces the updater of `feature`, returning whether one was bound before.
    pub(crate) fn replace_updater<F: IoFeature>(
        &self,
        feature: &Arc<F>,
        updater: Option<Updater>,
    ) -> Result<bool, FeatureError> {
        let mut inner = self.write();
        let id = feature.id().clone();
        match inner.by_id.get_mut(&id) {
            Some(record) if record.is_feature(feature) => {
                let was_mapped = record.updater.is_some();
                record.updater = updater;
                Ok(was_mapped)
            }
            _ => Err(FeatureError::NotRegistered(id)),
        }
    }

    /// Snapshot of every record in registration order, for one update pass
    pub(crate) fn update_plan(&self) -> Vec<RegisteredFeature> {
        let inner = self.read();
        inner
            .ordered
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .cloned()
            .collect()
    }
}

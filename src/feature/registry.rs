//! Mapped feature registry
//!
//! Adapter-facing API on top of the [`DeviceFeatureTable`]: an adapter declares
//! once how each feature is refreshed from its raw per-tick snapshot, and the
//! polling driver calls [`MappedFeatureRegistry::update_all`] once per tick.
//!
//! # Mapping lifecycle
//!
//! ```text
//! register ──► Unmapped ──map──► Mapped ──unmap──► Unmapped
//!                                  │  ▲
//!                                  └──┘ map (last writer wins)
//! unregister ends the record from either state
//! ```

use super::record::{RegisteredFeature, Updater};
use super::{
    AnyState, BoxError, Capability, DeviceFeatureTable, DynFeature, FeatureError, FeatureHandle,
    IoFeature, Registration, States,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Result type of adapter updaters
pub type UpdateResult = Result<(), BoxError>;

/// Feature table plus the per-feature updater bindings of one device
#[derive(Default)]
pub struct MappedFeatureRegistry {
    table: DeviceFeatureTable,
}

impl MappedFeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &DeviceFeatureTable {
        &self.table
    }

    pub fn register<F: IoFeature>(&self, feature: &Arc<F>) -> Result<Arc<F::Internal>, FeatureError> {
        self.table.register(feature)
    }

    pub fn unregister<F: IoFeature>(&self, feature: &Arc<F>) -> Result<(), FeatureError> {
        self.table.unregister(feature)
    }

    pub fn is_registered<F: IoFeature>(&self, feature: &Arc<F>) -> bool {
        self.table.is_registered(feature)
    }

    pub fn lookup<F: IoFeature>(&self, feature: &Arc<F>) -> Option<Registration<F>> {
        self.table.lookup(feature)
    }

    pub fn lookup_id(&self, id: &str) -> Option<RegisteredFeature> {
        self.table.lookup_id(id)
    }

    pub fn lookup_as<F: IoFeature>(&self, id: &str) -> Option<Registration<F>> {
        self.table.lookup_as(id)
    }

    pub fn size(&self) -> usize {
        self.table.size()
    }

    pub fn list(&self) -> Vec<FeatureHandle> {
        self.table.list()
    }

    pub fn iterate_states(&self) -> States {
        self.table.iterate_states()
    }

    pub fn internal_states_with(&self, capability: Capability) -> Vec<AnyState> {
        self.table.internal_states_with(capability)
    }

    /// Container state of `feature`
    ///
    /// # Errors
    ///
    /// [`FeatureError::NotRegistered`] if `feature` has no registration.
    pub fn state<F: IoFeature>(&self, feature: &Arc<F>) -> Result<Arc<F::Container>, FeatureError> {
        self.request_state(feature)
            .ok_or_else(|| FeatureError::NotRegistered(feature.id().clone()))
    }

    /// Container state of `feature`, `None` if it is not registered
    pub fn request_state<F: IoFeature>(&self, feature: &Arc<F>) -> Option<Arc<F::Container>> {
        self.table.lookup(feature).map(|registration| registration.container)
    }

    /// Internal state of `feature`, for adapters that keep no reference of their own
    pub fn internal_state<F: IoFeature>(
        &self,
        feature: &Arc<F>,
    ) -> Result<Arc<F::Internal>, FeatureError> {
        self.table
            .lookup(feature)
            .map(|registration| registration.internal)
            .ok_or_else(|| FeatureError::NotRegistered(feature.id().clone()))
    }

    /// Whether an updater other than the no-op is bound to `feature`
    pub fn has_mapping<F: IoFeature>(&self, feature: &Arc<F>) -> bool {
        self.table.has_updater(feature)
    }

    /// Binds `feature` to `updater`, called with `params` on every update pass
    ///
    /// Mapping an already mapped feature replaces the previous binding.
    /// `params` is passed through verbatim; use `Option` for parameters that
    /// may be absent.
    ///
    /// # Errors
    ///
    /// [`FeatureError::NotRegistered`] if `feature` has no registration.
    pub fn map<F, P, U>(&self, feature: &Arc<F>, params: P, updater: U) -> Result<(), FeatureError>
    where
        F: IoFeature,
        P: Send + Sync + 'static,
        U: Fn(&F::Internal, &P) -> UpdateResult + Send + Sync + 'static,
    {
        let binding: Updater = Arc::new(move |state: &(dyn Any + Send + Sync + 'static)| {
            match state.downcast_ref::<F::Internal>() {
                Some(state) => updater(state, &params),
                None => Err(format!(
                    "internal state is not a {}",
                    std::any::type_name::<F::Internal>()
                )
                .into()),
            }
        });

        let replaced = self.table.replace_updater(feature, Some(binding))?;
        debug!(
            "Mapped feature \"{}\"{}",
            feature.id(),
            if replaced { " (replacing previous mapping)" } else { "" }
        );
        Ok(())
    }

    /// Shorthand for [`map`](Self::map) with the feature itself as parameters
    pub fn map_with_feature<F, U>(&self, feature: &Arc<F>, updater: U) -> Result<(), FeatureError>
    where
        F: IoFeature,
        U: Fn(&F::Internal, &Arc<F>) -> UpdateResult + Send + Sync + 'static,
    {
        self.map(feature, feature.clone(), updater)
    }

    /// Shorthand for [`map`](Self::map) with an updater that takes no parameters
    pub fn map_fn<F, U>(&self, feature: &Arc<F>, updater: U) -> Result<(), FeatureError>
    where
        F: IoFeature,
        U: Fn(&F::Internal) -> UpdateResult + Send + Sync + 'static,
    {
        self.map(feature, (), move |state: &F::Internal, _: &()| updater(state))
    }

    /// Resets the updater of `feature` to the no-op and drops its parameters
    ///
    /// Returns `false` if nothing was mapped (including when `feature` is not
    /// registered at all).
    pub fn unmap<F: IoFeature>(&self, feature: &Arc<F>) -> bool {
        match self.table.replace_updater(feature, None) {
            Ok(was_mapped) => {
                if was_mapped {
                    debug!("Unmapped feature \"{}\"", feature.id());
                }
                was_mapped
            }
            Err(_) => false,
        }
    }

    /// Runs one update pass
    ///
    /// Every registration takes part, in registration order: first the
    /// adapter updater (skipped when unmapped), then the feature's own
    /// update hook. The plan is taken under the read lock and executed after
    /// releasing it, so updaters may query the registry.
    ///
    /// # Errors
    ///
    /// The first failing updater aborts the pass with
    /// [`FeatureError::UpdaterFailure`]. Features later in the order keep
    /// their previous values; the caller should drop the frame.
    pub fn update_all(&self) -> Result<(), FeatureError> {
        for record in self.table.update_plan() {
            let internal = record.internal.as_ref();
            if let Some(updater) = &record.updater {
                if let Err(source) = (updater.as_ref())(internal) {
                    error!("Updater of feature \"{}\" failed: {}", record.id(), source);
                    return Err(FeatureError::UpdaterFailure {
                        id: record.id().clone(),
                        source,
                    });
                }
            }
            record.feature.self_update(internal);
        }
        Ok(())
    }
}

impl fmt::Debug for MappedFeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFeatureRegistry")
            .field("features", &self.table.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::table::tests::{MockFeature, MockState};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn registry_with(feature: &Arc<MockFeature>) -> MappedFeatureRegistry {
        let registry = MappedFeatureRegistry::new();
        registry.register(feature).unwrap();
        registry
    }

    #[test]
    fn test_map_passes_params() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        let received = Arc::new(AtomicI64::new(0));

        let sink = received.clone();
        registry
            .map(&feature, 1234_i64, move |_, params: &i64| {
                sink.store(*params, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(registry.has_mapping(&feature));
        registry.update_all().unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1234);
    }

    #[test]
    fn test_map_with_feature_passes_the_feature() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        let matched = Arc::new(AtomicBool::new(false));

        let flag = matched.clone();
        let expected = feature.clone();
        registry
            .map_with_feature(&feature, move |_, params| {
                flag.store(Arc::ptr_eq(params, &expected), Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry.update_all().unwrap();
        assert!(matched.load(Ordering::SeqCst));
    }

    #[test]
    fn test_map_fn_shorthand() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);

        registry
            .map_fn(&feature, |state: &MockState| {
                state.value.store(7, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry.update_all().unwrap();
        assert_eq!(
            registry.internal_state(&feature).unwrap().value.load(Ordering::SeqCst),
            7
        );
    }

    #[test]
    fn test_map_with_absent_params() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        let saw_none = Arc::new(AtomicBool::new(false));

        let flag = saw_none.clone();
        registry
            .map(&feature, None::<i64>, move |_, params: &Option<i64>| {
                flag.store(params.is_none(), Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry.update_all().unwrap();
        assert!(saw_none.load(Ordering::SeqCst));
    }

    #[test]
    fn test_map_requires_registration() {
        let registry = MappedFeatureRegistry::new();
        let feature = MockFeature::new("a");
        assert!(matches!(
            registry.map_fn(&feature, |_: &MockState| Ok(())),
            Err(FeatureError::NotRegistered(_))
        ));
        assert!(!registry.has_mapping(&feature));
    }

    #[test]
    fn test_remap_last_writer_wins() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);

        registry
            .map(&feature, 1_i64, |state: &MockState, p: &i64| {
                state.value.store(*p, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry
            .map(&feature, 2_i64, |state: &MockState, p: &i64| {
                state.value.store(*p, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry.update_all().unwrap();
        assert_eq!(
            registry.lookup(&feature).unwrap().internal.value.load(Ordering::SeqCst),
            2
        );
    }

    #[test]
    fn test_unmap() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        let updated = Arc::new(AtomicBool::new(false));

        assert!(!registry.unmap(&feature));

        let flag = updated.clone();
        registry
            .map_fn(&feature, move |_: &MockState| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(registry.unmap(&feature));
        assert!(!registry.unmap(&feature));
        assert!(!registry.has_mapping(&feature));
        assert!(!registry.lookup(&feature).unwrap().mapped);

        registry.update_all().unwrap();
        assert!(!updated.load(Ordering::SeqCst));

        assert!(!registry.unmap(&MockFeature::new("b")));
    }

    #[test]
    fn test_unmap_drops_params() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        let params = Arc::new(());

        registry
            .map(&feature, params.clone(), |_: &MockState, _: &Arc<()>| Ok(()))
            .unwrap();
        assert_eq!(Arc::strong_count(&params), 2);
        registry.unmap(&feature);
        assert_eq!(Arc::strong_count(&params), 1);
    }

    #[test]
    fn test_value_scenario() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        let internal = registry.internal_state(&feature).unwrap();

        registry
            .map(&feature, 42_i64, |state: &MockState, p: &i64| {
                state.value.store(*p, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry.update_all().unwrap();
        assert_eq!(internal.value.load(Ordering::SeqCst), 42);

        assert!(registry.unmap(&feature));
        registry.update_all().unwrap();
        assert_eq!(internal.value.load(Ordering::SeqCst), 42);
        assert!(Arc::ptr_eq(
            &registry.lookup(&feature).unwrap().internal,
            &internal
        ));
    }

    #[test]
    fn test_unmapped_features_still_self_update() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);

        registry.update_all().unwrap();
        registry.update_all().unwrap();
        assert_eq!(feature.self_updates.load(Ordering::SeqCst), 2);
        assert_eq!(
            registry.internal_state(&feature).unwrap().value.load(Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn test_self_update_runs_after_updater() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        let seen = Arc::new(AtomicI64::new(-1));

        let hook = feature.clone();
        let sink = seen.clone();
        registry
            .map_fn(&feature, move |_: &MockState| {
                sink.store(hook.self_updates.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        registry.update_all().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(feature.self_updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_order_and_fail_fast() {
        let registry = MappedFeatureRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let features: Vec<_> = ["first", "broken", "last"]
            .into_iter()
            .map(MockFeature::new)
            .collect();

        for feature in &features {
            registry.register(feature).unwrap();
            let log = order.clone();
            let id = feature.id().to_string();
            registry
                .map_fn(feature, move |_: &MockState| {
                    log.lock().unwrap().push(id.clone());
                    if id == "broken" {
                        return Err("device unplugged".into());
                    }
                    Ok(())
                })
                .unwrap();
        }

        match registry.update_all() {
            Err(FeatureError::UpdaterFailure { id, source }) => {
                assert_eq!(id.as_str(), "broken");
                assert_eq!(source.to_string(), "device unplugged");
            }
            other => panic!("expected an updater failure, got {:?}", other),
        }
        assert_eq!(*order.lock().unwrap(), ["first", "broken"]);
        assert_eq!(features[2].self_updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_all_is_idempotent() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        registry
            .map(&feature, 5_i64, |state: &MockState, p: &i64| {
                state.value.store(*p * 2, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let internal = registry.internal_state(&feature).unwrap();
        for _ in 0..3 {
            registry.update_all().unwrap();
            assert_eq!(internal.value.load(Ordering::SeqCst), 10);
        }
    }

    #[test]
    fn test_updater_may_query_registry() {
        let feature = MockFeature::new("a");
        let registry = Arc::new(registry_with(&feature));
        let sizes = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&registry);
        let sink = sizes.clone();
        registry
            .map_fn(&feature, move |_: &MockState| {
                if let Some(registry) = weak.upgrade() {
                    sink.store(registry.size(), Ordering::SeqCst);
                }
                Ok(())
            })
            .unwrap();
        registry.update_all().unwrap();
        assert_eq!(sizes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_accessors() {
        let registry = MappedFeatureRegistry::new();
        let feature = MockFeature::new("a");

        assert!(matches!(
            registry.state(&feature),
            Err(FeatureError::NotRegistered(_))
        ));
        assert!(matches!(
            registry.internal_state(&feature),
            Err(FeatureError::NotRegistered(_))
        ));
        assert!(registry.request_state(&feature).is_none());

        registry.register(&feature).unwrap();
        let registration = registry.lookup(&feature).unwrap();
        assert!(Arc::ptr_eq(
            &registry.state(&feature).unwrap(),
            &registration.container
        ));
        assert!(Arc::ptr_eq(
            &registry.internal_state(&feature).unwrap(),
            &registration.internal
        ));
    }

    #[test]
    fn test_unregister_drops_mapping() {
        let feature = MockFeature::new("a");
        let registry = registry_with(&feature);
        registry.map_fn(&feature, |_: &MockState| Ok(())).unwrap();

        registry.unregister(&feature).unwrap();
        assert!(!registry.has_mapping(&feature));
        assert!(matches!(
            registry.unregister(&feature),
            Err(FeatureError::NotRegistered(_))
        ));

        registry.register(&feature).unwrap();
        assert!(!registry.has_mapping(&feature));
    }
}

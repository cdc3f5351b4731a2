//! Feeds cluster watch events into the updater.

use envoy_xds_controller_core::ResourceId;
use envoy_xds_controller_updater::{Equivalent, Error, Updater};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use parking_lot::RwLock;
use std::{marker::PhantomData, sync::Arc};

pub(crate) type SharedIndex<K> = Arc<RwLock<Index<K>>>;

pub(crate) struct Index<K> {
    updater: Arc<Updater>,
    _kind: PhantomData<fn(K)>,
}

// === impl Index ===

impl<K: Equivalent> Index<K> {
    pub(crate) fn shared(updater: Arc<Updater>) -> SharedIndex<K> {
        Arc::new(RwLock::new(Self {
            updater,
            _kind: PhantomData,
        }))
    }

    fn report(&self, op: &'static str, res: Result<(), Error>) {
        match res {
            Ok(()) => {}
            Err(Error::Aggregate(errors)) => {
                tracing::info!(kind = %K::kind(&()), op, errors = errors.len(), "some virtual services were not served");
                for error in errors {
                    tracing::debug!(%error);
                }
            }
            Err(error) => tracing::warn!(kind = %K::kind(&()), op, %error, "update failed"),
        }
    }
}

impl<K: Equivalent> IndexNamespacedResource<K> for Index<K> {
    fn apply(&mut self, obj: K) {
        let res = self.updater.apply(obj).map(|_| ());
        self.report("apply", res);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        let res = self.updater.delete::<K>(&id);
        self.report("delete", res);
    }

    /// Replaces the kind's contents with a single rebuild.
    fn reset(&mut self, objs: Vec<K>, removed: NamespacedRemoved) {
        let store = self.updater.store();
        let mut changed = false;
        for obj in objs {
            let id = store.id_of(&obj);
            if store.get::<K>(&id).is_some_and(|prev| prev.is_equivalent(&obj)) {
                continue;
            }
            store.set(obj);
            changed = true;
        }
        for (namespace, names) in removed {
            for name in names {
                let id = ResourceId::new(namespace.as_str(), name);
                K::forget(store, &id);
                changed |= store.delete::<K>(&id).is_some();
            }
        }

        tracing::debug!(kind = %K::kind(&()), changed, "reset");
        if changed {
            let res = self.updater.rebuild();
            self.report("reset", res);
        }
    }
}

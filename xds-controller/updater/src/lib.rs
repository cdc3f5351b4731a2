//! Turns the contents of the store into per-node snapshots.
//!
//! Every virtual service is built, and the bundles are mixed into one [`Snapshot`] per node.
//! Within a node, a domain may be served by only one virtual service and listeners may not share
//! an address. A snapshot's per-type versions change only when the resources of that type do.
//!
//! Admission uses the same machinery in dry-run form: either the light validator, which checks a
//! single virtual service against the node-domains index, or a full rebuild against a copy of the
//! store and a throw-away snapshot cache.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod equivalent;
pub mod metrics;
mod mixer;
mod rebuild;
mod snapshot;
mod validate;


pub use self::{
    cache::{MemorySnapshotCache, SnapshotCache},
    equivalent::Equivalent,
    snapshot::{ResourceType, Resources, Snapshot},
};

use anyhow::{bail, Result};
use envoy_xds_controller_builder::Builder;
use envoy_xds_controller_core::ResourceId;
use envoy_xds_controller_k8s_api::{VirtualService, VirtualServiceTemplate};
use envoy_xds_controller_k8s_store::{SharedStore, Source, Store};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio_util::sync::CancellationToken;

/// Each secret in use, and the virtual services that use it.
pub type UsedSecrets = BTreeMap<ResourceId, BTreeSet<ResourceId>>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("insufficient coverage: node {0} is not indexed")]
    InsufficientCoverage(String),

    #[error("rebuild cancelled")]
    Cancelled,

    #[error("duplicate domain '{domain}' for node {node}")]
    DuplicateDomain { domain: String, node: String },

    #[error("listeners {first} and {second} use the same address {address} within nodeID '{node}'")]
    ListenerAddressConflict {
        node: String,
        address: String,
        first: ResourceId,
        second: ResourceId,
    },

    /// Some virtual services or nodes could not be served. Everything else was.
    #[error("{}", .0.join("; "))]
    Aggregate(Vec<String>),

    #[error("{0:#}")]
    Invalid(anyhow::Error),
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Maintains the node-domains index that the light validator reads.
    pub index_node_domains: bool,
}

pub struct Updater {
    store: SharedStore,
    cache: Arc<dyn SnapshotCache>,
    builder: Arc<Builder>,
    config: Config,
    shutdown: CancellationToken,
    rebuilding: Mutex<()>,
    used_secrets: RwLock<UsedSecrets>,
    rebuilds: AtomicU64,
    failed_rebuilds: AtomicU64,
}

// === impl Updater ===

impl Updater {
    pub fn new(
        store: SharedStore,
        cache: Arc<dyn SnapshotCache>,
        builder: Arc<Builder>,
        config: Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            cache,
            builder,
            config,
            shutdown,
            rebuilding: Mutex::new(()),
            used_secrets: RwLock::default(),
            rebuilds: AtomicU64::new(0),
            failed_rebuilds: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn SnapshotCache> {
        &self.cache
    }

    /// Loads the store from `source` and serves its contents.
    pub async fn load<S: Source + ?Sized>(&self, source: &S) -> Result<()> {
        self.store.load(source).await?;
        match self.rebuild() {
            Ok(()) | Err(Error::Aggregate(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Rebuilds and installs every node's snapshot.
    pub fn rebuild(&self) -> Result<(), Error> {
        let _guard = self.rebuilding.lock();
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        let res = rebuild::Rebuild {
            store: &self.store,
            cache: &*self.cache,
            builder: &self.builder,
            index_node_domains: self.config.index_node_domains,
            cancel: &self.shutdown,
        }
        .run();

        match res {
            Ok(rebuilt) => {
                *self.used_secrets.write() = rebuilt.used_secrets;
                if rebuilt.errors.is_empty() {
                    return Ok(());
                }
                Err(Error::Aggregate(rebuilt.errors))
            }
            Err(error) => {
                self.failed_rebuilds.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%error, "rebuild failed");
                Err(error)
            }
        }
    }

    // === Updates ===

    /// Stores `obj` and rebuilds, unless it is equivalent to the object it replaces. Returns
    /// whether the store changed.
    pub fn apply<K: Equivalent>(&self, obj: K) -> Result<bool, Error> {
        let id = self.store.id_of(&obj);
        if let Some(prev) = self.store.get::<K>(&id) {
            if prev.is_equivalent(&obj) {
                tracing::debug!(kind = %K::kind(&()), %id, "no changes");
                return Ok(false);
            }
        }
        tracing::debug!(kind = %K::kind(&()), %id, "applying");
        self.store.set(obj);
        self.rebuild()?;
        Ok(true)
    }

    /// Removes an object and rebuilds if it was stored.
    pub fn delete<K: Equivalent>(&self, id: &ResourceId) -> Result<(), Error> {
        K::forget(&self.store, id);
        if self.store.delete::<K>(id).is_none() {
            return Ok(());
        }
        tracing::debug!(kind = %K::kind(&()), %id, "deleted");
        self.rebuild()
    }

    /// Applies a virtual service, failing with its status message if it cannot be built.
    pub fn apply_virtual_service(&self, vs: VirtualService) -> Result<()> {
        let id = self.store.id_of(&vs);
        match self.apply(vs) {
            Ok(_) | Err(Error::Aggregate(_)) => {}
            Err(error) => return Err(error.into()),
        }
        let status = self.store.status().get(&id);
        if status.invalid {
            bail!("{}", status.message);
        }
        Ok(())
    }

    /// Applies a template. Returns whether a stored template changed.
    pub fn apply_virtual_service_template(&self, template: VirtualServiceTemplate) -> Result<bool> {
        let id = self.store.id_of(&template);
        let existed = self.store.exists::<VirtualServiceTemplate>(&id);
        match self.apply(template) {
            Ok(changed) => Ok(existed && changed),
            Err(Error::Aggregate(_)) => Ok(existed),
            Err(error) => Err(error.into()),
        }
    }

    // === Dry runs ===

    /// Checks whether `new` may replace `prev`.
    ///
    /// With the node-domains index enabled, the light validator answers; when the index does not
    /// cover a node the virtual service is served to, a full dry build decides instead.
    pub fn validate_virtual_service(
        &self,
        new: &VirtualService,
        prev: Option<&VirtualService>,
    ) -> Result<()> {
        if self.config.index_node_domains {
            match self.dry_validate(new, prev) {
                Ok(()) => return Ok(()),
                Err(Error::InsufficientCoverage(node)) => {
                    tracing::debug!(%node, "node-domains index is incomplete, falling back to a dry build");
                }
                Err(error) => return Err(error.into()),
            }
        }
        self.dry_build_with_virtual_service(new)
    }

    /// The light validator.
    pub fn dry_validate(
        &self,
        new: &VirtualService,
        prev: Option<&VirtualService>,
    ) -> Result<(), Error> {
        validate::LightValidator {
            store: &self.store,
            cache: &*self.cache,
            builder: &self.builder,
        }
        .validate(new, prev)
    }

    /// Rebuilds every snapshot with `vs` in place, without installing anything.
    pub fn dry_build_with_virtual_service(&self, vs: &VirtualService) -> Result<()> {
        let store = self.store.copy();
        let id = store.id_of(vs);
        store.set(vs.clone());
        self.dry_rebuild(&store)?;

        let status = store.status().get(&id);
        if status.invalid {
            bail!("{}", status.message);
        }
        Ok(())
    }

    /// Rebuilds every snapshot with `template` in place, without installing anything. Fails if a
    /// virtual service using the template cannot be built with it.
    pub fn dry_build_with_template(&self, template: &VirtualServiceTemplate) -> Result<()> {
        let store = self.store.copy();
        let id = store.id_of(template);
        store.set(template.clone());
        self.dry_rebuild(&store)?;

        for vs in store.virtual_services_by_template(&id) {
            let status = store.status().get(&vs);
            if status.invalid {
                bail!("virtual service {vs}: {}", status.message);
            }
        }
        Ok(())
    }

    fn dry_rebuild(&self, store: &Store) -> Result<(), Error> {
        let cache = MemorySnapshotCache::seeded_from(&*self.cache);
        rebuild::Rebuild {
            store,
            cache: &cache,
            builder: &self.builder,
            index_node_domains: false,
            cancel: &self.shutdown,
        }
        .run()
        .map(|_| ())
    }

    // === Inspection ===

    pub fn used_secrets(&self) -> UsedSecrets {
        self.used_secrets.read().clone()
    }

    pub fn copy_store(&self) -> Store {
        self.store.copy()
    }

    /// The store's contents and indices, with the secrets in use.
    pub fn dump_store(&self) -> serde_json::Value {
        let mut dump = self.store.dump();
        let used = self
            .used_secrets()
            .into_iter()
            .map(|(secret, vss)| {
                let vss = vss.iter().map(ToString::to_string).collect::<Vec<_>>();
                (secret.to_string(), vss)
            })
            .collect::<BTreeMap<_, _>>();
        if let Some(obj) = dump.as_object_mut() {
            obj.insert("usedSecrets".to_string(), serde_json::json!(used));
        }
        dump
    }
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("config", &self.config)
            .field("nodes", &self.cache.node_ids())
            .finish_non_exhaustive()
    }
}

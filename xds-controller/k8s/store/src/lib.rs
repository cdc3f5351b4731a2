//! An in-memory, indexed repository of the controller's custom resources.
//!
//! All tables and derived indices live behind a single reader-writer lock. Objects are stored as
//! `Arc`s and are never modified after insertion: an update replaces the object under its key.
//! [`Store::copy`] produces an isolated store that shares only these immutable objects, which is
//! how dry-run builds avoid contaminating the live state.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod kinds;
mod listeners;
mod load;
pub mod metrics;
mod secrets;
mod status;
mod table;

#[cfg(test)]
mod tests;

pub use self::{
    kinds::StoreKind,
    listeners::DuplicateAddress,
    load::Source,
    secrets::{not_after, Fallback, SecretLookup, Validity},
    status::{StatusTable, VsStatus},
    table::Table,
};

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, Utc};
use envoy_xds_controller_core::{ResourceId, StringPool};
use envoy_xds_controller_k8s_api::{
    AccessLogConfig, Cluster, HttpFilter, Listener, Policy, Route, Secret, Tracing, VirtualService,
    VirtualServiceTemplate,
};
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

pub type SharedStore = Arc<Store>;

/// Node ID to the domains served to that node.
pub type NodeDomains = HashMap<String, HashSet<String>>;

#[derive(Debug)]
pub struct Store {
    tables: RwLock<Tables>,
    status: StatusTable,
    pool: Option<Arc<StringPool>>,
}

/// The primary tables and the indices derived from them.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    virtual_services: Table<VirtualService>,
    templates: Table<VirtualServiceTemplate>,
    listeners: Table<Listener>,
    routes: Table<Route>,
    http_filters: Table<HttpFilter>,
    clusters: Table<Cluster>,
    access_log_configs: Table<AccessLogConfig>,
    tracings: Table<Tracing>,
    policies: Table<Policy>,
    secrets: Table<Secret>,

    /// The Envoy cluster name, as written in the cluster's spec, to its resource.
    spec_clusters: HashMap<String, ResourceId>,
    template_vs: HashMap<ResourceId, Vec<ResourceId>>,
    domain_secrets: secrets::DomainSecrets,
    listener_addrs: listeners::ListenerAddrs,
    node_domains: NodeDomains,

    /// Changes whenever a resource that virtual services depend on changes.
    dependency_epoch: u64,
}

/// Epochs are drawn from a process-wide counter so that stores with different contents never
/// share one.
static EPOCHS: AtomicU64 = AtomicU64::new(1);

fn next_epoch() -> u64 {
    EPOCHS.fetch_add(1, Ordering::Relaxed)
}

/// Interned strings tolerated beyond those the store's objects can hold before unreferenced
/// ones are dropped.
const POOL_SLACK: usize = 256;

// === impl Store ===

impl Default for Store {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Store {
    /// Creates an empty store. When a pool is provided, object keys are interned through it.
    pub fn new(pool: Option<Arc<StringPool>>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                dependency_epoch: next_epoch(),
                ..Default::default()
            }),
            status: StatusTable::default(),
            pool,
        }
    }

    pub fn shared(pool: Option<Arc<StringPool>>) -> SharedStore {
        Arc::new(Self::new(pool))
    }

    /// Returns an independent store with the same contents.
    ///
    /// Objects are shared with the origin; tables, indices and statuses are not.
    pub fn copy(&self) -> Self {
        // Writers to the tables are held off until the statuses are copied too.
        let tables = self.tables.read();
        Self {
            status: self.status.copy(),
            tables: RwLock::new(tables.clone()),
            pool: self.pool.clone(),
        }
    }

    pub fn pool(&self) -> Option<&Arc<StringPool>> {
        self.pool.as_ref()
    }

    pub fn status(&self) -> &StatusTable {
        &self.status
    }

    pub fn id_of<K: StoreKind>(&self, obj: &K) -> ResourceId {
        let ns = obj.meta().namespace.as_deref().unwrap_or_default();
        let name = obj.meta().name.as_deref().unwrap_or_default();
        match &self.pool {
            Some(pool) => ResourceId::new(pool.intern_namespace(ns), pool.intern(name)),
            None => ResourceId::new(ns, name),
        }
    }

    pub fn get<K: StoreKind>(&self, id: &ResourceId) -> Option<Arc<K>> {
        K::table(&self.tables.read()).get(id).cloned()
    }

    pub fn get_by_uid<K: StoreKind>(&self, uid: &str) -> Option<Arc<K>> {
        K::table(&self.tables.read()).get_by_uid(uid).cloned()
    }

    pub fn exists<K: StoreKind>(&self, id: &ResourceId) -> bool {
        K::table(&self.tables.read()).contains(id)
    }

    /// Returns a copy of every object of a kind, ordered by key.
    pub fn list<K: StoreKind>(&self) -> BTreeMap<ResourceId, Arc<K>> {
        K::table(&self.tables.read())
            .iter()
            .map(|(id, obj)| (id.clone(), obj.clone()))
            .collect()
    }

    pub fn len<K: StoreKind>(&self) -> usize {
        K::table(&self.tables.read()).len()
    }

    /// Inserts or replaces an object, updating every index that depends on it.
    pub fn set<K: StoreKind>(&self, obj: K) {
        let id = self.id_of(&obj);
        let uid = self.uid_of(&obj);
        let mut tables = self.tables.write();
        tables.upsert(id, uid, Arc::new(obj));
    }

    pub fn delete<K: StoreKind>(&self, id: &ResourceId) -> Option<Arc<K>> {
        let (prev, objects) = {
            let mut tables = self.tables.write();
            let prev = K::table_mut(&mut tables).remove(id)?;
            K::unindex(&mut tables, id, &prev);
            if K::IS_DEPENDENCY {
                tables.dependency_epoch = next_epoch();
            }
            (prev, tables.object_count())
        };

        // Each object interns at most a namespace, a name and a UID.
        if let Some(pool) = &self.pool {
            pool.cleanup(objects * 3 + POOL_SLACK);
        }
        Some(prev)
    }

    /// Replaces the contents of the store under a single write lock.
    pub(crate) fn populate(&self, objects: load::Objects) {
        let load::Objects {
            virtual_services,
            templates,
            listeners,
            routes,
            http_filters,
            clusters,
            access_log_configs,
            tracings,
            policies,
            secrets,
        } = objects;

        let mut tables = Tables {
            dependency_epoch: next_epoch(),
            ..Default::default()
        };
        self.insert_all(&mut tables, virtual_services);
        self.insert_all(&mut tables, templates);
        self.insert_all(&mut tables, listeners);
        self.insert_all(&mut tables, routes);
        self.insert_all(&mut tables, http_filters);
        self.insert_all(&mut tables, clusters);
        self.insert_all(&mut tables, access_log_configs);
        self.insert_all(&mut tables, tracings);
        self.insert_all(&mut tables, policies);
        self.insert_all(&mut tables, secrets);

        let mut current = self.tables.write();
        tables.node_domains = std::mem::take(&mut current.node_domains);
        *current = tables;
    }

    fn insert_all<K: StoreKind>(&self, tables: &mut Tables, objects: Vec<K>) {
        for obj in objects {
            let id = self.id_of(&obj);
            let uid = self.uid_of(&obj);
            tables.upsert(id, uid, Arc::new(obj));
        }
    }

    fn uid_of<K: StoreKind>(&self, obj: &K) -> Option<Arc<str>> {
        let uid = obj.meta().uid.as_deref().filter(|u| !u.is_empty())?;
        Some(match &self.pool {
            Some(pool) => pool.intern_uid(uid),
            None => Arc::from(uid),
        })
    }

    // === Derived indices ===

    /// Finds a cluster by the Envoy name in its spec.
    pub fn get_spec_cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        let tables = self.tables.read();
        let id = tables.spec_clusters.get(name)?;
        tables.clusters.get(id).cloned()
    }

    pub fn virtual_services_by_template(&self, template: &ResourceId) -> Vec<ResourceId> {
        self.tables
            .read()
            .template_vs
            .get(template)
            .cloned()
            .unwrap_or_default()
    }

    /// Selects the secret serving `domain`, falling back to the domain's immediate wildcard.
    pub fn resolve_domain_secret(
        &self,
        domain: &str,
        preferred_ns: &str,
        now: DateTime<Utc>,
    ) -> Option<SecretLookup> {
        self.tables
            .read()
            .domain_secrets
            .resolve(domain, preferred_ns, now)
    }

    /// The next time at which a secret lookup may change its answer as a certificate expires.
    pub fn next_secret_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.tables.read().domain_secrets.next_expiry(now)
    }

    /// Every complete listener address, mapped to the listener that first claimed it.
    pub fn listener_addresses(&self) -> BTreeMap<String, ResourceId> {
        self.tables
            .read()
            .listener_addrs
            .by_addr
            .iter()
            .map(|(a, id)| (a.clone(), id.clone()))
            .collect()
    }

    /// The first pair of listeners found sharing an address, if any.
    pub fn duplicate_listener_address(&self) -> Option<DuplicateAddress> {
        self.tables.read().listener_addrs.duplicate.clone()
    }

    pub fn replace_node_domains(&self, index: NodeDomains) {
        self.tables.write().node_domains = index;
    }

    pub fn node_domains(&self) -> NodeDomains {
        self.tables.read().node_domains.clone()
    }

    /// The domains served to `node`, or `None` if the node has not been indexed.
    pub fn domains_for_node(&self, node: &str) -> Option<HashSet<String>> {
        self.tables.read().node_domains.get(node).cloned()
    }

    pub fn dependency_epoch(&self) -> u64 {
        self.tables.read().dependency_epoch
    }

    /// A virtual service together with its last build status.
    ///
    /// A status recorded for a virtual service that no longer exists is not returned.
    pub fn virtual_service_with_status(
        &self,
        id: &ResourceId,
    ) -> Option<(Arc<VirtualService>, VsStatus)> {
        let vs = self.get::<VirtualService>(id)?;
        Some((vs, self.status.get(id)))
    }

    /// A JSON rendering of the store's keys and indices.
    pub fn dump(&self) -> serde_json::Value {
        fn keys<K: StoreKind>(table: &Table<K>) -> Vec<String> {
            let mut keys = table.iter().map(|(id, _)| id.to_string()).collect::<Vec<_>>();
            keys.sort();
            keys
        }

        let tables = self.tables.read();
        let spec_clusters = tables
            .spec_clusters
            .iter()
            .map(|(name, id)| (name.clone(), id.to_string()))
            .collect::<BTreeMap<_, _>>();
        let template_vs = tables
            .template_vs
            .iter()
            .map(|(t, vss)| (t.to_string(), vss.iter().map(ToString::to_string).collect()))
            .collect::<BTreeMap<_, Vec<String>>>();
        let node_domains = tables
            .node_domains
            .iter()
            .map(|(node, domains)| {
                let mut domains = domains.iter().cloned().collect::<Vec<_>>();
                domains.sort();
                (node.clone(), domains)
            })
            .collect::<BTreeMap<_, _>>();
        let listener_addrs = tables
            .listener_addrs
            .by_addr
            .iter()
            .map(|(addr, id)| (addr.clone(), id.to_string()))
            .collect::<BTreeMap<_, _>>();

        let statuses = self
            .status
            .snapshot_all()
            .into_iter()
            .map(|(id, st)| (id.to_string(), st))
            .collect::<BTreeMap<_, _>>();

        serde_json::json!({
            "virtualServices": keys(&tables.virtual_services),
            "virtualServiceTemplates": keys(&tables.templates),
            "listeners": keys(&tables.listeners),
            "routes": keys(&tables.routes),
            "httpFilters": keys(&tables.http_filters),
            "clusters": keys(&tables.clusters),
            "accessLogConfigs": keys(&tables.access_log_configs),
            "tracings": keys(&tables.tracings),
            "policies": keys(&tables.policies),
            "secrets": keys(&tables.secrets),
            "specClusters": spec_clusters,
            "templateVirtualServices": template_vs,
            "domainSecrets": tables.domain_secrets.dump(),
            "listenerAddresses": listener_addrs,
            "nodeDomains": node_domains,
            "statuses": statuses,
        })
    }
}

// === impl Tables ===

impl Tables {
    fn upsert<K: StoreKind>(&mut self, id: ResourceId, uid: Option<Arc<str>>, obj: Arc<K>) {
        if let Some(prev) = K::table_mut(self).insert(id.clone(), uid, obj.clone()) {
            K::unindex(self, &id, &prev);
        }
        K::index(self, &id, &obj);
        if K::IS_DEPENDENCY {
            self.dependency_epoch = next_epoch();
        }
    }

    fn object_count(&self) -> usize {
        self.virtual_services.len()
            + self.templates.len()
            + self.listeners.len()
            + self.routes.len()
            + self.http_filters.len()
            + self.clusters.len()
            + self.access_log_configs.len()
            + self.tracings.len()
            + self.policies.len()
            + self.secrets.len()
    }
}

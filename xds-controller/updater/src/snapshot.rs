use anyhow::{bail, Result};
use envoy_xds_controller_core::envoy::{self, well_known, ClusterRef};
use serde::Serialize;
use std::collections::BTreeMap;

/// The resource types served to a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Listener,
    Cluster,
    Route,
    Secret,
}

/// The resources of one type, keyed by name, and the version the node last received them under.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resources<T> {
    pub version: String,
    pub items: BTreeMap<String, T>,
}

/// The complete configuration served to one node.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub listeners: Resources<envoy::Listener>,
    pub clusters: Resources<envoy::Cluster>,
    pub routes: Resources<envoy::RouteConfiguration>,
    pub secrets: Resources<envoy::Secret>,
}

/// Unversioned resources accumulated for a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct NodeResources {
    pub(crate) listeners: BTreeMap<String, envoy::Listener>,
    pub(crate) clusters: BTreeMap<String, envoy::Cluster>,
    pub(crate) routes: BTreeMap<String, envoy::RouteConfiguration>,
    pub(crate) secrets: BTreeMap<String, envoy::Secret>,
}

// === impl ResourceType ===

impl ResourceType {
    pub const ALL: [Self; 4] = [Self::Listener, Self::Cluster, Self::Route, Self::Secret];

    pub fn type_url(&self) -> &'static str {
        match self {
            Self::Listener => well_known::LISTENER_TYPE,
            Self::Cluster => well_known::CLUSTER_TYPE,
            Self::Route => well_known::ROUTE_TYPE,
            Self::Secret => well_known::SECRET_TYPE,
        }
    }
}

// === impl Resources ===

impl<T> Default for Resources<T> {
    fn default() -> Self {
        Self {
            version: String::new(),
            items: BTreeMap::new(),
        }
    }
}

impl<T: PartialEq> Resources<T> {
    /// Versions `items` against the previously served resources: the version is kept when the
    /// content is unchanged and incremented otherwise.
    fn next(prev: Option<&Self>, items: BTreeMap<String, T>) -> Self {
        let version = match prev {
            Some(prev) if prev.items == items && !prev.version.is_empty() => prev.version.clone(),
            Some(prev) => bump(&prev.version),
            None => bump(""),
        };
        Self { version, items }
    }
}

fn bump(version: &str) -> String {
    let n = version.parse::<u64>().unwrap_or(0);
    (n + 1).to_string()
}

// === impl Snapshot ===

impl Snapshot {
    pub(crate) fn next(prev: Option<&Self>, resources: NodeResources) -> Self {
        let NodeResources {
            listeners,
            clusters,
            routes,
            secrets,
        } = resources;
        Self {
            listeners: Resources::next(prev.map(|p| &p.listeners), listeners),
            clusters: Resources::next(prev.map(|p| &p.clusters), clusters),
            routes: Resources::next(prev.map(|p| &p.routes), routes),
            secrets: Resources::next(prev.map(|p| &p.secrets), secrets),
        }
    }

    pub fn version(&self, ty: ResourceType) -> &str {
        match ty {
            ResourceType::Listener => &self.listeners.version,
            ResourceType::Cluster => &self.clusters.version,
            ResourceType::Route => &self.routes.version,
            ResourceType::Secret => &self.secrets.version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.items.is_empty()
            && self.clusters.items.is_empty()
            && self.routes.items.is_empty()
            && self.secrets.items.is_empty()
    }

    /// Every domain served by the snapshot's route configurations.
    pub fn route_domains(&self) -> Vec<String> {
        let mut domains = self
            .routes
            .items
            .values()
            .flat_map(|rc| rc.virtual_hosts.iter())
            .flat_map(|vh| vh.domains.iter().cloned())
            .collect::<Vec<_>>();
        domains.sort();
        domains.dedup();
        domains
    }

    /// Checks that every route configuration, cluster and secret the snapshot's listeners and
    /// routes refer to is part of the snapshot.
    pub fn consistent(&self) -> Result<()> {
        for listener in self.listeners.items.values() {
            for chain in &listener.filter_chains {
                for filter in &chain.filters {
                    let Some(tc) = filter.typed_config.as_ref() else {
                        continue;
                    };
                    if !tc.is(well_known::HTTP_CONNECTION_MANAGER_TYPE) {
                        continue;
                    }
                    let hcm = tc.unpack::<envoy::HttpConnectionManager>(
                        well_known::HTTP_CONNECTION_MANAGER_TYPE,
                    )?;
                    if let Some(rds) = &hcm.rds {
                        if !self.routes.items.contains_key(&rds.route_config_name) {
                            bail!(
                                "listener {} refers to missing route configuration {}",
                                listener.name,
                                rds.route_config_name
                            );
                        }
                    }
                }

                let Some(socket) = chain.transport_socket.as_ref() else {
                    continue;
                };
                let Some(tc) = socket.typed_config.as_ref() else {
                    continue;
                };
                if tc.is(well_known::DOWNSTREAM_TLS_CONTEXT_TYPE) {
                    let ctx = tc.unpack::<envoy::DownstreamTlsContext>(
                        well_known::DOWNSTREAM_TLS_CONTEXT_TYPE,
                    )?;
                    for name in ctx.secret_names() {
                        if !self.secrets.items.contains_key(name) {
                            bail!("listener {} refers to missing secret {name}", listener.name);
                        }
                    }
                }
            }
        }

        for rc in self.routes.items.values() {
            for route in rc.virtual_hosts.iter().flat_map(|vh| vh.routes.iter()) {
                for cluster in route.clusters() {
                    let name = match cluster {
                        ClusterRef::Direct(n) | ClusterRef::Weighted(n) => n,
                    };
                    if !self.clusters.items.contains_key(name) {
                        bail!(
                            "route configuration {} refers to missing cluster {name}",
                            rc.name
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn mk_cluster(name: &str, timeout: &str) -> envoy::Cluster {
        envoy::from_value(&serde_json::json!({ "name": name, "connect_timeout": timeout }))
            .unwrap()
    }

    #[test]
    fn versions_bump_only_on_change() {
        let first = Snapshot::next(
            None,
            NodeResources {
                clusters: btreemap! { "c1".to_string() => mk_cluster("c1", "1s") },
                ..Default::default()
            },
        );
        assert_eq!(first.version(ResourceType::Cluster), "1");
        assert_eq!(first.version(ResourceType::Listener), "1");

        let same = Snapshot::next(
            Some(&first),
            NodeResources {
                clusters: btreemap! { "c1".to_string() => mk_cluster("c1", "1s") },
                ..Default::default()
            },
        );
        assert_eq!(same, first);

        let changed = Snapshot::next(
            Some(&same),
            NodeResources {
                clusters: btreemap! { "c1".to_string() => mk_cluster("c1", "2s") },
                ..Default::default()
            },
        );
        assert_eq!(changed.version(ResourceType::Cluster), "2");
        assert_eq!(changed.version(ResourceType::Listener), "1");
        assert_eq!(changed.version(ResourceType::Route), "1");
    }

    #[test]
    fn unparsable_versions_restart() {
        assert_eq!(bump(""), "1");
        assert_eq!(bump("41"), "42");
        assert_eq!(bump("abc"), "1");
    }

    #[test]
    fn missing_clusters_are_inconsistent() {
        let rc = envoy::from_value::<envoy::RouteConfiguration>(&serde_json::json!({
            "name": "ns/vs",
            "virtual_hosts": [{
                "name": "ns/vs",
                "domains": ["a.com"],
                "routes": [{ "match": { "prefix": "/" }, "route": { "cluster": "c1" } }],
            }],
        }))
        .unwrap();
        let mut snapshot = Snapshot::next(
            None,
            NodeResources {
                routes: btreemap! { "ns/vs".to_string() => rc },
                ..Default::default()
            },
        );
        assert_eq!(
            snapshot.consistent().unwrap_err().to_string(),
            "route configuration ns/vs refers to missing cluster c1"
        );
        assert_eq!(snapshot.route_domains(), vec!["a.com"]);

        snapshot
            .clusters
            .items
            .insert("c1".to_string(), mk_cluster("c1", "1s"));
        assert!(snapshot.consistent().is_ok());
    }
}

//! Discovery of the upstream clusters a virtual service sends traffic to.
//!
//! Routes and TCP proxies name their clusters in modelled fields. Other extensions are decoded
//! only as JSON and searched for fields that conventionally hold a cluster name.

use anyhow::{bail, Context, Result};
use envoy_xds_controller_core::{
    envoy::{self, Validate},
    scan,
};
use envoy_xds_controller_k8s_store::Store;
use serde_json::Value;
use std::collections::BTreeMap;

pub(crate) const HTTP_FILTER_FIELDS: &[&str] = &[
    "cluster",
    "cluster_name",
    "clusterName",
    "token_cluster",
    "tokenCluster",
    "authorization_cluster",
    "authorizationCluster",
];

pub(crate) const ACCESS_LOG_FIELDS: &[&str] = &["cluster_name", "clusterName", "cluster"];

pub(crate) const TRACING_FIELDS: &[&str] = &[
    "cluster_name",
    "clusterName",
    "collector_cluster",
    "collectorCluster",
];

pub(crate) const GENERIC_FIELDS: &[&str] = &[
    "cluster",
    "cluster_name",
    "clusterName",
    "collector_cluster",
    "collectorCluster",
];

/// Cluster names, each marked required or optional. A name found both ways is required.
#[derive(Clone, Debug, Default)]
pub(crate) struct Names(BTreeMap<String, bool>);

impl Names {
    pub(crate) fn require(&mut self, name: &str) {
        self.0.insert(name.to_string(), true);
    }

    pub(crate) fn optional(&mut self, name: &str) {
        self.0.entry(name.to_string()).or_insert(false);
    }

    /// Looks up every cluster by its Envoy name, in name order.
    ///
    /// A missing required cluster is an error; a missing optional one is skipped.
    pub(crate) fn resolve(self, store: &Store) -> Result<Vec<envoy::Cluster>> {
        let mut clusters = Vec::with_capacity(self.0.len());
        for (name, required) in self.0 {
            let Some(obj) = store.get_spec_cluster(&name) else {
                if required {
                    bail!("cluster {name} not found");
                }
                tracing::warn!(cluster = %name, "skipping unknown cluster found in filter configuration");
                continue;
            };
            let cluster = obj
                .parse()
                .and_then(|c| c.validate().map(|()| c))
                .with_context(|| format!("failed to unmarshal cluster {name}"))?;
            clusters.push(cluster);
        }
        Ok(clusters)
    }
}

/// Requires every cluster a virtual host's routes forward to.
pub(crate) fn from_virtual_host(vhost: &envoy::VirtualHost, names: &mut Names) {
    for route in &vhost.routes {
        for cluster in route.clusters() {
            let (envoy::ClusterRef::Direct(name) | envoy::ClusterRef::Weighted(name)) = cluster;
            names.require(name);
        }
    }
}

pub(crate) fn scan_json(value: &Value, fields: &[&str]) -> Vec<String> {
    let mut found = Vec::new();
    scan::find_string_fields(value, fields, &mut found);
    found.sort_unstable();
    found.dedup();
    found
}

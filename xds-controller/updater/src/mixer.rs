use crate::{snapshot::NodeResources, Error};
use ahash::AHashMap as HashMap;
use anyhow::Context;
use envoy_xds_controller_builder::Bundle;
use envoy_xds_controller_core::{envoy, ResourceId};
use envoy_xds_controller_k8s_api::Listener;
use envoy_xds_controller_k8s_store::{NodeDomains, Store};
use std::collections::BTreeMap;

/// Accumulates virtual-service bundles into per-node resources.
#[derive(Debug, Default)]
pub(crate) struct Mixer {
    nodes: BTreeMap<String, NodeMix>,
}

#[derive(Debug, Default)]
struct NodeMix {
    resources: NodeResources,
    chains: BTreeMap<ResourceId, Vec<envoy::FilterChain>>,
    /// Each domain served to the node, and the virtual service that claimed it.
    domains: HashMap<String, ResourceId>,
}

// === impl Mixer ===

impl Mixer {
    /// Adds a virtual service's bundle to `node`.
    ///
    /// Nothing is added if one of the bundle's domains is already served to the node.
    pub(crate) fn add(&mut self, node: &str, vs: &ResourceId, bundle: &Bundle) -> Result<(), Error> {
        let mix = self.nodes.entry(node.to_string()).or_default();
        if let Some(domain) = bundle
            .domains
            .iter()
            .find(|d| mix.domains.get(*d).is_some_and(|owner| owner != vs))
        {
            tracing::debug!(%node, %domain, %vs, owner = %mix.domains[domain], "domain already claimed");
            return Err(Error::DuplicateDomain {
                domain: domain.clone(),
                node: node.to_string(),
            });
        }

        for domain in &bundle.domains {
            mix.domains.insert(domain.clone(), vs.clone());
        }
        if let Some(rc) = &bundle.route_config {
            mix.resources.routes.insert(rc.name.clone(), rc.clone());
        }
        for cluster in &bundle.clusters {
            mix.resources
                .clusters
                .insert(cluster.name.clone(), cluster.clone());
        }
        for secret in &bundle.secrets {
            mix.resources
                .secrets
                .insert(secret.name.clone(), secret.clone());
        }
        mix.chains
            .entry(bundle.listener.clone())
            .or_default()
            .extend(bundle.filter_chains.iter().cloned());
        Ok(())
    }

    /// Makes `node` known even if nothing is served to it.
    pub(crate) fn register(&mut self, node: &str) {
        self.nodes.entry(node.to_string()).or_default();
    }

    pub(crate) fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// The domains served to each node.
    pub(crate) fn node_domains(&self) -> NodeDomains {
        self.nodes
            .iter()
            .map(|(node, mix)| (node.clone(), mix.domains.keys().cloned().collect()))
            .collect()
    }

    /// Completes each node's resources with its listeners. Every listener a node uses is read
    /// from the store and served with the filter chains accumulated for it on that node.
    pub(crate) fn finish(self, store: &Store) -> Result<BTreeMap<String, NodeResources>, Error> {
        let mut out = BTreeMap::new();
        for (node, mix) in self.nodes {
            let NodeMix {
                mut resources,
                chains,
                ..
            } = mix;

            let mut addresses = BTreeMap::<String, ResourceId>::new();
            for (id, mut chains) in chains {
                let listener = store
                    .get::<Listener>(&id)
                    .with_context(|| format!("listener {id} not found"))
                    .and_then(|l| {
                        l.parse()
                            .with_context(|| format!("failed to unmarshal listener {id}"))
                    });
                let mut listener = match listener {
                    Ok(listener) => listener,
                    Err(error) => return Err(Error::Invalid(error)),
                };

                if let Some(address) = listener.address_key() {
                    if let Some(first) = addresses.get(&address) {
                        return Err(Error::ListenerAddressConflict {
                            node,
                            address,
                            first: first.clone(),
                            second: id,
                        });
                    }
                    addresses.insert(address, id.clone());
                }

                chains.sort_by(|a, b| a.name.cmp(&b.name));
                listener.filter_chains = chains;
                listener.name = id.to_string();
                resources.listeners.insert(listener.name.clone(), listener);
            }
            out.insert(node, resources);
        }
        Ok(out)
    }
}

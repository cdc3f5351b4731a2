use crate::{Error, SnapshotCache};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use envoy_xds_controller_builder::{apply_template, Builder};
use envoy_xds_controller_core::{is_common, ResourceId};
use envoy_xds_controller_k8s_api::{Listener, VirtualService};
use envoy_xds_controller_k8s_store::Store;

pub(crate) struct LightValidator<'a> {
    pub(crate) store: &'a Store,
    pub(crate) cache: &'a dyn SnapshotCache,
    pub(crate) builder: &'a Builder,
}

// === impl LightValidator ===

impl LightValidator<'_> {
    /// Checks that `new` may replace `prev` without a domain or listener address conflict on
    /// any node it is served to, using the node-domains index instead of a full rebuild.
    pub(crate) fn validate(
        &self,
        new: &VirtualService,
        prev: Option<&VirtualService>,
    ) -> Result<(), Error> {
        let copy = self.store.copy();
        let id = copy.id_of(new);
        let bundle = self.builder.build(new, &copy).map_err(Error::Invalid)?;

        let nodes = self.target_nodes(new)?;
        let index = self.store.node_domains();
        if let Some(node) = nodes.iter().find(|n| !index.contains_key(*n)) {
            return Err(Error::InsufficientCoverage(node.clone()));
        }

        let mut seen = HashSet::new();
        for domain in &bundle.domains {
            if !seen.insert(domain.as_str()) {
                return Err(Error::Invalid(anyhow::anyhow!(
                    "duplicate domain found: {domain}"
                )));
            }
        }

        // The previous version's domains are its own to keep on the nodes it was served to.
        let (prev_nodes, prev_domains) = match prev {
            Some(prev) => {
                let domains = self
                    .builder
                    .build(prev, &copy)
                    .map(|b| b.domains.clone())
                    .unwrap_or_default();
                (self.target_nodes(prev).unwrap_or_default(), domains)
            }
            None => (vec![], vec![]),
        };
        for node in &nodes {
            let Some(forbidden) = index.get(node) else {
                continue;
            };
            let own = prev_nodes.contains(node);
            if let Some(domain) = bundle
                .domains
                .iter()
                .find(|d| forbidden.contains(*d) && !(own && prev_domains.contains(*d)))
            {
                return Err(Error::DuplicateDomain {
                    domain: domain.clone(),
                    node: node.clone(),
                });
            }
        }

        self.check_listener_addresses(&id, &bundle.listener, &nodes, &copy)
    }

    fn target_nodes(&self, vs: &VirtualService) -> Result<Vec<String>, Error> {
        let ids = vs.node_ids();
        if ids.is_empty() {
            return Err(Error::Invalid(anyhow::anyhow!("node ids are empty")));
        }
        if is_common(&ids) {
            return Ok(self.cache.node_ids());
        }
        Ok(ids)
    }

    /// Fails if another valid virtual service serves a different listener with the same address
    /// as `listener` to one of `nodes`.
    fn check_listener_addresses(
        &self,
        id: &ResourceId,
        listener: &ResourceId,
        nodes: &[String],
        store: &Store,
    ) -> Result<(), Error> {
        let mut addresses = HashMap::<ResourceId, Option<String>>::new();
        let mut address_of = |lid: &ResourceId| -> Option<String> {
            addresses
                .entry(lid.clone())
                .or_insert_with(|| {
                    store
                        .get::<Listener>(lid)
                        .and_then(|l| l.parse().ok())
                        .and_then(|l| l.address_key())
                })
                .clone()
        };

        let Some(address) = address_of(listener) else {
            return Ok(());
        };
        let known = self.cache.node_ids();

        for (other, vs) in store.list::<VirtualService>() {
            if other == *id || store.status().get(&other).invalid {
                continue;
            }
            let Some(lref) = apply_template(&vs, store).ok().and_then(|s| s.listener) else {
                continue;
            };
            let lid = lref.id(&other.namespace);
            if lid == *listener || address_of(&lid).as_deref() != Some(address.as_str()) {
                continue;
            }

            let ids = vs.node_ids();
            let served = if is_common(&ids) { &known } else { &ids };
            if let Some(node) = nodes.iter().find(|n| served.contains(*n)) {
                return Err(Error::ListenerAddressConflict {
                    node: node.clone(),
                    address,
                    first: lid,
                    second: listener.clone(),
                });
            }
        }
        Ok(())
    }
}

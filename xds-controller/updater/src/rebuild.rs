use crate::{mixer::Mixer, Error, Snapshot, SnapshotCache, UsedSecrets};
use envoy_xds_controller_builder::{error_message, Builder, Bundle};
use envoy_xds_controller_core::{is_common, ResourceId};
use envoy_xds_controller_k8s_api::VirtualService;
use envoy_xds_controller_k8s_store::{Store, VsStatus};
use std::{collections::BTreeSet, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;

/// The outcome of a rebuild that installed snapshots.
#[derive(Debug, Default)]
pub(crate) struct Rebuilt {
    pub(crate) used_secrets: UsedSecrets,
    /// Virtual services and nodes that could not be served, rendered for display.
    pub(crate) errors: Vec<String>,
}

pub(crate) struct Rebuild<'a> {
    pub(crate) store: &'a Store,
    pub(crate) cache: &'a dyn SnapshotCache,
    pub(crate) builder: &'a Builder,
    pub(crate) index_node_domains: bool,
    pub(crate) cancel: &'a CancellationToken,
}

// === impl Rebuild ===

impl Rebuild<'_> {
    /// Builds every virtual service, mixes the results into one snapshot per node and installs
    /// them.
    ///
    /// Snapshots are installed only once every node's snapshot has been computed, so a rebuild
    /// that fails on a conflict or is cancelled leaves the cache untouched.
    pub(crate) fn run(&self) -> Result<Rebuilt, Error> {
        let started = Instant::now();
        let known = self.cache.node_ids();
        let mut mixer = Mixer::default();
        let mut out = Rebuilt::default();

        let (common, targeted) = self
            .store
            .list::<VirtualService>()
            .into_iter()
            .map(|(id, vs)| {
                let nodes = vs.node_ids();
                (id, vs, nodes)
            })
            .partition::<Vec<_>, _>(|(_, _, nodes)| is_common(nodes));

        for (id, vs, nodes) in &targeted {
            self.check_cancelled()?;
            let Some(bundle) = self.build(id, vs, nodes, &mut out) else {
                continue;
            };
            for node in nodes {
                mixer.add(node, id, &bundle)?;
            }
            record_secrets(&mut out.used_secrets, id, &bundle);
        }

        // Common virtual services are served to every node that is already being served and to
        // every node the cache knows about.
        for node in &known {
            mixer.register(node);
        }
        let all_nodes = mixer.node_ids().map(str::to_string).collect::<Vec<_>>();
        for (id, vs, nodes) in &common {
            self.check_cancelled()?;
            let Some(bundle) = self.build(id, vs, nodes, &mut out) else {
                continue;
            };
            for node in &all_nodes {
                mixer.add(node, id, &bundle)?;
            }
            record_secrets(&mut out.used_secrets, id, &bundle);
        }

        let node_domains = mixer.node_domains();
        let resources = mixer.finish(self.store)?;

        let mut staged = Vec::with_capacity(resources.len());
        for (node, resources) in resources {
            self.check_cancelled()?;
            let prev = self.cache.snapshot(&node);
            let snapshot = Snapshot::next(prev.as_deref(), resources);
            if let Err(error) = snapshot.consistent() {
                tracing::warn!(%node, %error, "inconsistent snapshot");
                out.errors
                    .push(format!("snapshot for node {node} is inconsistent: {error}"));
                continue;
            }
            staged.push((node, snapshot));
        }

        let installed = staged.len();
        for (node, snapshot) in staged {
            self.cache.set_snapshot(&node, snapshot);
        }
        if self.index_node_domains {
            self.store.replace_node_domains(node_domains);
        }

        tracing::info!(
            virtual_services = targeted.len() + common.len(),
            nodes = installed,
            errors = out.errors.len(),
            elapsed = ?started.elapsed(),
            "rebuilt snapshots"
        );
        Ok(out)
    }

    /// Builds a virtual service and records its status. Returns `None` if it cannot be served.
    fn build(
        &self,
        id: &ResourceId,
        vs: &VirtualService,
        nodes: &[String],
        out: &mut Rebuilt,
    ) -> Option<Arc<Bundle>> {
        let built = if nodes.is_empty() {
            Err(anyhow::anyhow!("node ids are empty"))
        } else {
            self.builder.build(vs, self.store)
        };
        match built {
            Ok(bundle) => {
                self.store.status().set(id.clone(), VsStatus::valid());
                Some(bundle)
            }
            Err(error) => {
                let message = error_message(&error);
                tracing::debug!(vs = %id, error = %message, "virtual service is invalid");
                out.errors.push(format!("{id}: {message}"));
                self.store.status().set(id.clone(), VsStatus::invalid(message));
                None
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

fn record_secrets(used: &mut UsedSecrets, vs: &ResourceId, bundle: &Bundle) {
    for secret in &bundle.used_secrets {
        used.entry(secret.clone())
            .or_insert_with(BTreeSet::new)
            .insert(vs.clone());
    }
}

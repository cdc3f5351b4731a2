use crate::Snapshot;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// Holds the snapshot most recently installed for each node.
pub trait SnapshotCache: Send + Sync {
    fn node_ids(&self) -> Vec<String>;

    fn snapshot(&self, node: &str) -> Option<Arc<Snapshot>>;

    fn set_snapshot(&self, node: &str, snapshot: Snapshot);

    /// The domains served to `node`, or `None` for an unknown node.
    fn route_domains(&self, node: &str) -> Option<Vec<String>> {
        self.snapshot(node).map(|s| s.route_domains())
    }
}

/// Publishes each node's snapshot on a watch so that a configuration server can follow it.
#[derive(Debug, Default)]
pub struct MemorySnapshotCache {
    nodes: RwLock<HashMap<String, watch::Sender<Arc<Snapshot>>>>,
}

// === impl MemorySnapshotCache ===

impl MemorySnapshotCache {
    /// A cache holding the same snapshots as `other`.
    pub fn seeded_from(other: &dyn SnapshotCache) -> Self {
        let nodes = other
            .node_ids()
            .into_iter()
            .filter_map(|node| {
                let snapshot = other.snapshot(&node)?;
                Some((node, watch::channel(snapshot).0))
            })
            .collect();
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Follows the snapshots installed for `node`. A node that has not been served yet is
    /// registered with an empty snapshot, so that the next rebuild includes it.
    pub fn subscribe(&self, node: &str) -> watch::Receiver<Arc<Snapshot>> {
        if let Some(tx) = self.nodes.read().get(node) {
            return tx.subscribe();
        }
        self.nodes
            .write()
            .entry(node.to_string())
            .or_insert_with(|| {
                tracing::debug!(%node, "registered node");
                watch::channel(Arc::new(Snapshot::default())).0
            })
            .subscribe()
    }

    /// Forgets a node. Subscribers observe the channel closing.
    pub fn remove(&self, node: &str) -> bool {
        self.nodes.write().remove(node).is_some()
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn node_ids(&self) -> Vec<String> {
        let mut ids = self.nodes.read().keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn snapshot(&self, node: &str) -> Option<Arc<Snapshot>> {
        self.nodes.read().get(node).map(|tx| tx.borrow().clone())
    }

    fn set_snapshot(&self, node: &str, snapshot: Snapshot) {
        let mut nodes = self.nodes.write();
        match nodes.get(node) {
            Some(tx) => {
                let modified = tx.send_if_modified(|current| {
                    if **current == snapshot {
                        return false;
                    }
                    *current = Arc::new(snapshot);
                    true
                });
                tracing::trace!(%node, modified, "installed snapshot");
            }
            None => {
                nodes.insert(node.to_string(), watch::channel(Arc::new(snapshot)).0);
                tracing::trace!(%node, "installed first snapshot");
            }
        }
    }
}

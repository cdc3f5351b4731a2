use ahash::AHashMap as HashMap;
use envoy_xds_controller_core::ResourceId;
use parking_lot::RwLock;
use serde::Serialize;

/// The outcome of the last build of a virtual service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VsStatus {
    pub invalid: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Build statuses, keyed by virtual service.
///
/// Entries outlive the virtual services they describe until explicitly deleted; readers join
/// against the store so that orphaned entries are never observed.
#[derive(Debug, Default)]
pub struct StatusTable {
    entries: RwLock<HashMap<ResourceId, VsStatus>>,
}

// === impl VsStatus ===

impl VsStatus {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn invalid(message: impl ToString) -> Self {
        Self {
            invalid: true,
            message: message.to_string(),
        }
    }
}

// === impl StatusTable ===

impl StatusTable {
    pub fn set(&self, id: ResourceId, status: VsStatus) {
        self.entries.write().insert(id, status);
    }

    /// Records several statuses under a single write lock.
    pub fn set_many(&self, statuses: impl IntoIterator<Item = (ResourceId, VsStatus)>) {
        self.entries.write().extend(statuses);
    }

    /// The recorded status, or the default (valid, no message) when none is recorded.
    pub fn get(&self, id: &ResourceId) -> VsStatus {
        self.entries.read().get(id).cloned().unwrap_or_default()
    }

    pub fn delete(&self, id: &ResourceId) -> Option<VsStatus> {
        self.entries.write().remove(id)
    }

    /// All recorded statuses, ordered by key.
    pub fn snapshot_all(&self) -> Vec<(ResourceId, VsStatus)> {
        let mut all = self
            .entries
            .read()
            .iter()
            .map(|(id, st)| (id.clone(), st.clone()))
            .collect::<Vec<_>>();
        all.sort_by(|(a, _), (b, _)| a.cmp(b));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn copy(&self) -> Self {
        Self {
            entries: RwLock::new(self.entries.read().clone()),
        }
    }
}

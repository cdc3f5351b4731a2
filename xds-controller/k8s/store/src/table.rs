use ahash::AHashMap as HashMap;
use envoy_xds_controller_core::ResourceId;
use std::sync::Arc;

/// Objects of one kind, by key and by UID.
#[derive(Debug)]
pub struct Table<T> {
    items: HashMap<ResourceId, Arc<T>>,
    by_uid: HashMap<Arc<str>, ResourceId>,
    uids: HashMap<ResourceId, Arc<str>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            items: HashMap::default(),
            by_uid: HashMap::default(),
            uids: HashMap::default(),
        }
    }
}

// Cloning copies the maps; the objects themselves are shared.
impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            by_uid: self.by_uid.clone(),
            uids: self.uids.clone(),
        }
    }
}

impl<T> Table<T> {
    pub fn get(&self, id: &ResourceId) -> Option<&Arc<T>> {
        self.items.get(id)
    }

    pub fn get_by_uid(&self, uid: &str) -> Option<&Arc<T>> {
        self.items.get(self.by_uid.get(uid)?)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &Arc<T>)> {
        self.items.iter()
    }

    pub(crate) fn uid_count(&self) -> usize {
        self.by_uid.len()
    }

    /// Inserts an object, returning the one it replaced.
    pub(crate) fn insert(
        &mut self,
        id: ResourceId,
        uid: Option<Arc<str>>,
        obj: Arc<T>,
    ) -> Option<Arc<T>> {
        // A replacement may carry a new UID (the object was deleted and recreated).
        if let Some(prev) = self.uids.remove(&id) {
            self.by_uid.remove(&prev);
        }
        if let Some(uid) = uid {
            self.by_uid.insert(uid.clone(), id.clone());
            self.uids.insert(id.clone(), uid);
        }
        self.items.insert(id, obj)
    }

    pub(crate) fn remove(&mut self, id: &ResourceId) -> Option<Arc<T>> {
        let prev = self.items.remove(id)?;
        if let Some(uid) = self.uids.remove(id) {
            self.by_uid.remove(&uid);
        }
        Some(prev)
    }
}

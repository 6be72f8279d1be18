use crate::pipeline::ProcessedArtifact;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Default number of artifacts kept for download
pub const DEFAULT_CAPACITY: usize = 64;

/// In-memory, bounded store of downloadable artifacts
///
/// Oldest entries are evicted first once `capacity` is reached. Nothing
/// survives a restart.
pub struct ArtifactStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    order: VecDeque<Uuid>,
    items: HashMap<Uuid, Arc<ProcessedArtifact>>,
}

impl StoreInner {
    fn evict_to(&mut self, capacity: usize) {
        while self.items.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.items.remove(&oldest) {
                tracing::debug!(id = %oldest, file = %evicted.file_name, "Evicted artifact");
            }
        }
    }
}

impl ArtifactStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Store an artifact under a fresh id
    pub fn insert(&self, artifact: ProcessedArtifact) -> Uuid {
        let id = Uuid::new_v4();
        self.replace(id, artifact);
        id
    }

    /// Store under a known id, overwriting any previous content
    ///
    /// An overwritten entry keeps its place in the eviction order.
    pub fn replace(&self, id: Uuid, artifact: ProcessedArtifact) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.items.insert(id, Arc::new(artifact)).is_none() {
            inner.order.push_back(id);
        }
        inner.evict_to(self.capacity);
    }

    /// Drop an entry, reporting whether it was present
    pub fn remove(&self, id: &Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.items.remove(id).is_none() {
            return false;
        }
        inner.order.retain(|kept| kept != id);
        true
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<ProcessedArtifact>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.items.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

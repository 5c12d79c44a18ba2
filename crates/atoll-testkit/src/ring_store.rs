//! In-memory CAS metadata store.

use atoll_cluster::{MetaData, RingStore, RingStoreError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Ring store fake: persists metadata in memory with the same
/// compare-and-swap semantics as the real store, and supports injecting
/// failures for the next persist calls.
#[derive(Default)]
pub struct InMemoryRingStore {
    stored: Mutex<Option<MetaData>>,
    persist_calls: Mutex<Vec<PersistCall>>,
    fail_next: Mutex<VecDeque<RingStoreError>>,
    fail_keyspace: AtomicBool,
    keyspace_creations: AtomicUsize,
}

/// One recorded persist attempt.
#[derive(Debug, Clone)]
pub struct PersistCall {
    pub prev_version: u64,
    pub next_version: u64,
    pub source: String,
}

impl InMemoryRingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the stored metadata, as if another node persisted it.
    pub fn seed(&self, metadata: MetaData) {
        *self.stored.lock() = Some(metadata);
    }

    /// Inject a failure returned by the next persist call.
    pub fn fail_next_persist(&self, err: RingStoreError) {
        self.fail_next.lock().push_back(err);
    }

    /// Make `create_admin_keyspace` fail.
    pub fn fail_keyspace_creation(&self) {
        self.fail_keyspace.store(true, Ordering::SeqCst);
    }

    /// Currently stored metadata.
    pub fn persisted(&self) -> Option<MetaData> {
        self.stored.lock().clone()
    }

    /// All persist attempts, including failed ones.
    pub fn persist_calls(&self) -> Vec<PersistCall> {
        self.persist_calls.lock().clone()
    }

    /// Number of persist attempts.
    pub fn persist_count(&self) -> usize {
        self.persist_calls.lock().len()
    }

    /// Number of `create_admin_keyspace` calls.
    pub fn keyspace_creations(&self) -> usize {
        self.keyspace_creations.load(Ordering::SeqCst)
    }
}

impl RingStore for InMemoryRingStore {
    fn create_admin_keyspace(&self) -> Result<(), RingStoreError> {
        self.keyspace_creations.fetch_add(1, Ordering::SeqCst);
        if self.fail_keyspace.load(Ordering::SeqCst) {
            return Err(RingStoreError::Configuration(
                "admin keyspace unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn persist_metadata(
        &self,
        prev: &MetaData,
        next: &MetaData,
        source: &str,
    ) -> Result<(), RingStoreError> {
        self.persist_calls.lock().push(PersistCall {
            prev_version: prev.version(),
            next_version: next.version(),
            source: source.to_string(),
        });
        if let Some(err) = self.fail_next.lock().pop_front() {
            return Err(err);
        }
        let mut stored = self.stored.lock();
        if let Some(current) = stored.as_ref() {
            if current.version() != prev.version()
                || current.cluster_uuid() != prev.cluster_uuid()
            {
                return Err(RingStoreError::ConcurrentMetadataUpdate(format!(
                    "stored version {} does not match expected {}",
                    current.version(),
                    prev.version()
                )));
            }
        }
        *stored = Some(next.clone());
        Ok(())
    }
}

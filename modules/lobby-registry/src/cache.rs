//! Guarded in-memory mirror of the persisted endpoint records (§9 design
//! note: "the cache must be safe for concurrent reads while `Create` writes
//! and the watcher writes").
//!
//! A single `parking_lot::RwLock<BTreeMap<..>>` with `get`/
//! `set_if_not_exist`/`set`/`delete`/`size` primitives, exactly the shape
//! the design note prescribes. Both [`crate::embedded::EmbeddedRegistry`]
//! and [`crate::distributed_kv::DistributedKvRegistry`] use this as their
//! reader-visible view; only the latter also has a background writer (the
//! watch stream).

use std::collections::BTreeMap;

use lobby_core::model::EndpointRecord;
use parking_lot::RwLock;

/// Endpoint-path-keyed cache of [`EndpointRecord`]s.
#[derive(Default)]
pub struct Cache {
    records: RwLock<BTreeMap<String, EndpointRecord>>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<EndpointRecord> {
        self.records.read().get(path).cloned()
    }

    /// Inserts `record` only if no record exists yet for its path. Returns
    /// `true` if inserted, `false` if a record already existed (left
    /// untouched).
    pub fn set_if_not_exist(&self, record: EndpointRecord) -> bool {
        let mut guard = self.records.write();
        if guard.contains_key(&record.path) {
            false
        } else {
            guard.insert(record.path.clone(), record);
            true
        }
    }

    pub fn set(&self, record: EndpointRecord) {
        self.records.write().insert(record.path.clone(), record);
    }

    /// Removes the record at `path`, returning it if present.
    pub fn delete(&self, path: &str) -> Option<EndpointRecord> {
        self.records.write().remove(path)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn all(&self) -> Vec<EndpointRecord> {
        self.records.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_if_not_exist_rejects_duplicates() {
        let cache = Cache::new();
        assert!(cache.set_if_not_exist(EndpointRecord::new("b1", "a")));
        assert!(!cache.set_if_not_exist(EndpointRecord::new("b2", "a")));
        assert_eq!(cache.get("a").unwrap().backend, "b1");
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn delete_removes_and_returns_record() {
        let cache = Cache::new();
        cache.set(EndpointRecord::new("b1", "a"));
        let removed = cache.delete("a");
        assert_eq!(removed.unwrap().path, "a");
        assert!(cache.get("a").is_none());
    }
}

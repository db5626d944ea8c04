//! Endpoint registry (C6, §4.3): the authoritative persisted binding from
//! endpoint path to backend name, with two concrete implementations —
//! [`embedded::EmbeddedRegistry`] (transactional sqlite, via sea-orm) and
//! [`distributed_kv::DistributedKvRegistry`] (watcher-backed, over a
//! Kubernetes `ConfigMap` standing in for the spec's generic "distributed
//! key-value store" — see `DESIGN.md`).
//!
//! Grounded on `lobby.Registry` in `original_source/endpoint.go`.

pub mod cache;
pub mod distributed_kv;
pub mod embedded;

use std::sync::Arc;

use async_trait::async_trait;
use lobby_core::capability::{Backend, Endpoint};
use lobby_core::errors::DomainError;
use lobby_core::model::EndpointRecord;

/// The registry contract (C6).
///
/// Per DESIGN.md's resolution of Open Question #2, `create` returns the
/// just-created endpoint *handle*, matching `endpoint`'s return type, since
/// every caller (HTTP boundary, RPC `Create`) wants the usable handle back
/// rather than a bare record plus a follow-up lookup.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Registers `backend` under `name`. Idempotent last-writer-wins;
    /// intended to be called only during boot, before any endpoint lookup.
    fn register_backend(&self, name: &str, backend: Arc<dyn Backend>);

    /// Creates an endpoint bound to `backend_name` at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::BackendNotFound`] if `backend_name` isn't
    /// registered, [`DomainError::EndpointAlreadyExists`] if `path` is
    /// already bound, or [`DomainError::Internal`]/[`DomainError::Transient`]
    /// if the persisted write fails (no in-memory entry is retained in that
    /// case).
    async fn create(
        &self,
        backend_name: &str,
        path: &str,
    ) -> Result<Box<dyn Endpoint>, DomainError>;

    /// Resolves the endpoint bound to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EndpointNotFound`] if no record exists for
    /// `path`, or if the record's backend is no longer registered.
    async fn endpoint(&self, path: &str) -> Result<Box<dyn Endpoint>, DomainError>;

    /// Enumerates every persisted record, resolved through its backend.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] if any referenced backend is missing.
    async fn endpoints(&self) -> Result<Vec<Box<dyn Endpoint>>, DomainError>;

    /// Enumerates the raw persisted records without resolving a handle,
    /// used by the HTTP boundary to rebuild its route table (§4.9) without
    /// paying for a handle per route.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] on storage failure.
    async fn records(&self) -> Result<Vec<EndpointRecord>, DomainError>;

    /// Closes every registered backend, then the underlying store. The
    /// first failure is returned; remaining backends are still attempted.
    ///
    /// # Errors
    ///
    /// Returns the first close failure encountered.
    async fn close(&self) -> Result<(), DomainError>;
}

/// A minimal, dependency-free concurrent map of registered backends.
///
/// Backend registration happens once at boot (spec §3: "immutable for a
/// given run after registration") and is read far more often than
/// written, so a `parking_lot::RwLock<HashMap<..>>` is all that's needed —
/// no need for `dashmap`'s sharding here.
pub mod dashmap_lite {
    use std::collections::HashMap;
    use std::sync::Arc;

    use lobby_core::capability::Backend;
    use parking_lot::RwLock;

    #[derive(Default)]
    pub struct BackendMap {
        inner: RwLock<HashMap<String, Arc<dyn Backend>>>,
    }

    impl BackendMap {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, name: &str, backend: Arc<dyn Backend>) {
            self.inner.write().insert(name.to_owned(), backend);
        }

        #[must_use]
        pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
            self.inner.read().get(name).cloned()
        }

        pub fn iter_values(&self) -> Vec<Arc<dyn Backend>> {
            self.inner.read().values().cloned().collect()
        }
    }
}

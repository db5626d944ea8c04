//! Polymorphic "backend" and "endpoint" capability traits.
//!
//! Three concrete variants exist across the workspace: the embedded store
//! (`lobby-registry::embedded`), the RPC proxy (`lobby-rpc::client`), and an
//! injected test double (`capability::testing`, this module). All three
//! satisfy the same two small interfaces, matching the design note in
//! SPEC_FULL §9 ("a capability set `{create-endpoint, close}` for backend,
//! `{handle-request, close}` for endpoint").

use async_trait::async_trait;
use std::fmt;

use crate::errors::DomainError;
use crate::model::{Item, Message, Page};

/// A provider of endpoint handles.
///
/// Implemented by the embedded store, the RPC client proxy, and test
/// doubles. `close` is idempotent from the caller's point of view: the
/// registry only ever calls it once per registered backend, but
/// implementations should not assume exclusivity beyond that.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Returns a handle for the endpoint bound to `path` on this backend.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EndpointNotFound`] if this backend has no
    /// record for `path`, or [`DomainError::Internal`]/[`DomainError::Transient`]
    /// on a connectivity failure.
    async fn endpoint(&self, path: &str) -> Result<Box<dyn Endpoint>, DomainError>;

    /// Releases any resources (connections, file handles) held by this
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered while closing; implementations
    /// should still attempt to release everything they can before
    /// returning.
    async fn close(&self) -> Result<(), DomainError>;
}

/// A handle to a single endpoint, bound to one backend.
#[async_trait]
pub trait Endpoint: Send + Sync + fmt::Debug {
    /// The path this handle was resolved for, matching the persisted
    /// registry record (original's `Endpoint.Path()`).
    fn path(&self) -> &str;

    /// Creates or updates `item` at this endpoint. Returns the stored item.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] describing why the write was rejected.
    async fn put(&self, item: Item) -> Result<Item, DomainError>;

    /// Looks up an item by key.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::KeyNotFound`] if no item exists under `key`.
    async fn get(&self, key: &str) -> Result<Item, DomainError>;

    /// Deletes an item by key.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::KeyNotFound`] if no item exists under `key`.
    async fn delete(&self, key: &str) -> Result<(), DomainError>;

    /// Lists a page of items.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] on backend failure.
    async fn list(&self, page: Page) -> Result<Vec<Item>, DomainError>;

    /// Pushes a message to this endpoint (push-style send, no stored item).
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] on backend failure.
    async fn send(&self, message: Message) -> Result<(), DomainError>;

    /// Releases any per-call session state held by this handle.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] on failure to release resources.
    async fn close(&self) -> Result<(), DomainError>;
}

/// Test doubles implementing [`Backend`]/[`Endpoint`] without any I/O.
///
/// Grounded on the injected-factory design note in SPEC_FULL §9: production
/// code takes `Arc<dyn Backend>` everywhere, so a test can substitute this
/// module's [`testing::FakeBackend`] with no other changes.
#[cfg(any(test, feature = "test-support"))]
pub mod testing {
    use super::{Backend, DomainError, Endpoint, Item, Message, Page};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// An in-memory backend that hands out [`FakeEndpoint`] handles backed
    /// by a shared map keyed by endpoint path.
    #[derive(Debug, Default, Clone)]
    pub struct FakeBackend {
        state: Arc<Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>>,
    }

    impl FakeBackend {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn endpoint(&self, path: &str) -> Result<Box<dyn Endpoint>, DomainError> {
            self.state.lock().entry(path.to_owned()).or_default();
            Ok(Box::new(FakeEndpoint {
                path: path.to_owned(),
                state: self.state.clone(),
            }))
        }

        async fn close(&self) -> Result<(), DomainError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FakeEndpoint {
        path: String,
        state: Arc<Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>>,
    }

    #[async_trait]
    impl Endpoint for FakeEndpoint {
        fn path(&self) -> &str {
            &self.path
        }

        async fn put(&self, item: Item) -> Result<Item, DomainError> {
            let mut state = self.state.lock();
            let bucket = state.entry(self.path.clone()).or_default();
            bucket.insert(item.key.clone(), item.value.clone());
            Ok(item)
        }

        async fn get(&self, key: &str) -> Result<Item, DomainError> {
            let state = self.state.lock();
            state
                .get(&self.path)
                .and_then(|b| b.get(key))
                .map(|value| Item {
                    key: key.to_owned(),
                    value: value.clone(),
                })
                .ok_or(DomainError::KeyNotFound)
        }

        async fn delete(&self, key: &str) -> Result<(), DomainError> {
            let mut state = self.state.lock();
            let bucket = state.entry(self.path.clone()).or_default();
            bucket.remove(key).map(|_| ()).ok_or(DomainError::KeyNotFound)
        }

        async fn list(&self, page: Page) -> Result<Vec<Item>, DomainError> {
            let state = self.state.lock();
            let bucket = state.get(&self.path).cloned().unwrap_or_default();
            let mut items: Vec<Item> = bucket
                .into_iter()
                .map(|(key, value)| Item { key, value })
                .collect();
            items.sort_by(|a, b| a.key.cmp(&b.key));
            if page.fetches_all() {
                return Ok(items);
            }
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let per_page = page.per_page.max(0) as usize;
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let start = ((page.page - 1).max(0) as usize).saturating_mul(per_page);
            Ok(items.into_iter().skip(start).take(per_page).collect())
        }

        async fn send(&self, _message: Message) -> Result<(), DomainError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), DomainError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fake_backend_put_get_delete_roundtrip() {
        let backend = FakeBackend::new();
        let endpoint = backend.endpoint("/orders").await.expect("endpoint");

        endpoint
            .put(Item {
                key: "a".into(),
                value: b"1".to_vec(),
            })
            .await
            .expect("put");

        let got = endpoint.get("a").await.expect("get");
        assert_eq!(got.value, b"1");

        endpoint.delete("a").await.expect("delete");
        let err = endpoint.get("a").await.expect_err("should be gone");
        assert!(matches!(err, DomainError::KeyNotFound));
    }
}

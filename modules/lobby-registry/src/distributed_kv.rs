//! Watcher-backed registry over a distributed key-value store (§4.3).
//!
//! The spec describes a generic "distributed key-value store" reached
//! under `namespace + "/topics/"`; `kube`/`k8s-openapi` are the only
//! "watch a distributed store for PUT/DELETE-shaped change events"
//! dependency pair anywhere in the corpus, so this implementation uses a
//! single Kubernetes `ConfigMap` as that store: each entry of its `data`
//! map is one endpoint record (path → JSON-encoded [`EndpointRecord`]),
//! and the watcher below diffs successive versions of that map into
//! synthetic per-key PUT/DELETE events, mirroring the original's etcd
//! watch loop (`original_source/etcd/registry.go`) one level removed from
//! a literal etcd client.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use lobby_core::capability::{Backend, Endpoint};
use lobby_core::errors::DomainError;
use lobby_core::model::EndpointRecord;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::dashmap_lite::BackendMap;
use crate::Registry;

fn internal(err: impl Into<anyhow::Error>) -> DomainError {
    DomainError::internal(err)
}

fn decode(raw: &str) -> Option<EndpointRecord> {
    serde_json::from_str(raw).ok()
}

fn encode(record: &EndpointRecord) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

/// Watcher-backed [`Registry`] over a `ConfigMap`-shaped distributed KV
/// store.
pub struct DistributedKvRegistry {
    api: Api<ConfigMap>,
    config_map_name: String,
    cache: Arc<Cache>,
    backends: Arc<BackendMap>,
    cancel: CancellationToken,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedKvRegistry {
    /// Connects to the KV service, reads every record currently stored
    /// under `config_map_name` in `namespace` into the cache, then starts
    /// the background watcher.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Internal`] if the initial read/create fails.
    pub async fn connect(
        client: kube::Client,
        namespace: impl Into<String>,
        config_map_name: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let namespace = namespace.into();
        let config_map_name = config_map_name.into();
        let api: Api<ConfigMap> = Api::namespaced(client, &namespace);

        let initial = match api.get(&config_map_name).await {
            Ok(cm) => cm.data.unwrap_or_default(),
            Err(kube::Error::Api(ref e)) if e.code == 404 => {
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(config_map_name.clone()),
                        namespace: Some(namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::new()),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &cm)
                    .await
                    .map_err(internal)?;
                BTreeMap::new()
            }
            Err(err) => return Err(internal(err)),
        };

        let cache = Arc::new(Cache::new());
        for raw in initial.values() {
            if let Some(record) = decode(raw) {
                cache.set(record);
            }
        }

        let cancel = CancellationToken::new();
        let watch_task = spawn_watcher(
            api.clone(),
            config_map_name.clone(),
            cache.clone(),
            cancel.clone(),
            initial,
        );

        Ok(Self {
            api,
            config_map_name,
            cache,
            backends: Arc::new(BackendMap::new()),
            cancel,
            watch_task: Mutex::new(Some(watch_task)),
        })
    }
}

/// Watches `config_map_name` for changes, diffing each new version against
/// the last-seen snapshot to synthesize PUT (key added/changed) and DELETE
/// (key removed, or the whole map deleted) events against `cache`.
fn spawn_watcher(
    api: Api<ConfigMap>,
    config_map_name: String,
    cache: Arc<Cache>,
    cancel: CancellationToken,
    initial_snapshot: BTreeMap<String, String>,
) -> JoinHandle<()> {
    use futures::StreamExt;
    use kube::runtime::watcher;

    tokio::spawn(async move {
        let wc = watcher::Config::default().fields(&format!("metadata.name={config_map_name}"));
        let mut stream = std::pin::pin!(watcher::watcher(api, wc));
        let mut snapshot = initial_snapshot;

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                event = stream.next() => event,
            };

            let Some(event) = next else { break };
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "registry watch stream error");
                    continue;
                }
            };

            match event {
                watcher::Event::Apply(cm) | watcher::Event::InitApply(cm) => {
                    let data = cm.data.unwrap_or_default();
                    apply_diff(&cache, &snapshot, &data);
                    snapshot = data;
                }
                watcher::Event::Delete(_) => {
                    for path in snapshot.keys() {
                        cache.delete(path);
                    }
                    snapshot.clear();
                }
                watcher::Event::Init | watcher::Event::InitDone => {}
            }
        }

        tracing::debug!("registry watch stream closed");
    })
}

fn apply_diff(cache: &Cache, previous: &BTreeMap<String, String>, current: &BTreeMap<String, String>) {
    for (path, raw) in current {
        if previous.get(path) != Some(raw) {
            if let Some(record) = decode(raw) {
                tracing::debug!(path = %path, "registry watch: PUT");
                cache.set(record);
            }
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            tracing::debug!(path = %path, "registry watch: DELETE");
            cache.delete(path);
        }
    }
}

#[async_trait]
impl Registry for DistributedKvRegistry {
    fn register_backend(&self, name: &str, backend: Arc<dyn Backend>) {
        self.backends.insert(name, backend);
    }

    async fn create(
        &self,
        backend_name: &str,
        path: &str,
    ) -> Result<Box<dyn Endpoint>, DomainError> {
        let backend = self
            .backends
            .get(backend_name)
            .ok_or(DomainError::BackendNotFound)?;

        let record = EndpointRecord::new(backend_name, path);
        if !self.cache.set_if_not_exist(record.clone()) {
            return Err(DomainError::EndpointAlreadyExists);
        }

        let patch = serde_json::json!({ "data": { path: encode(&record) } });
        if let Err(err) = self
            .api
            .patch(
                &self.config_map_name,
                &PatchParams::apply("lobby-registry"),
                &Patch::Merge(patch),
            )
            .await
        {
            // Open Question #1 (DESIGN.md): roll back the cache entry so the
            // visible state matches what was actually persisted.
            self.cache.delete(path);
            return Err(internal(err));
        }

        backend.endpoint(path).await
    }

    async fn endpoint(&self, path: &str) -> Result<Box<dyn Endpoint>, DomainError> {
        let record = self.cache.get(path).ok_or(DomainError::EndpointNotFound)?;
        let backend = self
            .backends
            .get(&record.backend)
            .ok_or(DomainError::EndpointNotFound)?;
        backend.endpoint(path).await
    }

    async fn endpoints(&self) -> Result<Vec<Box<dyn Endpoint>>, DomainError> {
        let mut out = Vec::new();
        for record in self.cache.all() {
            let backend = self
                .backends
                .get(&record.backend)
                .ok_or(DomainError::EndpointNotFound)?;
            out.push(backend.endpoint(&record.path).await?);
        }
        Ok(out)
    }

    async fn records(&self) -> Result<Vec<EndpointRecord>, DomainError> {
        Ok(self.cache.all())
    }

    async fn close(&self) -> Result<(), DomainError> {
        let mut first_err = None;
        for backend in self.backends.iter_values() {
            if let Err(err) = backend.close().await {
                tracing::warn!(error = %err, "failed to close backend during registry close");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }

        self.cancel.cancel();
        if let Some(handle) = self.watch_task.lock().take() {
            let _ = handle.await;
        }

        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_diff_synthesizes_put_and_delete() {
        let cache = Cache::new();
        let mut previous = BTreeMap::new();
        previous.insert("a".to_owned(), encode(&EndpointRecord::new("b1", "a")));
        cache.set(EndpointRecord::new("b1", "a"));

        let mut current = BTreeMap::new();
        current.insert("b".to_owned(), encode(&EndpointRecord::new("b2", "b")));

        apply_diff(&cache, &previous, &current);

        assert!(cache.get("a").is_none(), "removed key must be deleted");
        assert_eq!(cache.get("b").unwrap().backend, "b2");
    }
}

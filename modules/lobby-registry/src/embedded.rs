//! Embedded registry implementation: a single-file sqlite store accessed
//! through sea-orm (the root workspace's embedded-persistence stack,
//! `libs/modkit-db`).
//!
//! Grounded on §4.3's "Embedded implementation" paragraph: "open write
//! transaction, lookup by path, if present reject; else save record,
//! commit; on failure roll back." The schema has a single table and never
//! evolves, so this crate issues its own `CREATE TABLE IF NOT EXISTS`
//! rather than pulling in `sea-orm-migration`'s versioned-migration
//! machinery — there is nothing here to version.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lobby_core::capability::{Backend, Endpoint};
use lobby_core::errors::DomainError;
use lobby_core::model::EndpointRecord;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    TransactionTrait,
};

use crate::cache::Cache;
use crate::dashmap_lite::BackendMap;
use crate::Registry;

mod entity {
    use sea_orm::entity::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "endpoints")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub path: String,
        pub backend: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

fn internal(err: impl Into<anyhow::Error>) -> DomainError {
    DomainError::internal(err)
}

/// Transactional sqlite-backed [`Registry`].
pub struct EmbeddedRegistry {
    db: DatabaseConnection,
    cache: Cache,
    backends: BackendMap,
}

impl EmbeddedRegistry {
    /// Opens (creating if absent) the sqlite database at `db_path` and
    /// loads every persisted record into the in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Internal`] if the database cannot be opened
    /// or the schema cannot be created.
    pub async fn connect(db_path: &Path) -> Result<Self, DomainError> {
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let db = Database::connect(url).await.map_err(internal)?;
        db.execute_unprepared(
            "CREATE TABLE IF NOT EXISTS endpoints (path TEXT PRIMARY KEY, backend TEXT NOT NULL)",
        )
        .await
        .map_err(internal)?;

        let cache = Cache::new();
        let rows = entity::Entity::find().all(&db).await.map_err(internal)?;
        for row in rows {
            cache.set(EndpointRecord::new(row.backend, row.path));
        }

        Ok(Self {
            db,
            cache,
            backends: BackendMap::new(),
        })
    }
}

#[async_trait]
impl Registry for EmbeddedRegistry {
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

        let txn = self.db.begin().await.map_err(internal)?;
        let existing = entity::Entity::find_by_id(path.to_owned())
            .one(&txn)
            .await
            .map_err(internal)?;
        if existing.is_some() {
            txn.rollback().await.map_err(internal)?;
            return Err(DomainError::EndpointAlreadyExists);
        }

        let active = entity::ActiveModel {
            path: Set(path.to_owned()),
            backend: Set(backend_name.to_owned()),
        };
        if let Err(err) = active.insert(&txn).await {
            txn.rollback().await.map_err(internal)?;
            return Err(internal(err));
        }
        txn.commit().await.map_err(internal)?;

        self.cache.set(EndpointRecord::new(backend_name, path));
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

        if let Err(err) = self.db.clone().close().await {
            let wrapped = internal(err);
            if first_err.is_none() {
                first_err = Some(wrapped);
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_core::capability::testing::FakeBackend;

    #[tokio::test]
    async fn scenario_s5_registry_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EmbeddedRegistry::connect(&dir.path().join("registry.db"))
            .await
            .unwrap();

        registry.register_backend("b1", Arc::new(FakeBackend::new()));
        registry.register_backend("b2", Arc::new(FakeBackend::new()));

        registry.create("b1", "a").await.unwrap();

        let err = registry.create("b1", "a").await.unwrap_err();
        assert!(matches!(err, DomainError::EndpointAlreadyExists));

        let err = registry.create("b2", "a").await.unwrap_err();
        assert!(matches!(err, DomainError::EndpointAlreadyExists));
    }

    #[tokio::test]
    async fn create_rejects_unknown_backend() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EmbeddedRegistry::connect(&dir.path().join("registry.db"))
            .await
            .unwrap();

        let err = registry.create("missing", "a").await.unwrap_err();
        assert!(matches!(err, DomainError::BackendNotFound));
    }

    #[tokio::test]
    async fn persisted_records_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("registry.db");

        {
            let registry = EmbeddedRegistry::connect(&db_path).await.unwrap();
            registry.register_backend("b1", Arc::new(FakeBackend::new()));
            registry.create("b1", "a").await.unwrap();
        }

        let reopened = EmbeddedRegistry::connect(&db_path).await.unwrap();
        let records = reopened.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "a");
    }
}

//! RPC server (C8, §4.4).
//!
//! Exposes `EndpointService` (streaming `Put`, unary `Get`/`Delete`/`Send`,
//! streaming `List`) and `RegistryService` (`Create`/`Status`). Every call
//! resolves its target path through the shared [`Registry`], then
//! delegates to whatever backend that path is bound to — embedded or
//! proxied through a plugin via [`crate::client::RpcBackend`]. Grounded on
//! `original_source/rpc/server.go` (`TopicService`/`RegistryService`
//! wiring) and `original_source/rpc/topic.go`/`registry.go` (the
//! per-method bodies), reimplemented against `tonic::Server` instead of
//! grpc-go's `*grpc.Server`.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use lobby_core::model::{Item as CoreItem, Message as CoreMessage, Page as CorePage};
use lobby_core::validate::{backend_name_is_valid, endpoint_path_is_valid};
use lobby_registry::Registry;
use tonic::{Request, Response, Status, Streaming};

use lobby_wire::endpoint_service_server::EndpointService;
use lobby_wire::registry_service_server::RegistryService;
use lobby_wire::{
    Empty, EndpointInfo, EndpointRef, EndpointStatus, Item, Key, Message, NewEndpoint, NewItem,
    NewMessage, Page, PutSummary,
};

use crate::errors::domain_to_status;

/// `EndpointService` implementation, routed through the shared registry.
pub struct EndpointServiceImpl {
    registry: Arc<dyn Registry>,
}

impl EndpointServiceImpl {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }
}

fn require_path(path: &str) -> Result<(), Status> {
    if path.is_empty() {
        return Err(Status::invalid_argument("path must not be empty"));
    }
    Ok(())
}

#[tonic::async_trait]
impl EndpointService for EndpointServiceImpl {
    async fn put(
        &self,
        request: Request<Streaming<NewItem>>,
    ) -> Result<Response<PutSummary>, Status> {
        let mut stream = request.into_inner();
        let mut count = 0u64;

        while let Some(msg) = stream.message().await? {
            require_path(&msg.path)?;
            let item = msg
                .item
                .ok_or_else(|| Status::invalid_argument("item must be set"))?;

            let endpoint = self
                .registry
                .endpoint(&msg.path)
                .await
                .map_err(|e| domain_to_status(&e))?;

            endpoint
                .put(CoreItem {
                    key: item.key,
                    value: item.value,
                })
                .await
                .map_err(|e| domain_to_status(&e))?;

            count += 1;
        }

        Ok(Response::new(PutSummary { count }))
    }

    async fn get(&self, request: Request<Key>) -> Result<Response<Item>, Status> {
        let key = request.into_inner();
        require_path(&key.path)?;

        let endpoint = self
            .registry
            .endpoint(&key.path)
            .await
            .map_err(|e| domain_to_status(&e))?;

        let item = endpoint
            .get(&key.key)
            .await
            .map_err(|e| domain_to_status(&e))?;

        Ok(Response::new(Item {
            key: item.key,
            value: item.value,
        }))
    }

    async fn delete(&self, request: Request<Key>) -> Result<Response<Empty>, Status> {
        let key = request.into_inner();
        require_path(&key.path)?;

        let endpoint = self
            .registry
            .endpoint(&key.path)
            .await
            .map_err(|e| domain_to_status(&e))?;

        endpoint
            .delete(&key.key)
            .await
            .map_err(|e| domain_to_status(&e))?;

        Ok(Response::new(Empty {}))
    }

    async fn send(&self, request: Request<NewMessage>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        require_path(&req.path)?;
        let message: Message = req.message.unwrap_or_default();

        let endpoint = self
            .registry
            .endpoint(&req.path)
            .await
            .map_err(|e| domain_to_status(&e))?;

        endpoint
            .send(CoreMessage {
                group: (!message.group.is_empty()).then_some(message.group),
                value: message.value,
            })
            .await
            .map_err(|e| domain_to_status(&e))?;

        Ok(Response::new(Empty {}))
    }

    type ListStream = Pin<Box<dyn Stream<Item = Result<Item, Status>> + Send + 'static>>;

    async fn list(&self, request: Request<Page>) -> Result<Response<Self::ListStream>, Status> {
        let page = request.into_inner();
        require_path(&page.path)?;

        let endpoint = self
            .registry
            .endpoint(&page.path)
            .await
            .map_err(|e| domain_to_status(&e))?;

        let normalized = CorePage::normalize(page.page, page.per_page);
        let items = endpoint
            .list(normalized)
            .await
            .map_err(|e| domain_to_status(&e))?;

        let stream = tokio_stream::iter(
            items
                .into_iter()
                .map(|item| Ok(Item { key: item.key, value: item.value })),
        );
        Ok(Response::new(Box::pin(stream)))
    }
}

/// `RegistryService` implementation (endpoint creation and existence
/// probes).
pub struct RegistryServiceImpl {
    registry: Arc<dyn Registry>,
}

impl RegistryServiceImpl {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl RegistryService for RegistryServiceImpl {
    async fn create(
        &self,
        request: Request<NewEndpoint>,
    ) -> Result<Response<EndpointInfo>, Status> {
        let req = request.into_inner();

        if !backend_name_is_valid(&req.backend) {
            return Err(Status::invalid_argument(
                "backend must be non-empty and alphanumeric",
            ));
        }
        if !endpoint_path_is_valid(&req.path) {
            return Err(Status::invalid_argument(
                "path must be 1-64 bytes and non-empty",
            ));
        }

        self.registry
            .create(&req.backend, &req.path)
            .await
            .map_err(|e| domain_to_status(&e))?;

        Ok(Response::new(EndpointInfo {
            path: req.path,
            backend: req.backend,
        }))
    }

    async fn status(
        &self,
        request: Request<EndpointRef>,
    ) -> Result<Response<EndpointStatus>, Status> {
        let req = request.into_inner();
        let exists = self.registry.endpoint(&req.path).await.is_ok();
        Ok(Response::new(EndpointStatus { exists }))
    }
}

//! RPC client adapter (C7, §4.5).
//!
//! Wraps a live `tonic::transport::Channel` to a plugin's gRPC socket as a
//! [`Backend`]/[`Endpoint`] pair, so the registry and the rest of the
//! broker can treat a plugin-hosted backend exactly like the embedded one.
//! Grounded on `original_source/rpc/client.go` (`grpcBackend`/`grpcEndpoint`),
//! reimplemented against generated `tonic` client stubs instead of a
//! hand-rolled grpc-go client.

use async_trait::async_trait;
use lobby_core::capability::{Backend, Endpoint};
use lobby_core::errors::DomainError;
use lobby_core::model::{Item, Message, Page};
use tonic::transport::Channel;

use lobby_wire::endpoint_service_client::EndpointServiceClient;
use lobby_wire::registry_service_client::RegistryServiceClient;
use lobby_wire::{
    EndpointRef, Key, Message as WireMessage, NewEndpoint, NewItem, NewMessage, Page as WirePage,
};

use crate::errors::status_to_domain;

/// A [`Backend`] proxied over gRPC to a single plugin subprocess.
///
/// One instance is created per loaded plugin (`lobby-supervisor`); every
/// [`RpcBackend::endpoint`] call shares the same underlying channel, since
/// `tonic::transport::Channel` multiplexes requests over HTTP/2 internally.
#[derive(Debug, Clone)]
pub struct RpcBackend {
    channel: Channel,
}

impl RpcBackend {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Asks the plugin's registry service whether `path` exists, the way
    /// the supervisor probes readiness after spawning a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Transient`] if the call fails outright.
    pub async fn status(&self, path: &str) -> Result<bool, DomainError> {
        let mut client = RegistryServiceClient::new(self.channel.clone());
        let resp = client
            .status(EndpointRef { path: path.to_owned() })
            .await
            .map_err(|status| status_to_domain(&status))?;
        Ok(resp.into_inner().exists)
    }

    /// Asks the plugin to create an endpoint at `path`, used when a plugin
    /// backend is asked to serve a path it hasn't bound yet.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] mapped from the plugin's response status.
    pub async fn create(&self, backend: &str, path: &str) -> Result<(), DomainError> {
        let mut client = RegistryServiceClient::new(self.channel.clone());
        client
            .create(NewEndpoint {
                backend: backend.to_owned(),
                path: path.to_owned(),
            })
            .await
            .map_err(|status| status_to_domain(&status))?;
        Ok(())
    }
}

#[async_trait]
impl Backend for RpcBackend {
    async fn endpoint(&self, path: &str) -> Result<Box<dyn Endpoint>, DomainError> {
        Ok(Box::new(RpcEndpoint {
            path: path.to_owned(),
            channel: self.channel.clone(),
        }))
    }

    async fn close(&self) -> Result<(), DomainError> {
        // tonic's `Channel` has no explicit close; dropping the last clone
        // tears down the HTTP/2 connection. Nothing to do here beyond that.
        Ok(())
    }
}

/// An [`Endpoint`] handle proxied over gRPC, bound to one `path`.
#[derive(Debug, Clone)]
struct RpcEndpoint {
    path: String,
    channel: Channel,
}

#[async_trait]
impl Endpoint for RpcEndpoint {
    fn path(&self) -> &str {
        &self.path
    }

    async fn put(&self, item: Item) -> Result<Item, DomainError> {
        let mut client = EndpointServiceClient::new(self.channel.clone());
        let wire_item = lobby_wire::Item {
            key: item.key.clone(),
            value: item.value.clone(),
        };
        let request_stream = tokio_stream::once(NewItem {
            path: self.path.clone(),
            item: Some(wire_item),
        });

        client
            .put(request_stream)
            .await
            .map_err(|status| status_to_domain(&status))?;

        Ok(item)
    }

    async fn get(&self, key: &str) -> Result<Item, DomainError> {
        let mut client = EndpointServiceClient::new(self.channel.clone());
        let resp = client
            .get(Key {
                path: self.path.clone(),
                key: key.to_owned(),
            })
            .await
            .map_err(|status| status_to_domain(&status))?
            .into_inner();

        Ok(Item {
            key: resp.key,
            value: resp.value,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        let mut client = EndpointServiceClient::new(self.channel.clone());
        client
            .delete(Key {
                path: self.path.clone(),
                key: key.to_owned(),
            })
            .await
            .map_err(|status| status_to_domain(&status))?;
        Ok(())
    }

    async fn list(&self, page: Page) -> Result<Vec<Item>, DomainError> {
        use futures::StreamExt;

        let mut client = EndpointServiceClient::new(self.channel.clone());
        let mut stream = client
            .list(WirePage {
                path: self.path.clone(),
                page: page.page,
                per_page: page.per_page,
            })
            .await
            .map_err(|status| status_to_domain(&status))?
            .into_inner();

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item.map_err(|status| status_to_domain(&status))?;
            items.push(Item {
                key: item.key,
                value: item.value,
            });
        }
        Ok(items)
    }

    async fn send(&self, message: Message) -> Result<(), DomainError> {
        let mut client = EndpointServiceClient::new(self.channel.clone());
        client
            .send(NewMessage {
                path: self.path.clone(),
                message: Some(WireMessage {
                    group: message.group.unwrap_or_default(),
                    value: message.value,
                }),
            })
            .await
            .map_err(|status| status_to_domain(&status))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Dials a plugin's Unix-domain socket, retrying on a short interval until
/// either the socket accepts a connection or `deadline` elapses.
///
/// Grounded on the supervisor's dial loop in `original_source/plugin.go`
/// (`waitForSocket`), reimplemented with `tonic::transport::Endpoint`'s
/// `connect_with_connector` over a `tokio::net::UnixStream`.
///
/// # Errors
///
/// Returns [`DomainError::Transient`] if no connection succeeds before the
/// deadline.
pub async fn dial_unix(
    socket_path: std::path::PathBuf,
    dial_timeout: std::time::Duration,
) -> Result<Channel, DomainError> {
    use tonic::transport::{Endpoint as TransportEndpoint, Uri};
    use tower::service_fn;

    // The URI is never actually resolved (the connector below ignores it),
    // it only needs to parse.
    let endpoint = TransportEndpoint::from_static("http://[::]:50051").connect_timeout(dial_timeout);

    let path = socket_path.clone();
    let channel = endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
            }
        }))
        .await
        .map_err(|err| DomainError::Transient(err.to_string()))?;

    Ok(channel)
}

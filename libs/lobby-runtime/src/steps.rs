//! The default boot sequence (§4.2's step order: directories, registry,
//! embedded backend, backend plugins, RPC over a Unix socket, RPC over TCP,
//! HTTP), each a [`Step<Application>`] pushed onto one [`StepEngine`] in
//! that order. Grounded on `original_source/cli/app/steps.go`'s
//! `defaultSteps` list and, for the server steps, on
//! `oagw/src/test_support.rs::MockUpstream`'s graceful-shutdown pattern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lobby_core::errors::ErrorSet;
use lobby_core::step::{Step, StepEngine};
use lobby_config::RegistryKind;
use lobby_registry::distributed_kv::DistributedKvRegistry;
use lobby_registry::embedded::EmbeddedRegistry;
use lobby_rpc::server::{EndpointServiceImpl, RegistryServiceImpl};
use lobby_supervisor::{Supervisor, DEFAULT_LOAD_DEADLINE};
use lobby_wire::endpoint_service_server::EndpointServiceServer;
use lobby_wire::registry_service_server::RegistryServiceServer;
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tracing::Instrument;

use crate::application::Application;

/// The distributed-kv registry's fixed namespace and `ConfigMap` name. The
/// spec's "distributed key-value store" has no notion of a namespace of its
/// own; these are this implementation's choice, recorded in `DESIGN.md`.
const DISTRIBUTED_KV_NAMESPACE: &str = "lobby";
const DISTRIBUTED_KV_CONFIG_MAP: &str = "lobby-registry";

/// Grace period given to an in-flight server after cancellation before its
/// background task gives up waiting for a clean stop (§5 "Timeouts").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[must_use]
pub fn default_steps() -> StepEngine<Application> {
    StepEngine::new()
        .push(Box::new(DirectoriesStep))
        .push(Box::new(RegistryStep))
        .push(Box::new(EmbeddedBackendStep))
        .push(Box::new(BackendPluginsStep))
        .push(Box::new(RpcUnixStep))
        .push(Box::new(RpcTcpStep))
        .push(Box::new(HttpStep))
}

/// Creates the data directory and its `sockets`/`db` subdirectories
/// up-front, so every later step can assume they exist (§6 filesystem
/// layout).
struct DirectoriesStep;

#[async_trait]
impl Step<Application> for DirectoriesStep {
    fn name(&self) -> &str {
        "directories"
    }

    async fn setup(&self, app: &Application) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&app.settings.data_dir).await?;
        tokio::fs::create_dir_all(app.socket_dir()).await?;
        if app.settings.registry == RegistryKind::Embedded {
            tokio::fs::create_dir_all(app.db_dir()).await?;
        }
        Ok(())
    }

    async fn teardown(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Connects the configured registry implementation and publishes it onto
/// `Application` for every later step.
struct RegistryStep;

#[async_trait]
impl Step<Application> for RegistryStep {
    fn name(&self) -> &str {
        "registry"
    }

    async fn setup(&self, app: &Application) -> anyhow::Result<()> {
        let registry: Arc<dyn lobby_registry::Registry> = match app.settings.registry {
            RegistryKind::Embedded => {
                let db_path = app.db_dir().join("registry.db");
                Arc::new(EmbeddedRegistry::connect(&db_path).await?)
            }
            RegistryKind::DistributedKv => {
                let client = kube::Client::try_default().await?;
                Arc::new(
                    DistributedKvRegistry::connect(
                        client,
                        DISTRIBUTED_KV_NAMESPACE,
                        DISTRIBUTED_KV_CONFIG_MAP,
                    )
                    .await?,
                )
            }
        };
        app.set_registry(registry);
        Ok(())
    }

    async fn teardown(&self, app: &Application) -> anyhow::Result<()> {
        if let Some(registry) = app.registry() {
            registry.close().await?;
        }
        Ok(())
    }
}

/// Structural placeholder for the "embedded backend" slot in the default
/// order. Concrete backend adapters (bolt/redis/mongo/nsq) are out of scope
/// (see `DESIGN.md`'s deliberate omissions); this step exists so the order
/// itself matches §4.2 even though nothing runs in it.
struct EmbeddedBackendStep;

#[async_trait]
impl Step<Application> for EmbeddedBackendStep {
    fn name(&self) -> &str {
        "embedded-backend"
    }

    async fn setup(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Spawns each configured backend plugin, dials it, and registers the
/// resulting [`lobby_rpc::client::RpcBackend`] onto the registry (§4.6).
///
/// Per-plugin config (`[plugins.config.<name>]`) has no consumer in this
/// implementation — no concrete plugin binary ships with it — so every
/// plugin is launched without a `-c` flag; see `DESIGN.md`.
struct BackendPluginsStep;

#[async_trait]
impl Step<Application> for BackendPluginsStep {
    fn name(&self) -> &str {
        "backend-plugins"
    }

    async fn setup(&self, app: &Application) -> anyhow::Result<()> {
        let Some(registry) = app.registry() else {
            anyhow::bail!("backend-plugins step requires the registry step to have run first");
        };

        for name in &app.settings.plugins.backends {
            let exec_path = app.settings.paths.plugin_dir.join(format!("lobby-{name}"));
            let (backend, handle) = Supervisor::load_backend_plugin(
                name,
                &exec_path,
                &app.settings.data_dir,
                None,
                &app.cancel,
                DEFAULT_LOAD_DEADLINE,
            )
            .instrument(lobby_core::logging::plugin_span(name))
            .await
            .map_err(|err| anyhow::anyhow!("loading plugin '{name}': {err}"))?;

            registry.register_backend(name, Arc::new(backend));
            app.push_plugin_handle(handle);
            tracing::info!(plugin = name, "backend plugin registered");
        }
        Ok(())
    }

    async fn teardown(&self, app: &Application) -> anyhow::Result<()> {
        let handles = app.take_plugin_handles();
        for handle in &handles {
            handle.close().await;
        }

        let mut errors = ErrorSet::new();
        for handle in handles {
            if let Err(err) = handle.wait().await {
                tracing::warn!(plugin = handle.name(), error = %err, "plugin teardown failed");
                errors.push(err);
            }
        }
        errors.into_result()
    }
}

/// Serves the binary RPC surface over `<data-dir>/sockets/lobby.sock`, the
/// broker's own endpoint and registry services (not to be confused with the
/// per-plugin sockets `BackendPluginsStep` dials out to).
struct RpcUnixStep;

#[async_trait]
impl Step<Application> for RpcUnixStep {
    fn name(&self) -> &str {
        "rpc-unix"
    }

    async fn setup(&self, app: &Application) -> anyhow::Result<()> {
        let Some(registry) = app.registry() else {
            anyhow::bail!("rpc-unix step requires the registry step to have run first");
        };

        let socket_path = app.main_socket_path();
        if socket_path.exists() {
            tokio::fs::remove_file(&socket_path).await?;
        }
        let listener = tokio::net::UnixListener::bind(&socket_path)?;
        let incoming = UnixListenerStream::new(listener);

        let endpoint_service = EndpointServiceServer::new(EndpointServiceImpl::new(registry.clone()));
        let registry_service = RegistryServiceServer::new(RegistryServiceImpl::new(registry.clone()));
        let cancel = app.cancel.clone();
        let error_tx = app.error_sender();

        app.spawn_background(
            async move {
                let shutdown = async { cancel.cancelled().await };
                let serve = tonic::transport::Server::builder()
                    .add_service(endpoint_service)
                    .add_service(registry_service)
                    .serve_with_incoming_shutdown(incoming, shutdown);

                let forced_deadline = async {
                    cancel.cancelled().await;
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                };

                tokio::select! {
                    result = serve => {
                        if let Err(err) = result {
                            tracing::error!(error = %err, "rpc unix server failed");
                            if let Some(tx) = error_tx {
                                let _ = tx.send(anyhow::anyhow!("rpc unix server: {err}")).await;
                            }
                        }
                    }
                    () = forced_deadline => {
                        tracing::warn!("rpc unix server did not shut down within the grace period");
                    }
                }
            }
            .instrument(lobby_core::logging::component_span("rpc-unix server")),
        )
        .await;

        tracing::info!(socket = %socket_path.display(), "rpc unix server listening");
        Ok(())
    }

    async fn teardown(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Serves the same binary RPC surface over TCP on `settings.grpc.port`, for
/// remote callers.
struct RpcTcpStep;

#[async_trait]
impl Step<Application> for RpcTcpStep {
    fn name(&self) -> &str {
        "rpc-tcp"
    }

    async fn setup(&self, app: &Application) -> anyhow::Result<()> {
        let Some(registry) = app.registry() else {
            anyhow::bail!("rpc-tcp step requires the registry step to have run first");
        };

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", app.settings.grpc.port)).await?;
        let incoming = TcpListenerStream::new(listener);

        let endpoint_service = EndpointServiceServer::new(EndpointServiceImpl::new(registry.clone()));
        let registry_service = RegistryServiceServer::new(RegistryServiceImpl::new(registry.clone()));
        let cancel = app.cancel.clone();
        let error_tx = app.error_sender();
        let port = app.settings.grpc.port;

        app.spawn_background(
            async move {
                let shutdown = async { cancel.cancelled().await };
                let serve = tonic::transport::Server::builder()
                    .add_service(endpoint_service)
                    .add_service(registry_service)
                    .serve_with_incoming_shutdown(incoming, shutdown);

                let forced_deadline = async {
                    cancel.cancelled().await;
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                };

                tokio::select! {
                    result = serve => {
                        if let Err(err) = result {
                            tracing::error!(error = %err, "rpc tcp server failed");
                            if let Some(tx) = error_tx {
                                let _ = tx.send(anyhow::anyhow!("rpc tcp server: {err}")).await;
                            }
                        }
                    }
                    () = forced_deadline => {
                        tracing::warn!("rpc tcp server did not shut down within the grace period");
                    }
                }
            }
            .instrument(lobby_core::logging::component_span("gRPC server")),
        )
        .await;

        tracing::info!(port, "rpc tcp server listening");
        Ok(())
    }

    async fn teardown(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds the HTTP boundary and serves it on `settings.http.port`.
struct HttpStep;

#[async_trait]
impl Step<Application> for HttpStep {
    fn name(&self) -> &str {
        "http"
    }

    async fn setup(&self, app: &Application) -> anyhow::Result<()> {
        let Some(registry) = app.registry() else {
            anyhow::bail!("http step requires the registry step to have run first");
        };

        let boundary = Arc::new(lobby_http::Boundary::new(registry).await?);
        app.set_http_boundary(boundary.clone());

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", app.settings.http.port)).await?;
        let cancel = app.cancel.clone();
        let error_tx = app.error_sender();
        let port = app.settings.http.port;
        let service = boundary.make_service();

        app.spawn_background(
            async move {
                let shutdown = async { cancel.cancelled().await };
                let serve = axum::serve(listener, service).with_graceful_shutdown(shutdown);

                if let Err(err) = serve.await {
                    tracing::error!(error = %err, "http server failed");
                    if let Some(tx) = error_tx {
                        let _ = tx.send(anyhow::anyhow!("http server: {err}")).await;
                    }
                }
            }
            .instrument(lobby_core::logging::component_span("http server")),
        )
        .await;

        tracing::info!(port, "http server listening");
        Ok(())
    }

    async fn teardown(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_config::Settings;

    /// Scenario S3: a background task reports a failure through the
    /// application error channel; `run` surfaces exactly that error and
    /// nothing else.
    #[tokio::test]
    async fn scenario_s3_background_task_error_surfaces_alone() {
        struct FailingBackgroundStep;

        #[async_trait]
        impl Step<Application> for FailingBackgroundStep {
            fn name(&self) -> &str {
                "failing-background"
            }

            async fn setup(&self, app: &Application) -> anyhow::Result<()> {
                let error_tx = app.error_sender();
                app.spawn_background(async move {
                    if let Some(tx) = error_tx {
                        let _ = tx.send(anyhow::anyhow!("goroutine error")).await;
                    }
                })
                .await;
                Ok(())
            }

            async fn teardown(&self, _app: &Application) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.data_dir = dir.path().to_path_buf();

        let app = Application::new(settings);
        app.set_registry(Arc::new(
            EmbeddedRegistry::connect(&dir.path().join("registry.db"))
                .await
                .unwrap(),
        ));

        let steps = StepEngine::new().push(Box::new(FailingBackgroundStep));
        let errors = app.run_with_steps(&steps).await;

        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors()[0].to_string(), "goroutine error");
    }
}

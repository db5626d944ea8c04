//! The running broker process (C10, §4.2).
//!
//! Owns every long-lived handle (registry, plugin processes, HTTP boundary)
//! behind interior mutability so it can be shared as `&Application` with
//! every step, per §9's "pass the application by non-owning reference into
//! each step call rather than embedding it; the application owns the steps,
//! not the reverse." Grounded on `host_runtime.rs`'s `HostRuntime`: one
//! struct holding every subsystem handle plus a `CancellationToken`, driven
//! through an ordered phase list rather than a hand-rolled `main`.

use std::path::PathBuf;
use std::sync::Arc;

use lobby_config::Settings;
use lobby_core::errors::ErrorSet;
use lobby_core::step::StepEngine;
use lobby_registry::Registry;
use lobby_supervisor::PluginHandle;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::steps::default_steps;

/// The process-wide "every send is observed before the next step proceeds"
/// channel from §4.2 — Tokio's `mpsc` has no zero-capacity variant, so
/// capacity 1 is the closest equivalent; nothing in the runtime pipelines a
/// second error send ahead of the first being read.
const ERROR_CHANNEL_CAPACITY: usize = 1;

/// The running application. Every field is reachable through `&self`, so
/// steps never need to hold their own copy of anything they might outlive.
pub struct Application {
    pub(crate) settings: Settings,
    pub(crate) cancel: CancellationToken,
    registry: SyncMutex<Option<Arc<dyn Registry>>>,
    plugin_handles: SyncMutex<Vec<Arc<PluginHandle>>>,
    http_boundary: SyncMutex<Option<Arc<lobby_http::Boundary>>>,
    error_tx: SyncMutex<Option<mpsc::Sender<anyhow::Error>>>,
    error_rx: AsyncMutex<Option<mpsc::Receiver<anyhow::Error>>>,
    background: AsyncMutex<JoinSet<()>>,
}

impl Application {
    /// Builds an application with a fresh [`CancellationToken`] and a closed
    /// error channel; [`Application::run`] opens the channel for the
    /// duration of one boot/run/shutdown cycle.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
            registry: SyncMutex::new(None),
            plugin_handles: SyncMutex::new(Vec::new()),
            http_boundary: SyncMutex::new(None),
            error_tx: SyncMutex::new(None),
            error_rx: AsyncMutex::new(None),
            background: AsyncMutex::new(JoinSet::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The token every step and background task cancels against. Cloning it
    /// is how external signal handling (`lobbyd`'s Ctrl-C/`SIGTERM`
    /// listener) requests shutdown without reaching into the application.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub(crate) fn socket_dir(&self) -> PathBuf {
        self.settings.data_dir.join(&self.settings.paths.socket_dir)
    }

    #[must_use]
    pub(crate) fn main_socket_path(&self) -> PathBuf {
        self.socket_dir().join("lobby.sock")
    }

    #[must_use]
    pub(crate) fn db_dir(&self) -> PathBuf {
        self.settings.data_dir.join("db")
    }

    pub(crate) fn set_registry(&self, registry: Arc<dyn Registry>) {
        *self.registry.lock() = Some(registry);
    }

    #[must_use]
    pub(crate) fn registry(&self) -> Option<Arc<dyn Registry>> {
        self.registry.lock().clone()
    }

    pub(crate) fn push_plugin_handle(&self, handle: Arc<PluginHandle>) {
        self.plugin_handles.lock().push(handle);
    }

    pub(crate) fn take_plugin_handles(&self) -> Vec<Arc<PluginHandle>> {
        std::mem::take(&mut *self.plugin_handles.lock())
    }

    pub(crate) fn set_http_boundary(&self, boundary: Arc<lobby_http::Boundary>) {
        *self.http_boundary.lock() = Some(boundary);
    }

    #[must_use]
    pub(crate) fn http_boundary(&self) -> Option<Arc<lobby_http::Boundary>> {
        self.http_boundary.lock().clone()
    }

    /// Clones the application-error sender so a background task can report
    /// a failure without holding a reference back into `Application`.
    #[must_use]
    pub(crate) fn error_sender(&self) -> Option<mpsc::Sender<anyhow::Error>> {
        self.error_tx.lock().clone()
    }

    /// Best-effort error report; silently dropped once the channel has
    /// already been drained and closed (a report racing the very end of
    /// shutdown isn't worth surfacing).
    pub(crate) async fn report_error(&self, err: anyhow::Error) {
        if let Some(tx) = self.error_sender() {
            let _ = tx.send(err).await;
        }
    }

    /// Registers a task with the application's wait group. Steps use this
    /// instead of a bare `tokio::spawn` so `run` can block on every
    /// background task finishing before it returns.
    pub(crate) async fn spawn_background<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.background.lock().await.spawn(task);
    }

    /// Runs setup, waits for cancellation or the first reported error, then
    /// always runs teardown before returning the composite result (§4.2,
    /// §7, §8 invariant 6).
    pub async fn run(&self) -> ErrorSet {
        self.run_with_steps(&default_steps()).await
    }

    /// The actual control flow behind [`Application::run`], parameterized
    /// over the step list so tests can exercise it with steps that aren't
    /// part of the default boot sequence.
    pub(crate) async fn run_with_steps(&self, steps: &StepEngine<Application>) -> ErrorSet {
        let mut errors = ErrorSet::new();

        let (tx, rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        *self.error_tx.lock() = Some(tx);
        *self.error_rx.lock().await = Some(rx);

        let setup_result = steps.setup(self, &self.cancel).await;
        let mut rx = self.error_rx.lock().await.take();

        match &setup_result {
            Ok(true) => tracing::info!("setup cancelled before completion"),
            Ok(false) => {
                if let Some(rx) = rx.as_mut() {
                    let cancelled = self.cancel.clone();
                    tokio::select! {
                        () = cancelled.cancelled() => {}
                        maybe_err = rx.recv() => {
                            if let Some(err) = maybe_err {
                                tracing::warn!(error = %err, "application error received");
                                errors.push(err);
                            }
                        }
                    }
                }
            }
            Err(err) => tracing::warn!(error = %err, "setup failed"),
        }

        if let Err(err) = setup_result {
            errors.push(err);
        }

        // Teardown always runs, whether or not anything above actually
        // requested cancellation; make sure every background task reading
        // `self.cancel` sees the request so teardown can join them.
        self.cancel.cancel();

        errors.extend(steps.teardown(self).await);

        let drain = rx.map(|mut rx| {
            tokio::spawn(async move {
                let mut drained = Vec::new();
                while let Some(err) = rx.recv().await {
                    drained.push(err);
                }
                drained
            })
        });

        {
            let mut background = self.background.lock().await;
            while background.join_next().await.is_some() {}
        }

        // Drop the last sender reference now that every background task has
        // finished (and with it, every clone it held); this is what lets the
        // drain task's `recv` loop above observe channel closure and return.
        self.error_tx.lock().take();

        if let Some(handle) = drain {
            if let Ok(drained) = handle.await {
                errors.extend(drained);
            }
        }

        if errors.is_empty() {
            tracing::info!("shutdown complete");
        }
        errors
    }
}

//! Plugin subprocess supervisor (C9, §4.6).
//!
//! Spawns a backend-plugin binary, demultiplexes its stdio through the
//! [`lobby_core::prefix::PrefixWriter`], waits for its Unix socket to come
//! up, dials it, and tracks its lifecycle (`Close`/`Wait`) the way
//! `original_source/rpc/plugin.go`'s `LoadPlugin`/`LoadBackendPlugin` do.
//! Process-group isolation and a graceful `SIGTERM` (instead of the
//! original's `os.Process.Kill`, which is `SIGKILL`) are added per spec
//! §4.6/§6's explicit graceful-shutdown contract — the idiomatic Rust
//! substitute for `syscall.SysProcAttr{Setpgid: true}` plus
//! `signal.Signal(syscall.SIGTERM)`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use lobby_core::prefix::{Prefix, PrefixWriter};
use lobby_rpc::client::{dial_unix, RpcBackend};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex as SyncMutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often [`Supervisor::load_backend_plugin`] polls for the socket file.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default deadline for a backend-plugin load, per spec §5.
pub const DEFAULT_LOAD_DEADLINE: Duration = Duration::from_secs(5);

/// Dial timeout once the socket file has appeared, per spec §5.
pub const SOCKET_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("load cancelled")]
    Cancelled,
    #[error("failed to spawn plugin: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("plugin '{name}' load time exceeded")]
    LoadTimeout { name: String },
    #[error("failed to dial plugin socket: {0}")]
    Dial(String),
    #[error("plugin '{name}' exited unexpectedly")]
    UnexpectedExit { name: String },
    #[error("plugin '{name}' crashed during exit ({status})")]
    CrashedDuringExit {
        name: String,
        status: std::process::ExitStatus,
    },
    #[error("io error waiting on plugin: {0}")]
    Wait(#[source] std::io::Error),
}

fn send_sigterm(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        tracing::warn!(pid, "pid does not fit in i32, cannot send SIGTERM");
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::warn!(pid, error = %err, "failed to send SIGTERM to plugin");
    }
}

struct State {
    child: Option<Child>,
    closed: bool,
}

/// A handle to a spawned plugin subprocess (the "Plugin process handle" of
/// §3). `closed` and the child handle share a single mutex, so `Close`
/// (which inspects/mutates `closed` then signals the child) is always
/// serialized against `Wait`'s post-exit inspection of the same flag,
/// per the design note in §9.
pub struct PluginHandle {
    name: String,
    state: AsyncMutex<State>,
    rpc_channel: SyncMutex<Option<tonic::transport::Channel>>,
    stdio_tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl PluginHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Idempotent. Sets the closed flag, drops any live RPC connection,
    /// and sends `SIGTERM` to the child. Does not wait for exit — call
    /// [`PluginHandle::wait`] for that.
    pub async fn close(&self) {
        let mut guard = self.state.lock().await;
        if guard.closed {
            return;
        }
        guard.closed = true;

        if let Some(channel) = self.rpc_channel.lock().take() {
            drop(channel);
        }

        if let Some(child) = guard.child.as_ref() {
            if let Some(pid) = child.id() {
                send_sigterm(pid);
            }
        }
    }

    /// Blocks until the child exits.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnexpectedExit`] if the child exited
    /// before [`PluginHandle::close`] was ever called, or
    /// [`SupervisorError::CrashedDuringExit`] if it exited non-zero after
    /// `close`. Returns `Ok(())` if the child already exited cleanly after
    /// `close`, or if `wait` is called again after already observing exit.
    pub async fn wait(&self) -> Result<(), SupervisorError> {
        let mut guard = self.state.lock().await;

        let Some(child) = guard.child.as_mut() else {
            return Ok(());
        };
        let status = child.wait().await.map_err(SupervisorError::Wait)?;
        let was_closed = guard.closed;
        guard.child = None;
        drop(guard);

        for task in self.stdio_tasks.lock().drain(..) {
            task.abort();
        }

        if !was_closed {
            return Err(SupervisorError::UnexpectedExit {
                name: self.name.clone(),
            });
        }
        if !status.success() {
            return Err(SupervisorError::CrashedDuringExit {
                name: self.name.clone(),
                status,
            });
        }
        Ok(())
    }

    /// Used by [`Supervisor::load_backend_plugin`]'s cancellation path:
    /// closes gracefully, then forcibly kills the child rather than
    /// waiting for it to honor `SIGTERM`.
    async fn close_and_force_kill(&self) {
        self.close().await;
        let mut guard = self.state.lock().await;
        if let Some(child) = guard.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn render_prefix(plugin: &str, level: &'static str) -> Prefix {
    let plugin = plugin.to_owned();
    Prefix::Lazy(Box::new(move || {
        let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        format!("{now} {level} [{plugin}] ").into_bytes()
    }))
}

async fn pump_stream<R, W>(mut reader: R, sink: W, plugin: String, level: &'static str)
where
    R: tokio::io::AsyncRead + Unpin,
    W: Write,
{
    let mut writer = PrefixWriter::new(sink, render_prefix(&plugin, level));
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if writer.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        }
    }
}

/// Spawns plugin processes and, for backend plugins, dials their Unix
/// socket once it appears.
pub struct Supervisor;

impl Supervisor {
    /// Spawns `exec_path` with `--data-dir <data_dir>` and, when
    /// `config_path` is set, `-c <config_path>`. The child is placed in
    /// its own process group so signals aimed at the supervisor don't
    /// reach it implicitly. Returns immediately; the child's stdio keeps
    /// streaming to the parent's own stdio (prefixed) until it exits.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Cancelled`] if `cancel` is already
    /// triggered, or [`SupervisorError::Spawn`] if the process could not
    /// be started.
    pub async fn load(
        name: &str,
        exec_path: &Path,
        data_dir: &Path,
        config_path: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<Arc<PluginHandle>, SupervisorError> {
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }

        let mut cmd = Command::new(exec_path);
        cmd.arg("--data-dir").arg(data_dir);
        if let Some(config_path) = config_path {
            cmd.arg("-c").arg(config_path);
        }
        cmd.process_group(0);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut stdio_tasks = Vec::new();
        if let Some(stdout) = stdout {
            stdio_tasks.push(tokio::spawn(pump_stream(
                stdout,
                std::io::stdout(),
                name.to_owned(),
                "I",
            )));
        }
        if let Some(stderr) = stderr {
            stdio_tasks.push(tokio::spawn(pump_stream(
                stderr,
                std::io::stderr(),
                name.to_owned(),
                "E",
            )));
        }

        tracing::info!(plugin = name, "spawned plugin process");

        Ok(Arc::new(PluginHandle {
            name: name.to_owned(),
            state: AsyncMutex::new(State {
                child: Some(child),
                closed: false,
            }),
            rpc_channel: SyncMutex::new(None),
            stdio_tasks: SyncMutex::new(stdio_tasks),
        }))
    }

    /// Like [`Supervisor::load`], but additionally waits for
    /// `<data_dir>/sockets/<name>.sock` to appear (polling every 10ms, up
    /// to `deadline`), dials it, and wraps the connection as an
    /// [`RpcBackend`].
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Cancelled`] if `cancel` fires before the
    /// socket appears (the handle is closed and the process killed first),
    /// [`SupervisorError::LoadTimeout`] if `deadline` elapses first, or
    /// [`SupervisorError::Dial`] if the socket never accepts a connection.
    pub async fn load_backend_plugin(
        name: &str,
        exec_path: &Path,
        data_dir: &Path,
        config_path: Option<&Path>,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<(RpcBackend, Arc<PluginHandle>), SupervisorError> {
        let handle = Self::load(name, exec_path, data_dir, config_path, cancel).await?;

        let socket_path = data_dir.join("sockets").join(format!("{name}.sock"));
        let wait_for_socket = async {
            loop {
                if socket_path.exists() {
                    return;
                }
                tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
            }
        };

        tokio::select! {
            () = wait_for_socket => {},
            () = cancel.cancelled() => {
                handle.close_and_force_kill().await;
                return Err(SupervisorError::Cancelled);
            }
            () = tokio::time::sleep(deadline) => {
                handle.close_and_force_kill().await;
                return Err(SupervisorError::LoadTimeout { name: name.to_owned() });
            }
        }

        let channel = dial_unix(socket_path, SOCKET_DIAL_TIMEOUT)
            .await
            .map_err(|err| SupervisorError::Dial(err.to_string()))?;

        *handle.rpc_channel.lock() = Some(channel.clone());
        Ok((RpcBackend::new(channel), handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S4: spawn a fake plugin that creates
    /// `<data_dir>/sockets/backend.sock` and waits for `TERM`. Loading it
    /// should yield a usable backend; `close`/`wait` should both succeed.
    #[tokio::test]
    async fn scenario_s4_plugin_spawn_and_graceful_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sockets")).unwrap();

        let script = dir.path().join("fake-plugin.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             touch \"$2/sockets/backend.sock\"\n\
             trap 'exit 0' TERM\n\
             while true; do sleep 1; done\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script, perms).unwrap();
        }

        let cancel = CancellationToken::new();
        let (_backend, handle) = Supervisor::load_backend_plugin(
            "backend",
            &script,
            dir.path(),
            None,
            &cancel,
            Duration::from_secs(5),
        )
        .await
        .expect("plugin should load");

        handle.close().await;
        handle.wait().await.expect("graceful shutdown should succeed");
    }

    #[tokio::test]
    async fn load_honors_pre_existing_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Supervisor::load("x", Path::new("/bin/true"), dir.path(), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Cancelled));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let handle = Supervisor::load("x", Path::new("/bin/sleep"), dir.path(), None, &cancel)
            .await
            .unwrap();

        handle.close().await;
        handle.close().await;
        let _ = handle.wait().await;
    }
}

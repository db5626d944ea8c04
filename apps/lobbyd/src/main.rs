//! `lobbyd` — the broker's process entry point (C12, §12).
//!
//! Parses the two-level flag surface from spec §6 (root flags plus the
//! `run` subcommand's overrides), layers `lobby_config::Settings` from
//! defaults → optional TOML file → `LOBBY_*` env → CLI overrides, installs
//! logging, wires interrupt/terminate signals to the application's
//! [`tokio_util::sync::CancellationToken`], runs the broker to completion
//! and maps the resulting error set onto an exit code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lobby_config::{CliOverrides, Settings};
use lobby_runtime::application::Application;

/// Lobby — pluggable message/endpoint broker.
#[derive(Parser)]
#[command(name = "lobbyd")]
#[command(about = "Lobby message/endpoint broker")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file; absence skips file parsing.
    #[arg(short = 'c', long = "config-file")]
    config_file: Option<PathBuf>,

    /// Root directory for sockets, the embedded store and other run state.
    #[arg(long, default_value = ".lobby")]
    data_dir: PathBuf,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker: registry, configured backend plugins, RPC (unix +
    /// tcp) and HTTP servers.
    Run {
        /// Backend plugin name to spawn; repeatable. Replaces (not
        /// appends to) the configured list when given.
        #[arg(long = "backend")]
        backend: Vec<String>,

        /// Directory `lobby-<name>` plugin binaries are loaded from.
        #[arg(long)]
        plugin_dir: Option<PathBuf>,

        /// Binary RPC (gRPC-shaped) listen port.
        #[arg(long)]
        grpc_port: Option<u16>,

        /// HTTP listen port.
        #[arg(long)]
        http_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Commands::Run {
        backend,
        plugin_dir,
        grpc_port,
        http_port,
    } = cli.command;

    let settings = Settings::load(cli.config_file.as_deref())?.with_cli_overrides(CliOverrides {
        data_dir: Some(cli.data_dir),
        debug: cli.debug,
        plugin_dir,
        backends: backend,
        grpc_port,
        http_port,
    });

    lobby_core::logging::init_tracing(settings.debug);

    let app = Application::new(settings);
    let cancel = app.cancellation_token();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        cancel.cancel();
    });

    let errors = app.run().await;

    if errors.is_empty() {
        Ok(())
    } else {
        tracing::error!(errors = %errors, "lobby exited with errors");
        anyhow::bail!(errors.to_string())
    }
}

/// Resolves once either `ctrl_c` (`SIGINT`) or `SIGTERM` is observed.
/// `SIGTERM` handling is Unix-only, matching the supervisor's own
/// Unix-specific process-group/`SIGTERM` machinery (`lobby-supervisor`).
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_root_and_run_flags() {
        let cli = Cli::parse_from([
            "lobbyd",
            "-c",
            "lobby.toml",
            "--data-dir",
            "/tmp/lobby",
            "--debug",
            "run",
            "--backend",
            "bolt",
            "--backend",
            "redis",
            "--plugin-dir",
            "/opt/plugins",
            "--grpc-port",
            "6000",
            "--http-port",
            "6001",
        ]);

        assert_eq!(cli.config_file, Some(PathBuf::from("lobby.toml")));
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/lobby"));
        assert!(cli.debug);

        let Commands::Run {
            backend,
            plugin_dir,
            grpc_port,
            http_port,
        } = cli.command;
        assert_eq!(backend, vec!["bolt".to_string(), "redis".to_string()]);
        assert_eq!(plugin_dir, Some(PathBuf::from("/opt/plugins")));
        assert_eq!(grpc_port, Some(6000));
        assert_eq!(http_port, Some(6001));
    }

    #[test]
    fn cli_defaults_data_dir() {
        let cli = Cli::parse_from(["lobbyd", "run"]);
        assert_eq!(cli.data_dir, PathBuf::from(".lobby"));
        assert!(!cli.debug);
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}

//! Layered configuration loader (C12, §10.3).
//!
//! Schema is exactly spec §6's TOML table. Layers, lowest to highest
//! priority: built-in defaults, an optional TOML file (`-c/--config-file`),
//! `LOBBY_*` environment variables, then explicit CLI-flag overrides
//! applied last by the caller (figment doesn't know about `clap`).
//! Grounded on `modkit`'s own bootstrap config layer (`figment`, TOML +
//! env) and on `original_source/cli/app/config.go`'s config struct shape.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, value::Value};
use serde::{Deserialize, Serialize};

/// Which `Registry` (C6) implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryKind {
    #[default]
    #[serde(alias = "")]
    Embedded,
    DistributedKv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsSection {
    pub plugin_dir: PathBuf,
    pub socket_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            socket_dir: PathBuf::from("sockets"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginsSection {
    #[serde(default)]
    pub backends: Vec<String>,
    /// `[plugins.config.<name>]` — an opaque primitive table per backend,
    /// decoded by the plugin itself. The core never interprets these keys.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GrpcSection {
    pub port: u16,
}

impl Default for GrpcSection {
    fn default() -> Self {
        Self { port: 5656 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpSection {
    pub port: u16,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self { port: 5657 }
    }
}

/// Fully-resolved configuration, after all layers are merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub registry: RegistryKind,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub plugins: PluginsSection,
    #[serde(default)]
    pub grpc: GrpcSection,
    #[serde(default)]
    pub http: HttpSection,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".lobby"),
            debug: false,
            registry: RegistryKind::default(),
            paths: PathsSection::default(),
            plugins: PluginsSection::default(),
            grpc: GrpcSection::default(),
            http: HttpSection::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

impl Settings {
    /// Loads settings layered as defaults → optional TOML file → `LOBBY_*`
    /// environment variables. `config_file` absence skips the file layer
    /// entirely (per spec §6, "absence skips file parsing"), it is not
    /// treated as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file exists but fails to parse,
    /// or if a layer's value mismatches the expected shape.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("LOBBY_").split("_"));

        Ok(figment.extract()?)
    }

    /// Applies CLI-flag overrides on top of an already-loaded [`Settings`].
    /// `None` fields are left untouched; `backends`, when non-empty,
    /// replaces (not appends to) the configured list.
    #[must_use]
    pub fn with_cli_overrides(mut self, overrides: CliOverrides) -> Self {
        if let Some(data_dir) = overrides.data_dir {
            self.data_dir = data_dir;
        }
        if overrides.debug {
            self.debug = true;
        }
        if let Some(plugin_dir) = overrides.plugin_dir {
            self.paths.plugin_dir = plugin_dir;
        }
        if !overrides.backends.is_empty() {
            self.plugins.backends = overrides.backends;
        }
        if let Some(port) = overrides.grpc_port {
            self.grpc.port = port;
        }
        if let Some(port) = overrides.http_port {
            self.http.port = port;
        }
        self
    }
}

/// CLI-flag overrides, applied after the figment layers (`lobbyd`'s root
/// and `run` flag sets — spec §6).
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub data_dir: Option<PathBuf>,
    pub debug: bool,
    pub plugin_dir: Option<PathBuf>,
    pub backends: Vec<String>,
    pub grpc_port: Option<u16>,
    pub http_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_file_given() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from(".lobby"));
        assert_eq!(settings.grpc.port, 5656);
        assert_eq!(settings.http.port, 5657);
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lobby.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            data-dir = "/var/lib/lobby"
            debug = true
            registry = "distributed-kv"

            [grpc]
            port = 9001

            [plugins]
            backends = ["bolt", "redis"]
            "#
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/lobby"));
        assert!(settings.debug);
        assert_eq!(settings.registry, RegistryKind::DistributedKv);
        assert_eq!(settings.grpc.port, 9001);
        assert_eq!(settings.plugins.backends, vec!["bolt", "redis"]);
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let settings = Settings::default().with_cli_overrides(CliOverrides {
            data_dir: Some(PathBuf::from("/tmp/override")),
            debug: true,
            grpc_port: Some(7000),
            ..Default::default()
        });
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/override"));
        assert!(settings.debug);
        assert_eq!(settings.grpc.port, 7000);
        assert_eq!(settings.http.port, 5657);
    }
}

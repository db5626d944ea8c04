//! Leveled, prefixed logging facade (C1, §10.1).
//!
//! `original_source/log/logger.go` wraps `*log.Logger` with an `i |`/`d |`
//! level marker, an optional prefix, and a `DebugEnabled` gate. The Rust
//! rendition keeps the same shape but backs it with `tracing`: the "prefix"
//! becomes a named span rather than a textual tag, and "`DebugEnabled`"
//! becomes the `EnvFilter` installed at process start.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `debug` mirrors the original's `DebugEnabled`: when set, the default
/// filter is `debug`, otherwise `info`. `RUST_LOG`, if set, always wins.
pub fn init_tracing(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Returns a span that tags every event emitted while it is entered with
/// `component`, standing in for the original's per-component logger
/// prefix (`"bolt registry:"`, `"gRPC server:"`, `"http server:"` — see
/// SPEC_FULL §11 item 3).
#[must_use]
pub fn component_span(component: &'static str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Returns a span tagging events from a single plugin subprocess's stdio,
/// standing in for the original's per-plugin `log.Prefix`.
#[must_use]
pub fn plugin_span(plugin_name: &str) -> tracing::Span {
    tracing::info_span!("plugin", name = %plugin_name)
}

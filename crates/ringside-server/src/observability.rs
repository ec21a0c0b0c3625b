//! Tracing setup.
//!
//! The subscriber is installed before configuration is read, so it starts at
//! `info` and is switched to `logging.level` once the config is loaded.
//! `RUST_LOG`, when set, wins over both.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the global subscriber at `info`.
pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let (reload_layer, handle) = reload::Layer::new(filter_for(level));
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switches the active filter to `level` unless `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if env_filter().is_some() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| *f = EnvFilter::new(level));
    }
}

fn env_filter() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

fn filter_for(level: &str) -> EnvFilter {
    env_filter().unwrap_or_else(|| EnvFilter::new(level))
}

//! Tracing subscriber setup for binaries embedding the engine.

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, falling back
/// to `level` for this crate.
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("postvault_persistence={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .is_ok()
}

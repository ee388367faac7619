//! Tracing subscriber setup for hosts and tests
//!
//! The library itself only emits through `tracing` macros; installing a
//! subscriber is the host's choice.

use anyhow::Context;

/// Install a compact `fmt` subscriber filtered by `RUST_LOG`, falling back
/// to `default_level` (e.g. `"info"` or `"offset_engine=debug"`).
///
/// Returns `Ok(false)` if a global subscriber was already installed, so it
/// is safe to call more than once.
///
/// # Errors
///
/// When neither `RUST_LOG` nor `default_level` is a valid filter directive.
pub fn init_tracing(default_level: &str) -> anyhow::Result<bool> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .context("Failed to create log filter")?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_tracing("warn").is_ok());
        assert!(!init_tracing("warn").unwrap());
    }
}

//! Tracing subscriber setup for binaries embedding the engine.
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=tally=trace` - Show trace for tally crates only
//! - Default: `info,tally=debug,sqlx=warn`

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,tally=debug,sqlx=warn";

/// Installs the global fmt subscriber.
///
/// Returns `false` if a subscriber was already installed (tests, or a host
/// application with its own).
pub fn init_tracing() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing();
        assert!(!init_tracing());
    }
}

//! Logging setup.
//!
//! The original client kept a hand-rolled, per-stream-filtered `Debug`
//! class; here that role is filled by `tracing`, with call sites using
//! `tracing::{debug,info,warn,error}!` directly. This module only owns the
//! mapping from the engine's numeric `--debug` level (0..5, design §6) to a
//! `tracing` filter, and the one-time subscriber initialization the binary
//! entry point calls.

use tracing_subscriber::EnvFilter;

/// Debug verbosity, matching the `-d[=N]` / `--debug[=N]` flag (design §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Level {
    #[default]
    None,
    Errors,
    Warnings,
    Info,
    Details,
    Everything,
}

impl Level {
    pub fn from_numeric(n: u8) -> Self {
        match n {
            0 => Level::None,
            1 => Level::Errors,
            2 => Level::Warnings,
            3 => Level::Info,
            4 => Level::Details,
            _ => Level::Everything,
        }
    }

    fn filter_directive(self) -> &'static str {
        match self {
            Level::None => "off",
            Level::Errors => "error",
            Level::Warnings => "warn",
            Level::Info => "info",
            Level::Details => "debug",
            Level::Everything => "trace",
        }
    }
}

/// Initializes the global `tracing` subscriber at the given level. Safe to
/// call at most once per process; the bridge binary is the only expected
/// caller.
pub fn init(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_levels_saturate_at_everything() {
        assert_eq!(Level::from_numeric(0), Level::None);
        assert_eq!(Level::from_numeric(5), Level::Everything);
        assert_eq!(Level::from_numeric(200), Level::Everything);
    }
}

//! Structured logging setup

use streamrtc_core::StreamRtcError;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Installs the process-wide `tracing` subscriber
#[derive(Debug, Default)]
pub struct DebugLogger;

impl DebugLogger {
    /// Create new debug logger
    pub fn new() -> Self {
        Self
    }

    /// Initialize logging from `RUST_LOG`, falling back to `info`
    ///
    /// Calling this again after a subscriber is installed is harmless.
    pub fn init_logging() -> Result<(), StreamRtcError> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        Self::install(filter)
    }

    /// Initialize logging with an explicit filter such as
    /// `"streamrtc=debug,streamrtc_signaling=trace"`
    pub fn init_with_filter(directives: &str) -> Result<(), StreamRtcError> {
        let filter = EnvFilter::try_new(directives).map_err(|e| StreamRtcError::Initialization {
            reason: format!("invalid log filter '{}': {}", directives, e),
        })?;
        Self::install(filter)
    }

    fn install(filter: EnvFilter) -> Result<(), StreamRtcError> {
        let result = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
        if result.is_err() {
            tracing::debug!("tracing subscriber already installed");
        }
        Ok(())
    }
}

//! Structured debug logging setup

use peerview_core::PeerViewError;
use tracing_subscriber::EnvFilter;

/// Filter used when none is configured
pub const DEFAULT_FILTER: &str = "peerview=debug,peerview_core=debug,peerview_signaling=debug";

/// Debug logger for structured logging
#[derive(Debug, Default)]
pub struct DebugLogger;

impl DebugLogger {
    /// Create new debug logger
    pub fn new() -> Self {
        Self
    }

    /// Install the global fmt subscriber
    ///
    /// `RUST_LOG` wins over `filter` when set. Calling this again, or after
    /// another subscriber was installed, is a no-op.
    pub fn init_logging(filter: &str) -> Result<(), PeerViewError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(filter).map_err(|e| PeerViewError::Initialization {
                reason: format!("invalid log filter {:?}: {}", filter, e),
            })?,
        };

        match tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
        {
            Ok(()) => tracing::debug!("Debug logging initialized"),
            Err(_) => tracing::debug!("Global subscriber already installed"),
        }
        Ok(())
    }
}

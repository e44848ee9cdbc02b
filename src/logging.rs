//! Logging setup.
//!
//! Logs go to **stderr**: stdout carries the handshake line the host reads.
//! Filtering follows `RUST_LOG`, e.g.
//!
//! ```bash
//! RUST_LOG=hemmer_provider_azurerm_eventgrid=debug ./hemmer-provider-azurerm-eventgrid
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber.
///
/// Returns `false` if one was already installed.
pub fn init_logging() -> bool {
    init_logging_with_default(DEFAULT_LOG_LEVEL)
}

/// Like [`init_logging`] with another fallback level.
pub fn init_logging_with_default(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert!(EnvFilter::try_new("hemmer_provider_azurerm_eventgrid=debug").is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_provider_azurerm_eventgrid::azure=trace").is_ok());
    }

    #[test]
    fn test_second_init_is_refused() {
        init_logging_with_default("debug");
        assert!(!init_logging());
    }
}

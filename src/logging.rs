//! Tracing subscriber initialization.

use std::sync::OnceLock;

use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVE: &str = "info,gateway_core=debug";

/// Initialize the global tracing subscriber once; later calls are no-ops.
///
/// Honors `RUST_LOG` for filtering and `GATEWAY_LOG_FORMAT=json` for
/// line-delimited JSON output. Tolerates an embedding application having
/// installed its own subscriber already.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

        let json_output = std::env::var("GATEWAY_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json_output {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_filter(filter))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_filter(filter))
                .try_init()
        };

        if result.is_err() {
            debug!("Global tracing subscriber already initialized, skipping");
        }
    });
}

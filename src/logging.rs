//! Tracing initialisation driven by [`LoggingConfig`].

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber.
///
/// The filter directive comes from `RUST_LOG` when set, otherwise from the
/// configured level. Format is `json` for production ingestion or human
/// readable `pretty` output.
pub fn init_tracing(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.pretty().try_init()
    }
}

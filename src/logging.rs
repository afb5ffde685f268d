//! Tracing subscriber setup for the binary.

use crate::constants::LOG_FORMAT_ENV;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the default `bkcron=info` filter. `BKCRON_LOG_FORMAT=json`
/// switches to JSON lines, anything else prints human readable output.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_CRATE_NAME"))));

    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v == "json");
    let registry = tracing_subscriber::registry().with(env_filter);
    // a second init (e.g. in tests) keeps the first subscriber
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
    };
}

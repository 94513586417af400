//! Subscriber setup for the `sitebak` binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
///
/// Library code never calls this; a second call is ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    #[cfg(feature = "logs-json")]
    let result = registry
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .try_init();

    #[cfg(not(feature = "logs-json"))]
    let result = registry
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();

    if let Err(e) = result {
        tracing::debug!("logging already initialised: {}", e);
    }
}

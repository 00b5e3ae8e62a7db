use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global tracing subscriber, filtered by `RUST_LOG` (`info` when unset).
/// JSON output is meant for deployed services, the default format for local development.
pub fn init_tracing(json: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_layer = if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_filter(filter())
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_filter(filter())
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

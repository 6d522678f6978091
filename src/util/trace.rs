use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "tallybot=debug,tower_http=debug,sqlx=warn,info";

/// Stdout subscriber with an env-overridable filter. `RUST_LOG` wins when
/// set; the default keeps sqlx quiet and our own spans verbose.
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();
}

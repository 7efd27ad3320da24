use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// install a global fmt subscriber filtered by `RUST_LOG`
///
/// Returns false if a subscriber was already installed; safe to call from
/// every demo and test.
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

pub fn init_with(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

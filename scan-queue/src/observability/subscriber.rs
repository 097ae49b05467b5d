use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global subscriber for a hosting process
///
/// `filter` uses `EnvFilter` syntax and is overridden by `RUST_LOG`.
/// Set `json` for one JSON object per line. Returns false if a global
/// subscriber was already installed.
pub fn init_tracing(filter: &str, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(fmt::layer().json()).try_init().is_ok()
    } else {
        registry.with(fmt::layer()).try_init().is_ok()
    }
}

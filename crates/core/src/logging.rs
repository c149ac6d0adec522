//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,cloud_renderer=debug,cloud_rhi=info";

/// Installs the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` when present and falls back to
/// [`DEFAULT_FILTER`]. Output carries the target and thread id, which keeps
/// validation-layer messages distinguishable from renderer logs.
///
/// # Example
/// ```
/// cloud_core::init_logging();
/// tracing::info!("Renderer starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second call (e.g. from doctests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

//! Diagnostic tracing for the coupling engine.
//!
//! Tracing is for diagnosis only, written to stderr and filtered by `RUST_LOG`.
//! Product output (libraries, solver logs, `manifest.json`) lands in the build
//! directory whatever the filter says.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber; `RUST_LOG` directives on top of a `warn` default.
///
/// Spans carry the State, material and stage of each solver call, so
/// ```bash
/// RUST_LOG=burnup::io=debug burnup run
/// ```
/// shows which working directories were skipped, retried or solved.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .compact(),
        )
        .init();
}

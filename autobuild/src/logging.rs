//! Diagnostic tracing to stderr, filtered by `RUST_LOG`.
//!
//! Build history is recorded in `.autobuild/state/system_state.json` no matter
//! what the filter says; tracing only explains how it got there.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber, at `warn` unless `RUST_LOG` says otherwise.
///
/// `RUST_LOG=autobuild=debug autobuild run` shows every dispatch and write.
/// A second call is a no-op.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .try_init();
}

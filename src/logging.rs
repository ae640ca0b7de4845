//! Diagnostic logging.
//!
//! Logs always go to stderr: stdout carries the deletion script. The filter
//! comes from `DEDUP_LOG` when set, otherwise from the verbosity flag.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "DEDUP_LOG";

pub fn build_env_filter(verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    if verbose {
        EnvFilter::new("warn,subtree_dedup=debug")
    } else {
        EnvFilter::new("warn")
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(verbose: bool) {
    let _ = Registry::default()
        .with(build_env_filter(verbose))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

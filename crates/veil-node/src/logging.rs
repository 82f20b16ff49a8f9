//! Log output -- builds the `tracing` dispatcher a daemon logs through.
//!
//! Each daemon owns its dispatcher instead of sharing one process-wide
//! logger, so two daemons embedded in one host can log with different
//! filters. The binary installs its dispatcher as the global default.

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use crate::config::LogSection;

/// Build a dispatcher from `[log]`. `RUST_LOG` overrides the filter.
pub fn dispatch(log: &LogSection) -> anyhow::Result<Dispatch> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&log.filter)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true);
    let dispatch = if log.json {
        Dispatch::new(builder.json().finish())
    } else {
        Dispatch::new(builder.finish())
    };
    Ok(dispatch)
}

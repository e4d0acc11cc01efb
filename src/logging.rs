//! Tracing subscriber setup.
//!
//! Log lines go to stderr so stdout stays reserved for command summaries.
//! The filter comes from `RUST_LOG` and defaults to `logsync=info`.
//!
//! ```bash
//! RUST_LOG=logsync=debug logsync sync          # per-page events
//! logsync --log-format json sync               # one JSON object per event
//! ```

use anyhow::Result;
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "logsync=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber. Call once, before any work starts.
pub fn init(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
    }

    Ok(())
}

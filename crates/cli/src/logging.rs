//! Logging setup for the binary
//!
//! Log lines go to stderr so command output on stdout stays machine readable.

use std::io;

use clap::ValueEnum;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set (e.g. "info", "pgupgrade_migrate=debug")
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> anyhow::Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => self.level_filter(),
        }
    }

    fn level_filter(&self) -> anyhow::Result<EnvFilter> {
        Ok(EnvFilter::try_new(&self.level)?)
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(config.filter()?);

    match config.format {
        LogFormat::Json => registry
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?,
        LogFormat::Pretty => registry
            .with(Layer::new().with_writer(io::stderr).pretty())
            .try_init()?,
        LogFormat::Compact => registry
            .with(Layer::new().with_writer(io::stderr).compact().with_target(false))
            .try_init()?,
    }

    Ok(())
}

//! Tracing subscriber setup.
//!
//! An explicit verbosity flag wins; otherwise the standard `RUST_LOG`
//! environment filter applies, defaulting to errors only. Set
//! `GARDI_LOG_FORMAT=json` for structured output.

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, layer::SubscriberExt, registry};

pub fn init(level: Option<Level>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::default().add_directive(LevelFilter::from_level(level).into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
    };

    let json = std::env::var("GARDI_LOG_FORMAT")
        .is_ok_and(|value| value.eq_ignore_ascii_case("json"));

    let subscriber = registry().with(filter);
    if json {
        tracing::subscriber::set_global_default(subscriber.with(fmt::layer().json()))
            .context("failed to initialize telemetry")?;
    } else {
        tracing::subscriber::set_global_default(subscriber.with(fmt::layer()))
            .context("failed to initialize telemetry")?;
    }
    Ok(())
}

//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so stdout carries only command output and the final
//! outcome line.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber.
///
/// `directives` is an `EnvFilter` string such as `info` or
/// `info,castwarden::pipeline=warn`. The config loader has already folded
/// `RUST_LOG` into it.
pub fn init(directives: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(directives)
        .with_context(|| format!("Invalid log filter {:?}", directives))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

use anyhow::{Context, Result};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a stderr subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) -> Result<()> {
    let directive = level
        .parse()
        .with_context(|| format!("Invalid log level '{}'", level))?;
    let filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr) // stdout is for the port listings
                .with_target(false),
        )
        .with(filter)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

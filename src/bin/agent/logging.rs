use anyhow::Result;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "browser_pilot=info,agent=info";

/// Install the global subscriber. Writes to stderr unless `log_file` is set.
pub fn init_logging(json: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    match (log_file, json) {
        (Some(path), true) => {
            let file = std::sync::Arc::new(std::fs::File::create(path)?);
            builder.json().with_ansi(false).with_writer(file).try_init()
        }
        (Some(path), false) => {
            let file = std::sync::Arc::new(std::fs::File::create(path)?);
            builder.with_ansi(false).with_writer(file).try_init()
        }
        (None, true) => builder.json().with_writer(std::io::stderr).try_init(),
        (None, false) => builder.with_writer(std::io::stderr).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    info!("logging initialized");
    Ok(())
}

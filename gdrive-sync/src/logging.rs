use std::io;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "GDRIVE_SYNC_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the global subscriber: one line per event with an RFC 3339 UTC
/// timestamp, level and message, written to stdout.
pub fn init() -> anyhow::Result<()> {
    let filter = build_filter(std::env::var(LOG_ENV).ok().as_deref())?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(io::stdout);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize logging: {err}"))
}

fn build_filter(directive: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directive = directive
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE);
    EnvFilter::try_new(directive).map_err(|err| anyhow::anyhow!("invalid {LOG_ENV} value: {err}"))
}

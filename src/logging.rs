use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;

use crate::Result;

/// Install the process-wide tracing subscriber, writing to stderr so that
/// stdout only carries command output.
///
/// Records emitted through the `log` crate by the HTTP stack are forwarded
/// to the same subscriber.
pub fn init(level: LevelFilter) -> Result<()> {
    tracing_log::LogTracer::init()?;
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let subscriber = tracing_subscriber::registry().with(level).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

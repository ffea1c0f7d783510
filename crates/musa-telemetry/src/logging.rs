//! Structured logging.
//!
//! One subscriber per process, installed once from resolved configuration:
//! a stdout formatting layer (text or JSON) next to the trace provider's
//! export layer, both behind the same level filter.

use std::io::IsTerminal;

use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

use crate::tracing_setup::{BoxedLayer, TraceProvider};
use crate::{LogFormat, TelemetryConfig, TelemetryError};

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(
    config: &TelemetryConfig,
    traces: &dyn TraceProvider,
) -> Result<(), TelemetryError> {
    let level = LevelFilter::from_level(config.log_level);

    let layers: Vec<BoxedLayer> = vec![
        traces.layer().with_filter(level).boxed(),
        console_layer(config.log_format).with_filter(level).boxed(),
    ];

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::debug!(
        level = %config.log_level,
        format = %config.log_format,
        "structured logging initialized"
    );

    Ok(())
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stdout().is_terminal())
            .with_writer(std::io::stdout)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stdout)
            .boxed(),
    }
}

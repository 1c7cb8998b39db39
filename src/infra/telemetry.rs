use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, fmt,
    filter::Directive,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::engine_process::ENGINE_STDERR_TARGET;
use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber and describe the crate's metrics.
///
/// `RUST_LOG` still wins over both configured levels.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    tracing_subscriber::registry()
        .with(env_filter(logging)?)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn env_filter(logging: &LoggingSettings) -> Result<EnvFilter, InfraError> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    if let Some(level) = logging.engine_level {
        let directive: Directive = format!("{ENGINE_STDERR_TARGET}={level}")
            .parse()
            .map_err(|err| InfraError::telemetry(format!("invalid engine log directive: {err}")))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tessera_preview_cache_hit_total",
            Unit::Count,
            "Total number of preview cache hits."
        );
        describe_counter!(
            "tessera_preview_cache_miss_total",
            Unit::Count,
            "Total number of preview cache misses."
        );
        describe_counter!(
            "tessera_preview_cache_evict_total",
            Unit::Count,
            "Total number of preview cache evictions due to capacity."
        );
        describe_histogram!(
            "tessera_render_ms",
            Unit::Milliseconds,
            "Engine render latency in milliseconds, by quality tier and outcome."
        );
        describe_counter!(
            "tessera_queue_job_total",
            Unit::Count,
            "Total number of batch queue jobs settled, by outcome."
        );
        describe_gauge!(
            "tessera_engine_memory_percent",
            Unit::Percent,
            "Most recent engine memory usage as a percentage of its limit."
        );
    });
}

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pagelens_jobs_submitted_total",
            Unit::Count,
            "Total number of async render jobs accepted."
        );
        describe_counter!(
            "pagelens_jobs_completed_total",
            Unit::Count,
            "Total number of async render jobs that reached completed."
        );
        describe_counter!(
            "pagelens_jobs_failed_total",
            Unit::Count,
            "Total number of async render jobs that reached failed."
        );
        describe_counter!(
            "pagelens_jobs_expired_total",
            Unit::Count,
            "Total number of job records reclaimed after TTL expiry."
        );
        describe_gauge!(
            "pagelens_pool_slots_in_use",
            Unit::Count,
            "Render pool slots currently checked out."
        );
        describe_histogram!(
            "pagelens_render_duration_ms",
            Unit::Milliseconds,
            "Wall-clock duration of render attempts in milliseconds."
        );
    });
}

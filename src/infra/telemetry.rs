//! Tracing subscriber setup and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Transport crates that are chatty at `debug` and below.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "h2=warn", "tower=warn"];

/// Install the global subscriber: level filter, error spans, then the
/// configured output format.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(logging))
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(err.to_string()))
}

/// `RUST_LOG` wins over the configured level; transport noise stays at `warn`
/// unless `RUST_LOG` names those targets itself.
fn env_filter(logging: &LoggingSettings) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let explicit = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    for directive in QUIET_TARGETS {
        let target = directive.split('=').next().unwrap_or_default();
        if explicit.contains(target) {
            continue;
        }
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }
    filter
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "newsletter_cache_hit_total",
            Unit::Count,
            "Total number of cached query hits."
        );
        describe_counter!(
            "newsletter_cache_miss_total",
            Unit::Count,
            "Total number of cached query misses that ran the handler."
        );
        describe_counter!(
            "newsletter_cache_invalidated_total",
            Unit::Count,
            "Total number of cache keys removed by write commands and event handlers."
        );
        describe_counter!(
            "newsletter_events_published_total",
            Unit::Count,
            "Total number of domain events enqueued on the bus."
        );
        describe_counter!(
            "newsletter_events_dispatched_total",
            Unit::Count,
            "Total number of domain events drained by the dispatcher."
        );
        describe_counter!(
            "newsletter_event_handler_failed_total",
            Unit::Count,
            "Total number of event handler invocations that failed or panicked."
        );
        describe_histogram!(
            "newsletter_event_dispatch_ms",
            Unit::Milliseconds,
            "Time spent draining one dispatcher batch in milliseconds."
        );
    });
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn filter_keeps_configured_level() {
        let logging = LoggingSettings {
            level: LevelFilter::DEBUG,
            format: LogFormat::Compact,
        };
        let rendered = env_filter(&logging).to_string();
        assert!(rendered.contains("hyper=warn"));
    }

    #[test]
    fn metric_descriptions_are_idempotent() {
        describe_metrics();
        describe_metrics();
        assert!(METRIC_DESCRIPTIONS.is_completed());
    }
}

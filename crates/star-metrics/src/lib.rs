//! Metrics sink capability (spec.md §4.7).
//!
//! Structured logging itself stays on the ambient `tracing` macros used
//! throughout the Hub and client; this trait covers only the
//! counter/gauge/timing surface operators hang a real backend off of.

use std::time::Duration;

/// Tag list shorthand; kept as a slice of borrowed pairs so callers don't
/// need to allocate a `Vec` on every hot-path call.
pub type Tags<'a> = [(&'a str, &'a str)];

/// Counters, gauges and timings the Hub/client report at their seams.
pub trait MetricsSink: Send + Sync {
    fn counter_inc(&self, name: &str, tags: &Tags<'_>);
    fn gauge_set(&self, name: &str, value: f64, tags: &Tags<'_>);
    fn timing_observe(&self, name: &str, duration: Duration, tags: &Tags<'_>);
}

/// Default sink (spec.md §4.7: "Default implementation is a no-op").
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn counter_inc(&self, _name: &str, _tags: &Tags<'_>) {}
    fn gauge_set(&self, _name: &str, _value: f64, _tags: &Tags<'_>) {}
    fn timing_observe(&self, _name: &str, _duration: Duration, _tags: &Tags<'_>) {}
}

/// A sink that reports through `tracing`, for operators who just want
/// metrics visible in their existing log pipeline rather than a separate
/// exporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn counter_inc(&self, name: &str, tags: &Tags<'_>) {
        tracing::info!(metric = name, kind = "counter", tags = ?tags, "metric");
    }

    fn gauge_set(&self, name: &str, value: f64, tags: &Tags<'_>) {
        tracing::info!(metric = name, kind = "gauge", value, tags = ?tags, "metric");
    }

    fn timing_observe(&self, name: &str, duration: Duration, tags: &Tags<'_>) {
        tracing::info!(
            metric = name,
            kind = "timing",
            duration_ms = duration.as_millis() as u64,
            tags = ?tags,
            "metric"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_all_calls_without_panicking() {
        let sink = NoopMetricsSink;
        sink.counter_inc("connections_accepted", &[("kind", "agent")]);
        sink.gauge_set("sessions_open", 4.0, &[]);
        sink.timing_observe("route_latency", Duration::from_millis(3), &[]);
    }

    #[test]
    fn tracing_sink_accepts_all_calls_without_panicking() {
        let sink = TracingMetricsSink;
        sink.counter_inc("connections_accepted", &[("kind", "agent")]);
        sink.gauge_set("sessions_open", 4.0, &[]);
        sink.timing_observe("route_latency", Duration::from_millis(3), &[]);
    }

    #[test]
    fn dyn_metrics_sink_is_object_safe() {
        let sinks: Vec<Box<dyn MetricsSink>> = vec![Box::new(NoopMetricsSink), Box::new(TracingMetricsSink)];
        for sink in &sinks {
            sink.counter_inc("x", &[]);
        }
    }
}

//! Prometheus metrics
//!
//! The probe records its own request metrics next to the counters the
//! auth-refresh core emits:
//!
//! - `probe_requests_total` (counter): label `outcome`
//! - `probe_request_duration_seconds` (histogram): label `outcome`
//!
//! At the end of a run the exposition text can be rendered to the log.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("probe_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = builder()?.install_recorder()?;
    Ok(handle)
}

/// Record one probe request. `outcome` is `ok`, `failed`, `refresh_failed`
/// or `cancelled`.
pub fn record_request(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("probe_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("probe_request_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_request_does_not_panic_without_recorder() {
        record_request("ok", 0.05);
    }

    /// Isolated recorder/handle pair; only one global recorder may exist
    /// per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("ok", 0.042);
        record_request("refresh_failed", 1.5);

        let output = handle.render();
        assert!(output.contains("probe_requests_total"));
        assert!(output.contains("outcome=\"ok\""));
        assert!(output.contains("outcome=\"refresh_failed\""));
        assert!(
            output.contains("probe_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"60\""));
    }

    #[test]
    fn core_counters_render_through_the_same_recorder() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::counter!("auth_refresh_settled_total", "outcome" => "success").increment(1);

        let output = handle.render();
        assert!(output.contains("auth_refresh_settled_total{outcome=\"success\"} 1"));
    }
}

//! Prometheus metrics exposition
//!
//! Dispatch metrics are recorded here; refresh metrics are recorded inside
//! `token-pool` and rendered through the same recorder.
//!
//! - `dispatch_requests_total` (counter): label `status`
//! - `dispatch_duration_seconds` (histogram): label `status`
//! - `dispatch_token_requests_total` (counter): label `result`
//! - `refresh_attempts_total` (counter): label `result`
//! - `refresh_tokens_persisted_total` (counter): label `region`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("dispatch_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `dispatch_duration_seconds` gets explicit buckets so it renders as a
/// histogram rather than a summary. Buckets run from 10ms to 60s since a
/// dispatch is bounded by the per-target request timeout.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a finished dispatch with its HTTP status.
pub fn record_dispatch(status: u16, duration_secs: f64) {
    let status = status.to_string();
    metrics::counter!("dispatch_requests_total", "status" => status.clone()).increment(1);
    metrics::histogram!("dispatch_duration_seconds", "status" => status).record(duration_secs);
}

/// Record per-target results of one dispatch fan-out.
pub fn record_token_requests(success: usize, failure: usize) {
    metrics::counter!("dispatch_token_requests_total", "result" => "success")
        .increment(success as u64);
    metrics::counter!("dispatch_token_requests_total", "result" => "failure")
        .increment(failure as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_dispatch(200, 0.05);
        record_token_requests(3, 1);
    }

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_dispatch_writes_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_dispatch(200, 0.042);
        record_dispatch(503, 0.001);

        let output = handle.render();
        assert!(output.contains(r#"dispatch_requests_total{status="200"} 1"#));
        assert!(output.contains(r#"dispatch_requests_total{status="503"} 1"#));
        assert!(
            output.contains("dispatch_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains(r#"le="60""#));
    }

    #[test]
    fn token_requests_split_by_result() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_token_requests(7, 2);

        let output = handle.render();
        assert!(output.contains(r#"dispatch_token_requests_total{result="success"} 7"#));
        assert!(output.contains(r#"dispatch_token_requests_total{result="failure"} 2"#));
    }
}

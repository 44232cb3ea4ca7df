//! Prometheus metrics exposition
//!
//! Request counters and latency histogram for the proxy routes, plus
//! per-pool gauges refreshed from scheduler snapshots. Rendered on
//! `/metrics` via the installed recorder's handle.

use gemini_pool::PoolSnapshot;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
///
/// `gateway_request_duration_seconds` gets explicit buckets so it renders
/// as a histogram (`_bucket` lines) rather than a summary; the range covers
/// fast rejections through long upstream generations.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "gateway_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed proxy request.
pub fn record_request(status: u16, model: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "model" => model.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Refresh the per-pool key gauges from a scheduler snapshot.
pub fn record_pool_state(snapshot: &PoolSnapshot) {
    metrics::gauge!("pool_keys", "state" => "full").set(snapshot.full.len() as f64);
    metrics::gauge!("pool_keys", "state" => "empty").set(snapshot.empty.len() as f64);
    metrics::gauge!("pool_keys", "state" => "retired").set(snapshot.retired.len() as f64);
    metrics::gauge!("pool_keys", "state" => "quarantined").set(snapshot.quarantined.len() as f64);
    metrics::gauge!("pool_keys", "state" => "banned").set(snapshot.banned.len() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request(200, "gemini-2.5-flash", 0.25);
        record_pool_state(&PoolSnapshot::default());
    }

    /// Isolated recorder/handle pair; install_recorder() is process-global
    /// and panics on a second call.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn request_metrics_render_with_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "gemini-2.5-flash", 0.1);
        record_request(503, "gemini-2.5-pro", 0.01);

        let output = handle.render();
        assert!(output.contains("gateway_requests_total"));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("status=\"503\""));
        assert!(output.contains("model=\"gemini-2.5-pro\""));
    }

    #[test]
    fn pool_gauges_render_per_state() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_pool_state(&PoolSnapshot::default());

        let output = handle.render();
        assert!(output.contains("pool_keys"));
        assert!(output.contains("state=\"full\""));
        assert!(output.contains("state=\"quarantined\""));
    }
}

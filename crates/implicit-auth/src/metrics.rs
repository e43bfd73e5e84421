//! Correlation metrics
//!
//! - `implicit_auth_requests_started_total` (counter): label `kind`
//! - `implicit_auth_responses_total` (counter): labels `kind`, `matched`
//! - `implicit_auth_renewals_expired_total` (counter)
//!
//! Without an installed recorder these calls are no-ops.

use crate::registry::RequestKind;

/// Record a login or renewal being started.
pub fn record_request_started(kind: RequestKind) {
    metrics::counter!("implicit_auth_requests_started_total", "kind" => kind.label())
        .increment(1);
}

/// Record a classified auth response.
pub fn record_response(kind: RequestKind, matched: bool) {
    metrics::counter!(
        "implicit_auth_responses_total",
        "kind" => kind.label(),
        "matched" => if matched { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a renewal entry expired by its frame timeout.
pub fn record_renewal_expired() {
    metrics::counter!("implicit_auth_renewals_expired_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request_started(RequestKind::Login);
        record_response(RequestKind::Unknown, false);
        record_renewal_expired();
    }

    #[test]
    fn counters_render_with_labels() {
        // build_recorder() keeps the recorder local; only one global recorder
        // can be installed per process.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_request_started(RequestKind::RenewToken);
            record_response(RequestKind::RenewToken, true);
            record_response(RequestKind::RenewToken, true);
            record_renewal_expired();
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(r#"implicit_auth_requests_started_total{kind="renew_token"} 1"#),
            "got: {rendered}"
        );
        assert!(
            rendered.contains(r#"implicit_auth_responses_total{kind="renew_token",matched="true"} 2"#),
            "got: {rendered}"
        );
        assert!(rendered.contains("implicit_auth_renewals_expired_total 1"));
    }
}

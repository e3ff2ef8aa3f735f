//! Prometheus metrics for invoice-service.

use crate::models::SubmissionStatus;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoice_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Invoices written by the ledger, by type.
pub static INVOICES_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_invoices_created_total",
        "Total number of invoices created by type",
        &["type"]
    )
    .expect("Failed to register invoices_created_total")
});

/// Submission transitions by resulting status.
pub static SUBMISSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_payment_submissions_total",
        "Total number of payment submission transitions by status",
        &["status"] // submitted, accepted, rejected
    )
    .expect("Failed to register payment_submissions_total")
});

/// NOWAIT lock failures by operation.
pub static LOCK_CONFLICTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_lock_conflicts_total",
        "Total number of row lock conflicts",
        &["operation"]
    )
    .expect("Failed to register lock_conflicts_total")
});

/// Credit-limit cache lookups.
pub static LIMIT_CACHE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_limit_cache_total",
        "Total number of credit limit cache lookups by result",
        &["result"] // hit, miss
    )
    .expect("Failed to register limit_cache_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&INVOICES_CREATED_TOTAL);
    Lazy::force(&SUBMISSIONS_TOTAL);
    Lazy::force(&LOCK_CONFLICTS_TOTAL);
    Lazy::force(&LIMIT_CACHE_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
}

/// Count an error that left the ledger core.
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Count submission transitions once the transaction that wrote them committed.
pub fn record_submission_transitions(statuses: &[SubmissionStatus]) {
    for status in statuses {
        SUBMISSIONS_TOTAL.with_label_values(&[status.as_str()]).inc();
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_counted_by_status() {
        let accepted = SUBMISSIONS_TOTAL.with_label_values(&["accepted"]);
        let before = accepted.get();

        record_submission_transitions(&[SubmissionStatus::Submitted, SubmissionStatus::Accepted]);

        assert_eq!(accepted.get() - before, 1.0);
        assert!(get_metrics().contains("invoice_payment_submissions_total"));
    }
}

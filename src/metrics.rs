//! Global metrics collection using atomic counters.

use std::sync::atomic::AtomicU64;

/// Global metrics structure.
///
/// Cumulative process-wide totals; the per-server active-client count lives
/// on the server itself.
#[derive(Default)]
pub struct Metrics {
    pub accepted_conns: AtomicU64,
    pub rejected_ips: AtomicU64,
    pub tls_failures: AtomicU64,
    pub auth_successes: AtomicU64,
    pub auth_failures: AtomicU64,
    pub dispatched_msgs: AtomicU64,
    pub sent_msgs: AtomicU64,
    pub send_failures: AtomicU64,
    pub disconnects: AtomicU64,
}

/// Global metrics singleton.
pub static METRICS: once_cell::sync::Lazy<&'static Metrics> =
    once_cell::sync::Lazy::new(|| Box::leak(Box::new(Metrics::default())));

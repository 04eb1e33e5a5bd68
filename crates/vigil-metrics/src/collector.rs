//! Metrics collector — tracks per-service check outcomes.
//!
//! Counters are atomics; latency samples and the last observation sit
//! behind small mutexes. Services are registered lazily on their first
//! event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use vigil_core::{BreakerState, ErrorCategory, HealthStatus};

use crate::sink::{CheckEvent, HealthMetrics};

/// Latency samples kept per service; older samples are dropped first.
const MAX_LATENCY_SAMPLES: usize = 1024;

#[derive(Debug, Default, Clone, Copy)]
struct LastObservation {
    status: Option<HealthStatus>,
    status_code: Option<u16>,
    error_category: Option<ErrorCategory>,
    uptime_secs: Option<u64>,
}

/// Per-service metrics bucket.
struct ServiceMetrics {
    checks_total: AtomicU64,
    healthy: AtomicU64,
    degraded: AtomicU64,
    unhealthy: AtomicU64,
    starting: AtomicU64,
    unknown: AtomicU64,
    breaker_state: AtomicU8,
    breaker_transitions: AtomicU64,
    /// Latency samples in microseconds.
    latencies: Mutex<Vec<u64>>,
    last: Mutex<LastObservation>,
}

impl ServiceMetrics {
    fn new() -> Self {
        Self {
            checks_total: AtomicU64::new(0),
            healthy: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            unhealthy: AtomicU64::new(0),
            starting: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            breaker_state: AtomicU8::new(BreakerState::Closed.as_gauge()),
            breaker_transitions: AtomicU64::new(0),
            latencies: Mutex::new(Vec::new()),
            last: Mutex::new(LastObservation::default()),
        }
    }

    fn status_counter(&self, status: HealthStatus) -> &AtomicU64 {
        match status {
            HealthStatus::Healthy => &self.healthy,
            HealthStatus::Degraded => &self.degraded,
            HealthStatus::Unhealthy => &self.unhealthy,
            HealthStatus::Starting => &self.starting,
            HealthStatus::Unknown => &self.unknown,
        }
    }
}

/// Point-in-time view of one service's check metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHealthSnapshot {
    pub service: String,
    pub checks_total: u64,
    pub healthy: u64,
    pub degraded: u64,
    pub unhealthy: u64,
    pub starting: u64,
    pub unknown: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub last_status: Option<HealthStatus>,
    pub last_status_code: Option<u16>,
    pub last_error_category: Option<ErrorCategory>,
    pub uptime_secs: Option<u64>,
    pub breaker_state: BreakerState,
    pub breaker_transitions: u64,
}

/// In-process [`HealthMetrics`] implementation.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    services: Arc<RwLock<HashMap<String, Arc<ServiceMetrics>>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the bucket for a service, creating it on first use.
    fn entry(&self, service: &str) -> Arc<ServiceMetrics> {
        if let Some(m) = self.services.read().expect("metrics lock").get(service) {
            return Arc::clone(m);
        }
        let mut services = self.services.write().expect("metrics lock");
        let m = services.entry(service.to_string()).or_insert_with(|| {
            debug!(%service, "registered for metrics collection");
            Arc::new(ServiceMetrics::new())
        });
        Arc::clone(m)
    }

    /// Number of checks recorded for a service.
    pub fn checks_total(&self, service: &str) -> u64 {
        self.services
            .read()
            .expect("metrics lock")
            .get(service)
            .map(|m| m.checks_total.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Last breaker state reported for a service.
    pub fn breaker_state(&self, service: &str) -> Option<BreakerState> {
        self.services
            .read()
            .expect("metrics lock")
            .get(service)
            .map(|m| gauge_to_state(m.breaker_state.load(Ordering::Relaxed)))
    }

    /// List all tracked service names.
    pub fn registered_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .expect("metrics lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshot every tracked service, sorted by name.
    pub fn snapshot(&self) -> Vec<ServiceHealthSnapshot> {
        let services = self.services.read().expect("metrics lock");
        let mut snapshots: Vec<ServiceHealthSnapshot> = services
            .iter()
            .map(|(name, m)| {
                let (p50, p99) = compute_percentiles(&m.latencies.lock().expect("latency lock"));
                let last = *m.last.lock().expect("observation lock");
                ServiceHealthSnapshot {
                    service: name.clone(),
                    checks_total: m.checks_total.load(Ordering::Relaxed),
                    healthy: m.healthy.load(Ordering::Relaxed),
                    degraded: m.degraded.load(Ordering::Relaxed),
                    unhealthy: m.unhealthy.load(Ordering::Relaxed),
                    starting: m.starting.load(Ordering::Relaxed),
                    unknown: m.unknown.load(Ordering::Relaxed),
                    latency_p50_ms: p50,
                    latency_p99_ms: p99,
                    last_status: last.status,
                    last_status_code: last.status_code,
                    last_error_category: last.error_category,
                    uptime_secs: last.uptime_secs,
                    breaker_state: gauge_to_state(m.breaker_state.load(Ordering::Relaxed)),
                    breaker_transitions: m.breaker_transitions.load(Ordering::Relaxed),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }

    /// Render all services in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        crate::prometheus::render_prometheus(&self.snapshot())
    }
}

impl HealthMetrics for MetricsCollector {
    fn record_check(&self, event: &CheckEvent<'_>) {
        let m = self.entry(event.service);
        m.checks_total.fetch_add(1, Ordering::Relaxed);
        m.status_counter(event.status).fetch_add(1, Ordering::Relaxed);

        {
            let mut latencies = m.latencies.lock().expect("latency lock");
            if latencies.len() >= MAX_LATENCY_SAMPLES {
                latencies.remove(0);
            }
            latencies.push(event.duration.as_micros() as u64);
        }

        *m.last.lock().expect("observation lock") = LastObservation {
            status: Some(event.status),
            status_code: event.status_code,
            error_category: event.error_category,
            uptime_secs: event.uptime.map(|u| u.as_secs()),
        };
    }

    fn record_breaker_state(&self, service: &str, state: BreakerState) {
        let m = self.entry(service);
        m.breaker_state.store(state.as_gauge(), Ordering::Relaxed);
        m.breaker_transitions.fetch_add(1, Ordering::Relaxed);
        debug!(%service, %state, "breaker state recorded");
    }
}

fn gauge_to_state(value: u8) -> BreakerState {
    match value {
        0 => BreakerState::Closed,
        1 => BreakerState::HalfOpen,
        _ => BreakerState::Open,
    }
}

/// Compute P50 and P99 latency from unsorted microsecond samples.
///
/// Returns (p50_ms, p99_ms). If empty, returns (0.0, 0.0).
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;

    (p50, p99)
}

//! Prometheus text exposition format.
//!
//! Renders service health snapshots into the Prometheus text exposition
//! format for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::collector::ServiceHealthSnapshot;

/// Render service snapshots into Prometheus text format.
///
/// Produces COUNTER and GAUGE metrics with `service` labels.
pub fn render_prometheus(snapshots: &[ServiceHealthSnapshot]) -> String {
    let mut out = String::new();

    out.push_str("# HELP vigil_checks_total Health checks performed.\n");
    out.push_str("# TYPE vigil_checks_total counter\n");
    for s in snapshots {
        let _ = writeln!(out, "vigil_checks_total{{service=\"{}\"}} {}", s.service, s.checks_total);
    }

    out.push_str("# HELP vigil_check_results_total Health check outcomes by status.\n");
    out.push_str("# TYPE vigil_check_results_total counter\n");
    for s in snapshots {
        for (status, count) in [
            ("healthy", s.healthy),
            ("degraded", s.degraded),
            ("unhealthy", s.unhealthy),
            ("starting", s.starting),
            ("unknown", s.unknown),
        ] {
            let _ = writeln!(
                out,
                "vigil_check_results_total{{service=\"{}\",status=\"{status}\"}} {count}",
                s.service
            );
        }
    }

    out.push_str("# HELP vigil_check_latency_p50_ms P50 check latency in milliseconds.\n");
    out.push_str("# TYPE vigil_check_latency_p50_ms gauge\n");
    for s in snapshots {
        let _ = writeln!(
            out,
            "vigil_check_latency_p50_ms{{service=\"{}\"}} {:.2}",
            s.service, s.latency_p50_ms
        );
    }

    out.push_str("# HELP vigil_check_latency_p99_ms P99 check latency in milliseconds.\n");
    out.push_str("# TYPE vigil_check_latency_p99_ms gauge\n");
    for s in snapshots {
        let _ = writeln!(
            out,
            "vigil_check_latency_p99_ms{{service=\"{}\"}} {:.2}",
            s.service, s.latency_p99_ms
        );
    }

    out.push_str("# HELP vigil_last_status_code Last HTTP status code observed (0 if none).\n");
    out.push_str("# TYPE vigil_last_status_code gauge\n");
    for s in snapshots {
        let _ = writeln!(
            out,
            "vigil_last_status_code{{service=\"{}\"}} {}",
            s.service,
            s.last_status_code.unwrap_or(0)
        );
    }

    out.push_str("# HELP vigil_breaker_state Circuit breaker state (0 closed, 1 half-open, 2 open).\n");
    out.push_str("# TYPE vigil_breaker_state gauge\n");
    for s in snapshots {
        let _ = writeln!(
            out,
            "vigil_breaker_state{{service=\"{}\"}} {}",
            s.service,
            s.breaker_state.as_gauge()
        );
    }

    out
}

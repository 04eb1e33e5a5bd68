//! vigil-metrics — observability for the Vigil health-check engine.
//!
//! The engine reports every completed check and every circuit breaker
//! transition through the [`HealthMetrics`] trait. [`MetricsCollector`] is
//! the in-process implementation; it keeps per-service counters and latency
//! samples and renders them in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker
//!   ├── record_check(CheckEvent)        ← after every check
//!   └── record_breaker_state(service)   ← on breaker transitions
//!          │
//!          ▼
//! MetricsCollector
//!   ├── snapshot() → Vec<ServiceHealthSnapshot>
//!   └── render_prometheus() → text/plain for a /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;
pub mod sink;

pub use collector::{MetricsCollector, ServiceHealthSnapshot};
pub use prometheus::render_prometheus;
pub use sink::{CheckEvent, HealthMetrics, NoopMetrics};

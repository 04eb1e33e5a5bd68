//! vigil-health — the Vigil health-check engine.
//!
//! Decides whether a registered service is reachable and working, using
//! whichever signal the service offers, while shielding callers from
//! hammering services that are already failing.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker::check_service(cancel, service)
//!   ├── stopped? → Unknown, no probing
//!   ├── LimiterRegistry  (token bucket per service)
//!   ├── BreakerRegistry  (circuit breaker per service) ──▶ HealthMetrics
//!   └── cascade (panics recovered as Unknown)
//!         ├── one-shot build/task evaluation
//!         ├── custom probe: URL | CMD | CMD-SHELL | NONE
//!         ├── HTTP discovery ◀──▶ EndpointCache (per port)
//!         ├── TCP dial 127.0.0.1:port
//!         └── process liveness (ProcessInspector)
//! ```
//!
//! A startup grace period turns failures of freshly started services into
//! `Starting`. Every completed check is reported to the metrics sink.

pub mod breaker;
pub mod cache;
pub mod cascade;
pub mod checker;
pub mod clock;
pub mod error;
pub mod limiter;
pub mod probe;
pub mod process;
pub mod registry;
pub mod suggest;

pub use breaker::{BreakerRegistry, BreakerRejection, CircuitBreaker};
pub use cache::{CachedEndpoint, EndpointCache};
pub use checker::HealthChecker;
pub use error::ProbeError;
pub use limiter::{LimitError, LimiterRegistry, RateLimiter};
pub use process::{ProcessInspector, SystemProcesses};

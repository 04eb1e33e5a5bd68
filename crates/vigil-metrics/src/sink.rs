//! The outbound metrics interface used by the engine.

use std::time::Duration;

use vigil_core::{BreakerState, CheckType, ErrorCategory, HealthCheckResult, HealthStatus};

/// One completed health check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckEvent<'a> {
    pub service: &'a str,
    pub status: HealthStatus,
    pub check_type: CheckType,
    pub duration: Duration,
    pub status_code: Option<u16>,
    pub error_category: Option<ErrorCategory>,
    pub uptime: Option<Duration>,
}

impl<'a> CheckEvent<'a> {
    pub fn from_result(result: &'a HealthCheckResult) -> Self {
        Self {
            service: &result.service_name,
            status: result.status,
            check_type: result.check_type,
            duration: result.response_time,
            status_code: result.status_code,
            error_category: result.error_category,
            uptime: result.uptime_secs.map(Duration::from_secs),
        }
    }
}

/// Fire-and-forget sink notified by the engine.
///
/// Implementations must not block: they are called inline on the check path.
pub trait HealthMetrics: Send + Sync {
    fn record_check(&self, event: &CheckEvent<'_>);

    fn record_breaker_state(&self, service: &str, state: BreakerState);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl HealthMetrics for NoopMetrics {
    fn record_check(&self, _event: &CheckEvent<'_>) {}

    fn record_breaker_state(&self, _service: &str, _state: BreakerState) {}
}

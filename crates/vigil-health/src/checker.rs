//! The health checker: one entry point that never fails.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vigil_core::{
    BreakerState, CheckerConfig, ErrorCategory, HealthCheckResult, HealthStatus, RegistryStatus,
    ServiceInfo, epoch_secs,
};
use vigil_metrics::{CheckEvent, HealthMetrics, NoopMetrics};

use crate::breaker::BreakerRegistry;
use crate::cache::EndpointCache;
use crate::cascade::{Probes, nominal_check_type};
use crate::error::ProbeError;
use crate::limiter::{LimitError, LimiterRegistry};
use crate::probe::http::HttpProber;
use crate::process::{ProcessInspector, SystemProcesses};

pub const RATE_LIMITED: &str = "rate limit exceeded";
pub const CIRCUIT_OPEN: &str = "circuit breaker open - service unavailable";

/// Connect timeout of the shared HTTP client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Checks services on demand. Share it behind an `Arc`; every method takes
/// `&self` and is safe to call concurrently, on the same or different
/// services.
pub struct HealthChecker {
    probes: Probes,
    breakers: BreakerRegistry,
    limiters: LimiterRegistry,
    metrics: Arc<dyn HealthMetrics>,
}

impl HealthChecker {
    pub fn new(config: CheckerConfig) -> Result<Self, ProbeError> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        config: CheckerConfig,
        metrics: Arc<dyn HealthMetrics>,
    ) -> Result<Self, ProbeError> {
        let http = HttpProber::new(CONNECT_TIMEOUT.min(config.timeout))?;
        Ok(Self {
            breakers: BreakerRegistry::new(config.circuit_breaker.clone(), Arc::clone(&metrics)),
            limiters: LimiterRegistry::new(config.rate_limit),
            probes: Probes {
                http,
                cache: EndpointCache::new(),
                processes: Arc::new(SystemProcesses),
                config,
            },
            metrics,
        })
    }

    /// Replace the `kill(pid, 0)` liveness check.
    pub fn with_process_inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.probes.processes = inspector;
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.probes.config
    }

    /// HTTP requests issued by all probes so far.
    pub fn http_requests(&self) -> u64 {
        self.probes.http.requests_sent()
    }

    pub fn endpoint_cache(&self) -> &EndpointCache {
        &self.probes.cache
    }

    /// State of the service's breaker, if it has one yet.
    pub fn breaker_state(&self, service: &str) -> Option<BreakerState> {
        self.breakers.lookup(service).map(|b| b.state())
    }

    /// Check one service. Always returns a populated result.
    ///
    /// Order: stopped short-circuit, rate limit, circuit breaker, cascade.
    /// The cascade is the only part that touches the network.
    pub async fn check_service(
        &self,
        cancel: &CancellationToken,
        service: &ServiceInfo,
    ) -> HealthCheckResult {
        if service.registry_status == RegistryStatus::Stopped {
            debug!(service = %service.name, "service stopped, not probing");
            return HealthCheckResult::for_service(
                service,
                HealthStatus::Unknown,
                nominal_check_type(service),
            )
            .with_detail("reason", "service stopped");
        }

        let start = Instant::now();
        let mut result = match self.admit(service, cancel).await {
            Ok(()) => self.guarded(service, cancel).await,
            Err(rejected) => rejected,
        };

        result.response_time = start.elapsed();
        result.service_type = service.service_type;
        result.service_mode = service.mode;
        result.timestamp = epoch_secs();
        result.uptime_secs = service.uptime_at(result.timestamp).map(|d| d.as_secs());

        debug!(
            service = %service.name,
            status = %result.status,
            check_type = %result.check_type,
            elapsed_ms = result.response_time.as_millis() as u64,
            "health check finished"
        );
        self.metrics.record_check(&CheckEvent::from_result(&result));
        result
    }

    /// Wait for a rate limit token when limiting is enabled.
    async fn admit(
        &self,
        service: &ServiceInfo,
        cancel: &CancellationToken,
    ) -> Result<(), HealthCheckResult> {
        if self.probes.config.rate_limit <= 0.0 {
            return Ok(());
        }
        let limiter = self.limiters.get(&service.name);
        limiter
            .acquire(self.probes.config.timeout, cancel)
            .await
            .map_err(|e| {
                let reason = match e {
                    LimitError::Cancelled => "cancelled",
                    LimitError::Exceeded => "rate_limited",
                };
                warn!(service = %service.name, reason, "health check rate limited");
                HealthCheckResult::for_service(
                    service,
                    HealthStatus::Unhealthy,
                    nominal_check_type(service),
                )
                .with_error(RATE_LIMITED)
                .with_category(ErrorCategory::RateLimited)
                .with_detail("reason", reason)
            })
    }

    /// Run the cascade through the service's breaker, if breaking is enabled.
    async fn guarded(&self, service: &ServiceInfo, cancel: &CancellationToken) -> HealthCheckResult {
        let cascade = self.cascade(service, cancel);
        if !self.probes.config.circuit_breaker.enabled {
            return cascade.await;
        }

        let breaker = self.breakers.get(&service.name);
        match breaker
            .execute(cascade, |r| r.status != HealthStatus::Unhealthy)
            .await
        {
            Ok(result) => result,
            Err(rejection) => {
                debug!(service = %service.name, %rejection, "breaker rejected check");
                HealthCheckResult::for_service(
                    service,
                    HealthStatus::Unhealthy,
                    nominal_check_type(service),
                )
                .with_error(CIRCUIT_OPEN)
                .with_category(ErrorCategory::CircuitOpen)
                .with_detail("breaker_state", rejection.state().as_str())
            }
        }
    }

    /// The cascade with panics turned into `Unknown` results.
    async fn cascade(&self, service: &ServiceInfo, cancel: &CancellationToken) -> HealthCheckResult {
        match AssertUnwindSafe(self.probes.run(service, cancel))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(service = %service.name, panic = %message, "health check panicked");
                HealthCheckResult::for_service(
                    service,
                    HealthStatus::Unknown,
                    nominal_check_type(service),
                )
                .with_error(format!("internal error: panic during health check: {message}"))
                .with_category(ErrorCategory::Internal)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use vigil_core::{CheckType, ServiceMode, ServiceType};
    use vigil_metrics::MetricsCollector;

    use super::*;

    struct FixedProcesses(bool);

    impl ProcessInspector for FixedProcesses {
        fn is_running(&self, _pid: u32) -> bool {
            self.0
        }
    }

    struct PanickingProcesses;

    impl ProcessInspector for PanickingProcesses {
        fn is_running(&self, _pid: u32) -> bool {
            panic!("inspector exploded")
        }
    }

    struct CountingProcesses(AtomicU32);

    impl ProcessInspector for CountingProcesses {
        fn is_running(&self, _pid: u32) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn checker(config: CheckerConfig) -> HealthChecker {
        HealthChecker::new(config).unwrap()
    }

    fn process_service(pid: u32) -> ServiceInfo {
        ServiceInfo::new("worker")
            .with_type(ServiceType::Process)
            .with_pid(pid)
    }

    #[tokio::test]
    async fn stopped_service_is_unknown_without_probing() {
        let metrics = MetricsCollector::new();
        let checker = HealthChecker::with_metrics(CheckerConfig::default(), Arc::new(metrics.clone()))
            .unwrap();
        let svc = ServiceInfo::new("api")
            .with_port(1)
            .with_registry_status(RegistryStatus::Stopped);

        let result = checker.check_service(&CancellationToken::new(), &svc).await;
        assert_eq!(result.status, HealthStatus::Unknown);
        assert_eq!(result.response_time, Duration::ZERO);
        assert_eq!(checker.http_requests(), 0);
        assert_eq!(metrics.checks_total("api"), 0);
    }

    #[tokio::test]
    async fn live_process_is_healthy() {
        let checker = checker(CheckerConfig::default())
            .with_process_inspector(Arc::new(FixedProcesses(true)));
        let result = checker
            .check_service(&CancellationToken::new(), &process_service(42))
            .await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.check_type, CheckType::Process);
        assert_eq!(result.detail("pid"), Some("42"));
        assert_eq!(result.service_type, ServiceType::Process);
    }

    #[tokio::test]
    async fn dead_process_is_unhealthy_with_suggestion() {
        let checker = checker(CheckerConfig::default())
            .with_process_inspector(Arc::new(FixedProcesses(false)));
        let result = checker
            .check_service(&CancellationToken::new(), &process_service(42))
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error_category, Some(ErrorCategory::Process));
        assert!(result.suggestion().is_some());
    }

    #[tokio::test]
    async fn no_signal_is_unknown() {
        let checker = checker(CheckerConfig::default());
        let result = checker
            .check_service(&CancellationToken::new(), &ServiceInfo::new("ghost"))
            .await;
        assert_eq!(result.status, HealthStatus::Unknown);
        assert_eq!(result.error.as_deref(), Some("no health check method available"));
        assert_eq!(result.error_category, Some(ErrorCategory::NoCheckMethod));
    }

    #[tokio::test]
    async fn panic_becomes_unknown() {
        let checker = checker(CheckerConfig::default())
            .with_process_inspector(Arc::new(PanickingProcesses));
        let result = checker
            .check_service(&CancellationToken::new(), &process_service(7))
            .await;
        assert_eq!(result.status, HealthStatus::Unknown);
        assert_eq!(
            result.error.as_deref(),
            Some("internal error: panic during health check: inspector exploded")
        );
        assert_eq!(result.error_category, Some(ErrorCategory::Internal));
        // A recovered panic counts as a breaker success.
        assert_eq!(checker.breaker_state("worker"), Some(BreakerState::Closed));
    }

    #[tokio::test]
    async fn breaker_opens_and_stops_probing() {
        let inspector = Arc::new(CountingProcesses(AtomicU32::new(0)));
        let checker = checker(CheckerConfig::default()).with_process_inspector(inspector.clone());
        let svc = process_service(99);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let result = checker.check_service(&cancel, &svc).await;
            assert_eq!(result.status, HealthStatus::Unhealthy);
        }
        assert_eq!(checker.breaker_state("worker"), Some(BreakerState::Open));

        let result = checker.check_service(&cancel, &svc).await;
        assert_eq!(result.error.as_deref(), Some(CIRCUIT_OPEN));
        assert_eq!(result.error_category, Some(ErrorCategory::CircuitOpen));
        assert_eq!(result.detail("breaker_state"), Some("open"));
        assert_eq!(inspector.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disabled_breaker_never_opens() {
        let mut config = CheckerConfig::default();
        config.circuit_breaker.enabled = false;
        let checker = checker(config).with_process_inspector(Arc::new(FixedProcesses(false)));
        let svc = process_service(99);

        for _ in 0..5 {
            let result = checker.check_service(&CancellationToken::new(), &svc).await;
            assert_eq!(result.error_category, Some(ErrorCategory::Process));
        }
        assert_eq!(checker.breaker_state("worker"), None);
    }

    #[tokio::test]
    async fn rate_limit_rejection_keeps_error_and_gives_reason() {
        let mut config = CheckerConfig::default();
        config.rate_limit = 0.5;
        config.timeout = Duration::from_millis(50);
        let checker = checker(config).with_process_inspector(Arc::new(FixedProcesses(true)));
        let svc = process_service(1);
        let cancel = CancellationToken::new();

        let first = checker.check_service(&cancel, &svc).await;
        assert_eq!(first.status, HealthStatus::Healthy);

        let limited = checker.check_service(&cancel, &svc).await;
        assert_eq!(limited.status, HealthStatus::Unhealthy);
        assert_eq!(limited.error.as_deref(), Some(RATE_LIMITED));
        assert_eq!(limited.error_category, Some(ErrorCategory::RateLimited));
        assert_eq!(limited.detail("reason"), Some("rate_limited"));
    }

    #[tokio::test]
    async fn cancelled_rate_limit_wait_is_distinguished() {
        let mut config = CheckerConfig::default();
        config.rate_limit = 0.01;
        config.timeout = Duration::from_secs(3600);
        let checker = checker(config).with_process_inspector(Arc::new(FixedProcesses(true)));
        let svc = process_service(1);

        checker.check_service(&CancellationToken::new(), &svc).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let limited = checker.check_service(&cancel, &svc).await;
        assert_eq!(limited.error.as_deref(), Some(RATE_LIMITED));
        assert_eq!(limited.detail("reason"), Some("cancelled"));
    }

    #[tokio::test]
    async fn extreme_limits_never_panic() {
        let mut config = CheckerConfig::default();
        config.rate_limit = 1e-30;
        config.timeout = Duration::MAX;
        let checker = checker(config).with_process_inspector(Arc::new(FixedProcesses(true)));
        let svc = process_service(1);
        let cancel = CancellationToken::new();

        let first = checker.check_service(&cancel, &svc).await;
        assert_eq!(first.status, HealthStatus::Healthy);

        let limited = checker.check_service(&cancel, &svc).await;
        assert_eq!(limited.error.as_deref(), Some(RATE_LIMITED));
        assert_eq!(limited.detail("reason"), Some("rate_limited"));
    }

    #[tokio::test]
    async fn cancelled_check_is_unknown() {
        let checker = checker(CheckerConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = checker
            .check_service(&cancel, &ServiceInfo::new("api").with_port(1))
            .await;
        assert_eq!(result.status, HealthStatus::Unknown);
        assert_eq!(result.error_category, Some(ErrorCategory::Cancelled));
        assert_eq!(checker.http_requests(), 0);
    }

    #[tokio::test]
    async fn build_mode_reports_progress_and_completion() {
        let checker = checker(CheckerConfig::default())
            .with_process_inspector(Arc::new(FixedProcesses(true)));
        let building = ServiceInfo::new("assets")
            .with_mode(ServiceMode::Build)
            .with_type(ServiceType::Process)
            .with_pid(10);

        let result = checker.check_service(&CancellationToken::new(), &building).await;
        assert_eq!(result.status, HealthStatus::Starting);
        assert_eq!(result.detail("state"), Some("building"));

        let built = building.clone().with_exit_code(0);
        let result = checker.check_service(&CancellationToken::new(), &built).await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.detail("state"), Some("built"));
        assert_eq!(result.service_mode, ServiceMode::Build);
    }

    #[tokio::test]
    async fn failed_task_reports_exit_code() {
        let checker = checker(CheckerConfig::default());
        let task = ServiceInfo::new("migrate")
            .with_mode(ServiceMode::Task)
            .with_exit_code(3);
        let result = checker.check_service(&CancellationToken::new(), &task).await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("process exited with code 3"));
        assert_eq!(result.detail("state"), Some("failed"));
    }

    #[tokio::test]
    async fn running_task_is_healthy_and_vanished_task_gets_note() {
        let running = checker(CheckerConfig::default())
            .with_process_inspector(Arc::new(FixedProcesses(true)));
        let task = ServiceInfo::new("backfill").with_mode(ServiceMode::Task).with_pid(5);
        let result = running.check_service(&CancellationToken::new(), &task).await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.detail("state"), Some("running"));

        let gone = checker(CheckerConfig::default())
            .with_process_inspector(Arc::new(FixedProcesses(false)));
        let result = gone.check_service(&CancellationToken::new(), &task).await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.detail("state"), Some("completed"));
        assert!(result.detail("note").is_some());
    }

    #[tokio::test]
    async fn metrics_see_every_check() {
        let metrics = MetricsCollector::new();
        let checker = HealthChecker::with_metrics(CheckerConfig::default(), Arc::new(metrics.clone()))
            .unwrap()
            .with_process_inspector(Arc::new(FixedProcesses(true)));
        for _ in 0..2 {
            checker
                .check_service(&CancellationToken::new(), &process_service(3))
                .await;
        }
        assert_eq!(metrics.checks_total("worker"), 2);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}

//! The cascading probe strategy.
//!
//! Each service gets an ordered plan of strategies. Strategies run in turn
//! and each either answers with a result or passes (`None`); the first
//! answer wins. Network services try, in order:
//!
//! ```text
//! OneShot → Custom → HttpDiscovery → Tcp → Process
//! ```
//!
//! Process-only services skip straight to `OneShot → Process`. When nothing
//! answers the result is "no health check method available". Non-healthy
//! results of a service still inside its startup grace period are reported
//! as `Starting`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vigil_core::{
    CheckType, CheckerConfig, ErrorCategory, HealthCheckResult, HealthStatus, ServiceInfo,
    ServiceMode, ServiceType, epoch_secs,
};

use crate::cache::{CachedEndpoint, EndpointCache};
use crate::clock::deadline_after;
use crate::error::ProbeError;
use crate::probe::command::{self, CustomProbe};
use crate::probe::http::{HttpProber, HttpResponse, classify};
use crate::probe::tcp::{self, DIAL_TIMEOUT};
use crate::process::ProcessInspector;
use crate::suggest;

/// Paths tried after the configured default endpoint, in order.
pub const CANDIDATE_PATHS: [&str; 8] = [
    "/health",
    "/healthz",
    "/ready",
    "/readyz",
    "/status",
    "/ping",
    "/api/health",
    "/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Build/task services judged by liveness and exit code.
    OneShot,
    /// The service's own configured probe.
    Custom,
    HttpDiscovery,
    Tcp,
    Process,
}

const PROCESS_PLAN: &[Strategy] = &[Strategy::OneShot, Strategy::Process];

const NETWORK_PLAN: &[Strategy] = &[
    Strategy::OneShot,
    Strategy::Custom,
    Strategy::HttpDiscovery,
    Strategy::Tcp,
    Strategy::Process,
];

/// The strategies tried for `service`, in priority order.
pub fn plan(service: &ServiceInfo) -> &'static [Strategy] {
    match service.service_type {
        ServiceType::Process => PROCESS_PLAN,
        ServiceType::Network => NETWORK_PLAN,
    }
}

/// Default endpoint first, then the fixed candidates, without duplicates.
pub fn candidate_paths(default_endpoint: &str) -> Vec<String> {
    let mut paths = vec![default_endpoint.to_string()];
    for path in CANDIDATE_PATHS {
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

/// Check type for results no probe produced (stopped, rejected, failed).
pub fn nominal_check_type(service: &ServiceInfo) -> CheckType {
    if service.service_type == ServiceType::Process {
        return CheckType::Process;
    }
    if let Some(tokens) = service.custom_test() {
        return match CustomProbe::parse(tokens) {
            Some(CustomProbe::Url(_)) => CheckType::Http,
            _ => CheckType::Command,
        };
    }
    if service.port > 0 {
        CheckType::Http
    } else {
        CheckType::Process
    }
}

pub fn cancelled_result(service: &ServiceInfo) -> HealthCheckResult {
    HealthCheckResult::for_service(service, HealthStatus::Unknown, nominal_check_type(service))
        .with_error("health check cancelled")
        .with_category(ErrorCategory::Cancelled)
}

/// Remap a non-healthy result to `Starting` while `service` is inside its
/// grace window. Terminal one-shot results and cancellations are left alone.
pub fn apply_grace_period(
    mut result: HealthCheckResult,
    service: &ServiceInfo,
    grace: Duration,
    now: u64,
) -> HealthCheckResult {
    let Some(started_at) = service.started_at else {
        return result;
    };
    let terminal = service.mode.is_one_shot() && service.exit_code.is_some();
    let cancelled = result.error_category == Some(ErrorCategory::Cancelled);
    if result.status == HealthStatus::Healthy || terminal || cancelled {
        return result;
    }
    let age = now.saturating_sub(started_at);
    if Duration::from_secs(age) < grace {
        debug!(service = %service.name, age, from = %result.status, "inside startup grace period");
        result.status = HealthStatus::Starting;
        result.set_detail("grace_period", format!("{}s", grace.as_secs()));
    }
    result
}

/// Everything the strategies need, shared by all checks.
pub struct Probes {
    pub http: HttpProber,
    pub cache: EndpointCache,
    pub processes: Arc<dyn ProcessInspector>,
    pub config: CheckerConfig,
}

impl Probes {
    /// Run the plan for `service` and return the first answer.
    pub async fn run(&self, service: &ServiceInfo, cancel: &CancellationToken) -> HealthCheckResult {
        let deadline = deadline_after(Instant::now(), self.config.timeout);

        let mut answer = None;
        for &strategy in plan(service) {
            if cancel.is_cancelled() {
                return cancelled_result(service);
            }
            answer = self.attempt(strategy, service, cancel, deadline).await;
            if let Some(result) = &answer {
                debug!(service = %service.name, ?strategy, status = %result.status, "strategy answered");
                break;
            }
        }

        let result = match answer {
            Some(result) => result,
            None if cancel.is_cancelled() => return cancelled_result(service),
            None => no_signal(service),
        };
        apply_grace_period(result, service, self.config.startup_grace_period, epoch_secs())
    }

    /// Run one strategy. `None` means it had nothing to say.
    pub async fn attempt(
        &self,
        strategy: Strategy,
        service: &ServiceInfo,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Option<HealthCheckResult> {
        match strategy {
            Strategy::OneShot => self.one_shot(service),
            Strategy::Custom => self.custom(service, cancel, deadline).await,
            Strategy::HttpDiscovery => self.discover(service, cancel, deadline).await,
            Strategy::Tcp => self.tcp(service, cancel, deadline).await,
            Strategy::Process => self.process(service),
        }
    }

    fn one_shot(&self, service: &ServiceInfo) -> Option<HealthCheckResult> {
        let (live_state, done_state, live_status) = match service.mode {
            ServiceMode::Build => ("building", "built", HealthStatus::Starting),
            ServiceMode::Task => ("running", "completed", HealthStatus::Healthy),
            ServiceMode::Daemon => return None,
        };

        if let Some(code) = service.exit_code {
            let result = HealthCheckResult::for_service(service, HealthStatus::Healthy, CheckType::Process)
                .with_detail("exit_code", code.to_string());
            return Some(if code == 0 {
                result.with_detail("state", done_state)
            } else {
                let mut result = result
                    .with_error(format!("process exited with code {code}"))
                    .with_category(ErrorCategory::Process)
                    .with_detail("state", "failed")
                    .with_detail("suggestion", suggest::ONE_SHOT_FAILED);
                result.status = HealthStatus::Unhealthy;
                result
            });
        }

        if service.pid > 0 && self.processes.is_running(service.pid) {
            return Some(
                HealthCheckResult::for_service(service, live_status, CheckType::Process)
                    .with_detail("state", live_state)
                    .with_detail("pid", service.pid.to_string()),
            );
        }

        if service.pid > 0 || service.ended_at.is_some() {
            return Some(
                HealthCheckResult::for_service(service, HealthStatus::Healthy, CheckType::Process)
                    .with_detail("state", done_state)
                    .with_detail("note", "process ended without a recorded exit code"),
            );
        }

        None
    }

    async fn custom(
        &self,
        service: &ServiceInfo,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Option<HealthCheckResult> {
        let probe = CustomProbe::parse(service.custom_test()?)?;
        let timeout = remaining(deadline);

        match &probe {
            CustomProbe::Noop => Some(
                HealthCheckResult::for_service(service, HealthStatus::Healthy, CheckType::Command)
                    .with_detail("note", "health check disabled"),
            ),
            CustomProbe::Url(url) => match self.http.get(url, timeout, cancel).await {
                Ok(response) => Some(http_result(service, url.clone(), &response)),
                Err(ProbeError::Cancelled) => None,
                Err(e) => {
                    let mut result =
                        HealthCheckResult::for_service(service, HealthStatus::Unhealthy, CheckType::Http)
                            .with_error(format!("health check request to {url} failed: {e}"))
                            .with_category(e.category());
                    result.endpoint = Some(url.clone());
                    Some(result)
                }
            },
            CustomProbe::Exec(_) | CustomProbe::Shell(_) => match command::run(&probe, timeout, cancel).await {
                Ok(output) if output.success() => {
                    let mut result =
                        HealthCheckResult::for_service(service, HealthStatus::Healthy, CheckType::Command);
                    if !output.output.is_empty() {
                        result.set_detail("output", output.output);
                    }
                    Some(result)
                }
                Ok(output) => {
                    let code = output
                        .exit_code
                        .map_or_else(|| "signal".to_string(), |c| c.to_string());
                    let mut result =
                        HealthCheckResult::for_service(service, HealthStatus::Unhealthy, CheckType::Command)
                            .with_error(format!("health check command failed (exit code {code})"))
                            .with_category(ErrorCategory::Process)
                            .with_detail("exit_code", code)
                            .with_detail("suggestion", suggest::COMMAND_FAILED);
                    if !output.output.is_empty() {
                        result.set_detail("output", output.output);
                    }
                    Some(result)
                }
                Err(ProbeError::Cancelled) => None,
                Err(e) => Some(
                    HealthCheckResult::for_service(service, HealthStatus::Unhealthy, CheckType::Command)
                        .with_error(format!("health check command could not run: {e}"))
                        .with_category(match e {
                            ProbeError::Timeout(_) => ErrorCategory::Timeout,
                            _ => ErrorCategory::Process,
                        })
                        .with_detail("suggestion", suggest::COMMAND_FAILED),
                ),
            },
        }
    }

    async fn discover(
        &self,
        service: &ServiceInfo,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Option<HealthCheckResult> {
        let port = service.port;
        if port == 0 {
            return None;
        }

        match self.cache.get(port) {
            Some(CachedEndpoint::NoEndpoint) => {
                debug!(service = %service.name, port, "no http endpoint cached, skipping discovery");
                return None;
            }
            Some(CachedEndpoint::Path(path)) => {
                match self.probe_path(port, &path, cancel, deadline).await {
                    Ok(response) if !keeps_scanning(response.status) => {
                        return Some(http_result(service, path_url(port, &path), &response));
                    }
                    Err(ProbeError::Cancelled) => return None,
                    Ok(response) => {
                        debug!(service = %service.name, port, %path, status = response.status, "cached endpoint went away");
                    }
                    Err(e) => {
                        debug!(service = %service.name, port, %path, error = %e, "cached endpoint failed");
                    }
                }
                self.cache.invalidate(port);
            }
            None => {}
        }

        for path in candidate_paths(&self.config.default_endpoint) {
            if cancel.is_cancelled() {
                return None;
            }
            match self.probe_path(port, &path, cancel, deadline).await {
                Ok(response) if keeps_scanning(response.status) => continue,
                Ok(response) => {
                    let result = http_result(service, path_url(port, &path), &response);
                    if result.status == HealthStatus::Healthy {
                        self.cache.remember(port, path);
                    }
                    return Some(result);
                }
                Err(ProbeError::Cancelled) => return None,
                Err(e) if e.is_connect_failure() => {
                    debug!(service = %service.name, port, error = %e, "nothing answered http, falling back to tcp");
                    return None;
                }
                Err(e) => {
                    debug!(service = %service.name, port, error = %e, "port does not speak http");
                    self.cache.remember_none(port);
                    return None;
                }
            }
        }

        debug!(service = %service.name, port, "no candidate path answered");
        self.cache.remember_none(port);
        None
    }

    async fn probe_path(
        &self,
        port: u16,
        path: &str,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<HttpResponse, ProbeError> {
        self.http.get(&path_url(port, path), remaining(deadline), cancel).await
    }

    async fn tcp(
        &self,
        service: &ServiceInfo,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Option<HealthCheckResult> {
        let port = service.port;
        if port == 0 {
            return None;
        }
        let addr = tcp::local_addr(port);
        let timeout = DIAL_TIMEOUT.min(remaining(deadline));

        match tcp::dial(addr, timeout, cancel).await {
            Ok(()) => {
                let mut result = HealthCheckResult::for_service(service, HealthStatus::Healthy, CheckType::Tcp);
                result.endpoint = Some(addr.to_string());
                Some(result)
            }
            Err(ProbeError::Cancelled) => None,
            Err(e) => {
                // The service may come back speaking http; sweep again next time.
                if self.cache.get(port) == Some(CachedEndpoint::NoEndpoint) {
                    self.cache.invalidate(port);
                }
                let category = e.category();
                let mut result = HealthCheckResult::for_service(service, HealthStatus::Unhealthy, CheckType::Tcp)
                    .with_error(format!("failed to connect to port {port}: {e}"))
                    .with_category(category)
                    .with_detail("suggestion", suggest::dial_suggestion(category, port));
                result.endpoint = Some(addr.to_string());
                Some(result)
            }
        }
    }

    fn process(&self, service: &ServiceInfo) -> Option<HealthCheckResult> {
        let pid = service.pid;
        if pid == 0 {
            return None;
        }
        let result = if self.processes.is_running(pid) {
            HealthCheckResult::for_service(service, HealthStatus::Healthy, CheckType::Process)
        } else {
            HealthCheckResult::for_service(service, HealthStatus::Unhealthy, CheckType::Process)
                .with_error(format!("process {pid} is not running"))
                .with_category(ErrorCategory::Process)
                .with_detail("suggestion", suggest::PROCESS_NOT_RUNNING)
        };
        Some(result.with_detail("pid", pid.to_string()))
    }
}

fn no_signal(service: &ServiceInfo) -> HealthCheckResult {
    HealthCheckResult::for_service(service, HealthStatus::Unknown, nominal_check_type(service))
        .with_error("no health check method available")
        .with_category(ErrorCategory::NoCheckMethod)
        .with_detail("suggestion", suggest::NO_CHECK_METHOD)
}

/// 400 and 404 say "wrong path", not "unhealthy".
fn keeps_scanning(code: u16) -> bool {
    matches!(code, 400 | 404)
}

fn path_url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn http_result(service: &ServiceInfo, url: String, response: &HttpResponse) -> HealthCheckResult {
    let code = response.status;
    let classification = classify(code, &response.body);

    let mut result = HealthCheckResult::for_service(service, classification.status, CheckType::Http);
    result.endpoint = Some(url);
    result.status_code = Some(code);

    if let Some(suggestion) = classification.suggestion {
        result.set_detail("suggestion", suggestion);
    }
    if classification.status != HealthStatus::Healthy {
        let error = match (&classification.message, &classification.reported) {
            (Some(message), _) => format!("HTTP {code}: {message}"),
            (None, Some(reported)) if code < 400 => format!("service reported status \"{reported}\""),
            (None, _) => format!("HTTP {code}"),
        };
        result.set_error(error);
        result.error_category = Some(ErrorCategory::Http);
    }
    if let Some(reported) = classification.reported {
        result.set_detail("reported_status", reported);
    }
    result
}

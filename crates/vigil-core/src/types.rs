//! Domain types for the Vigil health-check engine.
//!
//! `ServiceInfo` is the read-only description of a registered service that
//! callers hand to the engine. `HealthCheckResult` is the record the engine
//! builds for every check. All types are serializable to/from JSON and TOML
//! so the CLI and any monitor can exchange them without extra glue.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Longest `error` string kept on a result; longer text moves to `error_details`.
pub const MAX_ERROR_LEN: usize = 256;

// ── Service description ───────────────────────────────────────────

/// Whether a service can be reached over the network at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Only an OS process; network probing is meaningless.
    Process,
    /// Listens on a port (or exposes a custom probe).
    #[default]
    Network,
}

/// How a service is expected to behave over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Long-running service.
    #[default]
    Daemon,
    /// One-shot build step, judged by its exit code.
    Build,
    /// One-shot task, judged by its exit code.
    Task,
}

impl ServiceMode {
    /// Build and task services are one-shot processes.
    pub fn is_one_shot(self) -> bool {
        matches!(self, ServiceMode::Build | ServiceMode::Task)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceMode::Daemon => "daemon",
            ServiceMode::Build => "build",
            ServiceMode::Task => "task",
        }
    }
}

/// Lifecycle status recorded by the service registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStatus {
    Starting,
    Running,
    Stopped,
    Failed,
    #[default]
    Unknown,
}

/// Custom probe configuration: an ordered token list whose first element
/// selects the dispatch mode (a URL, `CMD`, `CMD-SHELL`, `NONE`, or a bare
/// shell command).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    #[serde(default)]
    pub test: Vec<String>,
}

/// A registered service as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default, rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub mode: ServiceMode,
    /// Listening port, 0 when none.
    #[serde(default)]
    pub port: u16,
    /// OS process id, 0 when none.
    #[serde(default)]
    pub pid: u32,
    /// Unix timestamp (seconds) when the service was started.
    #[serde(default)]
    pub started_at: Option<u64>,
    /// Unix timestamp (seconds) when a one-shot process ended.
    #[serde(default)]
    pub ended_at: Option<u64>,
    /// Exit code, present only once a one-shot process has terminated.
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub registry_status: RegistryStatus,
    #[serde(default)]
    pub health_check: Option<ProbeSpec>,
}

impl ServiceInfo {
    /// A network daemon with no port, PID, or custom probe.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: ServiceType::Network,
            mode: ServiceMode::Daemon,
            port: 0,
            pid: 0,
            started_at: None,
            ended_at: None,
            exit_code: None,
            registry_status: RegistryStatus::Unknown,
            health_check: None,
        }
    }

    pub fn with_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = service_type;
        self
    }

    pub fn with_mode(mut self, mode: ServiceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_started_at(mut self, epoch_secs: u64) -> Self {
        self.started_at = Some(epoch_secs);
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_registry_status(mut self, status: RegistryStatus) -> Self {
        self.registry_status = status;
        self
    }

    /// Attach a custom probe, e.g. `["CMD", "pg_isready"]`.
    pub fn with_test<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.health_check = Some(ProbeSpec {
            test: tokens.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// The custom probe tokens, if any were configured.
    pub fn custom_test(&self) -> Option<&[String]> {
        self.health_check
            .as_ref()
            .map(|hc| hc.test.as_slice())
            .filter(|t| !t.is_empty())
    }

    /// Time since start, measured at `now` (unix seconds).
    pub fn uptime_at(&self, now: u64) -> Option<Duration> {
        let started = self.started_at?;
        let until = self.ended_at.unwrap_or(now);
        Some(Duration::from_secs(until.saturating_sub(started)))
    }
}

// ── Check vocabulary ──────────────────────────────────────────────

/// Outcome of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Starting,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Starting => "starting",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Map a self-reported `status` value from a JSON body.
    ///
    /// Unrecognized values return `None` and never override a status code.
    pub fn from_reported(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "healthy" | "ok" | "up" => Some(HealthStatus::Healthy),
            "degraded" | "warning" => Some(HealthStatus::Degraded),
            "unhealthy" | "down" | "error" => Some(HealthStatus::Unhealthy),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which signal produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Tcp,
    Process,
    /// A custom `CMD` / `CMD-SHELL` / `NONE` probe.
    Command,
}

impl CheckType {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckType::Http => "http",
            CheckType::Tcp => "tcp",
            CheckType::Process => "process",
            CheckType::Command => "command",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker state, as reported to the metrics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half-open",
            BreakerState::Open => "open",
        }
    }

    /// Numeric encoding for gauges: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification attached to non-healthy results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConnectionRefused,
    Timeout,
    Unreachable,
    Network,
    Http,
    Process,
    NoCheckMethod,
    Internal,
    RateLimited,
    CircuitOpen,
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::ConnectionRefused => "connection_refused",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unreachable => "unreachable",
            ErrorCategory::Network => "network",
            ErrorCategory::Http => "http",
            ErrorCategory::Process => "process",
            ErrorCategory::NoCheckMethod => "no_check_method",
            ErrorCategory::Internal => "internal",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Result ────────────────────────────────────────────────────────

/// The record produced by one health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service_name: String,
    /// Unix timestamp (seconds) of the check.
    pub timestamp: u64,
    pub status: HealthStatus,
    pub check_type: CheckType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(rename = "response_time_ms", with = "duration_ms")]
    pub response_time: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full error text when `error` had to be truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
    #[serde(default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub service_mode: ServiceMode,
    /// Filled in by the monitor, never by the engine.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Filled in by the monitor, never by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<u64>,
}

impl HealthCheckResult {
    /// Start a result; the status must always be chosen explicitly.
    pub fn new(service_name: impl Into<String>, status: HealthStatus, check_type: CheckType) -> Self {
        Self {
            service_name: service_name.into(),
            timestamp: epoch_secs(),
            status,
            check_type,
            endpoint: None,
            port: 0,
            pid: 0,
            status_code: None,
            response_time: Duration::ZERO,
            uptime_secs: None,
            error: None,
            error_details: None,
            error_category: None,
            details: BTreeMap::new(),
            service_type: ServiceType::default(),
            service_mode: ServiceMode::default(),
            consecutive_failures: 0,
            last_success_time: None,
        }
    }

    /// Start a result carrying the service's identity (name, port, PID, kind).
    pub fn for_service(service: &ServiceInfo, status: HealthStatus, check_type: CheckType) -> Self {
        let mut result = Self::new(service.name.clone(), status, check_type);
        result.port = service.port;
        result.pid = service.pid;
        result.service_type = service.service_type;
        result.service_mode = service.mode;
        result
    }

    /// Set the short error, moving the full text to `error_details` if it
    /// exceeds [`MAX_ERROR_LEN`].
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        match truncate_chars(&message, MAX_ERROR_LEN) {
            Some(short) => {
                self.error = Some(short);
                self.error_details = Some(message);
            }
            None => self.error = Some(message),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.set_error(message);
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.error_category = Some(category);
        self
    }

    pub fn set_detail(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.details.insert(key.into(), value.into());
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_detail(key, value);
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }

    /// Remediation hint, when one was attached.
    pub fn suggestion(&self) -> Option<&str> {
        self.detail("suggestion")
    }
}

/// Truncate to at most `max` characters, appending `...`.
///
/// Returns `None` when `s` already fits.
pub fn truncate_chars(s: &str, max: usize) -> Option<String> {
    if s.chars().count() <= max {
        return None;
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    Some(out)
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

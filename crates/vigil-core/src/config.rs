//! Check profile configuration.
//!
//! A profile file holds named bundles of engine settings:
//!
//! ```toml
//! [profiles.default]
//! timeout = "5s"
//! default_endpoint = "/health"
//! rate_limit = 10.0
//! startup_grace_period = "30s"
//!
//! [profiles.default.circuit_breaker]
//! enabled = true
//! min_requests = 3
//! failure_ratio = 0.6
//! timeout = "30s"
//! interval = "60s"
//! max_requests = 1
//! ```
//!
//! Every field is optional. `ProfileSet::profile` resolves a section into a
//! fully-populated [`CheckerConfig`], filling gaps from the defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

/// Name of the profile used when none is requested.
pub const DEFAULT_PROFILE: &str = "default";

/// Longest duration any profile field may hold.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Accepted range for a non-zero `rate_limit`, in checks per second.
pub const RATE_LIMIT_RANGE: std::ops::RangeInclusive<f64> = 0.001..=1_000_000.0;

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Requests needed in the rolling interval before the ratio is considered.
    pub min_requests: u32,
    /// Failure ratio (0.0–1.0] that trips the breaker.
    pub failure_ratio: f64,
    /// How long the breaker stays open before admitting trial requests.
    pub timeout: Duration,
    /// Rolling window after which closed-state counts reset.
    pub interval: Duration,
    /// Trial requests admitted while half-open.
    pub max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_requests: 3,
            failure_ratio: 0.6,
            timeout: Duration::from_secs(30),
            interval: Duration::from_secs(60),
            max_requests: 1,
        }
    }
}

/// Fully-resolved engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerConfig {
    /// Overall bound for a single probe.
    pub timeout: Duration,
    /// First path tried during HTTP discovery.
    pub default_endpoint: String,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Checks per second per service; 0 disables rate limiting.
    pub rate_limit: f64,
    /// Window after start during which failures report `Starting`.
    pub startup_grace_period: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            default_endpoint: "/health".to_string(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: 0.0,
            startup_grace_period: Duration::from_secs(30),
        }
    }
}

// ── File format ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    pub enabled: Option<bool>,
    pub min_requests: Option<u32>,
    pub failure_ratio: Option<f64>,
    pub timeout: Option<String>,
    pub interval: Option<String>,
    pub max_requests: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSection {
    pub timeout: Option<String>,
    pub default_endpoint: Option<String>,
    pub rate_limit: Option<f64>,
    pub startup_grace_period: Option<String>,
    pub circuit_breaker: Option<CircuitBreakerSection>,
}

/// All profiles declared in a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSet {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSection>,
}

impl ProfileSet {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let set = Self::parse(&content)?;
        debug!(?path, profiles = set.profiles.len(), "profiles loaded");
        Ok(set)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Declared profile names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// Resolve a named profile into an engine configuration.
    ///
    /// Asking for [`DEFAULT_PROFILE`] when the file does not declare it
    /// yields the built-in defaults.
    pub fn profile(&self, name: &str) -> ConfigResult<CheckerConfig> {
        match self.profiles.get(name) {
            Some(section) => section.resolve(),
            None if name == DEFAULT_PROFILE => Ok(CheckerConfig::default()),
            None => Err(ConfigError::UnknownProfile(name.to_string())),
        }
    }
}

impl ProfileSection {
    pub fn resolve(&self) -> ConfigResult<CheckerConfig> {
        let defaults = CheckerConfig::default();

        let timeout = duration_field("timeout", self.timeout.as_deref(), defaults.timeout)?;
        if timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be greater than zero"));
        }

        let default_endpoint = self
            .default_endpoint
            .clone()
            .unwrap_or(defaults.default_endpoint);
        if !default_endpoint.starts_with('/') {
            return Err(ConfigError::invalid(
                "default_endpoint",
                format!("{default_endpoint:?} must start with '/'"),
            ));
        }

        let rate_limit = self.rate_limit.unwrap_or(defaults.rate_limit);
        if rate_limit != 0.0 && !RATE_LIMIT_RANGE.contains(&rate_limit) {
            return Err(ConfigError::invalid(
                "rate_limit",
                format!(
                    "{rate_limit} must be 0 or within {}..={}",
                    RATE_LIMIT_RANGE.start(),
                    RATE_LIMIT_RANGE.end()
                ),
            ));
        }

        let startup_grace_period = duration_field(
            "startup_grace_period",
            self.startup_grace_period.as_deref(),
            defaults.startup_grace_period,
        )?;

        let circuit_breaker = match &self.circuit_breaker {
            Some(section) => section.resolve()?,
            None => defaults.circuit_breaker,
        };

        Ok(CheckerConfig {
            timeout,
            default_endpoint,
            circuit_breaker,
            rate_limit,
            startup_grace_period,
        })
    }
}

impl CircuitBreakerSection {
    pub fn resolve(&self) -> ConfigResult<CircuitBreakerConfig> {
        let defaults = CircuitBreakerConfig::default();

        let failure_ratio = self.failure_ratio.unwrap_or(defaults.failure_ratio);
        if !(failure_ratio > 0.0 && failure_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_ratio",
                format!("{failure_ratio} is outside (0, 1]"),
            ));
        }

        let max_requests = self.max_requests.unwrap_or(defaults.max_requests);
        if max_requests == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.max_requests",
                "must be at least 1",
            ));
        }

        Ok(CircuitBreakerConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            min_requests: self.min_requests.unwrap_or(defaults.min_requests).max(1),
            failure_ratio,
            timeout: duration_field(
                "circuit_breaker.timeout",
                self.timeout.as_deref(),
                defaults.timeout,
            )?,
            interval: duration_field(
                "circuit_breaker.interval",
                self.interval.as_deref(),
                defaults.interval,
            )?,
            max_requests,
        })
    }
}

fn duration_field(
    field: &'static str,
    raw: Option<&str>,
    default: Duration,
) -> ConfigResult<Duration> {
    let Some(s) = raw else {
        return Ok(default);
    };
    let duration = parse_duration(s)
        .ok_or_else(|| ConfigError::invalid(field, format!("{s:?} is not a duration")))?;
    if duration > MAX_DURATION {
        return Err(ConfigError::invalid(
            field,
            format!("{s:?} exceeds {}s", MAX_DURATION.as_secs()),
        ));
    }
    Ok(duration)
}

//! vigil-core — shared vocabulary for the Vigil health-check engine.
//!
//! Provides the service description consumed by the engine, the result
//! record it produces, and the TOML profile loader that supplies engine
//! settings at construction time.
//!
//! # Architecture
//!
//! ```text
//! ProfileSet (profiles.toml)
//!   └── profile(name) → CheckerConfig ──▶ vigil-health::HealthChecker
//!
//! ServiceInfo ──▶ check_service() ──▶ HealthCheckResult
//! ```

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{
    CheckerConfig, CircuitBreakerConfig, ProfileSet, DEFAULT_PROFILE, MAX_DURATION, RATE_LIMIT_RANGE,
};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use types::*;

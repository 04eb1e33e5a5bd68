//! Probe-level errors.
//!
//! These never leave the engine through `check_service`: every variant is
//! folded into a `HealthCheckResult` with an [`ErrorCategory`].

use std::io;
use std::time::Duration;

use thiserror::Error;

use vigil_core::ErrorCategory;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("empty command")]
    EmptyCommand,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("tls setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl ProbeError {
    /// Failure classification for result reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProbeError::Timeout(_) => ErrorCategory::Timeout,
            ProbeError::Cancelled => ErrorCategory::Cancelled,
            ProbeError::Io(e) => classify_io(e),
            ProbeError::Request(e) => match io_source(e) {
                Some(io) => classify_io(io),
                None if e.is_connect() => ErrorCategory::Network,
                None => ErrorCategory::Http,
            },
            ProbeError::InvalidUrl { .. } | ProbeError::EmptyCommand => ErrorCategory::Process,
            ProbeError::Tls(_) => ErrorCategory::Network,
        }
    }

    /// True when nothing could be reached at all, as opposed to a peer
    /// that answered with something unusable.
    pub fn is_connect_failure(&self) -> bool {
        match self {
            ProbeError::Request(e) => e.is_connect() || io_source(e).is_some(),
            ProbeError::Timeout(_) | ProbeError::Io(_) => true,
            _ => false,
        }
    }
}

/// Map an I/O error to the dial taxonomy: refused, timeout, unreachable, other.
pub fn classify_io(err: &io::Error) -> ErrorCategory {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ErrorCategory::ConnectionRefused,
        io::ErrorKind::TimedOut => ErrorCategory::Timeout,
        io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::AddrNotAvailable => ErrorCategory::Unreachable,
        _ => ErrorCategory::Network,
    }
}

/// Walk an error's source chain looking for the underlying I/O error.
fn io_source<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut current = err.source();
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return Some(io);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_dial_categories() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_io(&refused), ErrorCategory::ConnectionRefused);

        let timeout = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(classify_io(&timeout), ErrorCategory::Timeout);

        let unreachable = io::Error::from(io::ErrorKind::HostUnreachable);
        assert_eq!(classify_io(&unreachable), ErrorCategory::Unreachable);

        let other = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(classify_io(&other), ErrorCategory::Network);
    }

    #[test]
    fn timeouts_and_cancellation_are_categorized() {
        assert_eq!(
            ProbeError::Timeout(Duration::from_secs(1)).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(ProbeError::Cancelled.category(), ErrorCategory::Cancelled);
        assert!(ProbeError::Timeout(Duration::from_secs(1)).is_connect_failure());
        assert!(!ProbeError::Cancelled.is_connect_failure());
    }

    #[test]
    fn timeout_display_names_the_bound() {
        let err = ProbeError::Timeout(Duration::from_secs(2));
        assert_eq!(err.to_string(), "timed out after 2s");
    }
}

//! Remediation hints attached to failing results as `details.suggestion`.

use vigil_core::ErrorCategory;

/// Advice for an HTTP error status (>= 400).
pub fn http_suggestion(code: u16) -> &'static str {
    match code {
        503 => "Service unavailable: check that its dependencies (database, cache, upstream APIs) are reachable",
        500 | 501 | 502 | 504 | 505..=511 => "Server error: check the service logs for failures",
        404 => "Health endpoint not found: verify the configured health check path",
        401 | 403 => "Authentication or permission failure: check credentials and access rules for the health endpoint",
        429 => "Rate limited: reduce the check frequency or raise the service's rate limit",
        408 => "Request timed out: check network latency and service performance",
        _ => "Unexpected response: check the service logs and the health endpoint implementation",
    }
}

/// Advice for a failed TCP dial, by failure category.
pub fn dial_suggestion(category: ErrorCategory, port: u16) -> String {
    match category {
        ErrorCategory::ConnectionRefused => format!(
            "Nothing is listening on port {port}: check that the service started and bound to the expected port"
        ),
        ErrorCategory::Timeout => format!(
            "Connection to port {port} timed out: the service may be overloaded or blocked by a firewall"
        ),
        ErrorCategory::Unreachable => format!(
            "Port {port} is unreachable: check network configuration and host availability"
        ),
        _ => format!("Could not connect to port {port}: check the service logs"),
    }
}

pub const PROCESS_NOT_RUNNING: &str =
    "Process is not running: check the service logs and verify its start command";

pub const COMMAND_FAILED: &str =
    "Run the health check command manually in the service environment to see why it fails";

pub const ONE_SHOT_FAILED: &str = "Check the process output for the failure reason";

pub const NO_CHECK_METHOD: &str =
    "Configure a port, a PID, or a custom health check for this service";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_share_advice() {
        for code in [500, 501, 502, 504, 505, 507, 511] {
            assert_eq!(http_suggestion(code), http_suggestion(500), "code {code}");
        }
        assert_ne!(http_suggestion(503), http_suggestion(500));
    }

    #[test]
    fn auth_codes_share_advice() {
        assert_eq!(http_suggestion(401), http_suggestion(403));
        assert!(http_suggestion(401).contains("Authentication"));
    }

    #[test]
    fn unlisted_codes_get_generic_advice() {
        assert_eq!(http_suggestion(418), http_suggestion(499));
        assert!(http_suggestion(418).starts_with("Unexpected"));
    }

    #[test]
    fn dial_advice_names_the_port() {
        let msg = dial_suggestion(ErrorCategory::ConnectionRefused, 8080);
        assert!(msg.contains("8080"));
        assert!(msg.contains("listening"));

        let msg = dial_suggestion(ErrorCategory::Network, 9000);
        assert!(msg.contains("9000"));
    }
}

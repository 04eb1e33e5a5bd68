//! Deadline arithmetic that cannot overflow.

use std::time::Duration;

use tokio::time::Instant;

/// About thirty years, the same horizon tokio uses for timers that never fire.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, clamped to a far-future instant when the sum overflows.
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Seconds-as-float to a `Duration`, saturating on overflow, NaN or negatives.
pub fn saturating_secs_f64(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_offsets_are_exact() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[test]
    fn huge_offsets_clamp_instead_of_panicking() {
        let now = Instant::now();
        let deadline = deadline_after(now, Duration::MAX);
        assert!(deadline > now + Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn float_seconds_saturate() {
        assert_eq!(saturating_secs_f64(1.5), Duration::from_millis(1500));
        assert_eq!(saturating_secs_f64(1e30), Duration::MAX);
        assert_eq!(saturating_secs_f64(f64::INFINITY), Duration::MAX);
        assert_eq!(saturating_secs_f64(f64::NAN), Duration::ZERO);
        assert_eq!(saturating_secs_f64(-1.0), Duration::ZERO);
    }
}

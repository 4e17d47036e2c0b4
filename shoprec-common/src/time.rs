//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert seconds to duration
pub fn secs_to_duration(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Time remaining from `from` until `until`, or `None` once `until` has passed
pub fn remaining(from: DateTime<Utc>, until: DateTime<Utc>) -> Option<Duration> {
    (until - from).to_std().ok().filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[tokio::test]
    async fn test_now_successive_calls_advance() {
        let time1 = now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let time2 = now();
        assert!(time2 > time1);
    }

    #[test]
    fn test_secs_to_duration() {
        assert_eq!(secs_to_duration(0), Duration::ZERO);
        assert_eq!(secs_to_duration(3600), Duration::from_secs(3600));
    }

    #[test]
    fn test_remaining_future_and_past() {
        let start = now();
        let later = start + chrono::Duration::seconds(90);

        assert_eq!(remaining(start, later), Some(Duration::from_secs(90)));
        assert_eq!(remaining(later, start), None);
        assert_eq!(remaining(start, start), None);
    }
}

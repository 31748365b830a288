//! crates/attendance_core/src/countdown.rs
//!
//! Expiry countdown shown while a code is on screen. Pure functions of
//! (`expires_at`, now); nothing here writes shared state.

use chrono::{DateTime, Duration, Utc};

/// Time left before `expires_at`, never negative.
pub fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).max(Duration::zero())
}

/// Human text for the countdown: whole minutes left, or `"expired"`.
pub fn describe(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let left = remaining(expires_at, now);
    if left.is_zero() {
        return "expired".to_string();
    }
    match left.num_minutes() {
        0 => "less than a minute".to_string(),
        1 => "1 minute".to_string(),
        n => format!("{} minutes", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn countdown_text() {
        let expires_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let at = |h, m, s| Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap();

        assert_eq!(describe(expires_at, at(9, 0, 0)), "60 minutes");
        assert_eq!(describe(expires_at, at(9, 58, 30)), "1 minute");
        assert_eq!(describe(expires_at, at(9, 59, 30)), "less than a minute");
        assert_eq!(describe(expires_at, at(10, 0, 0)), "expired");
        assert_eq!(remaining(expires_at, at(11, 0, 0)), Duration::zero());
    }
}

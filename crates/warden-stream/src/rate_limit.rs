use std::sync::OnceLock;

use chrono::{DateTime, Timelike, Utc};
use regex::Regex;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Rate-limit terminal signal extracted from an assistant error result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSignal {
    /// The reset token exactly as it appeared in the transcript, e.g. `8pm`.
    pub reset_time: String,
    /// Minutes from the observation instant to the next occurrence of the
    /// reset hour in UTC. Always in `0..1440`.
    pub wait_minutes: i64,
}

fn reset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Tolerant of the stray separator byte some transcripts carry between
        // "limit" and "resets".
        Regex::new(r"(?i)hit your limit.*resets\s+(\d{1,2}(?:am|pm)?)\s*\(utc\)")
            .unwrap_or_else(|error| panic!("rate-limit reset pattern must compile: {error}"))
    })
}

/// Parses a reset token (`12am`, `12pm`, `Npm`, `Nam`, or a bare 24-hour
/// integer) into an hour in `0..24`. Returns `None` for out-of-range hours.
pub fn parse_reset_hour(token: &str) -> Option<u32> {
    let normalized = token.trim().to_ascii_lowercase();
    if let Some(raw) = normalized.strip_suffix("am") {
        let hour = raw.parse::<u32>().ok()?;
        return match hour {
            12 => Some(0),
            1..=11 => Some(hour),
            _ => None,
        };
    }
    if let Some(raw) = normalized.strip_suffix("pm") {
        let hour = raw.parse::<u32>().ok()?;
        return match hour {
            12 => Some(12),
            1..=11 => Some(hour + 12),
            _ => None,
        };
    }
    let hour = normalized.parse::<u32>().ok()?;
    if hour < 24 {
        Some(hour)
    } else {
        None
    }
}

/// Minutes from `now` to the next occurrence of `hour:00` UTC, wrapping to
/// the next day when the hour has already passed. Result is in `0..1440`.
pub fn minutes_until_hour(hour: u32, now: DateTime<Utc>) -> i64 {
    let target_minutes = i64::from(hour) * 60;
    let now_minutes = i64::from(now.hour()) * 60 + i64::from(now.minute());
    let mut wait = target_minutes - now_minutes;
    if wait < 0 {
        wait += MINUTES_PER_DAY;
    }
    wait
}

/// Inspects an error-result string for the rate-limit reset marker.
pub fn detect_rate_limit(result: &str, now: DateTime<Utc>) -> Option<RateLimitSignal> {
    let captures = reset_pattern().captures(result)?;
    let token = captures.get(1)?.as_str();
    let hour = parse_reset_hour(token)?;
    Some(RateLimitSignal {
        reset_time: token.to_string(),
        wait_minutes: minutes_until_hour(hour, now),
    })
}

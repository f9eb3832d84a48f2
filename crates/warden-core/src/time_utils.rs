use std::time::{SystemTime, UNIX_EPOCH};

/// Returns seconds since the unix epoch, clamped to zero on clock skew.
pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns milliseconds since the unix epoch, clamped to zero on clock skew.
pub fn current_unix_timestamp_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

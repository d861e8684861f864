use chrono::{DateTime, Local, Utc};

/// Converts unix seconds to a UTC moment. Values outside chrono's range
/// clamp to the representable extremes instead of panicking, which also
/// naturally terminates schedule walks that overflow.
pub fn utc_time_of_seconds(seconds: i64) -> DateTime<Utc> {
    match DateTime::from_timestamp(seconds, 0) {
        Some(value) => value,
        None if seconds < 0 => DateTime::<Utc>::MIN_UTC,
        None => DateTime::<Utc>::MAX_UTC,
    }
}

/// Converts unix milliseconds to local wall-clock time, for the
/// human-readable column of a log record.
pub fn local_time_of_millis(millis: i64) -> DateTime<Local> {
    DateTime::from_timestamp_millis(millis)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&Local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_time_of_seconds_clamps_out_of_range() {
        assert_eq!(utc_time_of_seconds(0), DateTime::UNIX_EPOCH);
        assert_eq!(utc_time_of_seconds(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(utc_time_of_seconds(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_local_time_of_millis_truncation() {
        let time = local_time_of_millis(1_000_900);
        assert_eq!(time.with_timezone(&Utc), utc_time_of_seconds(1000) + chrono::Duration::milliseconds(900));
    }
}

use chrono::{DateTime, SecondsFormat, Utc};

/// RFC 3339 rendering with millisecond precision, the format used in every
/// persisted and published timestamp.
#[must_use]
pub fn to_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp, returning `None` for empty or malformed input.
#[must_use]
pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trips_at_millisecond_precision() {
        let ts = parse_rfc3339("2024-03-01T10:20:30.123Z").unwrap();
        assert_eq!(to_rfc3339(&ts), "2024-03-01T10:20:30.123Z");
    }

    #[test]
    fn parse_rejects_empty_and_garbage() {
        assert!(parse_rfc3339("").is_none());
        assert!(parse_rfc3339("yesterday").is_none());
    }
}

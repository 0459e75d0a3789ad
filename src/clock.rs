//! Wall-clock helpers. Every timestamp exchanged between clients is epoch milliseconds.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Render an epoch-millisecond timestamp as RFC 3339 for log fields.
pub fn format_epoch_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_origin() {
        assert_eq!(format_epoch_ms(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}

#![forbid(unsafe_code)]

//! Display formatting for counts and timestamps.
//!
//! All clock math happens in KST (+09:00); clients receive either a
//! relative Korean string ("3일 전") or a `YYYY.MM.DD` date. Timestamps are
//! persisted as RFC 3339 strings with the fixed offset, which also makes
//! them sort lexicographically.

use chrono::{DateTime, FixedOffset, Utc};

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// The fixed timezone every stored and rendered timestamp uses.
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).expect("valid fixed offset")
}

pub fn now_kst() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&kst())
}

/// Renders the current instant the way the store persists timestamps.
pub fn now_stamp() -> String {
    now_kst().to_rfc3339()
}

/// Parses a stored timestamp back into a KST instant. Returns `None` for
/// values that predate the current storage format.
pub fn parse_stamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|instant| instant.with_timezone(&kst()))
}

/// Shortens a raw view count for display: millions keep one decimal,
/// thousands round to the nearest whole number.
pub fn format_views(views: i64) -> String {
    if views >= 1_000_000 {
        format!("{:.1}M", views as f64 / 1_000_000.0)
    } else if views >= 1_000 {
        format!("{:.0}K", views as f64 / 1_000.0)
    } else {
        views.to_string()
    }
}

/// Korean relative-time buckets, oldest first: years, months, days, hours,
/// minutes, then "just now".
pub fn format_relative(instant: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> String {
    let secs = (now - instant).num_seconds().max(0);
    let days = secs / 86_400;
    if days > 365 {
        format!("{}년 전", days / 365)
    } else if days > 30 {
        format!("{}개월 전", days / 30)
    } else if days > 0 {
        format!("{}일 전", days)
    } else if secs > 3_600 {
        format!("{}시간 전", secs / 3_600)
    } else if secs > 60 {
        format!("{}분 전", secs / 60)
    } else {
        "방금 전".to_string()
    }
}

pub fn format_date(instant: DateTime<FixedOffset>) -> String {
    instant.format("%Y.%m.%d").to_string()
}

/// Relative rendering straight from a stored timestamp; unparsable values
/// fall through verbatim so old rows stay visible.
pub fn relative_from_stamp(raw: &str, now: DateTime<FixedOffset>) -> String {
    match parse_stamp(raw) {
        Some(instant) => format_relative(instant, now),
        None => raw.to_string(),
    }
}

pub fn date_from_stamp(raw: &str) -> String {
    parse_stamp(raw).map(format_date).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_now() -> DateTime<FixedOffset> {
        kst().with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap()
    }

    #[test]
    fn views_below_a_thousand_print_verbatim() {
        assert_eq!(format_views(0), "0");
        assert_eq!(format_views(999), "999");
    }

    #[test]
    fn views_in_thousands_round_to_nearest() {
        assert_eq!(format_views(1_000), "1K");
        assert_eq!(format_views(1_499), "1K");
        assert_eq!(format_views(1_999), "2K");
        assert_eq!(format_views(412_000), "412K");
    }

    #[test]
    fn views_in_millions_keep_one_decimal() {
        assert_eq!(format_views(1_200_000), "1.2M");
        assert_eq!(format_views(25_000_000), "25.0M");
    }

    #[test]
    fn relative_buckets() {
        let now = base_now();
        let cases = [
            (Duration::seconds(5), "방금 전"),
            (Duration::seconds(61), "1분 전"),
            (Duration::minutes(59), "59분 전"),
            (Duration::hours(2), "2시간 전"),
            (Duration::days(3), "3일 전"),
            (Duration::days(45), "1개월 전"),
            (Duration::days(400), "1년 전"),
            (Duration::days(800), "2년 전"),
        ];
        for (age, expected) in cases {
            assert_eq!(format_relative(now - age, now), expected, "age {age}");
        }
    }

    #[test]
    fn future_instants_render_as_just_now() {
        let now = base_now();
        assert_eq!(format_relative(now + Duration::hours(1), now), "방금 전");
    }

    #[test]
    fn stamps_round_trip_and_sort() {
        let earlier = base_now() - Duration::days(1);
        let later = base_now();
        let a = earlier.to_rfc3339();
        let b = later.to_rfc3339();
        assert!(a < b, "rfc3339 with a fixed offset sorts chronologically");
        assert_eq!(parse_stamp(&a).unwrap(), earlier);
    }

    #[test]
    fn date_formatting() {
        assert_eq!(format_date(base_now()), "2026.08.29");
        assert_eq!(date_from_stamp(&base_now().to_rfc3339()), "2026.08.29");
        assert_eq!(date_from_stamp("garbage"), "");
    }

    #[test]
    fn unparsable_relative_stamp_passes_through() {
        assert_eq!(relative_from_stamp("garbage", base_now()), "garbage");
    }
}

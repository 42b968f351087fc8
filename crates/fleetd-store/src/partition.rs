use chrono::{Duration, NaiveDate};

/// Catalog name of the daily partition covering `day`.
/// The date is encoded in the name so drop candidates can be identified by
/// inspecting the catalog alone.
pub fn partition_name(day: NaiveDate) -> String {
    format!("telemetry_p{}", day.format("%Y%m%d"))
}

/// Inverse of [`partition_name`]. Returns `None` for names that are not
/// daily telemetry partitions.
pub fn partition_day(name: &str) -> Option<NaiveDate> {
    let suffix = name.strip_prefix("telemetry_p")?;
    NaiveDate::parse_from_str(suffix, "%Y%m%d").ok()
}

/// The invariant window of days that must exist after a maintenance pass:
/// `[today - retention, today + horizon]`, both ends inclusive.
pub fn partition_window(
    today: NaiveDate,
    retention_days: u32,
    horizon_days: u32,
) -> (NaiveDate, NaiveDate) {
    (
        today - Duration::days(i64::from(retention_days)),
        today + Duration::days(i64::from(horizon_days)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn name_encodes_date() {
        assert_eq!(partition_name(day("2026-08-01")), "telemetry_p20260801");
    }

    #[test]
    fn day_round_trips_through_name() {
        let d = day("2026-02-28");
        assert_eq!(partition_day(&partition_name(d)), Some(d));
    }

    #[test]
    fn foreign_names_are_ignored() {
        assert_eq!(partition_day("telemetry_latest"), None);
        assert_eq!(partition_day("telemetry_pnotadate"), None);
        assert_eq!(partition_day("devices"), None);
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let (start, end) = partition_window(day("2026-08-01"), 30, 7);
        assert_eq!(start, day("2026-07-02"));
        assert_eq!(end, day("2026-08-08"));
    }
}

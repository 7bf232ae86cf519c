use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

/// Calendar date of `at` in a zone `offset_hours` east of UTC.
pub fn local_date(at: DateTime<Utc>, offset_hours: i64) -> NaiveDate {
    (at + Duration::hours(offset_hours)).date_naive()
}

/// UTC instant at which the local day containing `now` began.
pub fn local_day_start(now: DateTime<Utc>, offset_hours: i64) -> DateTime<Utc> {
    let local = now + Duration::hours(offset_hours);
    let since_midnight = Duration::seconds(local.num_seconds_from_midnight() as i64)
        + Duration::nanoseconds(local.nanosecond() as i64);
    now - since_midnight
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_start_respects_offset() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 17, 30, 0).unwrap();
        // 01:30 on March 2nd at UTC+8, so the local day began at 16:00 UTC on March 1st.
        assert_eq!(
            local_day_start(now, 8),
            Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap()
        );
        assert_eq!(
            local_day_start(now, 0),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn local_date_rolls_over() {
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(local_date(late, 2), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(local_date(late, -2), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}

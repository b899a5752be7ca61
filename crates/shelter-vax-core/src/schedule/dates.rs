//! Pure date arithmetic for dose scheduling.

use chrono::{DateTime, Days, FixedOffset, Months, NaiveDate, NaiveTime, TimeZone, Utc};

/// Longest day offset a schedule may carry: intervals and query windows.
///
/// Dates are stored as `YYYY-MM-DD` text and compared as text, which only
/// orders correctly while the year keeps four digits.
pub const MAX_SCHEDULE_DAYS: u32 = 36_500;

/// `date + days`, saturating at the calendar maximum.
pub fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

/// `date + years`. 29 February lands on 28 February in non-leap years.
pub fn add_years(date: NaiveDate, years: u32) -> NaiveDate {
    date.checked_add_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MAX)
}

/// Calendar day of `instant` as seen from `offset`.
pub fn shelter_day(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Next instant strictly after `now` whose local time in `offset` is `at`.
pub fn next_daily_run(now: DateTime<Utc>, offset: FixedOffset, at: NaiveTime) -> DateTime<Utc> {
    let local_now = now.with_timezone(&offset);
    let mut candidate = local_now.date_naive().and_time(at);
    if candidate <= local_now.naive_local() {
        candidate = candidate
            .checked_add_days(Days::new(1))
            .unwrap_or(candidate);
    }

    offset
        .from_local_datetime(&candidate)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + chrono::Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_add_days_crosses_months() {
        assert_eq!(add_days(date(2024, 1, 31), 30), date(2024, 3, 1));
        assert_eq!(add_days(date(2023, 12, 15), 21), date(2024, 1, 5));
        assert_eq!(add_days(date(2024, 6, 1), 0), date(2024, 6, 1));
    }

    #[test]
    fn test_add_years_leap_day_clamps() {
        assert_eq!(add_years(date(2024, 2, 29), 1), date(2025, 2, 28));
        assert_eq!(add_years(date(2024, 3, 1), 1), date(2025, 3, 1));
        assert_eq!(add_years(date(2024, 2, 29), 4), date(2028, 2, 29));
    }

    #[test]
    fn test_shelter_day_uses_offset() {
        let sao_paulo = FixedOffset::west_opt(3 * 3600).unwrap();
        // 01:30 UTC is still the previous evening in UTC-3
        let instant = Utc.with_ymd_and_hms(2024, 7, 10, 1, 30, 0).unwrap();
        assert_eq!(shelter_day(instant, sao_paulo), date(2024, 7, 9));

        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(shelter_day(instant, utc), date(2024, 7, 10));
    }

    #[test]
    fn test_max_schedule_days_keeps_four_digit_years() {
        let latest = add_days(date(2024, 1, 10), MAX_SCHEDULE_DAYS);
        assert_eq!(latest.format("%Y-%m-%d").to_string(), "2123-12-17");
    }

    #[test]
    fn test_next_daily_run() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();

        // 10:00 local on the 10th -> midnight local on the 11th (03:00 UTC)
        let now = Utc.with_ymd_and_hms(2024, 7, 10, 13, 0, 0).unwrap();
        assert_eq!(
            next_daily_run(now, offset, midnight),
            Utc.with_ymd_and_hms(2024, 7, 11, 3, 0, 0).unwrap()
        );

        // Exactly at the run time schedules the following day
        let at_run = Utc.with_ymd_and_hms(2024, 7, 11, 3, 0, 0).unwrap();
        assert_eq!(
            next_daily_run(at_run, offset, midnight),
            Utc.with_ymd_and_hms(2024, 7, 12, 3, 0, 0).unwrap()
        );
    }
}

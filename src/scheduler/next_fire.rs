//! `NextFire`: pure function computing the next rotation
//! timestamp for a `VideoRotationSchedule`. Kept free of I/O so it can be
//! exhaustively unit tested without a database.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};

use crate::data::RotationType;

const DEFAULT_TIME_OF_DAY: &str = "09:00";
const FALLBACK_DELAY: Duration = Duration::minutes(5);

fn parse_time_of_day(time_of_day: Option<&str>) -> NaiveTime {
    time_of_day
        .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
        .unwrap_or_else(|| NaiveTime::parse_from_str(DEFAULT_TIME_OF_DAY, "%H:%M").unwrap())
}

fn weekday_from_index(index: i64) -> Option<Weekday> {
    // 0 = Sunday, matching the common cron/JS convention used in the
    // admin UI's day-of-week picker.
    match index.rem_euclid(7) {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn weekday_index(day: Weekday) -> i64 {
    match day {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap();
    let first_of_this = chrono::NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    (first_of_next - first_of_this).num_days() as u32
}

pub fn next_fire(
    rotation_type: Option<RotationType>,
    time_of_day: Option<&str>,
    day_of_week: Option<i64>,
    day_of_month: Option<i64>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match rotation_type {
        Some(RotationType::Daily) => {
            let time = parse_time_of_day(time_of_day);
            let mut target = Utc
                .from_utc_datetime(&now.date_naive().and_time(time));
            if target <= now {
                target += Duration::days(1);
            }
            target
        }
        Some(RotationType::Weekly) => {
            let Some(target_day) = day_of_week.and_then(weekday_from_index) else {
                return now + FALLBACK_DELAY;
            };
            let time = parse_time_of_day(time_of_day);
            let current_index = weekday_index(now.weekday());
            let target_index = weekday_index(target_day);
            let delta_days = (target_index - current_index).rem_euclid(7);
            let mut base = Utc.from_utc_datetime(
                &(now.date_naive() + Duration::days(delta_days)).and_time(time),
            );
            if base <= now {
                base += Duration::days(7);
            }
            base
        }
        Some(RotationType::Monthly) => {
            let Some(day_of_month) = day_of_month else {
                return now + FALLBACK_DELAY;
            };
            if !(1..=31).contains(&day_of_month) {
                return now + FALLBACK_DELAY;
            }
            let time = parse_time_of_day(time_of_day);
            let (mut year, mut month) = (now.year(), now.month());
            if now.day() as i64 >= day_of_month {
                if month == 12 {
                    year += 1;
                    month = 1;
                } else {
                    month += 1;
                }
            }
            let clamped_day = (day_of_month as u32).min(days_in_month(year, month));
            let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, clamped_day) else {
                return now + FALLBACK_DELAY;
            };
            Utc.from_utc_datetime(&date.and_time(time))
        }
        Some(RotationType::Random) => now + FALLBACK_DELAY,
        None => now + FALLBACK_DELAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_time_passed() {
        let now = dt(2026, 3, 10, 10, 0);
        let next = next_fire(Some(RotationType::Daily), Some("09:00"), None, None, now);
        assert_eq!(next, dt(2026, 3, 11, 9, 0));
    }

    #[test]
    fn daily_stays_today_when_time_not_yet_passed() {
        let now = dt(2026, 3, 10, 5, 0);
        let next = next_fire(Some(RotationType::Daily), Some("09:00"), None, None, now);
        assert_eq!(next, dt(2026, 3, 10, 9, 0));
    }

    #[test]
    fn weekly_uses_default_time_when_missing() {
        // 2026-03-10 is a Tuesday. Target Friday (index 5).
        let now = dt(2026, 3, 10, 12, 0);
        let next = next_fire(Some(RotationType::Weekly), None, Some(5), None, now);
        assert_eq!(next, dt(2026, 3, 13, 9, 0));
    }

    #[test]
    fn weekly_missing_day_falls_back() {
        let now = dt(2026, 3, 10, 12, 0);
        let next = next_fire(Some(RotationType::Weekly), Some("09:00"), None, None, now);
        assert_eq!(next, now + FALLBACK_DELAY);
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        // Feb has 28 days in 2026 (not a leap year); requesting the 31st
        // clamps to the 28th.
        let now = dt(2026, 2, 10, 10, 0);
        let next = next_fire(Some(RotationType::Monthly), Some("09:00"), None, Some(31), now);
        assert_eq!(next, dt(2026, 2, 28, 9, 0));
    }

    #[test]
    fn monthly_rolls_to_next_month_when_day_passed() {
        let now = dt(2026, 3, 15, 10, 0);
        let next = next_fire(Some(RotationType::Monthly), Some("09:00"), None, Some(10), now);
        assert_eq!(next, dt(2026, 4, 10, 9, 0));
    }

    #[test]
    fn random_and_unknown_use_five_minute_fallback() {
        let now = dt(2026, 3, 10, 10, 0);
        assert_eq!(next_fire(Some(RotationType::Random), None, None, None, now), now + FALLBACK_DELAY);
        assert_eq!(next_fire(None, None, None, None, now), now + FALLBACK_DELAY);
    }
}

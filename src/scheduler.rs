use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::models::{Chore, ChoreStatus};

/// First instant at `time` strictly after `after`.
pub fn next_daily(after: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    let today = after.date().and_time(time);
    if today > after {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Nearest instant strictly after `after` that lands on one of `days`.
///
/// Scans today plus the following seven days, so a day that has already
/// passed this week wraps into next week.
pub fn next_weekday_occurrence(
    after: NaiveDateTime,
    days: &[Weekday],
    time: NaiveTime,
) -> Option<NaiveDateTime> {
    (0..=7)
        .map(|offset| (after.date() + Duration::days(offset)).and_time(time))
        .find(|candidate| *candidate > after && days.contains(&candidate.weekday()))
}

/// Nearest instant strictly after `after` on day-of-month `day`.
///
/// Months shorter than `day` use their last day instead.
pub fn next_day_of_month(after: NaiveDateTime, day: u32, time: NaiveTime) -> NaiveDateTime {
    next_monthly(after, time, |year, month| day.min(last_day_of_month(year, month)))
}

pub fn next_last_day_of_month(after: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    next_monthly(after, time, last_day_of_month)
}

pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

pub fn is_overdue(chore: &Chore, now: NaiveDateTime) -> bool {
    chore.status == ChoreStatus::Pending && chore.due_at < now
}

fn next_monthly(
    after: NaiveDateTime,
    time: NaiveTime,
    day_in: impl Fn(i32, u32) -> u32,
) -> NaiveDateTime {
    let (mut year, mut month) = (after.year(), after.month());
    loop {
        let day = day_in(year, month);
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            let candidate = date.and_time(time);
            if candidate > after {
                return candidate;
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
}

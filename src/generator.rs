use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ChoreError, Result};
use crate::models::{Chore, ChoreStatus};
use crate::pattern::{Frequency, MonthDay, RecurringPattern};
use crate::scheduler;

/// Next due-date strictly after `after`. One-time patterns have none.
pub fn next_due_date(pattern: &RecurringPattern, after: NaiveDateTime) -> Result<NaiveDateTime> {
    let time = pattern.due_time();
    match pattern.frequency() {
        Frequency::OneTime => Err(ChoreError::invalid(
            "one-time pattern has no next occurrence",
        )),
        Frequency::Daily => Ok(scheduler::next_daily(after, time)),
        Frequency::Weekly(days) => scheduler::next_weekday_occurrence(after, days, time)
            .ok_or_else(|| ChoreError::invalid("weekly pattern has no weekdays")),
        Frequency::Monthly(MonthDay::Day(day)) => {
            Ok(scheduler::next_day_of_month(after, *day, time))
        }
        Frequency::Monthly(MonthDay::Last) => Ok(scheduler::next_last_day_of_month(after, time)),
    }
}

/// Due-dates strictly after `start` and no later than `end`, ascending.
pub fn due_dates(
    pattern: &RecurringPattern,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>> {
    if start > end {
        return Err(ChoreError::invalid(format!(
            "window start {start} is after end {end}"
        )));
    }
    if pattern.is_one_time() {
        return Ok(Vec::new());
    }

    let mut dates = Vec::new();
    let mut cursor = start;
    loop {
        let next = next_due_date(pattern, cursor)?;
        if next > end {
            break;
        }
        dates.push(next);
        cursor = next;
    }

    Ok(dates)
}

/// Window to materialize for a recurring chore: from `now` (or the chore's
/// first due-date, inclusive, if later) through `days` ahead of `now`.
/// `None` when the window is empty.
pub fn generation_window(
    template: &Chore,
    now: NaiveDateTime,
    days: i64,
) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
    let end = Duration::try_days(days)
        .and_then(|span| now.checked_add_signed(span))
        .ok_or_else(|| ChoreError::invalid(format!("window of {days} days is out of range")))?;
    let start = now.max(template.due_at - Duration::seconds(1));
    Ok((start <= end).then_some((start, end)))
}

/// Materializes pending instances of a recurring chore for the window,
/// skipping due-dates listed in `existing`.
pub fn generate_instances(
    parent: &Chore,
    start: NaiveDateTime,
    end: NaiveDateTime,
    existing: &HashSet<NaiveDateTime>,
    now: DateTime<Utc>,
) -> Result<Vec<Chore>> {
    let pattern = match (&parent.pattern, parent.is_recurring) {
        (Some(pattern), true) => pattern,
        _ => {
            return Err(ChoreError::invalid(format!(
                "chore {} is not recurring",
                parent.id
            )))
        }
    };

    let dates = due_dates(pattern, start, end)?;
    let total = dates.len();
    let instances: Vec<Chore> = dates
        .into_iter()
        .filter(|due_at| !existing.contains(due_at))
        .map(|due_at| Chore {
            id: Uuid::new_v4(),
            title: parent.title.clone(),
            description: parent.description.clone(),
            points: parent.points,
            due_at,
            is_recurring: false,
            pattern: None,
            status: ChoreStatus::Pending,
            parent_id: Some(parent.id),
            assignee_id: parent.assignee_id,
            created_by: parent.created_by,
            family_id: parent.family_id,
            icon: parent.icon.clone(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            verified_at: None,
        })
        .collect();

    debug!(
        parent = %parent.id,
        pattern = %pattern,
        skipped = total - instances.len(),
        generated = instances.len(),
        "Generated recurring chore instances"
    );

    Ok(instances)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate, Timelike, Weekday};

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn recurring_chore(pattern: RecurringPattern) -> Chore {
        let now = Utc::now();
        Chore {
            id: Uuid::new_v4(),
            title: "Feed the cat".to_string(),
            description: "Half a scoop".to_string(),
            points: 5,
            due_at: at(2026, 3, 2, 7, 30),
            is_recurring: true,
            pattern: Some(pattern),
            status: ChoreStatus::Pending,
            parent_id: None,
            assignee_id: Some(Uuid::new_v4()),
            created_by: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            icon: "pawprint".to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            verified_at: None,
        }
    }

    #[test]
    fn daily_week_yields_seven_dates_a_day_apart() {
        let pattern = RecurringPattern::daily(18, 0).unwrap();
        let start = at(2026, 3, 2, 0, 0);
        let dates = due_dates(&pattern, start, start + Duration::days(7)).unwrap();

        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], at(2026, 3, 2, 18, 0));
        for pair in dates.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(1));
        }
        assert!(dates.iter().all(|d| d.hour() == 18 && d.minute() == 0));
    }

    #[test]
    fn daily_window_starting_at_due_time_is_exclusive() {
        let pattern = RecurringPattern::daily(9, 0).unwrap();
        let start = at(2026, 3, 2, 9, 0);
        let dates = due_dates(&pattern, start, start + Duration::days(7)).unwrap();
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], at(2026, 3, 3, 9, 0));
        assert_eq!(dates[6], at(2026, 3, 9, 9, 0));
    }

    #[test]
    fn weekly_alternates_monday_thursday() {
        let pattern = RecurringPattern::weekly(vec![Weekday::Thu, Weekday::Mon], 16, 0).unwrap();
        let start = at(2026, 3, 1, 0, 0);
        let dates = due_dates(&pattern, start, at(2026, 3, 31, 23, 59)).unwrap();

        let weekdays: Vec<Weekday> = dates.iter().map(|d| d.weekday()).collect();
        assert_eq!(
            weekdays,
            vec![
                Weekday::Mon,
                Weekday::Thu,
                Weekday::Mon,
                Weekday::Thu,
                Weekday::Mon,
                Weekday::Thu,
                Weekday::Mon,
                Weekday::Thu,
                Weekday::Mon,
            ]
        );
        for pair in dates.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[1] - pair[0] <= Duration::days(4));
        }
    }

    #[test]
    fn monthly_last_day_tracks_month_length() {
        let pattern = RecurringPattern::monthly_last(20, 0).unwrap();
        let dates = due_dates(&pattern, at(2028, 1, 1, 0, 0), at(2028, 12, 31, 23, 0)).unwrap();

        let days: Vec<u32> = dates.iter().map(|d| d.day()).collect();
        assert_eq!(days, vec![31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]);
    }

    #[test]
    fn monthly_day_never_repeats_a_month() {
        let pattern = RecurringPattern::monthly_on(31, 8, 0).unwrap();
        let dates = due_dates(&pattern, at(2026, 1, 1, 0, 0), at(2026, 6, 30, 23, 0)).unwrap();
        let months: Vec<u32> = dates.iter().map(|d| d.month()).collect();
        assert_eq!(months, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(dates[1].day(), 28);
    }

    #[test]
    fn one_time_is_terminal() {
        let pattern = RecurringPattern::one_time();
        assert!(matches!(
            next_due_date(&pattern, at(2026, 1, 1, 0, 0)),
            Err(ChoreError::InvalidInput(_))
        ));
        assert!(due_dates(&pattern, at(2026, 1, 1, 0, 0), at(2026, 2, 1, 0, 0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let pattern = RecurringPattern::daily(9, 0).unwrap();
        assert!(due_dates(&pattern, at(2026, 2, 1, 0, 0), at(2026, 1, 1, 0, 0)).is_err());
    }

    #[test]
    fn instances_link_back_to_parent_and_skip_existing() {
        let parent = recurring_chore(RecurringPattern::daily(7, 30).unwrap());
        let start = at(2026, 3, 2, 0, 0);
        let end = start + Duration::days(3);
        let existing: HashSet<NaiveDateTime> = [at(2026, 3, 3, 7, 30)].into_iter().collect();

        let instances = generate_instances(&parent, start, end, &existing, Utc::now()).unwrap();

        assert_eq!(instances.len(), 2);
        for instance in &instances {
            assert!(!instance.is_recurring);
            assert!(instance.pattern.is_none());
            assert_eq!(instance.parent_id, Some(parent.id));
            assert_eq!(instance.assignee_id, parent.assignee_id);
            assert_eq!(instance.status, ChoreStatus::Pending);
            assert_ne!(instance.id, parent.id);
        }
        assert_eq!(instances[0].due_at, at(2026, 3, 2, 7, 30));
        assert_eq!(instances[1].due_at, at(2026, 3, 4, 7, 30));
    }

    #[test]
    fn window_includes_first_due_date_and_stops_at_horizon() {
        let template = recurring_chore(RecurringPattern::daily(7, 30).unwrap());
        let now = at(2026, 3, 1, 12, 0);

        let (start, end) = generation_window(&template, now, 3).unwrap().unwrap();
        let dates = due_dates(template.pattern.as_ref().unwrap(), start, end).unwrap();
        assert_eq!(dates.first(), Some(&template.due_at));
        assert_eq!(dates.len(), 3);

        assert!(generation_window(&template, now, 0).unwrap().is_none());

        let later = at(2026, 3, 10, 12, 0);
        let (start, _) = generation_window(&template, later, 3).unwrap().unwrap();
        assert_eq!(start, later);
    }

    #[test]
    fn oversized_window_is_rejected() {
        let template = recurring_chore(RecurringPattern::daily(7, 30).unwrap());
        let now = at(2026, 3, 1, 12, 0);
        for days in [1_000_000_000, i64::MAX] {
            assert!(matches!(
                generation_window(&template, now, days),
                Err(ChoreError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn instances_require_recurring_parent() {
        let mut parent = recurring_chore(RecurringPattern::daily(7, 30).unwrap());
        parent.is_recurring = false;
        let start = at(2026, 3, 2, 0, 0);
        let result = generate_instances(
            &parent,
            start,
            start + Duration::days(1),
            &HashSet::new(),
            Utc::now(),
        );
        assert!(matches!(result, Err(ChoreError::InvalidInput(_))));
    }
}

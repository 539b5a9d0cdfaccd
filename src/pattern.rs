use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ChoreError, Result};

/// Day of the month a monthly chore falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthDay {
    Day(u32),
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frequency {
    OneTime,
    Daily,
    /// Weekdays kept in ascending Sunday-first order, never empty.
    Weekly(Vec<Weekday>),
    Monthly(MonthDay),
}

/// Recurrence rule for a chore.
///
/// Encoded as `daily:HH:MM`, `weekly:1,4:HH:MM` (Sunday = 1),
/// `monthly:DD:HH:MM`, `monthly:last:HH:MM` or `one_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringPattern {
    frequency: Frequency,
    due_time: NaiveTime,
}

impl RecurringPattern {
    pub fn one_time() -> Self {
        Self {
            frequency: Frequency::OneTime,
            due_time: NaiveTime::MIN,
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Result<Self> {
        Ok(Self {
            frequency: Frequency::Daily,
            due_time: time_of_day(hour, minute)?,
        })
    }

    pub fn weekly(days: Vec<Weekday>, hour: u32, minute: u32) -> Result<Self> {
        if days.is_empty() {
            return Err(ChoreError::invalid("weekly pattern needs at least one weekday"));
        }

        let mut sorted = days;
        sorted.sort_by_key(|day| day.number_from_sunday());
        if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ChoreError::invalid("weekly pattern repeats a weekday"));
        }

        Ok(Self {
            frequency: Frequency::Weekly(sorted),
            due_time: time_of_day(hour, minute)?,
        })
    }

    pub fn monthly_on(day: u32, hour: u32, minute: u32) -> Result<Self> {
        if !(1..=31).contains(&day) {
            return Err(ChoreError::invalid(format!(
                "day of month must be 1-31, got {day}"
            )));
        }

        Ok(Self {
            frequency: Frequency::Monthly(MonthDay::Day(day)),
            due_time: time_of_day(hour, minute)?,
        })
    }

    pub fn monthly_last(hour: u32, minute: u32) -> Result<Self> {
        Ok(Self {
            frequency: Frequency::Monthly(MonthDay::Last),
            due_time: time_of_day(hour, minute)?,
        })
    }

    pub fn frequency(&self) -> &Frequency {
        &self.frequency
    }

    pub fn due_time(&self) -> NaiveTime {
        self.due_time
    }

    pub fn is_one_time(&self) -> bool {
        matches!(self.frequency, Frequency::OneTime)
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input == "one_time" {
            return Ok(Self::one_time());
        }

        let parts: Vec<&str> = input.split(':').collect();
        match parts.as_slice() {
            ["daily", hour, minute] => {
                Self::daily(parse_number(hour, "hour")?, parse_number(minute, "minute")?)
            }
            ["weekly", days, hour, minute] => {
                let days = days
                    .split(',')
                    .map(|day| parse_number(day, "weekday").and_then(weekday_from_number))
                    .collect::<Result<Vec<_>>>()?;
                Self::weekly(
                    days,
                    parse_number(hour, "hour")?,
                    parse_number(minute, "minute")?,
                )
            }
            ["monthly", "last", hour, minute] => {
                Self::monthly_last(parse_number(hour, "hour")?, parse_number(minute, "minute")?)
            }
            ["monthly", day, hour, minute] => Self::monthly_on(
                parse_number(day, "day of month")?,
                parse_number(hour, "hour")?,
                parse_number(minute, "minute")?,
            ),
            _ => Err(ChoreError::invalid(format!(
                "unrecognized recurrence pattern '{input}'"
            ))),
        }
    }

    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecurringPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hour, minute) = (self.due_time.hour(), self.due_time.minute());
        match &self.frequency {
            Frequency::OneTime => write!(f, "one_time"),
            Frequency::Daily => write!(f, "daily:{hour:02}:{minute:02}"),
            Frequency::Weekly(days) => {
                let days: Vec<String> = days
                    .iter()
                    .map(|day| day.number_from_sunday().to_string())
                    .collect();
                write!(f, "weekly:{}:{hour:02}:{minute:02}", days.join(","))
            }
            Frequency::Monthly(MonthDay::Day(day)) => {
                write!(f, "monthly:{day:02}:{hour:02}:{minute:02}")
            }
            Frequency::Monthly(MonthDay::Last) => write!(f, "monthly:last:{hour:02}:{minute:02}"),
        }
    }
}

impl FromStr for RecurringPattern {
    type Err = ChoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RecurringPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecurringPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

/// Maps 1..=7 onto weekdays, Sunday first.
pub fn weekday_from_number(number: u32) -> Result<Weekday> {
    match number {
        1 => Ok(Weekday::Sun),
        2 => Ok(Weekday::Mon),
        3 => Ok(Weekday::Tue),
        4 => Ok(Weekday::Wed),
        5 => Ok(Weekday::Thu),
        6 => Ok(Weekday::Fri),
        7 => Ok(Weekday::Sat),
        _ => Err(ChoreError::invalid(format!(
            "weekday must be 1-7 (Sunday = 1), got {number}"
        ))),
    }
}

fn time_of_day(hour: u32, minute: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| ChoreError::invalid(format!("invalid due time {hour}:{minute}")))
}

fn parse_number(value: &str, field: &str) -> Result<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChoreError::invalid(format!("{field} '{value}' is not a number")));
    }
    value
        .parse::<u32>()
        .map_err(|_| ChoreError::invalid(format!("{field} '{value}' is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_each_frequency() {
        assert_eq!(RecurringPattern::one_time().serialize(), "one_time");
        assert_eq!(RecurringPattern::daily(7, 5).unwrap().serialize(), "daily:07:05");
        assert_eq!(
            RecurringPattern::weekly(vec![Weekday::Thu, Weekday::Mon], 18, 30)
                .unwrap()
                .serialize(),
            "weekly:2,5:18:30"
        );
        assert_eq!(
            RecurringPattern::monthly_on(3, 9, 0).unwrap().serialize(),
            "monthly:03:09:00"
        );
        assert_eq!(
            RecurringPattern::monthly_last(20, 15).unwrap().serialize(),
            "monthly:last:20:15"
        );
    }

    #[test]
    fn parse_inverts_serialize() {
        let patterns = vec![
            RecurringPattern::one_time(),
            RecurringPattern::daily(0, 0).unwrap(),
            RecurringPattern::weekly(vec![Weekday::Sat, Weekday::Sun, Weekday::Wed], 23, 59)
                .unwrap(),
            RecurringPattern::monthly_on(31, 12, 0).unwrap(),
            RecurringPattern::monthly_last(6, 45).unwrap(),
        ];

        for pattern in patterns {
            let encoded = pattern.serialize();
            assert_eq!(RecurringPattern::parse(&encoded).unwrap(), pattern, "{encoded}");
        }
    }

    #[test]
    fn parse_accepts_unpadded_fields() {
        let pattern = RecurringPattern::parse("monthly:5:7:3").unwrap();
        assert_eq!(pattern, RecurringPattern::monthly_on(5, 7, 3).unwrap());
    }

    #[test]
    fn weekly_requires_unique_nonempty_days() {
        assert!(RecurringPattern::weekly(vec![], 9, 0).is_err());
        assert!(RecurringPattern::weekly(vec![Weekday::Mon, Weekday::Mon], 9, 0).is_err());
        assert!(RecurringPattern::parse("weekly::09:00").is_err());
        assert!(RecurringPattern::parse("weekly:2,2:09:00").is_err());
        assert!(RecurringPattern::parse("weekly:8:09:00").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        for raw in [
            "",
            "hourly:01:00",
            "daily:24:00",
            "daily:10:60",
            "daily:10",
            "daily:a:00",
            "monthly:0:10:00",
            "monthly:32:10:00",
            "monthly:first:10:00",
            "one_time:10:00",
        ] {
            let err = RecurringPattern::parse(raw).unwrap_err();
            assert!(matches!(err, ChoreError::InvalidInput(_)), "{raw}");
        }
    }

    #[test]
    fn serde_uses_string_encoding() {
        let pattern = RecurringPattern::weekly(vec![Weekday::Mon], 8, 0).unwrap();
        let json = serde_json::to_string(&pattern).unwrap();
        assert_eq!(json, "\"weekly:2:08:00\"");
        let back: RecurringPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pattern);
        assert!(serde_json::from_str::<RecurringPattern>("\"weekly:9:08:00\"").is_err());
    }
}

//! Scheduler data types: one-time task records and recurring schedule specs.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// One-time task records
// ---------------------------------------------------------------------------

/// A task bound to a single absolute execution instant, removed after firing.
///
/// The on-disk shape is the external store format (`execution_time` as an
/// ISO-8601 UTC timestamp, `task_name`, `task_args`); `id` is assigned by the
/// store when absent so hand-seeded records remain valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OneTimeTask {
    #[serde(default)]
    pub id: String,
    pub execution_time: DateTime<Utc>,
    pub task_name: String,
    #[serde(default)]
    pub task_args: Value,
}

impl OneTimeTask {
    pub fn new(execution_time: DateTime<Utc>, task_name: &str, task_args: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            execution_time,
            task_name: task_name.to_string(),
            task_args,
        }
    }
}

// ---------------------------------------------------------------------------
// Recurring schedule sources
// ---------------------------------------------------------------------------

/// Flat record shape of the schedule source files (static and generated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScheduleRecord {
    pub task_name: String,
    pub schedule: RawSchedule,
    #[serde(default)]
    pub task_args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawSchedule {
    /// Weekday name, e.g. "monday" or "mon".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    /// Wall-clock time "HH:MM" in the scheduler's zone. For interval
    /// schedules in days this anchors the fire time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
    /// "minutes", "hours" or "days".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("schedule needs either day+at or unit+interval")]
    Incomplete,
    #[error("invalid weekday '{0}'")]
    InvalidDay(String),
    #[error("invalid time '{0}' (expected HH:MM)")]
    InvalidTime(String),
    #[error("invalid interval unit '{0}'")]
    InvalidUnit(String),
    #[error("interval must be positive")]
    ZeroInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

/// Materialized trigger condition of a recurring job.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleSpec {
    /// Fires once a week at a wall-clock time in the scheduler's zone.
    /// Wall-clock means the fire time is DST-stable: 18:00 stays 18:00.
    Weekly { day: Weekday, at: NaiveTime },
    /// Fires every `interval` units; `anchor` pins day-based intervals to a
    /// wall-clock time.
    Interval {
        unit: IntervalUnit,
        interval: u32,
        anchor: Option<NaiveTime>,
    },
}

impl TryFrom<&RawSchedule> for ScheduleSpec {
    type Error = ScheduleError;

    fn try_from(raw: &RawSchedule) -> Result<Self, Self::Error> {
        if let Some(day) = &raw.day {
            let at = raw.at.as_deref().ok_or(ScheduleError::Incomplete)?;
            let day: Weekday = day
                .parse()
                .map_err(|_| ScheduleError::InvalidDay(day.clone()))?;
            let at = parse_time(at)?;
            return Ok(ScheduleSpec::Weekly { day, at });
        }
        if let (Some(unit), Some(interval)) = (&raw.unit, raw.interval) {
            if interval == 0 {
                return Err(ScheduleError::ZeroInterval);
            }
            let unit = match unit.to_lowercase().as_str() {
                "minute" | "minutes" => IntervalUnit::Minutes,
                "hour" | "hours" => IntervalUnit::Hours,
                "day" | "days" => IntervalUnit::Days,
                other => return Err(ScheduleError::InvalidUnit(other.to_string())),
            };
            let anchor = raw.at.as_deref().map(parse_time).transpose()?;
            return Ok(ScheduleSpec::Interval {
                unit,
                interval,
                anchor,
            });
        }
        Err(ScheduleError::Incomplete)
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ScheduleError::InvalidTime(s.to_string()))
}

/// Resolve a local wall-clock datetime in `tz`, stepping over DST gaps to
/// the next valid instant and taking the earlier side of ambiguous folds.
fn resolve_local(naive: chrono::NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _second) => Some(first.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

impl ScheduleSpec {
    /// Next fire instant strictly after `after`, computed in `tz`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            ScheduleSpec::Weekly { day, at } => {
                let local = after.with_timezone(&tz);
                let mut date = local.date_naive();
                // At most 8 candidate days covers a full week plus the
                // same-day-but-earlier case.
                for _ in 0..8 {
                    if date.weekday() == *day {
                        if let Some(utc) = resolve_local(date.and_time(*at), tz) {
                            if utc > after {
                                return Some(utc);
                            }
                        }
                    }
                    date = date.succ_opt()?;
                }
                None
            }
            ScheduleSpec::Interval {
                unit,
                interval,
                anchor,
            } => match unit {
                IntervalUnit::Minutes => Some(after + Duration::minutes(i64::from(*interval))),
                IntervalUnit::Hours => Some(after + Duration::hours(i64::from(*interval))),
                IntervalUnit::Days => match anchor {
                    None => Some(after + Duration::days(i64::from(*interval))),
                    Some(at) => {
                        let local = after.with_timezone(&tz);
                        let mut date = local.date_naive();
                        // Find the next wall-clock occurrence, then skip
                        // forward by the remaining whole days of the step.
                        let first = loop {
                            if let Some(utc) = resolve_local(date.and_time(*at), tz) {
                                if utc > after {
                                    break utc;
                                }
                            }
                            date = date.succ_opt()?;
                        };
                        Some(first + Duration::days(i64::from(*interval) - 1))
                    }
                },
            },
        }
    }
}

/// A recurring job definition after its source record passed validation.
#[derive(Debug, Clone)]
pub struct RecurringJobDef {
    pub task_name: String,
    pub schedule: ScheduleSpec,
    pub task_args: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Kyiv;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn weekly(day: Weekday, at: &str) -> ScheduleSpec {
        ScheduleSpec::Weekly {
            day,
            at: NaiveTime::parse_from_str(at, "%H:%M").unwrap(),
        }
    }

    #[test]
    fn weekly_fires_later_same_day() {
        // 2024-01-01 is a Monday; 10:00 UTC is 12:00 in Kyiv (EET, +02).
        let now = utc("2024-01-01T10:00:00Z");
        let next = weekly(Weekday::Mon, "18:00").next_after(now, Kyiv).unwrap();
        assert_eq!(next, utc("2024-01-01T16:00:00Z"));
    }

    #[test]
    fn weekly_skips_to_next_week_when_time_passed() {
        let now = utc("2024-01-01T17:00:00Z"); // 19:00 Kyiv, past 18:00
        let next = weekly(Weekday::Mon, "18:00").next_after(now, Kyiv).unwrap();
        assert_eq!(next, utc("2024-01-08T16:00:00Z"));
    }

    #[test]
    fn weekly_time_is_dst_stable() {
        // Kyiv switches to EEST (+03) on 2024-03-31. 18:00 local stays
        // 18:00 local: 16:00 UTC before the shift, 15:00 UTC after.
        let before = weekly(Weekday::Fri, "18:00")
            .next_after(utc("2024-03-25T00:00:00Z"), Kyiv)
            .unwrap();
        assert_eq!(before, utc("2024-03-29T16:00:00Z"));

        let after = weekly(Weekday::Fri, "18:00")
            .next_after(utc("2024-04-01T00:00:00Z"), Kyiv)
            .unwrap();
        assert_eq!(after, utc("2024-04-05T15:00:00Z"));
    }

    #[test]
    fn interval_minutes_advances_from_now() {
        let spec = ScheduleSpec::Interval {
            unit: IntervalUnit::Minutes,
            interval: 30,
            anchor: None,
        };
        let now = utc("2024-01-01T10:00:00Z");
        assert_eq!(spec.next_after(now, Kyiv).unwrap(), utc("2024-01-01T10:30:00Z"));
    }

    #[test]
    fn interval_days_with_anchor_pins_wall_clock() {
        let spec = ScheduleSpec::Interval {
            unit: IntervalUnit::Days,
            interval: 1,
            anchor: Some(NaiveTime::parse_from_str("09:00", "%H:%M").unwrap()),
        };
        // 08:00 UTC = 10:00 Kyiv, past 09:00 local, so next is tomorrow.
        let now = utc("2024-01-01T08:00:00Z");
        assert_eq!(spec.next_after(now, Kyiv).unwrap(), utc("2024-01-02T07:00:00Z"));
    }

    #[test]
    fn raw_weekly_record_converts() {
        let raw = RawSchedule {
            day: Some("wednesday".into()),
            at: Some("19:30".into()),
            ..Default::default()
        };
        let spec = ScheduleSpec::try_from(&raw).unwrap();
        assert_eq!(
            spec,
            weekly(Weekday::Wed, "19:30")
        );
    }

    #[test]
    fn raw_interval_record_converts() {
        let raw = RawSchedule {
            unit: Some("hours".into()),
            interval: Some(6),
            ..Default::default()
        };
        assert_eq!(
            ScheduleSpec::try_from(&raw).unwrap(),
            ScheduleSpec::Interval {
                unit: IntervalUnit::Hours,
                interval: 6,
                anchor: None,
            }
        );
    }

    #[test]
    fn raw_record_rejects_incomplete_and_invalid() {
        assert_eq!(
            ScheduleSpec::try_from(&RawSchedule::default()),
            Err(ScheduleError::Incomplete)
        );
        let bad_day = RawSchedule {
            day: Some("someday".into()),
            at: Some("10:00".into()),
            ..Default::default()
        };
        assert!(matches!(
            ScheduleSpec::try_from(&bad_day),
            Err(ScheduleError::InvalidDay(_))
        ));
        let bad_time = RawSchedule {
            day: Some("monday".into()),
            at: Some("25:99".into()),
            ..Default::default()
        };
        assert!(matches!(
            ScheduleSpec::try_from(&bad_time),
            Err(ScheduleError::InvalidTime(_))
        ));
        let zero = RawSchedule {
            unit: Some("minutes".into()),
            interval: Some(0),
            ..Default::default()
        };
        assert_eq!(ScheduleSpec::try_from(&zero), Err(ScheduleError::ZeroInterval));
    }

    #[test]
    fn one_time_record_uses_external_format() {
        let json = r#"{
            "execution_time": "2024-01-01T00:00:00Z",
            "task_name": "publish",
            "task_args": {"id": "draft-1"}
        }"#;
        let task: OneTimeTask = serde_json::from_str(json).unwrap();
        assert!(task.id.is_empty());
        assert_eq!(task.task_name, "publish");
        assert_eq!(task.task_args["id"], "draft-1");

        let out = serde_json::to_string(&task).unwrap();
        assert!(out.contains("\"execution_time\""));
        assert!(out.contains("\"task_name\""));
    }
}

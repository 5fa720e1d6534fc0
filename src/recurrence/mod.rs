//! Recurrence rules -- cadence model and next-run arithmetic.

pub mod calc;

pub use calc::{default_tolerance, is_due_now, next_run_after, preview_occurrences};

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected recurrence configuration. Surfaced synchronously at schedule
/// create/update time and never stored.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown cadence kind '{0}' (expected minute, hour, day, or week)")]
    UnknownKind(String),
    #[error("minute cadence requires a positive minute_interval")]
    MissingMinuteInterval,
    #[error("hour cadence requires a positive hour_interval")]
    MissingHourInterval,
    #[error("{0} cadence requires time_of_day")]
    MissingTimeOfDay(&'static str),
    #[error("week cadence requires a weekday")]
    MissingWeekday,
    #[error("unknown weekday '{0}'")]
    UnknownWeekday(String),
    #[error("invalid time of day {hour}:{minute:02}")]
    InvalidTimeOfDay { hour: u32, minute: u32 },
    #[error("invalid time of day '{0}' (expected HH:MM)")]
    UnparseableTimeOfDay(String),
}

/// Wall-clock time used by day and week cadences. Always interpreted in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ConfigurationError> {
        if hour > 23 || minute > 59 {
            return Err(ConfigurationError::InvalidTimeOfDay { hour, minute });
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub(crate) fn as_naive(&self) -> NaiveTime {
        // Fields are range-checked in the constructor.
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap()
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| ConfigurationError::UnparseableTimeOfDay(s.to_string()))?;
        let hour = h
            .parse()
            .map_err(|_| ConfigurationError::UnparseableTimeOfDay(s.to_string()))?;
        let minute = m
            .parse()
            .map_err(|_| ConfigurationError::UnparseableTimeOfDay(s.to_string()))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigurationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> String {
        t.to_string()
    }
}

/// Which days a week cadence applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekdaySpec {
    /// A single fixed weekday.
    Day(Weekday),
    /// Monday through Friday.
    Weekdays,
    /// Every day of the week at the configured time.
    EveryDay,
}

impl WeekdaySpec {
    pub fn parse(s: &str) -> Result<Self, ConfigurationError> {
        match s.to_ascii_lowercase().as_str() {
            "monday" => Ok(Self::Day(Weekday::Mon)),
            "tuesday" => Ok(Self::Day(Weekday::Tue)),
            "wednesday" => Ok(Self::Day(Weekday::Wed)),
            "thursday" => Ok(Self::Day(Weekday::Thu)),
            "friday" => Ok(Self::Day(Weekday::Fri)),
            "saturday" => Ok(Self::Day(Weekday::Sat)),
            "sunday" => Ok(Self::Day(Weekday::Sun)),
            "weekday" | "weekdays" => Ok(Self::Weekdays),
            "every" | "everyday" => Ok(Self::EveryDay),
            other => Err(ConfigurationError::UnknownWeekday(other.to_string())),
        }
    }

    /// Whether the given weekday falls inside this spec.
    pub fn matches(&self, day: Weekday) -> bool {
        match self {
            Self::Day(d) => *d == day,
            Self::Weekdays => day.num_days_from_monday() <= 4,
            Self::EveryDay => true,
        }
    }
}

impl std::fmt::Display for WeekdaySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day(Weekday::Mon) => write!(f, "monday"),
            Self::Day(Weekday::Tue) => write!(f, "tuesday"),
            Self::Day(Weekday::Wed) => write!(f, "wednesday"),
            Self::Day(Weekday::Thu) => write!(f, "thursday"),
            Self::Day(Weekday::Fri) => write!(f, "friday"),
            Self::Day(Weekday::Sat) => write!(f, "saturday"),
            Self::Day(Weekday::Sun) => write!(f, "sunday"),
            Self::Weekdays => write!(f, "weekday"),
            Self::EveryDay => write!(f, "every"),
        }
    }
}

/// Cadence of a schedule. The enum shape makes a partially configured rule
/// unrepresentable; validation happens once, in [`RecurrenceRule::from_parts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Minute { every_minutes: u32 },
    Hour { every_hours: u32 },
    Day { at: TimeOfDay },
    Week { on: WeekdaySpec, at: TimeOfDay },
}

impl Cadence {
    pub fn kind(&self) -> &'static str {
        match self {
            Cadence::Minute { .. } => "minute",
            Cadence::Hour { .. } => "hour",
            Cadence::Day { .. } => "day",
            Cadence::Week { .. } => "week",
        }
    }
}

/// A schedule's recurrence description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecurrenceSpec", into = "RecurrenceSpec")]
pub struct RecurrenceRule {
    pub cadence: Cadence,
    pub active: bool,
}

impl RecurrenceRule {
    /// Build a rule from the flat wire/storage representation, rejecting
    /// missing or invalid fields for the declared kind.
    pub fn from_parts(
        kind: &str,
        minute_interval: Option<u32>,
        hour_interval: Option<u32>,
        time_of_day: Option<TimeOfDay>,
        weekday: Option<WeekdaySpec>,
        active: bool,
    ) -> Result<Self, ConfigurationError> {
        let cadence = match kind {
            "minute" => match minute_interval {
                Some(n) if n > 0 => Cadence::Minute { every_minutes: n },
                _ => return Err(ConfigurationError::MissingMinuteInterval),
            },
            "hour" => match hour_interval {
                Some(n) if n > 0 => Cadence::Hour { every_hours: n },
                _ => return Err(ConfigurationError::MissingHourInterval),
            },
            "day" => {
                let at = time_of_day.ok_or(ConfigurationError::MissingTimeOfDay("day"))?;
                Cadence::Day { at }
            }
            "week" => {
                let at = time_of_day.ok_or(ConfigurationError::MissingTimeOfDay("week"))?;
                let on = weekday.ok_or(ConfigurationError::MissingWeekday)?;
                Cadence::Week { on, at }
            }
            other => return Err(ConfigurationError::UnknownKind(other.to_string())),
        };
        Ok(Self { cadence, active })
    }

    /// Convenience cron encoding (seconds-field syntax accepted by the
    /// `cron` crate). Display and preview only; scheduling correctness never
    /// depends on this string. Minute/hour steps that do not divide the
    /// period evenly are approximated, matching cron's own `*/n` semantics.
    pub fn cron_expr(&self) -> String {
        match &self.cadence {
            Cadence::Minute { every_minutes } => format!("0 */{} * * * *", every_minutes),
            Cadence::Hour { every_hours } => format!("0 0 */{} * * *", every_hours),
            Cadence::Day { at } => format!("0 {} {} * * *", at.minute(), at.hour()),
            Cadence::Week { on, at } => {
                let dow = match on {
                    WeekdaySpec::Day(Weekday::Mon) => "MON",
                    WeekdaySpec::Day(Weekday::Tue) => "TUE",
                    WeekdaySpec::Day(Weekday::Wed) => "WED",
                    WeekdaySpec::Day(Weekday::Thu) => "THU",
                    WeekdaySpec::Day(Weekday::Fri) => "FRI",
                    WeekdaySpec::Day(Weekday::Sat) => "SAT",
                    WeekdaySpec::Day(Weekday::Sun) => "SUN",
                    WeekdaySpec::Weekdays => "MON-FRI",
                    WeekdaySpec::EveryDay => "*",
                };
                format!("0 {} {} * * {}", at.minute(), at.hour(), dow)
            }
        }
    }

    /// Flatten back into the wire/storage representation.
    pub fn to_spec(&self) -> RecurrenceSpec {
        let mut spec = RecurrenceSpec {
            kind: self.cadence.kind().to_string(),
            active: self.active,
            ..Default::default()
        };
        match &self.cadence {
            Cadence::Minute { every_minutes } => spec.minute_interval = Some(*every_minutes),
            Cadence::Hour { every_hours } => spec.hour_interval = Some(*every_hours),
            Cadence::Day { at } => spec.time_of_day = Some(*at),
            Cadence::Week { on, at } => {
                spec.time_of_day = Some(*at);
                spec.weekday = Some(on.to_string());
            }
        }
        spec
    }
}

/// Flat recurrence form carried over the API and in storage columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecurrenceSpec {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TryFrom<RecurrenceSpec> for RecurrenceRule {
    type Error = ConfigurationError;

    fn try_from(spec: RecurrenceSpec) -> Result<Self, Self::Error> {
        let weekday = spec
            .weekday
            .as_deref()
            .map(WeekdaySpec::parse)
            .transpose()?;
        RecurrenceRule::from_parts(
            &spec.kind,
            spec.minute_interval,
            spec.hour_interval,
            spec.time_of_day,
            weekday,
            spec.active,
        )
    }
}

impl From<RecurrenceRule> for RecurrenceSpec {
    fn from(rule: RecurrenceRule) -> Self {
        rule.to_spec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn from_parts_rejects_missing_interval() {
        let err = RecurrenceRule::from_parts("minute", None, None, None, None, true);
        assert!(matches!(err, Err(ConfigurationError::MissingMinuteInterval)));

        let err = RecurrenceRule::from_parts("minute", Some(0), None, None, None, true);
        assert!(matches!(err, Err(ConfigurationError::MissingMinuteInterval)));
    }

    #[test]
    fn from_parts_rejects_week_without_weekday() {
        let at = TimeOfDay::new(9, 0).unwrap();
        let err = RecurrenceRule::from_parts("week", None, None, Some(at), None, true);
        assert!(matches!(err, Err(ConfigurationError::MissingWeekday)));
    }

    #[test]
    fn from_parts_rejects_unknown_kind() {
        let err = RecurrenceRule::from_parts("fortnight", None, None, None, None, true);
        assert!(matches!(err, Err(ConfigurationError::UnknownKind(_))));
    }

    #[test]
    fn time_of_day_parses_and_validates() {
        let t = TimeOfDay::from_str("09:30").unwrap();
        assert_eq!((t.hour(), t.minute()), (9, 30));
        assert!(TimeOfDay::from_str("24:00").is_err());
        assert!(TimeOfDay::from_str("0900").is_err());
    }

    #[test]
    fn weekday_spec_matches_weekdays_only() {
        use chrono::Weekday::*;
        assert!(WeekdaySpec::Weekdays.matches(Mon));
        assert!(WeekdaySpec::Weekdays.matches(Fri));
        assert!(!WeekdaySpec::Weekdays.matches(Sat));
        assert!(WeekdaySpec::EveryDay.matches(Sun));
        assert!(WeekdaySpec::Day(Wed).matches(Wed));
        assert!(!WeekdaySpec::Day(Wed).matches(Thu));
    }

    #[test]
    fn cron_exprs_parse_with_cron_crate() {
        use cron::Schedule as CronSchedule;

        let at = TimeOfDay::new(17, 0).unwrap();
        let rules = [
            RecurrenceRule::from_parts("minute", Some(15), None, None, None, true).unwrap(),
            RecurrenceRule::from_parts("hour", None, Some(2), None, None, true).unwrap(),
            RecurrenceRule::from_parts("day", None, None, Some(at), None, true).unwrap(),
            RecurrenceRule::from_parts(
                "week",
                None,
                None,
                Some(at),
                Some(WeekdaySpec::Weekdays),
                true,
            )
            .unwrap(),
        ];
        for rule in rules {
            let expr = rule.cron_expr();
            assert!(
                CronSchedule::from_str(&expr).is_ok(),
                "expression '{}' should parse",
                expr
            );
        }
    }

    #[test]
    fn spec_round_trips_through_serde() {
        let rule = RecurrenceRule::from_parts(
            "week",
            None,
            None,
            Some(TimeOfDay::new(8, 15).unwrap()),
            Some(WeekdaySpec::Day(chrono::Weekday::Tue)),
            true,
        )
        .unwrap();
        let json = serde_json::to_string(&rule).unwrap();
        let back: RecurrenceRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}

//! Pure next-run and due-ness arithmetic.
//!
//! Everything here is deterministic over `(rule, last_run, now)` -- no
//! hidden clock state -- and all day/week calendar math is done in UTC so
//! results do not depend on the host timezone or DST transitions.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

use super::{Cadence, RecurrenceRule, TimeOfDay, WeekdaySpec};

/// Window around a day/week target instant in which the schedule counts as due.
pub fn default_tolerance() -> Duration {
    Duration::seconds(60)
}

/// Compute the next instant this rule should fire after `now`.
///
/// Returns `None` when the rule is inactive. Minute and hour cadences are
/// anchored to `last_run`, so recomputing within the same interval window
/// yields the same instant instead of drifting forward with each call.
pub fn next_run_after(
    rule: &RecurrenceRule,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !rule.active {
        return None;
    }

    let next = match &rule.cadence {
        Cadence::Minute { every_minutes } => {
            let interval = i64::from(*every_minutes);
            match last_run {
                Some(last) => {
                    let elapsed = (now - last).num_minutes().max(0);
                    now + Duration::minutes(interval - (elapsed % interval))
                }
                None => now + Duration::minutes(interval),
            }
        }
        Cadence::Hour { every_hours } => {
            let interval = i64::from(*every_hours);
            match last_run {
                Some(last) => {
                    let elapsed = (now - last).num_hours().max(0);
                    now + Duration::hours(interval - (elapsed % interval))
                }
                None => now + Duration::hours(interval),
            }
        }
        Cadence::Day { at } => next_daily(now, *at),
        Cadence::Week { on, at } => match on {
            WeekdaySpec::Day(weekday) => next_on_weekday(now, *weekday, *at),
            WeekdaySpec::Weekdays => next_business_day(now, *at),
            WeekdaySpec::EveryDay => next_daily(now, *at),
        },
    };

    Some(next)
}

fn at_time(day: chrono::NaiveDate, at: TimeOfDay) -> DateTime<Utc> {
    day.and_time(at.as_naive()).and_utc()
}

fn next_daily(now: DateTime<Utc>, at: TimeOfDay) -> DateTime<Utc> {
    let candidate = at_time(now.date_naive(), at);
    if candidate <= now {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

fn next_on_weekday(now: DateTime<Utc>, target: Weekday, at: TimeOfDay) -> DateTime<Utc> {
    let ahead = i64::from(target.num_days_from_monday())
        - i64::from(now.weekday().num_days_from_monday());
    let ahead = ahead.rem_euclid(7);
    let candidate = at_time(now.date_naive() + Duration::days(ahead), at);
    if candidate <= now {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}

fn next_business_day(now: DateTime<Utc>, at: TimeOfDay) -> DateTime<Utc> {
    let dow = now.weekday().num_days_from_monday(); // Mon = 0 .. Sun = 6
    if dow <= 4 {
        let candidate = at_time(now.date_naive(), at);
        if candidate > now {
            return candidate;
        }
        // Time already passed today: Friday rolls over the weekend.
        let days = if dow == 4 { 3 } else { 1 };
        candidate + Duration::days(days)
    } else {
        let days_to_monday = i64::from(7 - dow);
        at_time(now.date_naive() + Duration::days(days_to_monday), at)
    }
}

/// Whether the schedule is due at `now`, for poll-mode sweeps.
///
/// Minute/hour cadences are due once a whole interval has elapsed since the
/// last run (or immediately when never run). Day/week cadences are due when
/// today is an applicable day, `now` is within `tolerance` of the target
/// time, and the schedule has not already run on `now`'s calendar day.
pub fn is_due_now(
    rule: &RecurrenceRule,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    if !rule.active {
        return false;
    }

    match &rule.cadence {
        Cadence::Minute { every_minutes } => match last_run {
            Some(last) => (now - last).num_minutes() >= i64::from(*every_minutes),
            None => true,
        },
        Cadence::Hour { every_hours } => match last_run {
            Some(last) => (now - last).num_hours() >= i64::from(*every_hours),
            None => true,
        },
        Cadence::Day { at } => due_at_time_today(last_run, now, *at, tolerance),
        Cadence::Week { on, at } => {
            on.matches(now.weekday()) && due_at_time_today(last_run, now, *at, tolerance)
        }
    }
}

fn due_at_time_today(
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    at: TimeOfDay,
    tolerance: Duration,
) -> bool {
    let target = at_time(now.date_naive(), at);
    if (now - target).abs() > tolerance {
        return false;
    }
    match last_run {
        Some(last) => last.date_naive() < now.date_naive(),
        None => true,
    }
}

/// Upcoming fire instants within `(now, until]`, for dry-run previews.
pub fn preview_occurrences(
    rule: &RecurrenceRule,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut occurrences = Vec::new();
    let Some(first) = next_run_after(rule, last_run, now) else {
        return occurrences;
    };
    let mut cursor = first;
    while cursor <= until {
        occurrences.push(cursor);
        match next_run_after(rule, Some(cursor), cursor) {
            Some(next) if next > cursor => cursor = next,
            _ => break,
        }
    }
    occurrences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::RecurrenceRule;
    use chrono::TimeZone;

    fn minute_rule(n: u32) -> RecurrenceRule {
        RecurrenceRule::from_parts("minute", Some(n), None, None, None, true).unwrap()
    }

    fn hour_rule(n: u32) -> RecurrenceRule {
        RecurrenceRule::from_parts("hour", None, Some(n), None, None, true).unwrap()
    }

    fn day_rule(hour: u32, minute: u32) -> RecurrenceRule {
        let at = TimeOfDay::new(hour, minute).unwrap();
        RecurrenceRule::from_parts("day", None, None, Some(at), None, true).unwrap()
    }

    fn week_rule(weekday: &str, hour: u32, minute: u32) -> RecurrenceRule {
        let at = TimeOfDay::new(hour, minute).unwrap();
        let on = WeekdaySpec::parse(weekday).unwrap();
        RecurrenceRule::from_parts("week", None, None, Some(at), Some(on), true).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn inactive_rule_has_no_next_run() {
        let mut rule = minute_rule(5);
        rule.active = false;
        assert_eq!(next_run_after(&rule, None, Utc::now()), None);
        assert!(!is_due_now(&rule, None, Utc::now(), default_tolerance()));
    }

    #[test]
    fn minute_cadence_without_last_run_starts_one_interval_out() {
        let now = utc(2025, 6, 4, 10, 0);
        let next = next_run_after(&minute_rule(15), None, now).unwrap();
        assert_eq!(next, now + Duration::minutes(15));
    }

    #[test]
    fn minute_cadence_is_anchored_to_last_run() {
        // interval=15, last run 20 minutes ago: 20 mod 15 = 5 elapsed into
        // the current window, so the next run is 10 minutes out, not 15.
        let now = utc(2025, 6, 4, 10, 0);
        let last = now - Duration::minutes(20);
        let next = next_run_after(&minute_rule(15), Some(last), now).unwrap();
        assert_eq!(next, now + Duration::minutes(10));
    }

    #[test]
    fn minute_cadence_clamps_future_last_run() {
        let now = utc(2025, 6, 4, 10, 0);
        let last = now + Duration::minutes(5);
        let next = next_run_after(&minute_rule(15), Some(last), now).unwrap();
        assert_eq!(next, now + Duration::minutes(15));
    }

    #[test]
    fn hour_cadence_is_anchored_to_last_run() {
        let now = utc(2025, 6, 4, 10, 0);
        let last = now - Duration::hours(3);
        let next = next_run_after(&hour_rule(2), Some(last), now).unwrap();
        assert_eq!(next, now + Duration::hours(1));
    }

    #[test]
    fn hour_cadence_round_trip_from_fresh_schedule() {
        let now = utc(2025, 6, 4, 10, 0);
        let next = next_run_after(&hour_rule(2), None, now).unwrap();
        assert_eq!(next, now + Duration::hours(2));
    }

    #[test]
    fn day_cadence_rolls_to_tomorrow_when_time_passed() {
        let now = utc(2025, 6, 4, 10, 0);
        let next = next_run_after(&day_rule(9, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 5, 9, 0));
    }

    #[test]
    fn day_cadence_fires_today_when_time_ahead() {
        let now = utc(2025, 6, 4, 8, 0);
        let next = next_run_after(&day_rule(9, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 4, 9, 0));
    }

    #[test]
    fn week_specific_day_same_day_time_passed_adds_seven() {
        // 2025-06-04 is a Wednesday.
        let now = utc(2025, 6, 4, 10, 0);
        let next = next_run_after(&week_rule("wednesday", 9, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 11, 9, 0));
    }

    #[test]
    fn week_specific_day_later_in_week() {
        let now = utc(2025, 6, 4, 10, 0); // Wednesday
        let next = next_run_after(&week_rule("friday", 9, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 6, 9, 0));
    }

    #[test]
    fn week_weekdays_friday_past_time_skips_to_monday() {
        // 2025-06-06 is a Friday; 17:00 already passed, so next business
        // day occurrence is Monday 2025-06-09 at 17:00.
        let now = utc(2025, 6, 6, 18, 0);
        let next = next_run_after(&week_rule("weekday", 17, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 9, 17, 0));
    }

    #[test]
    fn week_weekdays_midweek_rolls_one_day() {
        let now = utc(2025, 6, 4, 18, 0); // Wednesday after 17:00
        let next = next_run_after(&week_rule("weekday", 17, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 5, 17, 0));
    }

    #[test]
    fn week_weekdays_weekend_rolls_to_monday() {
        let now = utc(2025, 6, 7, 8, 0); // Saturday
        let next = next_run_after(&week_rule("weekday", 9, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 9, 9, 0));

        let now = utc(2025, 6, 8, 8, 0); // Sunday
        let next = next_run_after(&week_rule("weekday", 9, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 9, 9, 0));
    }

    #[test]
    fn week_every_day_behaves_like_daily() {
        let now = utc(2025, 6, 7, 10, 0); // Saturday
        let next = next_run_after(&week_rule("every", 9, 0), None, now).unwrap();
        assert_eq!(next, utc(2025, 6, 8, 9, 0));
    }

    #[test]
    fn due_check_is_idempotent() {
        let now = utc(2025, 6, 4, 9, 0);
        let rule = day_rule(9, 0);
        let last = Some(utc(2025, 6, 3, 9, 0));
        let first = is_due_now(&rule, last, now, default_tolerance());
        let second = is_due_now(&rule, last, now, default_tolerance());
        assert!(first);
        assert_eq!(first, second);
    }

    #[test]
    fn minute_cadence_due_once_interval_elapsed() {
        let now = utc(2025, 6, 4, 10, 0);
        let rule = minute_rule(15);
        assert!(is_due_now(&rule, None, now, default_tolerance()));
        assert!(!is_due_now(
            &rule,
            Some(now - Duration::minutes(10)),
            now,
            default_tolerance()
        ));
        assert!(is_due_now(
            &rule,
            Some(now - Duration::minutes(15)),
            now,
            default_tolerance()
        ));
    }

    #[test]
    fn day_cadence_not_due_twice_in_one_day() {
        let now = utc(2025, 6, 4, 9, 0);
        let rule = day_rule(9, 0);
        assert!(is_due_now(&rule, None, now, default_tolerance()));
        // Ran 30 seconds ago, still inside the tolerance window.
        let last = Some(now - Duration::seconds(30));
        assert!(!is_due_now(&rule, last, now, default_tolerance()));
    }

    #[test]
    fn day_cadence_outside_tolerance_is_not_due() {
        let now = utc(2025, 6, 4, 9, 5);
        let rule = day_rule(9, 0);
        assert!(!is_due_now(&rule, None, now, default_tolerance()));
    }

    #[test]
    fn week_cadence_requires_matching_day() {
        let rule = week_rule("friday", 9, 0);
        let wednesday = utc(2025, 6, 4, 9, 0);
        let friday = utc(2025, 6, 6, 9, 0);
        assert!(!is_due_now(&rule, None, wednesday, default_tolerance()));
        assert!(is_due_now(&rule, None, friday, default_tolerance()));
    }

    #[test]
    fn week_weekdays_due_monday_through_friday_only() {
        let rule = week_rule("weekday", 9, 0);
        let friday = utc(2025, 6, 6, 9, 0);
        let saturday = utc(2025, 6, 7, 9, 0);
        assert!(is_due_now(&rule, None, friday, default_tolerance()));
        assert!(!is_due_now(&rule, None, saturday, default_tolerance()));
    }

    #[test]
    fn push_and_poll_modes_agree_at_computed_instant() {
        // A schedule armed via next_run_after must also read as due when a
        // poll sweep lands exactly on the computed instant.
        let now = utc(2025, 6, 4, 8, 0);
        for rule in [
            day_rule(9, 0),
            week_rule("wednesday", 9, 0),
            week_rule("weekday", 9, 0),
        ] {
            let last = Some(utc(2025, 6, 3, 9, 0));
            let fire_at = next_run_after(&rule, last, now).unwrap();
            assert!(
                is_due_now(&rule, last, fire_at, default_tolerance()),
                "rule {:?} not due at its own next-run instant",
                rule.cadence
            );
        }
    }

    #[test]
    fn preview_lists_successive_minute_occurrences() {
        let now = utc(2025, 6, 4, 10, 0);
        let rule = minute_rule(30);
        let until = now + Duration::hours(2);
        let occurrences = preview_occurrences(&rule, None, now, until);
        assert_eq!(
            occurrences,
            vec![
                now + Duration::minutes(30),
                now + Duration::minutes(60),
                now + Duration::minutes(90),
                now + Duration::minutes(120),
            ]
        );
    }

    #[test]
    fn preview_handles_day_rollover() {
        let now = utc(2025, 6, 4, 10, 0);
        let rule = day_rule(9, 0);
        let until = now + Duration::days(3);
        let occurrences = preview_occurrences(&rule, None, now, until);
        assert_eq!(
            occurrences,
            vec![utc(2025, 6, 5, 9, 0), utc(2025, 6, 6, 9, 0), utc(2025, 6, 7, 9, 0)]
        );
    }
}

use chrono::{DateTime, TimeZone};
use std::str::FromStr;

use crate::errors::SchedulingError;

/// A parsed cron schedule.
///
/// Accepts the classic five-field form (`min hour dom month dow`, Sunday as
/// 0 or 7) as well as the six/seven-field form with leading seconds and an
/// optional trailing year.
///
/// In the five-field form a restricted day-of-month and a restricted
/// day-of-week match when either one does, as in classic cron.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedules: Vec<cron::Schedule>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulingError> {
        let invalid = |reason: String| SchedulingError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };
        let schedules = normalize(expression)
            .map_err(invalid)?
            .iter()
            .map(|normalized| cron::Schedule::from_str(normalized))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(CronSchedule {
            expression: expression.to_string(),
            schedules,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }
}

/// Rewrites a five-field expression into the seconds-first dialect the `cron`
/// crate parses, where weekdays run 1-7 from Sunday.
///
/// The crate requires both day fields to match. When both are restricted the
/// expression is split in two, one per day field, and the earlier fire time
/// of the pair wins.
fn normalize(expression: &str) -> Result<Vec<String>, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [macro_name] if macro_name.starts_with('@') => Ok(vec![macro_name.to_string()]),
        [minute, hour, day_of_month, month, day_of_week] => {
            let weekdays = translate_day_of_week(day_of_week)?;
            let classic = |dom: &str, dow: &str| {
                format!("0 {} {} {} {} {}", minute, hour, dom, month, dow)
            };
            if is_restricted(day_of_month) && is_restricted(day_of_week) {
                Ok(vec![classic(*day_of_month, "*"), classic("*", weekdays.as_str())])
            } else {
                Ok(vec![classic(*day_of_month, weekdays.as_str())])
            }
        }
        [_, _, _, _, _, _] | [_, _, _, _, _, _, _] => Ok(vec![fields.join(" ")]),
        _ => Err(format!("expected 5, 6 or 7 fields, found {}", fields.len())),
    }
}

/// A day field that starts with `*` or `?` leaves the other one in charge.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field.starts_with('?'))
}

fn translate_day_of_week(field: &str) -> Result<String, String> {
    let mut parts: Vec<String> = Vec::new();
    for term in field.split(',') {
        match numeric_days(term)? {
            Some(days) => {
                for day in days {
                    let translated = quartz_day(day).to_string();
                    if !parts.contains(&translated) {
                        parts.push(translated);
                    }
                }
            }
            None => parts.push(term.to_string()),
        }
    }
    Ok(parts.join(","))
}

/// Expands a purely numeric weekday term (`3`, `1-5`, `1-7/2`, `2/3`) into
/// explicit days. Wildcards and names are left untouched: `*/n` selects the
/// same weekdays in both numberings.
fn numeric_days(term: &str) -> Result<Option<Vec<u8>>, String> {
    let (range, step) = match term.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (term, None),
    };
    if range == "*" || range == "?" {
        return Ok(None);
    }
    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (start, Some(end)),
        None => (range, None),
    };
    let Ok(start) = start.parse::<u8>() else {
        return Ok(None);
    };
    let end = match end {
        Some(end) => match end.parse::<u8>() {
            Ok(end) => end,
            Err(_) => return Ok(None),
        },
        None if step.is_some() => 6,
        None => start,
    };
    let step = match step {
        Some(step) => step
            .parse::<usize>()
            .map_err(|_| format!("invalid day-of-week step '{}'", step))?,
        None => 1,
    };
    if start > 7 || end > 7 || start > end || step == 0 {
        return Err(format!("invalid day-of-week '{}'", term));
    }
    Ok(Some((start..=end).step_by(step).collect()))
}

fn quartz_day(day: u8) -> u8 {
    if day == 7 { 1 } else { day + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Utc, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_hourly_skips_current_hour_on_exact_boundary() -> anyhow::Result<()> {
        let schedule = CronSchedule::parse("0 * * * *")?;
        let now = at(2024, 3, 9, 10, 0, 0);
        assert_eq!(schedule.next_after(&now), Some(at(2024, 3, 9, 11, 0, 0)));
        Ok(())
    }

    #[test]
    fn test_hourly_with_subsecond_now() -> anyhow::Result<()> {
        let schedule = CronSchedule::parse("0 * * * *")?;
        let now = at(2024, 3, 9, 10, 59, 59) + chrono::Duration::milliseconds(999);
        assert_eq!(schedule.next_after(&now), Some(at(2024, 3, 9, 11, 0, 0)));
        Ok(())
    }

    #[test]
    fn test_weekday_range_uses_standard_numbering() -> anyhow::Result<()> {
        // 2024-03-09 is a Saturday.
        let schedule = CronSchedule::parse("30 9 * * 1-5")?;
        let next = schedule
            .next_after(&at(2024, 3, 9, 10, 0, 0))
            .expect("upcoming run");
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (9, 30));
        Ok(())
    }

    #[test]
    fn test_sunday_as_zero_and_seven() -> anyhow::Result<()> {
        let saturday = at(2024, 3, 9, 10, 0, 0);
        for expr in ["0 0 * * 0", "0 0 * * 7"] {
            let next = CronSchedule::parse(expr)?.next_after(&saturday);
            assert_eq!(next, Some(at(2024, 3, 10, 0, 0, 0)), "{}", expr);
        }
        Ok(())
    }

    #[test]
    fn test_normalize_day_of_week_terms() {
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("0,7").unwrap(), "1");
        assert_eq!(translate_day_of_week("*/2").unwrap(), "*/2");
        assert_eq!(translate_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert_eq!(translate_day_of_week("1-7/2").unwrap(), "2,4,6,1");
        assert!(translate_day_of_week("8").is_err());
    }

    #[test]
    fn test_day_of_month_or_day_of_week() -> anyhow::Result<()> {
        // The 13th or any Friday; 2024-03-13 is a Wednesday, 2024-03-15 a Friday.
        let schedule = CronSchedule::parse("0 0 13 * 5")?;
        let saturday = at(2024, 3, 9, 10, 0, 0);
        let first = schedule.next_after(&saturday).expect("upcoming run");
        assert_eq!(first, at(2024, 3, 13, 0, 0, 0));
        let second = schedule.next_after(&first).expect("upcoming run");
        assert_eq!(second, at(2024, 3, 15, 0, 0, 0));
        Ok(())
    }

    #[test]
    fn test_wildcard_day_of_month_keeps_weekday_only() -> anyhow::Result<()> {
        let schedule = CronSchedule::parse("0 0 */1 * 5")?;
        let next = schedule.next_after(&at(2024, 3, 9, 10, 0, 0));
        assert_eq!(next, Some(at(2024, 3, 15, 0, 0, 0)));
        assert_eq!(normalize("0 0 */1 * 5").unwrap().len(), 1);
        assert_eq!(normalize("0 0 13 * 5").unwrap().len(), 2);
        Ok(())
    }

    #[test]
    fn test_six_field_expression_passes_through() -> anyhow::Result<()> {
        let schedule = CronSchedule::parse("30 0 * * * *")?;
        let next = schedule.next_after(&at(2024, 3, 9, 10, 0, 0));
        assert_eq!(next, Some(at(2024, 3, 9, 10, 0, 30)));
        Ok(())
    }

    #[test]
    fn test_malformed_expressions_are_rejected() {
        for expr in ["", "every hour", "61 * * * *", "* * *"] {
            assert!(
                matches!(
                    CronSchedule::parse(expr),
                    Err(SchedulingError::InvalidExpression { .. })
                ),
                "{:?} should be rejected",
                expr
            );
        }
    }
}

//! Cron expression handling.
//!
//! Operators write classic five-field crontab expressions
//! (`min hour dom month dow`, Sunday = 0 or 7). The `cron` crate wants a
//! leading seconds field and numbers weekdays from 1 = Sunday, so five-field
//! input gets `0 ` prepended and its numeric weekdays rewritten as names.
//! Six- and seven-field expressions are passed through in the crate's dialect.

use cron::Schedule;
use std::str::FromStr;

use crate::constants::DEFAULT_SCHEDULE_CRON;
use crate::error::AppError;

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn normalize(cron_expr: &str) -> String {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if let [minute, hour, day, month, weekday] = fields[..] {
        format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            day,
            month,
            crontab_weekdays(weekday)
        )
    } else {
        cron_expr.trim().to_string()
    }
}

/// Rewrite a crontab day-of-week field as weekday names.
///
/// Items that are not purely numeric (`*`, `Mon-Fri`, `?`) are kept as they
/// are; so are out-of-range numbers, which the parser then rejects.
fn crontab_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| expand_weekday_item(item).unwrap_or_else(|| item.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

fn expand_weekday_item(item: &str) -> Option<String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None if item == "*" => return None,
        None => (item, 1),
    };

    let (first, last) = match base {
        "*" => (0, 6),
        _ => match base.split_once('-') {
            Some((first, last)) => (weekday_number(first)?, weekday_number(last)?),
            None if step > 1 => (weekday_number(base)?, 6),
            None => {
                let day = weekday_number(base)?;
                (day, day)
            }
        },
    };
    if first > last {
        return None;
    }

    let mut days: Vec<usize> = (first..=last).step_by(step).map(|d| d % 7).collect();
    days.sort_unstable();
    days.dedup();
    Some(
        days.into_iter()
            .map(|d| WEEKDAYS[d])
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn weekday_number(value: &str) -> Option<usize> {
    value.parse::<usize>().ok().filter(|d| *d <= 7)
}

/// Parse a cron expression, rejecting anything the scheduler could not run.
pub fn parse_schedule(cron_expr: &str) -> Result<Schedule, AppError> {
    if cron_expr.trim().is_empty() {
        return Err(AppError::ConfigValidation(
            "schedule_cron must not be empty".to_string(),
        ));
    }
    Schedule::from_str(&normalize(cron_expr)).map_err(|e| {
        AppError::ConfigValidation(format!("Invalid cron expression '{}': {}", cron_expr, e))
    })
}

/// Parse a cron expression, falling back to the daily 03:00 default with a warning.
pub fn parse_schedule_or_default(cron_expr: &str) -> Schedule {
    match parse_schedule(cron_expr) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::warn!(
                error = %e,
                fallback = DEFAULT_SCHEDULE_CRON,
                "Invalid schedule in configuration, using default"
            );
            Schedule::from_str(&normalize(DEFAULT_SCHEDULE_CRON))
                .expect("default schedule is a valid cron expression")
        }
    }
}

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Recurrence chosen on the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// Every day.
    Daily,
    /// One day per week.
    Weekly,
    /// One day per month.
    Monthly,
}

impl ScheduleType {
    fn as_str(self) -> &'static str {
        match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(ScheduleType::Daily),
            "weekly" => Ok(ScheduleType::Weekly),
            "monthly" => Ok(ScheduleType::Monthly),
            _ => Err(format!("unknown schedule type: {s}")),
        }
    }
}

/// Raw schedule fields as entered by a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleInput {
    /// Recurrence.
    pub schedule_type: ScheduleType,
    /// 0..=23.
    pub hour: u32,
    /// 0..=59.
    pub minute: u32,
    /// 1..=7 (Quartz numbering, 1 = Sunday); weekly only.
    pub day_of_week: Option<u32>,
    /// 1..=31; monthly only.
    pub day_of_month: Option<u32>,
}

impl ScheduleInput {
    /// Daily at `hour:minute`.
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self { schedule_type: ScheduleType::Daily, hour, minute, day_of_week: None, day_of_month: None }
    }

    /// Weekly at `hour:minute`.
    pub fn weekly(hour: u32, minute: u32, day_of_week: Option<u32>) -> Self {
        Self { schedule_type: ScheduleType::Weekly, hour, minute, day_of_week, day_of_month: None }
    }

    /// Monthly at `hour:minute`.
    pub fn monthly(hour: u32, minute: u32, day_of_month: Option<u32>) -> Self {
        Self { schedule_type: ScheduleType::Monthly, hour, minute, day_of_week: None, day_of_month }
    }
}

/// A checked schedule. Fields are in range by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day.
    Daily {
        /// Hour.
        hour: u8,
        /// Minute.
        minute: u8,
    },
    /// Once a week.
    Weekly {
        /// Hour.
        hour: u8,
        /// Minute.
        minute: u8,
        /// 1 = Sunday .. 7 = Saturday.
        day_of_week: u8,
    },
    /// Once a month.
    Monthly {
        /// Hour.
        hour: u8,
        /// Minute.
        minute: u8,
        /// Day of month.
        day_of_month: u8,
    },
}

fn in_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<u8, ScheduleError> {
    if (min..=max).contains(&value) {
        Ok(value as u8)
    } else {
        Err(ScheduleError::OutOfRange { field, value, min, max })
    }
}

impl Schedule {
    /// Check raw fields and build a schedule.
    ///
    /// Fields that do not belong to the schedule type are ignored.
    pub fn from_input(input: &ScheduleInput) -> Result<Self, ScheduleError> {
        let hour = in_range("hour", input.hour, 0, 23)?;
        let minute = in_range("minute", input.minute, 0, 59)?;
        match input.schedule_type {
            ScheduleType::Daily => Ok(Schedule::Daily { hour, minute }),
            ScheduleType::Weekly => {
                let dow = input.day_of_week.ok_or(ScheduleError::MissingField {
                    field: "dayOfWeek",
                    schedule: "weekly",
                })?;
                let day_of_week = in_range("dayOfWeek", dow, 1, 7)?;
                Ok(Schedule::Weekly { hour, minute, day_of_week })
            }
            ScheduleType::Monthly => {
                let dom = input.day_of_month.ok_or(ScheduleError::MissingField {
                    field: "dayOfMonth",
                    schedule: "monthly",
                })?;
                let day_of_month = in_range("dayOfMonth", dom, 1, 31)?;
                Ok(Schedule::Monthly { hour, minute, day_of_month })
            }
        }
    }

    /// Six-field Quartz expression `sec min hour day month dow`.
    pub fn cron_expression(&self) -> String {
        match *self {
            Schedule::Daily { hour, minute } => format!("0 {minute} {hour} * * ?"),
            Schedule::Weekly { hour, minute, day_of_week } => {
                format!("0 {minute} {hour} ? * {day_of_week}")
            }
            Schedule::Monthly { hour, minute, day_of_month } => {
                format!("0 {minute} {hour} {day_of_month} * ?")
            }
        }
    }

    /// Recurrence of this schedule.
    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            Schedule::Daily { .. } => ScheduleType::Daily,
            Schedule::Weekly { .. } => ScheduleType::Weekly,
            Schedule::Monthly { .. } => ScheduleType::Monthly,
        }
    }

    /// `(hour, minute)`.
    pub fn time_of_day(&self) -> (u8, u8) {
        match *self {
            Schedule::Daily { hour, minute }
            | Schedule::Weekly { hour, minute, .. }
            | Schedule::Monthly { hour, minute, .. } => (hour, minute),
        }
    }

    /// Day of week for weekly schedules.
    pub fn day_of_week(&self) -> Option<u8> {
        match *self {
            Schedule::Weekly { day_of_week, .. } => Some(day_of_week),
            _ => None,
        }
    }

    /// Day of month for monthly schedules.
    pub fn day_of_month(&self) -> Option<u8> {
        match *self {
            Schedule::Monthly { day_of_month, .. } => Some(day_of_month),
            _ => None,
        }
    }
}

/// Compile human schedule fields into a cron expression.
pub fn compile(input: &ScheduleInput) -> Result<String, ScheduleError> {
    Ok(Schedule::from_input(input)?.cron_expression())
}

/* --------------------- hand-written cron checks --------------------- */

static MONTH_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)$").unwrap());
static DOW_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(SUN|MON|TUE|WED|THU|FRI|SAT)$").unwrap());
static NTH_DOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([1-7]|SUN|MON|TUE|WED|THU|FRI|SAT)#([1-5])$").unwrap());
static NEAREST_WEEKDAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9]{1,2})W$").unwrap());

type FieldCheck = Result<(), String>;

fn number(part: &str, min: u32, max: u32) -> FieldCheck {
    let n: u32 = part.trim().parse().map_err(|_| format!("{part:?} is not a number"))?;
    if (min..=max).contains(&n) {
        Ok(())
    } else {
        Err(format!("{n} outside {min}-{max}"))
    }
}

fn numeric_field(field: &str, min: u32, max: u32) -> FieldCheck {
    if field == "*" {
        return Ok(());
    }
    if let Some((base, step)) = field.split_once('/') {
        let step: u32 = step.parse().map_err(|_| format!("bad step in {field:?}"))?;
        if step == 0 {
            return Err(format!("step must be positive in {field:?}"));
        }
        return if base == "*" { Ok(()) } else { number(base, min, max) };
    }
    if field.contains(',') {
        return field.split(',').try_for_each(|p| number(p, min, max));
    }
    if let Some((a, b)) = field.split_once('-') {
        number(a, min, max)?;
        number(b, min, max)?;
        let (a, b): (u32, u32) = (a.trim().parse().unwrap_or(0), b.trim().parse().unwrap_or(0));
        return if a <= b { Ok(()) } else { Err(format!("range {field:?} is reversed")) };
    }
    number(field, min, max)
}

fn day_field(field: &str) -> FieldCheck {
    if field == "?" || field == "L" {
        return Ok(());
    }
    if let Some(c) = NEAREST_WEEKDAY.captures(field) {
        return number(&c[1], 1, 31);
    }
    numeric_field(field, 1, 31)
}

fn month_field(field: &str) -> FieldCheck {
    if MONTH_NAME.is_match(field) {
        return Ok(());
    }
    numeric_field(field, 1, 12)
}

fn dow_field(field: &str) -> FieldCheck {
    if field == "?" || DOW_NAME.is_match(field) || NTH_DOW.is_match(field) {
        return Ok(());
    }
    numeric_field(field, 1, 7)
}

/// Check a hand-written Quartz cron expression (`sec min hour day month dow [year]`).
pub fn check_cron(expr: &str) -> Result<(), ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidCron { expr: expr.to_string(), reason };

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 6 && fields.len() != 7 {
        return Err(invalid(format!("expected 6 or 7 fields, got {}", fields.len())));
    }

    let checks: [(&str, FieldCheck); 6] = [
        ("second", numeric_field(fields[0], 0, 59)),
        ("minute", numeric_field(fields[1], 0, 59)),
        ("hour", numeric_field(fields[2], 0, 23)),
        ("day", day_field(fields[3])),
        ("month", month_field(fields[4])),
        ("day-of-week", dow_field(fields[5])),
    ];
    for (name, check) in checks {
        check.map_err(|e| invalid(format!("{name} field: {e}")))?;
    }
    if let Some(year) = fields.get(6) {
        numeric_field(year, 1970, 2099).map_err(|e| invalid(format!("year field: {e}")))?;
    }

    match (fields[3] == "?", fields[5] == "?") {
        (true, true) => Err(invalid("day and day-of-week cannot both be '?'".into())),
        (false, false) => Err(invalid("one of day or day-of-week must be '?'".into())),
        _ => Ok(()),
    }
}

//! Cross-field validation gate for job definitions.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{FieldViolation, ValidationError};
use crate::job::{Batching, Dimensions, JobForm, JobSpec, ParameterType, Strategy};
use crate::schedule::{Schedule, ScheduleInput, ScheduleType};
use crate::source;

static JOB_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9_]+$").unwrap());
static PARAM_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

const MAX_JOB_CODE: usize = 50;
const MAX_JOB_NAME: usize = 100;
const MAX_DESCRIPTION: usize = 500;
const MAX_RESOURCE_URL: usize = 1000;
const MAX_PARAM_NAME: usize = 50;

#[derive(Default)]
struct Violations(Vec<FieldViolation>);

impl Violations {
    fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldViolation::new(field, message));
    }

    fn required_text(&mut self, field: &str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.add(field, "is required");
        } else if value.chars().count() > max {
            self.add(field, format!("must be at most {max} characters"));
        }
    }

    /// Range-check an optional integer, recording a violation if it is present and out of range.
    fn ranged(&mut self, field: &str, value: Option<i64>, min: i64, max: i64) -> Option<u32> {
        let v = value?;
        if (min..=max).contains(&v) {
            u32::try_from(v).ok()
        } else {
            self.add(field, format!("must be within {min}..={max}, got {v}"));
            None
        }
    }
}

/// Validate a submitted form and build the typed job definition.
///
/// Every rule is checked; the error lists all violated fields.
pub fn validate(form: &JobForm) -> Result<JobSpec, ValidationError> {
    let mut v = Violations::default();

    v.required_text("jobCode", &form.job_code, MAX_JOB_CODE);
    if !form.job_code.trim().is_empty() && !JOB_CODE.is_match(&form.job_code) {
        v.add("jobCode", "may only contain A-Z, 0-9 and '_'");
    }
    v.required_text("jobName", &form.job_name, MAX_JOB_NAME);
    if let Some(d) = &form.description {
        if d.chars().count() > MAX_DESCRIPTION {
            v.add("description", format!("must be at most {MAX_DESCRIPTION} characters"));
        }
    }

    check_resource(form, &mut v);
    let strategy = check_strategy(form, &mut v);
    let resource_weight = match form.resource_weight {
        None => Some(1),
        w => v.ranged("resourceWeight", w, 1, 10),
    };
    let schedule = check_schedule(form, &mut v);
    check_parameter_configs(form, &mut v);

    match (v.0.is_empty(), form.method_type, strategy, resource_weight, schedule) {
        (true, Some(method_type), Some(strategy), Some(weight), Some(schedule)) => Ok(JobSpec {
            job_code: form.job_code.clone(),
            job_name: form.job_name.trim().to_string(),
            description: form.description.clone().filter(|d| !d.trim().is_empty()),
            method_type,
            resource_url: form.resource_url.trim().to_string(),
            base_parameters: form.base_parameters.clone(),
            strategy,
            resource_weight: weight as u8,
            status: form.status.unwrap_or_default(),
            schedule,
            dimensions: Dimensions::from_ordered(form.parameter_configs.clone()),
        }),
        _ => Err(ValidationError { violations: v.0 }),
    }
}

fn check_resource(form: &JobForm, v: &mut Violations) {
    let Some(method) = form.method_type else {
        v.add("methodType", "is required");
        v.required_text("resourceUrl", &form.resource_url, MAX_RESOURCE_URL);
        return;
    };
    let before = v.0.len();
    v.required_text("resourceUrl", &form.resource_url, MAX_RESOURCE_URL);
    if v.0.len() > before || !method.needs_http_url() {
        return;
    }
    match url::Url::parse(form.resource_url.trim()) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        Ok(u) => v.add("resourceUrl", format!("scheme {} is not allowed, use http or https", u.scheme())),
        Err(e) => v.add("resourceUrl", format!("is not an absolute URL: {e}")),
    }
}

fn check_strategy(form: &JobForm, v: &mut Violations) -> Option<Strategy> {
    if form.parameter_type == ParameterType::Single {
        return Some(Strategy::Single);
    }
    let kind = form.parameter_type;
    if form.batch_size.is_none() {
        v.add("batchSize", format!("is required for {kind}"));
    }
    if form.delay_seconds.is_none() {
        v.add("delaySeconds", format!("is required for {kind}"));
    }
    let batch_size = v.ranged("batchSize", form.batch_size, 1, i64::from(u32::MAX));
    let delay_seconds = v.ranged("delaySeconds", form.delay_seconds, 0, i64::from(u32::MAX));
    let batching = Batching {
        batch_size: NonZeroUsize::new(batch_size? as usize)?,
        delay_seconds: delay_seconds?,
    };
    Some(match kind {
        ParameterType::MultiParam => Strategy::MultiParam(batching),
        _ => Strategy::Matrix(batching),
    })
}

fn check_schedule(form: &JobForm, v: &mut Violations) -> Option<Schedule> {
    let kind = form.schedule_type;
    if kind.is_none() {
        v.add("scheduleType", "is required");
    }
    if form.hour.is_none() {
        v.add("hour", "is required");
    }
    if form.minute.is_none() {
        v.add("minute", "is required");
    }
    let hour = v.ranged("hour", form.hour, 0, 23);
    let minute = v.ranged("minute", form.minute, 0, 59);

    let (mut day_of_week, mut day_of_month) = (None, None);
    match kind {
        Some(ScheduleType::Weekly) => {
            if form.day_of_week.is_none() {
                v.add("dayOfWeek", "is required for weekly schedules");
            }
            day_of_week = v.ranged("dayOfWeek", form.day_of_week, 1, 7);
            day_of_week?;
        }
        Some(ScheduleType::Monthly) => {
            if form.day_of_month.is_none() {
                v.add("dayOfMonth", "is required for monthly schedules");
            }
            day_of_month = v.ranged("dayOfMonth", form.day_of_month, 1, 31);
            day_of_month?;
        }
        _ => {}
    }

    let input = ScheduleInput { schedule_type: kind?, hour: hour?, minute: minute?, day_of_week, day_of_month };
    match Schedule::from_input(&input) {
        Ok(s) => Some(s),
        Err(e) => {
            v.add("scheduleType", e.to_string());
            None
        }
    }
}

fn check_parameter_configs(form: &JobForm, v: &mut Violations) {
    let configs = &form.parameter_configs;

    if form.parameter_type != ParameterType::Single {
        if configs.is_empty() {
            v.add("parameterConfigs", format!("at least one is required for {}", form.parameter_type));
        } else if !configs.iter().any(|c| c.is_active) {
            v.add("parameterConfigs", "at least one must be active");
        }
    }

    let mut orders: Vec<u32> = configs.iter().map(|c| c.sort_order).collect();
    orders.sort_unstable();
    if orders.iter().enumerate().any(|(i, &o)| o as usize != i + 1) {
        v.add(
            "parameterConfigs",
            format!("sortOrder values must run 1..={} without gaps or duplicates, got {orders:?}", configs.len()),
        );
    }

    let mut seen = HashSet::new();
    for (i, c) in configs.iter().enumerate() {
        let field = |name: &str| format!("parameterConfigs[{i}].{name}");
        let name = c.parameter_name.trim();
        if name.is_empty() {
            v.add(field("parameterName"), "is required");
        } else if name.chars().count() > MAX_PARAM_NAME {
            v.add(field("parameterName"), format!("must be at most {MAX_PARAM_NAME} characters"));
        } else if !PARAM_NAME.is_match(name) {
            v.add(field("parameterName"), "may only contain letters, digits and '_'");
        } else if !seen.insert(name.to_string()) {
            v.add(field("parameterName"), format!("{name} is configured more than once"));
        }

        if c.value_source.trim().is_empty() {
            v.add(field("valueSource"), "is required");
        } else if let Err(e) = source::precheck(c.value_source_type, &c.value_source) {
            v.add(field("valueSource"), format!("{}: {e}", c.value_source_type));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{MethodType, ParameterConfig, ValueSourceType};

    fn config(name: &str, order: u32) -> ParameterConfig {
        ParameterConfig {
            parameter_name: name.into(),
            value_source_type: ValueSourceType::StaticList,
            value_source: r#"["11110","11140"]"#.into(),
            description: None,
            is_active: true,
            sort_order: order,
        }
    }

    fn good_form() -> JobForm {
        JobForm {
            job_code: "APT_TRADE_2024".into(),
            job_name: "Apartment trades".into(),
            method_type: Some(MethodType::ApiGet),
            resource_url: "https://apis.example.com/trades".into(),
            parameter_type: ParameterType::Matrix,
            batch_size: Some(10),
            delay_seconds: Some(1),
            schedule_type: Some(ScheduleType::Monthly),
            hour: Some(2),
            minute: Some(0),
            day_of_month: Some(1),
            parameter_configs: vec![config("DEAL_YMD", 2), config("LAWD_CD", 1)],
            ..JobForm::default()
        }
    }

    #[test]
    fn accepts_a_complete_form() {
        let spec = validate(&good_form()).unwrap();
        assert_eq!(spec.cron_expression(), "0 0 2 1 * ?");
        assert_eq!(spec.resource_weight, 1);
        let names: Vec<&str> = spec.dimensions.iter().map(|c| c.parameter_name.as_str()).collect();
        assert_eq!(names, ["LAWD_CD", "DEAL_YMD"]);
        assert!(matches!(spec.strategy, Strategy::Matrix(b) if b.batch_size.get() == 10 && b.delay_seconds == 1));
    }

    #[test]
    fn reports_every_violation() {
        let form = JobForm {
            job_code: "bad code".into(),
            job_name: String::new(),
            method_type: Some(MethodType::ApiPost),
            resource_url: "not a url".into(),
            parameter_type: ParameterType::MultiParam,
            batch_size: None,
            delay_seconds: Some(-1),
            resource_weight: Some(11),
            schedule_type: Some(ScheduleType::Weekly),
            hour: Some(25),
            minute: Some(0),
            day_of_week: None,
            parameter_configs: vec![],
            ..JobForm::default()
        };
        let err = validate(&form).unwrap_err();
        for field in [
            "jobCode",
            "jobName",
            "resourceUrl",
            "batchSize",
            "delaySeconds",
            "resourceWeight",
            "hour",
            "dayOfWeek",
            "parameterConfigs",
        ] {
            assert!(err.has_field(field), "missing violation for {field}: {err}");
        }
    }

    #[test]
    fn single_needs_no_batching_or_configs() {
        let form = JobForm {
            parameter_type: ParameterType::Single,
            batch_size: None,
            delay_seconds: None,
            parameter_configs: vec![],
            ..good_form()
        };
        let spec = validate(&form).unwrap();
        assert_eq!(spec.strategy, Strategy::Single);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = validate(&JobForm { batch_size: Some(0), ..good_form() }).unwrap_err();
        assert!(err.has_field("batchSize"));
    }

    #[test]
    fn sort_order_must_be_gapless() {
        let form = JobForm { parameter_configs: vec![config("A", 1), config("B", 3)], ..good_form() };
        assert!(validate(&form).unwrap_err().has_field("parameterConfigs"));

        let form = JobForm { parameter_configs: vec![config("A", 1), config("B", 1)], ..good_form() };
        assert!(validate(&form).unwrap_err().has_field("parameterConfigs"));
    }

    #[test]
    fn duplicate_parameter_names_are_rejected() {
        let form = JobForm { parameter_configs: vec![config("A", 1), config("A", 2)], ..good_form() };
        assert!(validate(&form).unwrap_err().has_field("parameterConfigs[1].parameterName"));
    }

    #[test]
    fn all_inactive_configs_are_rejected_for_matrix() {
        let mut a = config("A", 1);
        a.is_active = false;
        let form = JobForm { parameter_configs: vec![a], ..good_form() };
        assert!(validate(&form).unwrap_err().has_field("parameterConfigs"));
    }

    #[test]
    fn sources_are_prechecked() {
        let mut bad_list = config("A", 1);
        bad_list.value_source = "not-json".into();
        let mut bad_query = config("B", 2);
        bad_query.value_source_type = ValueSourceType::DbQuery;
        bad_query.value_source = "DELETE FROM region".into();
        let form = JobForm { parameter_configs: vec![bad_list, bad_query], ..good_form() };
        let err = validate(&form).unwrap_err();
        assert!(err.has_field("parameterConfigs[0].valueSource"));
        assert!(err.has_field("parameterConfigs[1].valueSource"));
    }

    #[test]
    fn file_process_accepts_a_path() {
        let form = JobForm {
            method_type: Some(MethodType::FileProcess),
            resource_url: "/data/inbox/trades.csv".into(),
            ..good_form()
        };
        validate(&form).unwrap();
    }

    #[test]
    fn missing_schedule_fields() {
        let form = JobForm { schedule_type: None, hour: None, minute: None, ..good_form() };
        let err = validate(&form).unwrap_err();
        assert!(err.has_field("scheduleType"));
        assert!(err.has_field("hour"));
        assert!(err.has_field("minute"));
    }
}

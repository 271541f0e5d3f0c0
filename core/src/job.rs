use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;
use crate::schedule::{Schedule, ScheduleType};

/// How the external executor reaches the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MethodType {
    /// HTTP GET against `resourceUrl`.
    ApiGet,
    /// HTTP POST against `resourceUrl`.
    ApiPost,
    /// Download the file at `resourceUrl`.
    FileDownload,
    /// Process a local or remote file.
    FileProcess,
}

impl MethodType {
    /// True for methods whose resource must be an absolute http(s) URL.
    pub fn needs_http_url(self) -> bool {
        matches!(self, MethodType::ApiGet | MethodType::ApiPost | MethodType::FileDownload)
    }
}

/// Whether the external scheduler should fire the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Eligible for firing.
    #[default]
    Active,
    /// Kept but never fired.
    Inactive,
}

impl JobStatus {
    /// The other status.
    pub fn toggled(self) -> Self {
        match self {
            JobStatus::Active => JobStatus::Inactive,
            JobStatus::Inactive => JobStatus::Active,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Active => write!(f, "ACTIVE"),
            JobStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// Expansion strategy selector as it appears on the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterType {
    /// One call with the base parameters only.
    #[default]
    Single,
    /// One call per value of the first active dimension.
    MultiParam,
    /// One call per element of the cartesian product of all active dimensions.
    Matrix,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Single => write!(f, "SINGLE"),
            ParameterType::MultiParam => write!(f, "MULTI_PARAM"),
            ParameterType::Matrix => write!(f, "MATRIX"),
        }
    }
}

/// Where a dimension's values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueSourceType {
    /// First column of a read-only SQL query.
    DbQuery,
    /// JSON array of strings.
    StaticList,
    /// `{startDate, endDate, format, interval}` JSON object.
    DateRange,
    /// `{url, jsonPath}` JSON object, fetched with GET.
    ApiCall,
    /// Named file, one value per line.
    FileList,
}

impl fmt::Display for ValueSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueSourceType::DbQuery => "DB_QUERY",
            ValueSourceType::StaticList => "STATIC_LIST",
            ValueSourceType::DateRange => "DATE_RANGE",
            ValueSourceType::ApiCall => "API_CALL",
            ValueSourceType::FileList => "FILE_LIST",
        };
        f.write_str(s)
    }
}

fn default_true() -> bool { true }

/// One expansion dimension as configured on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterConfig {
    /// Parameter name merged into each execution unit.
    pub parameter_name: String,
    /// Kind of source.
    pub value_source_type: ValueSourceType,
    /// Type-dependent encoding of the source.
    pub value_source: String,
    /// Free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Inactive configs are kept but never resolved.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// 1-based position; unique and gapless within a job.
    pub sort_order: u32,
}

/// A dimension before it has a position in the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDraft {
    /// Parameter name.
    pub parameter_name: String,
    /// Kind of source.
    pub value_source_type: ValueSourceType,
    /// Type-dependent encoding of the source.
    pub value_source: String,
    /// Free text.
    pub description: Option<String>,
    /// Whether the dimension takes part in expansion.
    pub is_active: bool,
}

impl ParameterDraft {
    /// Active draft with no description.
    pub fn new(name: impl Into<String>, kind: ValueSourceType, source: impl Into<String>) -> Self {
        Self {
            parameter_name: name.into(),
            value_source_type: kind,
            value_source: source.into(),
            description: None,
            is_active: true,
        }
    }

    /// Mark the draft inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    fn at(self, sort_order: u32) -> ParameterConfig {
        ParameterConfig {
            parameter_name: self.parameter_name,
            value_source_type: self.value_source_type,
            value_source: self.value_source,
            description: self.description,
            is_active: self.is_active,
            sort_order,
        }
    }
}

/// Staging command applied to a job's dimension collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionCommand {
    /// Append at the next `sortOrder`.
    Add(ParameterDraft),
    /// Replace the dimension at `sort_order`, keeping its position.
    Edit {
        /// Position to replace.
        sort_order: u32,
        /// New content.
        draft: ParameterDraft,
    },
    /// Drop the dimension at `sort_order` and renumber the rest.
    Remove {
        /// Position to drop.
        sort_order: u32,
    },
}

/// Staging command referenced a position that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no parameter config at sortOrder {0}")]
pub struct UnknownSortOrder(pub u32);

/// Ordered collection of parameter configs keyed by `sortOrder` (1, 2, 3, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dimensions(Vec<ParameterConfig>);

impl Dimensions {
    /// Empty collection.
    pub fn new() -> Self { Self::default() }

    /// Adopt configs whose `sortOrder` values are already gapless from 1.
    /// Input order does not matter.
    pub(crate) fn from_ordered(mut configs: Vec<ParameterConfig>) -> Self {
        configs.sort_by_key(|c| c.sort_order);
        Self(configs)
    }

    /// Apply one staging command.
    pub fn apply(&mut self, cmd: DimensionCommand) -> Result<(), UnknownSortOrder> {
        match cmd {
            DimensionCommand::Add(draft) => {
                let next = self.0.len() as u32 + 1;
                self.0.push(draft.at(next));
            }
            DimensionCommand::Edit { sort_order, draft } => {
                let idx = self.index_of(sort_order)?;
                self.0[idx] = draft.at(sort_order);
            }
            DimensionCommand::Remove { sort_order } => {
                let idx = self.index_of(sort_order)?;
                self.0.remove(idx);
                for (i, c) in self.0.iter_mut().enumerate() {
                    c.sort_order = i as u32 + 1;
                }
            }
        }
        Ok(())
    }

    fn index_of(&self, sort_order: u32) -> Result<usize, UnknownSortOrder> {
        self.0
            .iter()
            .position(|c| c.sort_order == sort_order)
            .ok_or(UnknownSortOrder(sort_order))
    }

    /// Config at `sort_order`.
    pub fn get(&self, sort_order: u32) -> Option<&ParameterConfig> {
        self.0.iter().find(|c| c.sort_order == sort_order)
    }

    /// All configs by ascending `sortOrder`.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterConfig> { self.0.iter() }

    /// Active configs by ascending `sortOrder`.
    pub fn active(&self) -> impl Iterator<Item = &ParameterConfig> {
        self.0.iter().filter(|c| c.is_active)
    }

    /// Number of configs, active or not.
    pub fn len(&self) -> usize { self.0.len() }

    /// True when no config is staged.
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Copy out as a plain list.
    pub fn to_vec(&self) -> Vec<ParameterConfig> { self.0.clone() }
}

/// Batch shape for expanding strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batching {
    /// Maximum units per batch.
    pub batch_size: NonZeroUsize,
    /// Minimum gap between the dispatch starts of consecutive batches.
    pub delay_seconds: u32,
}

/// Expansion strategy with the fields each variant requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// No expansion; batching does not apply.
    Single,
    /// Sequential over the first active dimension.
    MultiParam(Batching),
    /// Cartesian product over all active dimensions.
    Matrix(Batching),
}

impl Strategy {
    /// Form-level selector for this strategy.
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            Strategy::Single => ParameterType::Single,
            Strategy::MultiParam(_) => ParameterType::MultiParam,
            Strategy::Matrix(_) => ParameterType::Matrix,
        }
    }

    /// Batch shape, if the strategy batches at all.
    pub fn batching(&self) -> Option<Batching> {
        match self {
            Strategy::Single => None,
            Strategy::MultiParam(b) | Strategy::Matrix(b) => Some(*b),
        }
    }
}

/// Flat job definition as submitted by a form or stored as JSON.
///
/// Every field is optional or defaulted so the validator can report all
/// problems at once instead of failing on the first missing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobForm {
    /// Unique code, `[A-Z0-9_]+`.
    #[serde(default)]
    pub job_code: String,
    /// Display name.
    #[serde(default)]
    pub job_name: String,
    /// Free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Access method.
    #[serde(default)]
    pub method_type: Option<MethodType>,
    /// Target URL or path.
    #[serde(default)]
    pub resource_url: String,
    /// Parameters merged into every execution unit.
    #[serde(default)]
    pub base_parameters: BTreeMap<String, String>,
    /// Expansion strategy.
    #[serde(default)]
    pub parameter_type: ParameterType,
    /// Units per batch (non-SINGLE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    /// Seconds between batches (non-SINGLE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<i64>,
    /// Priority hint, 1..=10, default 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_weight: Option<i64>,
    /// Default ACTIVE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// daily | weekly | monthly.
    #[serde(default)]
    pub schedule_type: Option<ScheduleType>,
    /// 0..=23.
    #[serde(default)]
    pub hour: Option<i64>,
    /// 0..=59.
    #[serde(default)]
    pub minute: Option<i64>,
    /// 1..=7, weekly only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<i64>,
    /// 1..=31, monthly only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<i64>,
    /// Output only. Ignored on input and always re-derived from the schedule fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// Dimensions, any order; `sortOrder` decides position.
    #[serde(default)]
    pub parameter_configs: Vec<ParameterConfig>,
}

/// A validated batch job definition.
///
/// Serializes to and deserializes from the flat [`JobForm`] shape; every
/// deserialization goes through the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JobForm", into = "JobForm")]
pub struct JobSpec {
    /// Unique code.
    pub job_code: String,
    /// Display name.
    pub job_name: String,
    /// Free text.
    pub description: Option<String>,
    /// Access method.
    pub method_type: MethodType,
    /// Target URL or path.
    pub resource_url: String,
    /// Merged into every execution unit.
    pub base_parameters: BTreeMap<String, String>,
    /// Expansion strategy and its batching.
    pub strategy: Strategy,
    /// Priority hint for the external scheduler, 1..=10.
    pub resource_weight: u8,
    /// Firing eligibility.
    pub status: JobStatus,
    /// When to fire.
    pub schedule: Schedule,
    /// Staged dimensions.
    pub dimensions: Dimensions,
}

impl JobSpec {
    /// Cron expression derived from the schedule.
    pub fn cron_expression(&self) -> String { self.schedule.cron_expression() }

    /// Form view of this job.
    pub fn to_form(&self) -> JobForm { JobForm::from(self.clone()) }
}

impl TryFrom<JobForm> for JobSpec {
    type Error = ValidationError;

    fn try_from(form: JobForm) -> Result<Self, Self::Error> {
        crate::validate::validate(&form)
    }
}

impl From<JobSpec> for JobForm {
    fn from(spec: JobSpec) -> Self {
        let cron_expression = Some(spec.cron_expression());
        let (hour, minute) = spec.schedule.time_of_day();
        let batching = spec.strategy.batching();
        JobForm {
            job_code: spec.job_code,
            job_name: spec.job_name,
            description: spec.description,
            method_type: Some(spec.method_type),
            resource_url: spec.resource_url,
            base_parameters: spec.base_parameters,
            parameter_type: spec.strategy.parameter_type(),
            batch_size: batching.map(|b| b.batch_size.get() as i64),
            delay_seconds: batching.map(|b| i64::from(b.delay_seconds)),
            resource_weight: Some(i64::from(spec.resource_weight)),
            status: Some(spec.status),
            schedule_type: Some(spec.schedule.schedule_type()),
            hour: Some(i64::from(hour)),
            minute: Some(i64::from(minute)),
            day_of_week: spec.schedule.day_of_week().map(i64::from),
            day_of_month: spec.schedule.day_of_month().map(i64::from),
            cron_expression,
            parameter_configs: spec.dimensions.to_vec(),
        }
    }
}

/// Stages edits to a job definition and validates on [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct JobSpecBuilder {
    form: JobForm,
    dimensions: Dimensions,
}

impl JobSpecBuilder {
    /// Fresh builder for `job_code`.
    pub fn new(job_code: impl Into<String>) -> Self {
        let form = JobForm { job_code: job_code.into(), ..JobForm::default() };
        Self { form, dimensions: Dimensions::new() }
    }

    /// Start from an existing job, e.g. to edit it.
    pub fn from_spec(spec: &JobSpec) -> Self {
        let mut form = spec.to_form();
        form.parameter_configs.clear();
        form.cron_expression = None;
        Self { form, dimensions: spec.dimensions.clone() }
    }

    /// Display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.form.job_name = name.into();
        self
    }

    /// Access method and target.
    pub fn resource(mut self, method: MethodType, url: impl Into<String>) -> Self {
        self.form.method_type = Some(method);
        self.form.resource_url = url.into();
        self
    }

    /// Add or replace one base parameter.
    pub fn base_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.base_parameters.insert(key.into(), value.into());
        self
    }

    /// SINGLE strategy; clears batching.
    pub fn single(mut self) -> Self {
        self.form.parameter_type = ParameterType::Single;
        self.form.batch_size = None;
        self.form.delay_seconds = None;
        self
    }

    /// Expanding strategy with its batching.
    pub fn expanding(mut self, kind: ParameterType, batch_size: i64, delay_seconds: i64) -> Self {
        self.form.parameter_type = kind;
        self.form.batch_size = Some(batch_size);
        self.form.delay_seconds = Some(delay_seconds);
        self
    }

    /// Priority hint.
    pub fn resource_weight(mut self, weight: i64) -> Self {
        self.form.resource_weight = Some(weight);
        self
    }

    /// Firing eligibility.
    pub fn status(mut self, status: JobStatus) -> Self {
        self.form.status = Some(status);
        self
    }

    /// Schedule fields; the cron expression is derived at build time.
    pub fn schedule(
        mut self,
        kind: ScheduleType,
        hour: i64,
        minute: i64,
        day_of_week: Option<i64>,
        day_of_month: Option<i64>,
    ) -> Self {
        self.form.schedule_type = Some(kind);
        self.form.hour = Some(hour);
        self.form.minute = Some(minute);
        self.form.day_of_week = day_of_week;
        self.form.day_of_month = day_of_month;
        self
    }

    /// Apply one dimension staging command.
    pub fn apply(&mut self, cmd: DimensionCommand) -> Result<&mut Self, UnknownSortOrder> {
        self.dimensions.apply(cmd)?;
        Ok(self)
    }

    /// Shorthand for [`DimensionCommand::Add`].
    pub fn dimension(mut self, draft: ParameterDraft) -> Self {
        // Add never names an existing position, so it cannot fail.
        let _ = self.dimensions.apply(DimensionCommand::Add(draft));
        self
    }

    /// Staged dimensions.
    pub fn dimensions(&self) -> &Dimensions { &self.dimensions }

    /// Form that would be submitted.
    pub fn form(&self) -> JobForm {
        let mut form = self.form.clone();
        form.parameter_configs = self.dimensions.to_vec();
        form
    }

    /// Validate and commit the staged definition.
    pub fn build(&self) -> Result<JobSpec, ValidationError> {
        crate::validate::validate(&self.form())
    }
}

//! Value source resolution: one configured source in, an ordered list of
//! string values out. Nothing is cached; every call reads current state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::job::ValueSourceType;

/// Read-only query collaborator for `DB_QUERY` sources.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `sql` and return the first column of every row, rendered as text.
    async fn first_column(&self, sql: &str) -> anyhow::Result<Vec<String>>;
}

/// Response of an [`HttpGet`] call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Body as text.
    pub body: String,
}

/// Plain HTTP GET collaborator for `API_CALL` sources.
#[async_trait]
pub trait HttpGet: Send + Sync {
    /// GET `url`. Transport failures are errors; non-2xx statuses are not.
    async fn get(&self, url: &str) -> anyhow::Result<HttpResponse>;
}

/// File reader collaborator for `FILE_LIST` sources.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Read the named file as text.
    async fn read(&self, name: &str) -> anyhow::Result<String>;
}

/* --------------------- STATIC_LIST --------------------- */

/// Parse a JSON array of strings.
pub fn parse_static_list(source: &str) -> Result<Vec<String>, ResolveError> {
    serde_json::from_str::<Vec<String>>(source).map_err(|e| ResolveError::Parse(e.to_string()))
}

/* --------------------- DATE_RANGE --------------------- */

/// Step between consecutive dates of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    /// One day.
    Day,
    /// Seven days.
    Week,
    /// One calendar month.
    Month,
    /// One calendar year.
    Year,
}

impl std::str::FromStr for Interval {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DAY" => Ok(Interval::Day),
            "WEEK" => Ok(Interval::Week),
            "MONTH" => Ok(Interval::Month),
            "YEAR" => Ok(Interval::Year),
            _ => Err(ResolveError::Invalid(format!("unknown interval {s:?}"))),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDateRange {
    #[serde(alias = "start")]
    start_date: String,
    #[serde(alias = "end")]
    end_date: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    interval: Option<String>,
}

/// Parsed `DATE_RANGE` source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    /// First date, inclusive.
    pub start: NaiveDate,
    /// Last date, inclusive.
    pub end: NaiveDate,
    /// strftime form of the configured pattern.
    pub strftime: String,
    /// Step.
    pub interval: Interval,
}

impl DateRange {
    /// Parse `{startDate, endDate, format?, interval?}`; `format` defaults to
    /// `yyyyMM` and `interval` to `MONTH`.
    pub fn parse(source: &str) -> Result<Self, ResolveError> {
        let raw: RawDateRange =
            serde_json::from_str(source).map_err(|e| ResolveError::Parse(e.to_string()))?;
        let start = parse_date("startDate", &raw.start_date)?;
        let end = parse_date("endDate", &raw.end_date)?;
        if start > end {
            return Err(ResolveError::Invalid(format!("startDate {start} is after endDate {end}")));
        }
        let interval = raw.interval.as_deref().unwrap_or("MONTH").parse()?;
        let strftime = to_strftime(raw.format.as_deref().unwrap_or("yyyyMM"))?;
        Ok(Self { start, end, strftime, interval })
    }

    /// Inclusive dates from start to end. Each date is one interval after the
    /// previous one, so a clamped month end carries forward (Jan 31, Feb 29, Mar 29).
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut current = Some(self.start);
        while let Some(d) = current.filter(|d| *d <= self.end) {
            out.push(d);
            current = self.step(d);
        }
        out
    }

    /// Number of dates [`dates`](Self::dates) would produce, without formatting them.
    pub fn count(&self) -> usize {
        let days = (self.end - self.start).num_days().max(0) as usize;
        match self.interval {
            Interval::Day => days + 1,
            Interval::Week => days / 7 + 1,
            Interval::Month | Interval::Year => {
                let mut n = 0;
                let mut current = Some(self.start);
                while let Some(d) = current.filter(|d| *d <= self.end) {
                    n += 1;
                    current = self.step(d);
                }
                n
            }
        }
    }

    fn step(&self, d: NaiveDate) -> Option<NaiveDate> {
        match self.interval {
            Interval::Day => d.checked_add_days(Days::new(1)),
            Interval::Week => d.checked_add_days(Days::new(7)),
            Interval::Month => d.checked_add_months(Months::new(1)),
            Interval::Year => d.checked_add_months(Months::new(12)),
        }
    }

    /// Formatted values.
    pub fn values(&self) -> Vec<String> {
        self.dates().iter().map(|d| d.format(&self.strftime).to_string()).collect()
    }
}

fn parse_date(field: &str, s: &str) -> Result<NaiveDate, ResolveError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| ResolveError::Parse(format!("{field} {s:?}: {e}")))
}

/// Translate a `yyyy`/`MM`/`dd` style pattern into strftime.
fn to_strftime(pattern: &str) -> Result<String, ResolveError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let piece = match (c, run) {
            ('y', 2) => "%y".to_string(),
            ('y', _) => "%Y".to_string(),
            ('M', 1) => "%-m".to_string(),
            ('M', 2) => "%m".to_string(),
            ('M', 3) => "%b".to_string(),
            ('M', _) => "%B".to_string(),
            ('d', 1) => "%-d".to_string(),
            ('d', _) => "%d".to_string(),
            ('%', _) => "%%".repeat(run),
            (c, _) if c.is_ascii_alphabetic() => {
                return Err(ResolveError::Invalid(format!("unsupported date pattern letter {c:?}")));
            }
            (c, _) => c.to_string().repeat(run),
        };
        out.push_str(&piece);
        i += run;
    }
    Ok(out)
}

/* --------------------- DB_QUERY --------------------- */

// Literals and comments in one alternation so each is recognised left to right:
// a `--` inside a literal is not a comment and a quote inside a comment is not a literal.
static SQL_LITERALS_AND_COMMENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)'(?:[^']|'')*'|--[^\n]*|/\*.*?\*/").unwrap());
static SQL_MUTATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|MERGE|UPSERT|DROP|CREATE|ALTER|TRUNCATE|GRANT|REVOKE|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX|CALL|EXEC|EXECUTE|LOCK|COPY|INTO)\b",
    )
    .unwrap()
});

/// Reject anything but a single `SELECT`/`WITH` statement without mutating keywords.
pub fn check_read_only(sql: &str) -> Result<(), ResolveError> {
    let stripped = SQL_LITERALS_AND_COMMENTS.replace_all(sql, |c: &regex::Captures| {
        if c[0].starts_with('\'') { "''" } else { " " }
    });

    let statements: Vec<&str> =
        stripped.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    let stmt = match statements.as_slice() {
        [one] => *one,
        [] => return Err(ResolveError::Policy("empty query".into())),
        _ => return Err(ResolveError::Policy("only a single statement is allowed".into())),
    };

    let first = stmt.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
    if first != "SELECT" && first != "WITH" {
        return Err(ResolveError::Policy(format!("query must start with SELECT or WITH, got {first}")));
    }
    if let Some(m) = SQL_MUTATING.find(stmt) {
        return Err(ResolveError::Policy(format!("mutating keyword {} is not allowed", m.as_str())));
    }
    Ok(())
}

/* --------------------- API_CALL --------------------- */

/// Parsed `API_CALL` source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    /// Absolute http(s) URL.
    pub url: String,
    /// Dotted path, `name[]` iterates an array; empty means the body itself.
    #[serde(default, alias = "path")]
    pub json_path: Option<String>,
    /// Only `GET` is accepted.
    #[serde(default)]
    pub method: Option<String>,
}

impl ApiCall {
    /// Parse and check the source.
    pub fn parse(source: &str) -> Result<Self, ResolveError> {
        let call: ApiCall =
            serde_json::from_str(source).map_err(|e| ResolveError::Parse(e.to_string()))?;
        let parsed = url::Url::parse(&call.url)
            .map_err(|e| ResolveError::Invalid(format!("url {:?}: {e}", call.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::Invalid(format!("url {:?} is not http(s)", call.url)));
        }
        if let Some(m) = call.method.as_deref() {
            if !m.eq_ignore_ascii_case("GET") {
                return Err(ResolveError::Policy(format!("method {m} is not allowed, use GET")));
            }
        }
        Ok(call)
    }

    /// Pull values out of a response body.
    pub fn extract(&self, body: &Value) -> Result<Vec<String>, ResolveError> {
        let path = self.json_path.as_deref().unwrap_or("").trim();
        let segments: Vec<&str> = if path.is_empty() { Vec::new() } else { path.split('.').collect() };
        if segments.is_empty() && !body.is_array() {
            return Err(ResolveError::Source("response body is not an array".into()));
        }
        let mut out = Vec::new();
        walk(body, &segments, path, &mut out)?;
        Ok(out)
    }
}

fn walk(node: &Value, segments: &[&str], path: &str, out: &mut Vec<String>) -> Result<(), ResolveError> {
    let Some((head, rest)) = segments.split_first() else {
        return match node {
            Value::Array(items) => items.iter().try_for_each(|v| leaf(v, path).map(|s| out.push(s))),
            other => leaf(other, path).map(|s| out.push(s)),
        };
    };
    let missing = || ResolveError::Source(format!("path {path:?}: segment {head:?} not found"));
    match head.strip_suffix("[]") {
        Some(name) => {
            let arr = node.get(name).and_then(Value::as_array).ok_or_else(missing)?;
            for item in arr {
                walk(item, rest, path, out)?;
            }
            Ok(())
        }
        None => walk(node.get(*head).ok_or_else(missing)?, rest, path, out),
    }
}

fn leaf(v: &Value, path: &str) -> Result<String, ResolveError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ResolveError::Source(format!(
            "path {path:?}: expected a scalar, found {}",
            kind_of(other)
        ))),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/* --------------------- FILE_LIST --------------------- */

fn file_lines(text: &str) -> Vec<String> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

/* --------------------- resolver --------------------- */

/// Checks that need no I/O. Used by the validator before a job is accepted.
pub fn precheck(kind: ValueSourceType, source: &str) -> Result<(), ResolveError> {
    match kind {
        ValueSourceType::StaticList => parse_static_list(source).map(|_| ()),
        ValueSourceType::DateRange => DateRange::parse(source).map(|_| ()),
        ValueSourceType::DbQuery => check_read_only(source),
        ValueSourceType::ApiCall => ApiCall::parse(source).map(|_| ()),
        ValueSourceType::FileList => Ok(()),
    }
}

/// Turns value sources into values using whichever collaborators are attached.
#[derive(Clone, Default)]
pub struct Resolver {
    query: Option<Arc<dyn QueryExecutor>>,
    http: Option<Arc<dyn HttpGet>>,
    files: Option<Arc<dyn FileSource>>,
}

impl Resolver {
    /// Resolver with no collaborators; only pure sources resolve.
    pub fn new() -> Self { Self::default() }

    /// Attach the query executor.
    pub fn with_query(mut self, q: impl QueryExecutor + 'static) -> Self {
        self.query = Some(Arc::new(q));
        self
    }

    /// Attach the HTTP client.
    pub fn with_http(mut self, h: impl HttpGet + 'static) -> Self {
        self.http = Some(Arc::new(h));
        self
    }

    /// Attach the file reader.
    pub fn with_files(mut self, f: impl FileSource + 'static) -> Self {
        self.files = Some(Arc::new(f));
        self
    }

    /// Resolve one source into its ordered values. May return an empty list;
    /// the caller decides whether emptiness is an error.
    pub async fn resolve(&self, kind: ValueSourceType, source: &str) -> Result<Vec<String>, ResolveError> {
        let values = match kind {
            ValueSourceType::StaticList => parse_static_list(source)?,
            ValueSourceType::DateRange => DateRange::parse(source)?.values(),
            ValueSourceType::DbQuery => {
                if let Err(e) = check_read_only(source) {
                    warn!("rejected query source: {e}");
                    return Err(e);
                }
                let q = self.query.as_ref().ok_or_else(|| unavailable("query executor"))?;
                q.first_column(source).await.map_err(|e| ResolveError::Source(format!("query failed: {e:#}")))?
            }
            ValueSourceType::ApiCall => {
                let call = ApiCall::parse(source)?;
                let http = self.http.as_ref().ok_or_else(|| unavailable("http client"))?;
                let resp = http
                    .get(&call.url)
                    .await
                    .map_err(|e| ResolveError::Source(format!("GET {}: {e:#}", call.url)))?;
                if !(200..300).contains(&resp.status) {
                    return Err(ResolveError::Source(format!("GET {} returned status {}", call.url, resp.status)));
                }
                let body: Value = serde_json::from_str(&resp.body)
                    .map_err(|e| ResolveError::Source(format!("GET {}: body is not JSON: {e}", call.url)))?;
                call.extract(&body)?
            }
            ValueSourceType::FileList => {
                let files = self.files.as_ref().ok_or_else(|| unavailable("file source"))?;
                let text = files
                    .read(source.trim())
                    .await
                    .map_err(|e| ResolveError::Source(format!("read {}: {e:#}", source.trim())))?;
                file_lines(&text)
            }
        };
        debug!(kind = %kind, count = values.len(), "resolved value source");
        Ok(values)
    }
}

fn unavailable(what: &str) -> ResolveError {
    ResolveError::Source(format!("no {what} configured"))
}

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use dsflow_core::cfg::{self, AppId, Config};
use dsflow_core::firing::{self, FiringOutcome, Limits};
use dsflow_core::job::{JobForm, JobStatus};
use dsflow_core::plan::Batch;
use dsflow_core::schedule::{self, ScheduleInput, ScheduleType};
use dsflow_core::source::Resolver;
use dsflow_core::store::{open_fs, FsKv, JobStore};
use dsflow_core::{logx, validate, JobSpec, ValidationError};

mod dispatch;
mod sources;

const APP: AppId = AppId {
    qualifier: "com",
    organization: "datasolution",
    application: env!("CARGO_PKG_NAME"),
};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = "Batch job definitions, schedules and execution plans")]
struct Cli {
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Job store directory; overrides `data_dir` from the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile schedule fields into a Quartz cron expression.
    Cron(CronArgs),
    /// Check a hand-written Quartz cron expression.
    CheckCron {
        #[arg(required = true, num_args = 1..)]
        expr: Vec<String>,
    },
    /// Validate a job file and print the normalized definition.
    Validate { file: PathBuf },
    /// Resolve and expand a job file and print its execution plan.
    Plan {
        file: PathBuf,
        #[arg(long)]
        max_units: Option<usize>,
    },
    /// Manage stored jobs.
    #[command(subcommand)]
    Jobs(JobsCommand),
}

#[derive(Args)]
struct CronArgs {
    #[arg(long)]
    schedule: ScheduleType,
    /// Time of day as HH:MM.
    #[arg(long)]
    at: String,
    #[arg(long)]
    day_of_week: Option<u32>,
    #[arg(long)]
    day_of_month: Option<u32>,
}

#[derive(Subcommand)]
enum JobsCommand {
    /// Store a job from a file.
    Add {
        file: PathBuf,
        /// Replace a stored job with the same code.
        #[arg(long)]
        replace: bool,
    },
    List,
    Show { code: String },
    Remove { code: String },
    /// Flip ACTIVE/INACTIVE.
    Toggle { code: String },
    /// Fire a stored job now and hand its batches to stdout.
    Fire {
        code: String,
        /// Emit every batch immediately instead of honouring delaySeconds.
        #[arg(long)]
        no_wait: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => cfg::load_from(path)?,
        None => cfg::load_or_init(&APP)?,
    };
    if let Some(dir) = &cli.data_dir {
        cfg.data_dir = Some(dir.clone());
    }
    let level = match cli.verbose {
        0 => cfg.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    logx::init(level);
    debug!(config = ?cli.config, "{} boot", APP.application);

    match cli.cmd {
        Command::Cron(args) => {
            let (hour, minute) = parse_at(&args.at)?;
            let input = ScheduleInput {
                schedule_type: args.schedule,
                hour,
                minute,
                day_of_week: args.day_of_week,
                day_of_month: args.day_of_month,
            };
            println!("{}", schedule::compile(&input)?);
        }
        Command::CheckCron { expr } => {
            let expr = expr.join(" ");
            schedule::check_cron(&expr)?;
            println!("ok: {expr}");
        }
        Command::Validate { file } => {
            let job = read_job(&file)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Plan { file, max_units } => {
            let job = read_job(&file)?;
            let limits = max_units.map(|max_units| Limits { max_units }).unwrap_or_else(|| cfg.limits());
            let plan = firing::prepare(&job, &resolver(&cfg)?, limits).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Jobs(cmd) => jobs(cmd, &cfg).await?,
    }
    Ok(())
}

async fn jobs(cmd: JobsCommand, cfg: &Config) -> Result<()> {
    let store = open_store(cfg)?;
    match cmd {
        JobsCommand::Add { file, replace } => {
            let job = read_job(&file)?;
            if !replace && store.get(&job.job_code)?.is_some() {
                bail!("job {} already exists (use --replace)", job.job_code);
            }
            store.commit(&job)?;
            println!("{}\t{}", job.job_code, job.cron_expression());
        }
        JobsCommand::List => {
            for job in store.list()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    job.job_code,
                    job.status,
                    job.strategy.parameter_type(),
                    job.cron_expression(),
                    job.job_name
                );
            }
        }
        JobsCommand::Show { code } => {
            let job = stored(&store, &code)?;
            let state = store.firing_state(&code)?;
            let doc = serde_json::json!({ "job": job, "firingState": state });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        JobsCommand::Remove { code } => {
            if !store.remove(&code)? {
                bail!("no job {code}");
            }
            info!(job = %code, "job removed");
        }
        JobsCommand::Toggle { code } => {
            let job = stored(&store, &code)?;
            if let Some(status) = store.set_status(&code, job.status.toggled())? {
                println!("{code}\t{status}");
            }
        }
        JobsCommand::Fire { code, no_wait } => fire(&store, cfg, &code, !no_wait).await?,
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchLine<'a> {
    job_code: &'a str,
    method_type: dsflow_core::job::MethodType,
    resource_url: &'a str,
    resource_weight: u8,
    #[serde(flatten)]
    batch: &'a Batch,
}

async fn fire(store: &JobStore<FsKv>, cfg: &Config, code: &str, wait: bool) -> Result<()> {
    let job = stored(store, code)?;
    if job.status == JobStatus::Inactive {
        bail!("job {code} is INACTIVE");
    }
    let res = firing::prepare(&job, &resolver(cfg)?, cfg.limits()).await;
    let outcome = FiringOutcome::from_result(code, now_ms(), &res);
    store.record_firing(&outcome)?;
    let plan = res?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });

    let walk = dispatch::walk(&plan, wait, rx, |batch| {
        let line = BatchLine {
            job_code: &plan.job_code,
            method_type: plan.method_type,
            resource_url: &plan.resource_url,
            resource_weight: plan.resource_weight,
            batch,
        };
        println!("{}", serde_json::to_string(&line)?);
        Ok(())
    })
    .await?;
    if walk.cancelled {
        bail!("cancelled after {} of {} batches", walk.batches_sent, plan.batches.len());
    }
    info!(job = %code, batches = walk.batches_sent, units = plan.unit_count(), "firing dispatched");
    Ok(())
}

fn read_job(path: &Path) -> Result<JobSpec> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let form: JobForm = serde_json::from_str(&txt).with_context(|| format!("parse {}", path.display()))?;
    validate::validate(&form).map_err(|e: ValidationError| {
        for v in &e.violations {
            eprintln!("{v}");
        }
        anyhow::anyhow!("{}: {} violation(s)", path.display(), e.violations.len())
    })
}

fn stored(store: &JobStore<FsKv>, code: &str) -> Result<JobSpec> {
    store.get(code)?.with_context(|| format!("no job {code}"))
}

fn open_store(cfg: &Config) -> Result<JobStore<FsKv>> {
    let dir = cfg::data_dir(&APP, cfg)?;
    Ok(JobStore::new(open_fs(dir.join("jobs"))?))
}

fn resolver(cfg: &Config) -> Result<Resolver> {
    let root = match &cfg.file_source_root {
        Some(root) => root.clone(),
        None => cfg::data_dir(&APP, cfg)?.join("files"),
    };
    let mut resolver = Resolver::new().with_files(sources::DirFiles::new(root));
    if let Some(db) = &cfg.db_path {
        resolver = resolver.with_query(sources::SqliteQuery::new(db));
    }
    #[cfg(feature = "http-source")]
    {
        let timeout = std::time::Duration::from_millis(cfg.http_timeout_ms);
        resolver = resolver.with_http(sources::ReqwestGet::new(timeout)?);
    }
    Ok(resolver)
}

fn parse_at(at: &str) -> Result<(u32, u32)> {
    let (h, m) = at.split_once(':').with_context(|| format!("--at {at:?} is not HH:MM"))?;
    let hour = h.trim().parse().with_context(|| format!("bad hour in {at:?}"))?;
    let minute = m.trim().parse().with_context(|| format!("bad minute in {at:?}"))?;
    Ok((hour, minute))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

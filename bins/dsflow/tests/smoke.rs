use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const MATRIX_JOB: &str = r#"{
  "jobCode": "APT_TRADE",
  "jobName": "Apartment trades",
  "methodType": "API_GET",
  "resourceUrl": "https://apis.example.com/trades",
  "baseParameters": { "serviceKey": "KEY" },
  "parameterType": "MATRIX",
  "batchSize": 4,
  "delaySeconds": 0,
  "scheduleType": "weekly",
  "hour": 2,
  "minute": 0,
  "dayOfWeek": 1,
  "cronExpression": "* * * * * ?",
  "parameterConfigs": [
    { "parameterName": "DEAL_YMD", "valueSourceType": "DATE_RANGE",
      "valueSource": "{\"startDate\":\"2024-01-01\",\"endDate\":\"2024-02-01\"}", "sortOrder": 2 },
    { "parameterName": "LAWD_CD", "valueSourceType": "STATIC_LIST",
      "valueSource": "[\"11110\",\"11140\",\"11170\"]", "sortOrder": 1 }
  ]
}"#;

const BAD_JOB: &str = r#"{
  "jobCode": "bad code",
  "jobName": "",
  "methodType": "API_GET",
  "resourceUrl": "ftp://example.com/x",
  "parameterType": "MATRIX",
  "scheduleType": "daily",
  "hour": 25,
  "minute": 0
}"#;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "log_level = \"warn\"\n").unwrap();
        Self { dir }
    }

    fn write(&self, name: &str, body: &str) -> String {
        let p = self.dir.path().join(name);
        std::fs::write(&p, body).unwrap();
        p.display().to_string()
    }

    fn cmd(&self) -> Command {
        let mut c = Command::cargo_bin("dsflow").unwrap();
        c.env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.dir.path().join("config.toml"))
            .arg("--data-dir")
            .arg(self.path().join("data"));
        c
    }

    fn path(&self) -> &Path { self.dir.path() }
}

#[test]
fn compiles_weekly_schedule() {
    Env::new()
        .cmd()
        .args(["cron", "--schedule", "weekly", "--at", "02:00", "--day-of-week", "1"])
        .assert()
        .success()
        .stdout("0 0 2 ? * 1\n");
}

#[test]
fn rejects_weekly_without_day() {
    Env::new()
        .cmd()
        .args(["cron", "--schedule", "weekly", "--at", "02:00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dayOfWeek"));
}

#[test]
fn check_cron_accepts_and_rejects() {
    let env = Env::new();
    env.cmd().args(["check-cron", "0 30 4 L * ?"]).assert().success();
    env.cmd().args(["check-cron", "0 0 25 * * ?"]).assert().failure();
}

#[test]
fn validate_normalizes_cron() {
    let env = Env::new();
    let file = env.write("job.json", MATRIX_JOB);
    env.cmd()
        .args(["validate", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""cronExpression": "0 0 2 ? * 1""#));
}

#[test]
fn validate_lists_every_violation() {
    let env = Env::new();
    let file = env.write("bad.json", BAD_JOB);
    env.cmd()
        .args(["validate", &file])
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("jobCode")
                .and(predicate::str::contains("jobName"))
                .and(predicate::str::contains("resourceUrl"))
                .and(predicate::str::contains("batchSize"))
                .and(predicate::str::contains("hour")),
        );
}

#[test]
fn plan_expands_matrix() {
    let env = Env::new();
    let file = env.write("job.json", MATRIX_JOB);
    let out = env.cmd().args(["plan", &file]).assert().success().get_output().stdout.clone();
    let plan: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let batches = plan["batches"].as_array().unwrap();
    let sizes: Vec<usize> = batches.iter().map(|b| b["units"].as_array().unwrap().len()).collect();
    assert_eq!(sizes, [4, 2]);
    let first = &batches[0]["units"][0]["parameters"];
    assert_eq!(first["LAWD_CD"], "11110");
    assert_eq!(first["DEAL_YMD"], "202401");
    assert_eq!(first["serviceKey"], "KEY");
}

#[test]
fn plan_respects_ceiling() {
    let env = Env::new();
    let file = env.write("job.json", MATRIX_JOB);
    env.cmd()
        .args(["plan", &file, "--max-units", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("6"));
}

#[test]
fn jobs_lifecycle() {
    let env = Env::new();
    let file = env.write("job.json", MATRIX_JOB);

    env.cmd().args(["jobs", "add", &file]).assert().success().stdout("APT_TRADE\t0 0 2 ? * 1\n");
    env.cmd().args(["jobs", "add", &file]).assert().failure();
    env.cmd().args(["jobs", "add", &file, "--replace"]).assert().success();

    env.cmd()
        .args(["jobs", "list"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("APT_TRADE\tACTIVE\tMATRIX\t0 0 2 ? * 1"));

    let out = env.cmd().args(["jobs", "fire", "APT_TRADE", "--no-wait"]).assert().success().get_output().stdout.clone();
    let lines: Vec<serde_json::Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["jobCode"], "APT_TRADE");
    assert_eq!(lines[1]["index"], 1);

    env.cmd()
        .args(["jobs", "show", "APT_TRADE"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""firings": 1"#));

    env.cmd().args(["jobs", "toggle", "APT_TRADE"]).assert().success().stdout("APT_TRADE\tINACTIVE\n");
    env.cmd()
        .args(["jobs", "fire", "APT_TRADE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("INACTIVE"));

    env.cmd().args(["jobs", "remove", "APT_TRADE"]).assert().success();
    env.cmd().args(["jobs", "show", "APT_TRADE"]).assert().failure();
}

#[test]
fn file_list_reads_below_source_root() {
    let env = Env::new();
    std::fs::create_dir_all(env.path().join("data/files")).unwrap();
    std::fs::write(env.path().join("data/files/regions.txt"), "11110\n\n11140\n").unwrap();
    let job = r#"{
      "jobCode": "FILE_JOB", "jobName": "from file", "methodType": "API_GET",
      "resourceUrl": "https://apis.example.com/x", "parameterType": "MULTI_PARAM",
      "batchSize": 10, "delaySeconds": 0, "scheduleType": "daily", "hour": 1, "minute": 5,
      "parameterConfigs": [
        { "parameterName": "LAWD_CD", "valueSourceType": "FILE_LIST", "valueSource": "regions.txt", "sortOrder": 1 }
      ]
    }"#;
    let file = env.write("file_job.json", job);
    let out = env.cmd().args(["plan", &file]).assert().success().get_output().stdout.clone();
    let plan: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(plan["batches"][0]["units"].as_array().unwrap().len(), 2);
}

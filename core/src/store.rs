use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::firing::{FiringOutcome, FiringResult};
use crate::job::{JobSpec, JobStatus};

/// Minimal byte key/value interface the job store runs on.
pub trait Kv: Clone + Send + Sync + 'static {
    /// Value bytes for `key`, if present.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Replace the value for `key` in one write.
    fn put(&self, key: &[u8], val: &[u8]) -> Result<()>;
    /// Delete `key`; `true` if something was removed.
    fn delete(&self, key: &[u8]) -> Result<bool>;
}

/// Typed helpers over any [`Kv`]: bincode for small runtime records, JSON for
/// documents whose schema is shared with other tools.
pub trait KvSerde: Kv {
    /// Decode a bincode value.
    fn get_t<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).context("bincode deserialize")?)),
            None => Ok(None),
        }
    }
    /// Encode with bincode and store.
    fn put_t<T: Serialize>(&self, key: &[u8], val: &T) -> Result<()> {
        let buf = bincode::serialize(val).context("bincode serialize")?;
        self.put(key, &buf)
    }
    /// Decode a JSON document.
    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).context("json deserialize")?)),
            None => Ok(None),
        }
    }
    /// Encode as JSON and store.
    fn put_json<T: Serialize>(&self, key: &[u8], val: &T) -> Result<()> {
        let buf = serde_json::to_vec(val).context("json serialize")?;
        self.put(key, &buf)
    }
}
impl<T: Kv> KvSerde for T {}

/// Filesystem-backed KV: one file per key under a root directory.
#[derive(Clone, Debug)]
pub struct FsKv {
    root: PathBuf,
}

/// Open an FS-backed KV rooted at `dir` (created if missing).
pub fn open_fs<P: AsRef<Path>>(dir: P) -> Result<FsKv> {
    let root = dir.as_ref().to_path_buf();
    fs::create_dir_all(&root).with_context(|| format!("create kv dir {}", root.display()))?;
    Ok(FsKv { root })
}

/// Namespaced key `"{ns}:{key}"` as bytes.
pub fn ns(ns: &str, key: &str) -> Vec<u8> { format!("{ns}:{key}").into_bytes() }

impl FsKv {
    fn path_for(&self, key: &[u8]) -> PathBuf {
        // Hex file names keep arbitrary key bytes portable.
        let name: String = key.iter().map(|b| format!("{b:02x}")).collect();
        self.root.join(name)
    }
}

impl Kv for FsKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    fn put(&self, key: &[u8], val: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        // Write a temp file then rename so readers never see a partial value.
        let tmp = path.with_extension("tmp");
        let mut f = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(val).with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all()?;
        fs::rename(&tmp, &path).with_context(|| format!("rename to {}", path.display()))?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

/// Per-job firing history. Kept apart from the definition, which firings never touch.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FiringState {
    /// Timestamp (ms since epoch) of the last firing.
    pub last_fired_ms: u64,
    /// Firings that produced a plan.
    pub firings: u64,
    /// Firings that failed.
    pub failures: u64,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

const JOBS: &str = "jobs";
const REGISTRY: &str = "registry";

/// Job definitions and firing state on top of a [`Kv`].
#[derive(Clone, Debug)]
pub struct JobStore<K: Kv> {
    kv: K,
}

impl<K: Kv> JobStore<K> {
    /// Wrap a KV.
    pub fn new(kv: K) -> Self { Self { kv } }

    fn spec_key(code: &str) -> Vec<u8> { ns(JOBS, &format!("{code}:spec")) }
    fn state_key(code: &str) -> Vec<u8> { ns(JOBS, &format!("{code}:state")) }

    fn registry(&self) -> Result<Vec<String>> {
        Ok(self.kv.get_t(&ns(JOBS, REGISTRY))?.unwrap_or_default())
    }

    /// Store a validated job, replacing any previous definition with the same code.
    /// The definition, dimensions included, is written as one value.
    pub fn commit(&self, spec: &JobSpec) -> Result<()> {
        self.kv
            .put_json(&Self::spec_key(&spec.job_code), spec)
            .with_context(|| format!("store job {}", spec.job_code))?;
        let mut ids = self.registry()?;
        if !ids.iter().any(|i| i == &spec.job_code) {
            ids.push(spec.job_code.clone());
            self.kv.put_t(&ns(JOBS, REGISTRY), &ids)?;
        }
        info!(job = %spec.job_code, cron = %spec.cron_expression(), "job committed");
        Ok(())
    }

    /// Load a job. Stored documents go through validation again on the way out.
    pub fn get(&self, code: &str) -> Result<Option<JobSpec>> {
        self.kv.get_json(&Self::spec_key(code)).with_context(|| format!("load job {code}"))
    }

    /// All jobs in registration order.
    pub fn list(&self) -> Result<Vec<JobSpec>> {
        let mut out = Vec::new();
        for id in self.registry()? {
            if let Some(spec) = self.get(&id)? {
                out.push(spec);
            }
        }
        Ok(out)
    }

    /// Remove a job and its firing state; `true` if it existed.
    pub fn remove(&self, code: &str) -> Result<bool> {
        let mut ids = self.registry()?;
        let before = ids.len();
        ids.retain(|i| i != code);
        if ids.len() != before {
            self.kv.put_t(&ns(JOBS, REGISTRY), &ids)?;
        }
        let existed = self.kv.delete(&Self::spec_key(code))?;
        self.kv.delete(&Self::state_key(code))?;
        Ok(existed)
    }

    /// Set the status of a stored job. Returns the new status.
    pub fn set_status(&self, code: &str, status: JobStatus) -> Result<Option<JobStatus>> {
        let Some(mut spec) = self.get(code)? else { return Ok(None) };
        spec.status = status;
        self.commit(&spec)?;
        Ok(Some(status))
    }

    /// Firing history for a job.
    pub fn firing_state(&self, code: &str) -> Result<FiringState> {
        Ok(self.kv.get_t(&Self::state_key(code))?.unwrap_or_default())
    }

    /// Fold one outcome into the job's firing history.
    pub fn record_firing(&self, outcome: &FiringOutcome) -> Result<FiringState> {
        let mut st = self.firing_state(&outcome.job_code)?;
        st.last_fired_ms = outcome.fired_at_ms;
        match &outcome.result {
            FiringResult::Planned { .. } => {
                st.firings = st.firings.saturating_add(1);
                st.consecutive_failures = 0;
                st.last_error = None;
            }
            FiringResult::Failed { error } => {
                st.failures = st.failures.saturating_add(1);
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                st.last_error = Some(error.clone());
            }
        }
        self.kv.put_t(&Self::state_key(&outcome.job_code), &st)?;
        Ok(st)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpecBuilder, MethodType};
    use crate::schedule::ScheduleType;

    fn spec(code: &str) -> JobSpec {
        JobSpecBuilder::new(code)
            .name("stored")
            .resource(MethodType::ApiGet, "https://apis.example.com")
            .schedule(ScheduleType::Daily, 4, 30, None, None)
            .build()
            .unwrap()
    }

    #[test]
    fn commit_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(open_fs(dir.path()).unwrap());
        store.commit(&spec("A_JOB")).unwrap();
        store.commit(&spec("B_JOB")).unwrap();
        store.commit(&spec("A_JOB")).unwrap();

        let codes: Vec<String> = store.list().unwrap().into_iter().map(|s| s.job_code).collect();
        assert_eq!(codes, ["A_JOB", "B_JOB"]);
        assert_eq!(store.get("A_JOB").unwrap().unwrap(), spec("A_JOB"));

        assert!(store.remove("A_JOB").unwrap());
        assert!(!store.remove("A_JOB").unwrap());
        assert!(store.get("A_JOB").unwrap().is_none());
    }

    #[test]
    fn toggling_status_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(open_fs(dir.path()).unwrap());
        store.commit(&spec("T_JOB")).unwrap();
        store.set_status("T_JOB", JobStatus::Inactive).unwrap();
        assert_eq!(store.get("T_JOB").unwrap().unwrap().status, JobStatus::Inactive);
        assert_eq!(store.set_status("NOPE", JobStatus::Active).unwrap(), None);
    }

    #[test]
    fn firing_history_leaves_definition_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(open_fs(dir.path()).unwrap());
        store.commit(&spec("F_JOB")).unwrap();

        let failed = FiringOutcome {
            job_code: "F_JOB".into(),
            fired_at_ms: 10,
            result: FiringResult::Failed { error: "boom".into() },
        };
        store.record_firing(&failed).unwrap();
        let st = store.record_firing(&failed).unwrap();
        assert_eq!((st.failures, st.consecutive_failures), (2, 2));

        let ok = FiringOutcome {
            job_code: "F_JOB".into(),
            fired_at_ms: 20,
            result: FiringResult::Planned { units: 1, batches: 1 },
        };
        let st = store.record_firing(&ok).unwrap();
        assert_eq!(st.firings, 1);
        assert_eq!(st.consecutive_failures, 0);
        assert_eq!(st.last_error, None);
        assert_eq!(st.last_fired_ms, 20);

        assert_eq!(store.get("F_JOB").unwrap().unwrap(), spec("F_JOB"));
    }

    #[test]
    fn hex_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let kv = open_fs(dir.path()).unwrap();
        kv.put(b"a:b", b"1").unwrap();
        kv.put(b"a:c", b"2").unwrap();
        assert_eq!(kv.get(b"a:b").unwrap().unwrap(), b"1");
        assert_eq!(kv.get(b"a:c").unwrap().unwrap(), b"2");
        assert!(kv.get(b"missing").unwrap().is_none());
    }
}

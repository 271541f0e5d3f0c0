use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::firing::Limits;

/// Identifier used to compute per-app configuration and data directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"datasolution"`.
    pub organization: &'static str,
    /// Application name, e.g. `"dsflow"`.
    pub application: &'static str,
}

/// Application configuration persisted to `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracing level to use if `RUST_LOG` is not set (e.g. `"info"`).
    pub log_level: String,
    /// Safety ceiling on execution units per firing.
    pub max_expansion_units: usize,
    /// Job store root; the platform data dir when unset.
    pub data_dir: Option<PathBuf>,
    /// Root for FILE_LIST sources; `<data_dir>/files` when unset.
    pub file_source_root: Option<PathBuf>,
    /// SQLite database used by DB_QUERY sources.
    pub db_path: Option<PathBuf>,
    /// Timeout for API_CALL sources.
    pub http_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_expansion_units: Limits::default().max_units,
            data_dir: None,
            file_source_root: None,
            db_path: None,
            http_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Firing limits derived from this config.
    pub fn limits(&self) -> Limits { Limits { max_units: self.max_expansion_units } }
}

fn project_dirs(app: &AppId) -> Result<ProjectDirs> {
    ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Job store directory: `cfg.data_dir`, or the platform data dir.
pub fn data_dir(app: &AppId, cfg: &Config) -> Result<PathBuf> {
    let dir = match &cfg.data_dir {
        Some(d) => d.clone(),
        None => project_dirs(app)?.data_dir().to_path_buf(),
    };
    fs::create_dir_all(&dir).with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}

/// Load `config.toml` from the app config dir or create a default one.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let path = config_dir(app)?.join("config.toml");
    if path.exists() {
        load_from(&path)
    } else {
        let cfg = Config::default();
        save_config(&path, &cfg)?;
        Ok(cfg)
    }
}

/// Load an explicit config file. Missing keys take their defaults.
pub fn load_from(path: &Path) -> Result<Config> {
    let txt = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&txt).with_context(|| format!("parse {}", path.display()))
}

fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg)?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use dsflow_core::source::{FileSource, QueryExecutor};

/// DB_QUERY collaborator over a SQLite file, opened read-only per query.
pub struct SqliteQuery {
    path: PathBuf,
}

impl SqliteQuery {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

fn first_column_blocking(path: &Path, sql: &str) -> Result<Vec<String>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("open {}", path.display()))?;
    let mut stmt = conn.prepare(sql).context("prepare query")?;
    if stmt.column_count() == 0 {
        bail!("query returns no columns");
    }
    let rows = stmt.query_map([], |row| {
        Ok(match row.get_ref(0)? {
            ValueRef::Null => None,
            ValueRef::Integer(i) => Some(i.to_string()),
            ValueRef::Real(f) => Some(f.to_string()),
            ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(_) => None,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        if let Some(v) = r? {
            out.push(v);
        }
    }
    Ok(out)
}

#[async_trait]
impl QueryExecutor for SqliteQuery {
    async fn first_column(&self, sql: &str) -> Result<Vec<String>> {
        let path = self.path.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || first_column_blocking(&path, &sql)).await?
    }
}

/// FILE_LIST collaborator: files below a fixed root.
pub struct DirFiles {
    root: PathBuf,
}

impl DirFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }
}

#[async_trait]
impl FileSource for DirFiles {
    async fn read(&self, name: &str) -> Result<String> {
        let rel = Path::new(name);
        if name.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("file name {name:?} must be relative and stay inside the source root");
        }
        let path = self.root.join(rel);
        tokio::fs::read_to_string(&path).await.with_context(|| format!("read {}", path.display()))
    }
}

#[cfg(feature = "http-source")]
pub use http::ReqwestGet;

#[cfg(feature = "http-source")]
mod http {
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use dsflow_core::source::{HttpGet, HttpResponse};

    /// API_CALL collaborator.
    pub struct ReqwestGet {
        client: reqwest::Client,
    }

    impl ReqwestGet {
        pub fn new(timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder().timeout(timeout).build()?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl HttpGet for ReqwestGet {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            let resp = self.client.get(url).send().await?;
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            Ok(HttpResponse { status, body })
        }
    }
}

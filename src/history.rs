//! Persistent run history in SQLite.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};

use crate::pipeline::HistorySink;
use crate::pipeline::models::{ImplementationMode, RunSummary};

/// Async-safe handle to the history database.
///
/// All access runs on tokio's blocking pool behind one mutex, so concurrent
/// runs append without interleaving.
#[derive(Clone)]
pub struct HistoryHandle {
    inner: Arc<std::sync::Mutex<HistoryDb>>,
}

impl HistoryHandle {
    pub fn new(db: HistoryDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self::new(HistoryDb::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(HistoryDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&HistoryDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("History lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("History task panicked")?
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<RunSummary>> {
        self.call(move |db| db.list(limit)).await
    }
}

#[async_trait]
impl HistorySink for HistoryHandle {
    async fn append(&self, summary: &RunSummary) -> Result<()> {
        let summary = summary.clone();
        self.call(move |db| db.append(&summary)).await
    }
}

pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open history database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run history migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run history migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS run_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                project_title TEXT,
                idea_excerpt TEXT NOT NULL DEFAULT '',
                epics_count INTEGER NOT NULL DEFAULT 0,
                features_count INTEGER NOT NULL DEFAULT 0,
                features_completed INTEGER NOT NULL DEFAULT 0,
                implementation_mode TEXT,
                repo_url TEXT,
                elapsed_secs REAL NOT NULL DEFAULT 0,
                failed_step TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_run_history_timestamp ON run_history(timestamp);
            ",
        )?;
        Ok(())
    }

    pub fn append(&self, summary: &RunSummary) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_history (
                    run_id, timestamp, status, project_title, idea_excerpt, epics_count,
                    features_count, features_completed, implementation_mode, repo_url,
                    elapsed_secs, failed_step, error
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    summary.run_id,
                    summary.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                    summary.status,
                    summary.project_title,
                    summary.idea_excerpt,
                    summary.epics_count as i64,
                    summary.features_count as i64,
                    summary.features_completed as i64,
                    summary.implementation_mode.map(|m| m.as_str()),
                    summary.repo_url,
                    summary.elapsed_secs,
                    summary.failed_step,
                    summary.error,
                ],
            )
            .context("Failed to insert run history")?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn list(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, timestamp, status, project_title, idea_excerpt, epics_count,
                        features_count, features_completed, implementation_mode, repo_url,
                        elapsed_secs, failed_step, error
                 FROM run_history ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .context("Failed to prepare history query")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], summary_from_row)
            .context("Failed to query run history")?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row.context("Failed to read history row")?);
        }
        Ok(summaries)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM run_history", [], |row| row.get(0))
            .context("Failed to count run history")?;
        Ok(n as usize)
    }
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<RunSummary> {
    let timestamp: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let mode: Option<String> = row.get(8)?;
    let implementation_mode = match mode.as_deref() {
        Some("real") => Some(ImplementationMode::Real),
        Some("simulated") => Some(ImplementationMode::Simulated),
        _ => None,
    };
    Ok(RunSummary {
        run_id: row.get(0)?,
        timestamp,
        status: row.get(2)?,
        project_title: row.get(3)?,
        idea_excerpt: row.get(4)?,
        epics_count: row.get::<_, i64>(5)? as usize,
        features_count: row.get::<_, i64>(6)? as usize,
        features_completed: row.get::<_, i64>(7)? as usize,
        implementation_mode,
        repo_url: row.get(9)?,
        elapsed_secs: row.get(10)?,
        failed_step: row.get(11)?,
        error: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn summary(run_id: &str, offset_secs: i64) -> RunSummary {
        RunSummary {
            run_id: run_id.to_string(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            status: "completed".to_string(),
            project_title: Some("TodoApp".to_string()),
            idea_excerpt: "Build a todo app".to_string(),
            epics_count: 3,
            features_count: 7,
            features_completed: 7,
            implementation_mode: Some(ImplementationMode::Simulated),
            repo_url: Some("https://github.com/me/todo".to_string()),
            elapsed_secs: 12.5,
            failed_step: None,
            error: None,
        }
    }

    #[test]
    fn test_append_and_list_round_trip() {
        let db = HistoryDb::new_in_memory().unwrap();
        let original = summary("run_1", 0);
        db.append(&original).unwrap();

        let listed = db.list(10).unwrap();
        assert_eq!(listed.len(), 1);
        let got = &listed[0];
        assert_eq!(got.run_id, "run_1");
        assert_eq!(got.features_count, 7);
        assert_eq!(got.implementation_mode, Some(ImplementationMode::Simulated));
        assert_eq!(got.timestamp.timestamp(), original.timestamp.timestamp());
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let db = HistoryDb::new_in_memory().unwrap();
        db.append(&summary("old", -100)).unwrap();
        db.append(&summary("new", 0)).unwrap();
        db.append(&summary("mid", -50)).unwrap();

        let ids: Vec<_> = db.list(2).unwrap().into_iter().map(|s| s.run_id).collect();
        assert_eq!(ids, vec!["new", "mid"]);
        assert_eq!(db.count().unwrap(), 3);
    }

    #[test]
    fn test_failed_run_keeps_step_and_error() {
        let db = HistoryDb::new_in_memory().unwrap();
        let mut failed = summary("run_f", 0);
        failed.status = "failed".to_string();
        failed.failed_step = Some("creating_repo".to_string());
        failed.error = Some("rate limited".to_string());
        failed.implementation_mode = None;
        db.append(&failed).unwrap();

        let got = db.list(1).unwrap().remove(0);
        assert_eq!(got.failed_step.as_deref(), Some("creating_repo"));
        assert_eq!(got.error.as_deref(), Some("rate limited"));
        assert!(got.implementation_mode.is_none());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/history.db");
        {
            let handle = HistoryHandle::open(&path).unwrap();
            handle.append(&summary("persisted", 0)).await.unwrap();
        }
        let db = HistoryDb::new(&path).unwrap();
        assert_eq!(db.list(5).unwrap()[0].run_id, "persisted");
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let handle = HistoryHandle::in_memory().unwrap();
        let mut tasks = Vec::new();
        for i in 0..20 {
            let h = handle.clone();
            tasks.push(tokio::spawn(async move {
                h.append(&summary(&format!("run_{i}"), i)).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(handle.list(100).await.unwrap().len(), 20);
        assert_eq!(handle.call(|db| db.count()).await.unwrap(), 20);
    }
}

//! SQLite record of pipeline runs.

use super::Stage;
use crate::error::{PodError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    document_id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    title TEXT NOT NULL,
    completed_stage TEXT,
    current_stage TEXT,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    artifacts_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_updated_at ON runs(updated_at);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Paused,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Paused => "paused",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "paused" => Ok(RunStatus::Paused),
            "aborted" => Ok(RunStatus::Aborted),
            other => Err(PodError::Validation(format!("Unknown run status '{}'", other))),
        }
    }
}

/// Persisted state of one document's run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    pub document_id: String,
    pub source_path: String,
    pub title: String,
    pub completed_stage: Option<Stage>,
    /// Stage currently executing, or the one that last failed.
    pub current_stage: Option<Stage>,
    pub status: RunStatus,
    /// Attempts made at `current_stage`.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Artifact paths keyed by stage name.
    pub artifacts: BTreeMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Run store backed by SQLite.
pub struct RunStore {
    conn: Mutex<Connection>,
}

impl RunStore {
    /// Open (or create) the run database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened run store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PodError::Configuration(format!("Failed to acquire run store lock: {}", e)))
    }

    /// Register a run, or mark an existing one as running again.
    #[instrument(skip(self))]
    pub fn start(&self, document_id: &str, source_path: &str, title: &str) -> Result<PipelineRun> {
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.lock()?;
            conn.execute(
                r#"
                INSERT INTO runs (document_id, source_path, title, status, created_at, updated_at)
                VALUES (?1, ?2, ?3, 'running', ?4, ?4)
                ON CONFLICT(document_id) DO UPDATE SET
                    source_path = excluded.source_path,
                    title = excluded.title,
                    status = 'running',
                    updated_at = excluded.updated_at
                "#,
                params![document_id, source_path, title, now],
            )?;
        }
        self.get(document_id)?.ok_or_else(|| {
            PodError::Validation(format!("run for {} was not stored", document_id))
        })
    }

    /// Record that `stage` is starting, counting the attempt.
    pub fn begin_stage(&self, document_id: &str, stage: Stage) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE runs SET
                attempts = CASE WHEN current_stage = ?2 THEN attempts + 1 ELSE 1 END,
                current_stage = ?2,
                status = 'running',
                updated_at = ?3
            WHERE document_id = ?1
            "#,
            params![document_id, stage.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record the successful completion of `stage` with its artifacts.
    pub fn complete_stage(&self, document_id: &str, stage: Stage, artifacts: &[String]) -> Result<()> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT artifacts_json FROM runs WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut map: BTreeMap<String, Vec<String>> = existing
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default();
        map.insert(stage.as_str().to_string(), artifacts.to_vec());

        let status = if stage == Stage::Assembled {
            RunStatus::Completed
        } else {
            RunStatus::Running
        };

        conn.execute(
            r#"
            UPDATE runs SET
                completed_stage = ?2,
                current_stage = NULL,
                attempts = 0,
                last_error = NULL,
                status = ?3,
                artifacts_json = ?4,
                updated_at = ?5
            WHERE document_id = ?1
            "#,
            params![
                document_id,
                stage.as_str(),
                status.as_str(),
                serde_json::to_string(&map)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        debug!("Run {} completed stage {}", document_id, stage);
        Ok(())
    }

    /// Set the run status, with an optional error message.
    pub fn set_status(&self, document_id: &str, status: RunStatus, error: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET status = ?2, last_error = ?3, updated_at = ?4 WHERE document_id = ?1",
            params![document_id, status.as_str(), error, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Move the recorded progress back to just before `from`.
    pub fn rewind(&self, document_id: &str, from: Stage) -> Result<()> {
        let completed = Stage::ALL.iter().copied().filter(|s| *s < from).last();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET completed_stage = ?2, updated_at = ?3 WHERE document_id = ?1",
            params![
                document_id,
                completed.map(|s| s.as_str()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, document_id: &str) -> Result<Option<PipelineRun>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                "SELECT * FROM runs WHERE document_id = ?1",
                params![document_id],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// All runs, most recently updated first.
    pub fn list(&self) -> Result<Vec<PipelineRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM runs ORDER BY updated_at DESC")?;
        let runs = stmt.query_map([], row_to_run)?;
        Ok(runs.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<PipelineRun> {
    let completed: Option<String> = row.get("completed_stage")?;
    let current: Option<String> = row.get("current_stage")?;
    let status: String = row.get("status")?;
    let artifacts: String = row.get("artifacts_json")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(PipelineRun {
        document_id: row.get("document_id")?,
        source_path: row.get("source_path")?,
        title: row.get("title")?,
        completed_stage: completed.and_then(|s| s.parse().ok()),
        current_stage: current.and_then(|s| s.parse().ok()),
        status: status.parse().unwrap_or(RunStatus::Failed),
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        artifacts: serde_json::from_str(&artifacts).unwrap_or_default(),
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lifecycle() {
        let store = RunStore::in_memory().unwrap();
        let run = store.start("doc1", "/tmp/paper.pdf", "paper").unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.completed_stage, None);

        store.begin_stage("doc1", Stage::Extracted).unwrap();
        store
            .complete_stage("doc1", Stage::Extracted, &["doc1/document.json".to_string()])
            .unwrap();

        store.begin_stage("doc1", Stage::Analyzed).unwrap();
        store.begin_stage("doc1", Stage::Analyzed).unwrap();
        store
            .set_status("doc1", RunStatus::Failed, Some("quota exceeded"))
            .unwrap();

        let run = store.get("doc1").unwrap().unwrap();
        assert_eq!(run.completed_stage, Some(Stage::Extracted));
        assert_eq!(run.current_stage, Some(Stage::Analyzed));
        assert_eq!(run.attempts, 2);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.last_error.as_deref(), Some("quota exceeded"));
        assert_eq!(run.artifacts["extracted"], vec!["doc1/document.json"]);
    }

    #[test]
    fn test_restart_keeps_progress() {
        let store = RunStore::in_memory().unwrap();
        store.start("doc1", "a.txt", "a").unwrap();
        store.complete_stage("doc1", Stage::Scripted, &[]).unwrap();
        store.set_status("doc1", RunStatus::Paused, None).unwrap();

        let run = store.start("doc1", "a.txt", "a").unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.completed_stage, Some(Stage::Scripted));
    }

    #[test]
    fn test_assembled_completes_run() {
        let store = RunStore::in_memory().unwrap();
        store.start("doc1", "a.txt", "a").unwrap();
        store.complete_stage("doc1", Stage::Assembled, &[]).unwrap();
        assert_eq!(store.get("doc1").unwrap().unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn test_rewind() {
        let store = RunStore::in_memory().unwrap();
        store.start("doc1", "a.txt", "a").unwrap();
        store.complete_stage("doc1", Stage::Assembled, &[]).unwrap();
        store.rewind("doc1", Stage::Scripted).unwrap();
        assert_eq!(
            store.get("doc1").unwrap().unwrap().completed_stage,
            Some(Stage::Analyzed)
        );
        store.rewind("doc1", Stage::Extracted).unwrap();
        assert_eq!(store.get("doc1").unwrap().unwrap().completed_stage, None);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        {
            let store = RunStore::new(&path).unwrap();
            store.start("doc1", "a.txt", "a").unwrap();
            store.complete_stage("doc1", Stage::Analyzed, &[]).unwrap();
        }
        let store = RunStore::new(&path).unwrap();
        let runs = store.list().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].completed_stage, Some(Stage::Analyzed));
    }
}

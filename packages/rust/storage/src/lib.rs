//! libSQL storage for the expense tracker.
//!
//! Two stores live here:
//! - [`Warehouse`]: the project/dataset/table store expense rows are appended to
//! - [`Storage`]: the local run journal recording every pipeline invocation

mod migrations;
mod warehouse;

use std::path::Path;

use chrono::Utc;
use expensetracker_shared::{ExpenseError, Result, RunId, StageName};
use libsql::{Connection, Database, params};

pub use warehouse::{Cell, ColumnDef, Row, SqlType, TableSchema, Warehouse};

/// Outcome of a journaled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ExpenseError::Storage(format!("unknown run status `{other}`"))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields recorded when a run starts.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub run_id: &'a RunId,
    pub image_ref: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub project: &'a str,
}

/// Fields recorded when a run finishes.
#[derive(Debug, Clone)]
pub struct RunOutcome<'a> {
    pub status: RunStatus,
    pub failed_stage: Option<StageName>,
    pub error: Option<String>,
    pub record_id: Option<&'a str>,
    pub state_json: Option<String>,
}

/// One row of the run journal.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub image_ref: String,
    pub provider: String,
    pub model: String,
    pub project: String,
    pub status: RunStatus,
    /// Stage name as stored, e.g. `classification`.
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    pub record_id: Option<String>,
    pub state_json: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Run journal handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create the journal at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExpenseError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ExpenseError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ExpenseError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ExpenseError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Record the start of a run.
    pub async fn insert_run(&self, run: &NewRun<'_>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let id = run.run_id.to_string();
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, image_ref, provider, model, project, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.as_str(),
                    run.image_ref,
                    run.provider,
                    run.model,
                    run.project,
                    RunStatus::Running.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| ExpenseError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Record how a run ended.
    pub async fn finish_run(&self, run_id: &RunId, outcome: &RunOutcome<'_>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let id = run_id.to_string();
        let updated = self
            .conn
            .execute(
                "UPDATE pipeline_runs
                 SET status = ?1, failed_stage = ?2, error = ?3, record_id = ?4,
                     state_json = ?5, finished_at = ?6
                 WHERE id = ?7",
                params![
                    outcome.status.as_str(),
                    outcome.failed_stage.map(|s| s.as_str()),
                    outcome.error.as_deref(),
                    outcome.record_id,
                    outcome.state_json.as_deref(),
                    now.as_str(),
                    id.as_str(),
                ],
            )
            .await
            .map_err(|e| ExpenseError::Storage(e.to_string()))?;

        if updated == 0 {
            return Err(ExpenseError::Storage(format!("run {run_id} not found")));
        }
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let id = run_id.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT id, image_ref, provider, model, project, status, failed_stage, error,
                        record_id, state_json, started_at, finished_at
                 FROM pipeline_runs WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| ExpenseError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ExpenseError::Storage(e.to_string())),
        }
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, image_ref, provider, model, project, status, failed_stage, error,
                        record_id, state_json, started_at, finished_at
                 FROM pipeline_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| ExpenseError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ExpenseError::Storage(e.to_string()))?
        {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let text = |idx: i32| {
        row.get::<String>(idx)
            .map_err(|e| ExpenseError::Storage(e.to_string()))
    };
    Ok(RunRecord {
        id: text(0)?,
        image_ref: text(1)?,
        provider: text(2)?,
        model: text(3)?,
        project: text(4)?,
        status: RunStatus::parse(&text(5)?)?,
        failed_stage: row.get::<String>(6).ok(),
        error: row.get::<String>(7).ok(),
        record_id: row.get::<String>(8).ok(),
        state_json: row.get::<String>(9).ok(),
        started_at: text(10)?,
        finished_at: row.get::<String>(11).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("et_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn new_run(run_id: &RunId) -> NewRun<'_> {
        NewRun {
            run_id,
            image_ref: "receipts/grocery_01.jpg",
            provider: "mock",
            model: "mock-ocr",
            project: "local-expenses",
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("et_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn completed_run_lifecycle() {
        let storage = test_storage().await;
        let run_id = RunId::new();
        storage.insert_run(&new_run(&run_id)).await.expect("insert run");

        let running = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(running.finished_at.is_none());

        storage
            .finish_run(
                &run_id,
                &RunOutcome {
                    status: RunStatus::Completed,
                    failed_stage: None,
                    error: None,
                    record_id: Some("rec-1"),
                    state_json: Some(r#"{"classified_category":"Groceries"}"#.into()),
                },
            )
            .await
            .expect("finish run");

        let done = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.record_id.as_deref(), Some("rec-1"));
        assert!(done.failed_stage.is_none());
        assert!(done.finished_at.is_some());
        assert!(done.state_json.unwrap().contains("Groceries"));
    }

    #[tokio::test]
    async fn failed_run_records_stage() {
        let storage = test_storage().await;
        let run_id = RunId::new();
        storage.insert_run(&new_run(&run_id)).await.unwrap();
        storage
            .finish_run(
                &run_id,
                &RunOutcome {
                    status: RunStatus::Failed,
                    failed_stage: Some(StageName::Classification),
                    error: Some("schema violation".into()),
                    record_id: None,
                    state_json: None,
                },
            )
            .await
            .unwrap();

        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_stage.as_deref(), Some("classification"));
        assert!(run.record_id.is_none());
    }

    #[tokio::test]
    async fn unreadable_journal_row_fails_the_listing() {
        let storage = test_storage().await;
        storage.insert_run(&new_run(&RunId::new())).await.unwrap();
        storage
            .conn
            .execute(
                "INSERT INTO pipeline_runs (id, image_ref, provider, model, project, status, started_at)
                 VALUES ('x', 'r.jpg', 'mock', 'mock-ocr', 'p', 'paused', '2999-01-01T00:00:00Z')",
                (),
            )
            .await
            .unwrap();

        let err = storage.list_runs(10).await.unwrap_err();
        assert!(matches!(err, ExpenseError::Storage(ref m) if m.contains("paused")));
    }

    #[tokio::test]
    async fn finishing_unknown_run_fails() {
        let storage = test_storage().await;
        let result = storage
            .finish_run(
                &RunId::new(),
                &RunOutcome {
                    status: RunStatus::Completed,
                    failed_stage: None,
                    error: None,
                    record_id: None,
                    state_json: None,
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_runs_newest_first() {
        let storage = test_storage().await;
        let first = RunId::new();
        let second = RunId::new();
        storage.insert_run(&new_run(&first)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage.insert_run(&new_run(&second)).await.unwrap();

        let runs = storage.list_runs(10).await.expect("list runs");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.to_string());

        let limited = storage.list_runs(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}

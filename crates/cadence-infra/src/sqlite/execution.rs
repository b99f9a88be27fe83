//! SQLite execution snapshot store.
//!
//! Implements `ExecutionStore` from `cadence-core`. The full `Execution` is
//! stored as a JSON blob; id, workflow, state and timestamps are duplicated
//! into columns for listing.

use cadence_core::repository::execution::ExecutionStore;
use cadence_types::error::RepositoryError;
use cadence_types::execution::{Execution, ExecutionState, ExecutionSummary};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionStore`.
pub struct SqliteExecutionStore {
    pool: DatabasePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct SummaryRow {
    execution_id: String,
    workflow_id: String,
    state: String,
    started_at: String,
    completed_at: Option<String>,
}

impl SummaryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            workflow_id: row.try_get("workflow_id")?,
            state: row.try_get("state")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_summary(self) -> Result<ExecutionSummary, RepositoryError> {
        Ok(ExecutionSummary {
            execution_id: parse_uuid(&self.execution_id)?,
            workflow_id: self.workflow_id,
            state: self
                .state
                .parse::<ExecutionState>()
                .map_err(RepositoryError::Query)?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ---------------------------------------------------------------------------
// ExecutionStore implementation
// ---------------------------------------------------------------------------

impl ExecutionStore for SqliteExecutionStore {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(execution)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO executions
               (execution_id, workflow_id, state, started_at, completed_at, updated_at, snapshot)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                   workflow_id = excluded.workflow_id,
                   state = excluded.state,
                   started_at = excluded.started_at,
                   completed_at = excluded.completed_at,
                   updated_at = excluded.updated_at,
                   snapshot = excluded.snapshot"#,
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.workflow_id)
        .bind(execution.state.as_str())
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(format_datetime(&Utc::now()))
        .bind(&snapshot)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution.execution_id,
            state = %execution.state,
            "saved execution snapshot"
        );
        Ok(())
    }

    async fn load(&self, execution_id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT snapshot FROM executions WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let snapshot: String = row
                    .try_get("snapshot")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let execution = serde_json::from_str(&snapshot).map_err(|e| {
                    RepositoryError::Serialization(format!("invalid snapshot JSON: {e}"))
                })?;
                Ok(Some(execution))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT execution_id, workflow_id, state, started_at, completed_at
               FROM executions
               WHERE (?1 IS NULL OR workflow_id = ?1)
               ORDER BY started_at DESC
               LIMIT ?2"#,
        )
        .bind(workflow_id)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = SummaryRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            summaries.push(r.into_summary()?);
        }
        Ok(summaries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cadence_types::execution::{StepExecution, StepState};
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    async fn test_store() -> SqliteExecutionStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteExecutionStore::new(DatabasePool::new(&url).await.unwrap())
    }

    fn sample(workflow_id: &str, started_ago_secs: i64) -> Execution {
        let mut e = Execution::new(
            workflow_id,
            Uuid::now_v7(),
            HashMap::from([("project".to_string(), json!("billing"))]),
        );
        e.started_at = Utc::now() - Duration::seconds(started_ago_secs);
        e.state = ExecutionState::Running;
        e.documents
            .insert("brief.md".into(), "/tmp/docs/wf/brief.md".into());

        let mut step = StepExecution::pending("brief");
        step.state = StepState::Completed;
        step.started_at = Some(Utc::now());
        step.completed_at = Some(Utc::now());
        step.output = Some(json!({"role": "analyst", "output": "text", "n": 1.5}));
        step.worker = Some("analyst".into());
        step.documents_created = vec!["brief.md".into()];
        e.step_executions.insert("brief".into(), step);
        e.step_executions
            .insert("review".into(), StepExecution::pending("review"));
        e.context
            .insert("step_brief".into(), json!({"output": "text", "tags": [1, null]}));
        e
    }

    #[tokio::test]
    async fn test_save_load_round_trip_is_exact() {
        let store = test_store().await;
        let exec = sample("wf", 0);
        store.save(&exec).await.unwrap();

        let loaded = store.load(&exec.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded, exec);
    }

    #[tokio::test]
    async fn test_round_trip_keeps_inexact_floats() {
        let store = test_store().await;
        let mut exec = sample("wf", 0);
        exec.context.insert(
            "scores".into(),
            json!([0.9749512713538497, 0.20153789807968714, 1.0372794798492697]),
        );
        if let Some(step) = exec.step_executions.get_mut("brief") {
            step.output = Some(json!({"output": "text", "ratio": 0.9050670628910671}));
        }
        store.save(&exec).await.unwrap();

        let loaded = store.load(&exec.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded, exec);
        assert_eq!(
            loaded.step_executions["brief"].output.as_ref().unwrap()["ratio"].as_f64(),
            Some(0.9050670628910671)
        );
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let store = test_store().await;
        let mut exec = sample("wf", 0);
        store.save(&exec).await.unwrap();

        exec.state = ExecutionState::Failed;
        exec.error = Some("boom".into());
        exec.completed_at = Some(Utc::now());
        store.save(&exec).await.unwrap();

        let loaded = store.load(&exec.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, ExecutionState::Failed);
        assert_eq!(loaded, exec);

        let listed = store.list(None, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, ExecutionState::Failed);
        assert_eq!(listed[0].completed_at, exec.completed_at);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let store = test_store().await;
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filter_and_limit() {
        let store = test_store().await;
        let old = sample("alpha", 300);
        let mid = sample("beta", 200);
        let new = sample("alpha", 100);
        for e in [&old, &mid, &new] {
            store.save(e).await.unwrap();
        }

        let all = store.list(None, 10).await.unwrap();
        let ids: Vec<Uuid> = all.iter().map(|s| s.execution_id).collect();
        assert_eq!(ids, vec![new.execution_id, mid.execution_id, old.execution_id]);
        assert_eq!(all[0].started_at, new.started_at);

        let alpha = store.list(Some("alpha"), 10).await.unwrap();
        assert_eq!(alpha.len(), 2);
        assert!(alpha.iter().all(|s| s.workflow_id == "alpha"));

        assert_eq!(store.list(None, 1).await.unwrap().len(), 1);
    }
}

//! Snapshot database connections.
//!
//! Executions are written by one engine at a time but listed and inspected
//! from many places, so the pool keeps a single serialized writer next to a
//! read-only pool. The database runs in WAL mode so readers never block the
//! writer's upserts.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// File name of the snapshot database inside the data directory.
pub const DATABASE_FILE: &str = "cadence.db";

const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader/writer pair over one SQLite file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Connect to `database_url`, creating the file and applying migrations.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        // Readers open read-only, so the schema has to exist first.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(url = database_url, "snapshot database ready");
        Ok(Self { reader, writer })
    }

    /// Open `{data_dir}/cadence.db`, creating the directory when missing.
    pub async fn open(data_dir: &Path) -> Result<Self, sqlx::Error> {
        tokio::fs::create_dir_all(data_dir).await?;
        Self::new(&database_url(data_dir)).await
    }

    /// Close both pools, checkpointing the WAL on the last writer connection.
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

/// Database URL inside a data directory.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}", data_dir.join(DATABASE_FILE).display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_directory_and_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("nested").join("data");

        let pool = DatabasePool::open(&data_dir).await.unwrap();
        assert!(data_dir.join(DATABASE_FILE).exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' \
             ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["executions"]);

        pool.close().await;
    }

    #[tokio::test]
    async fn writer_uses_wal_and_reader_is_read_only() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open(tmp.path()).await.unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let write_via_reader = sqlx::query("DELETE FROM executions")
            .execute(&pool.reader)
            .await;
        assert!(write_via_reader.is_err());
    }

    #[test]
    fn database_url_points_into_data_dir() {
        assert_eq!(
            database_url(Path::new("/tmp/cadence")),
            "sqlite:///tmp/cadence/cadence.db"
        );
    }
}

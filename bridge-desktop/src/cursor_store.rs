//! Processing cursor persisted in SQLite

use async_trait::async_trait;
use bridge_traits::{
    cursor::{CursorStore, ProcessingCursor},
    error::{BridgeError, Result},
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use std::path::Path;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS processing_cursor (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        archive_modified_at TEXT NOT NULL,
        archive_name TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

/// SQLite-backed [`CursorStore`]. Holds a single row.
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Open (or create) the cursor database at `db_path`.
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                core_async::fs::create_dir_all(parent).await?;
            }
        }

        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let store = Self::from_url(&db_url).await?;
        debug!(path = ?db_path, "Opened cursor store");
        Ok(store)
    }

    /// In-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::from_url("sqlite::memory:").await
    }

    async fn from_url(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to create table: {}", e)))?;

        Ok(Self { pool })
    }
}

fn parse_time(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BridgeError::DatabaseError(format!("Invalid {}: {}", column, e)))
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self) -> Result<Option<ProcessingCursor>> {
        let row = sqlx::query(
            "SELECT archive_modified_at, archive_name, updated_at FROM processing_cursor WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to load cursor: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let modified: String = row.get(0);
        let name: String = row.get(1);
        let updated: String = row.get(2);

        Ok(Some(ProcessingCursor {
            archive_modified_at: parse_time("archive_modified_at", &modified)?,
            archive_name: name,
            updated_at: parse_time("updated_at", &updated)?,
        }))
    }

    async fn save(&self, cursor: &ProcessingCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_cursor (id, archive_modified_at, archive_name, updated_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                archive_modified_at = excluded.archive_modified_at,
                archive_name = excluded.archive_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(cursor.archive_modified_at.to_rfc3339())
        .bind(&cursor.archive_name)
        .bind(cursor.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to save cursor: {}", e)))?;

        debug!(archive = %cursor.archive_name, "Stored processing cursor");
        Ok(())
    }
}

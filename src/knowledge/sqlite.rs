//! `SQLite` snapshot backend.
//!
//! This module provides [`SqliteSnapshotStore`], the durable home of
//! [`KnowledgeSnapshot`] documents.

#![allow(clippy::missing_errors_doc)]

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use super::KnowledgeSnapshot;
use crate::error::StoreError;
use crate::traits::SnapshotStore;

/// Snapshots retained after each save.
pub const DEFAULT_RETAINED_SNAPSHOTS: u32 = 10;

/// `SQLite` snapshot storage.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    retain: u32,
}

impl SqliteSnapshotStore {
    /// Open (or create) a snapshot database file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the connection fails.
    pub async fn new(database_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::ConnectionFailed {
                message: format!("Failed to create database directory: {e}"),
            })?;
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
                .map_err(|e| StoreError::ConnectionFailed {
                    message: format!("Invalid database path: {e}"),
                })?
                .journal_mode(SqliteJournalMode::Wal)
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                message: format!("Failed to connect to database: {e}"),
            })?;

        let store = Self {
            pool,
            retain: DEFAULT_RETAINED_SNAPSHOTS,
        };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory snapshot database for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the connection fails.
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StoreError::ConnectionFailed {
                message: format!("Invalid memory database options: {e}"),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                message: format!("Failed to create in-memory database: {e}"),
            })?;

        let store = Self {
            pool,
            retain: DEFAULT_RETAINED_SNAPSHOTS,
        };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Keep only the newest `retain` snapshots after each save.
    #[must_use]
    pub fn with_retention(mut self, retain: u32) -> Self {
        self.retain = retain.max(1);
        self
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema_001 = include_str!("../../migrations/001_knowledge_snapshots.sql");
        sqlx::query(schema_001)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed {
                version: "001".to_string(),
                message: format!("Failed to run migration 001: {e}"),
            })?;
        Ok(())
    }

    /// Number of stored snapshots.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM knowledge_snapshots")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_error(&e))?;
        let n: i64 = row.try_get("n").map_err(|e| query_error(&e))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    #[cfg(test)]
    async fn insert_raw(&self, document: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO knowledge_snapshots (id, revision, schema_version, document, created_at)
            VALUES (?, 0, 1, ?, ?)
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document)
        .bind(chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error(&e))?;
        Ok(())
    }
}

fn query_error(e: &sqlx::Error) -> StoreError {
    StoreError::QueryFailed {
        message: e.to_string(),
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &KnowledgeSnapshot) -> Result<(), StoreError> {
        let document =
            serde_json::to_string(snapshot).map_err(|e| StoreError::Serialization {
                key: "snapshot".to_string(),
                message: e.to_string(),
            })?;

        sqlx::query(
            r"
            INSERT INTO knowledge_snapshots (id, revision, schema_version, document, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(i64::try_from(snapshot.revision).unwrap_or(i64::MAX))
        .bind(i64::from(snapshot.schema_version))
        .bind(document)
        .bind(snapshot.taken_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error(&e))?;

        self.prune(self.retain).await?;

        tracing::debug!(
            revision = snapshot.revision,
            entries = snapshot.entries.len(),
            "Knowledge snapshot saved"
        );
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<KnowledgeSnapshot>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT document FROM knowledge_snapshots
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            ",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error(&e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let document: String = row.try_get("document").map_err(|e| query_error(&e))?;
        serde_json::from_str(&document)
            .map(Some)
            .map_err(|e| StoreError::PersistenceUnavailable {
                message: format!("latest snapshot is corrupt: {e}"),
            })
    }

    async fn prune(&self, keep: u32) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM knowledge_snapshots
            WHERE id NOT IN (
                SELECT id FROM knowledge_snapshots
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?
            )
            ",
        )
        .bind(i64::from(keep.max(1)))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error(&e))?;
        Ok(result.rows_affected())
    }
}

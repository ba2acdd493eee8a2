//! SQLite run store implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params, params_from_iter};
use tokio_rusqlite::Connection;
use tracing::debug;

use flightdeck_engine::{CreateOutcome, Run, RunId, RunStatus, RunStore, StoreError};

use crate::schema::init_schema;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// SQLite-based run store.
pub struct SqliteRunStore {
    conn: Connection,
}

impl SqliteRunStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::with_connection(conn).await
    }

    /// Create a new file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| Ok(init_schema(conn)?))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { conn })
    }
}

/// Fixed-width timestamps so text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode(run: &Run) -> Result<String, StoreError> {
    serde_json::to_string(run).map_err(|e| StoreError::Backend(format!("Failed to serialize run: {}", e)))
}

fn decode(payload: &str) -> Result<Run, StoreError> {
    serde_json::from_str(payload).map_err(|e| StoreError::Backend(format!("Failed to deserialize run: {}", e)))
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, run: &Run) -> Result<CreateOutcome, StoreError> {
        let payload = encode(run)?;
        let id = run.id.to_string();
        let flight_type = run.flight_type.clone();
        let status = run.status.as_str();
        let parent_id = run.parent_id.as_ref().map(|p| p.to_string());
        let submitted_at = timestamp(&run.submitted_at);
        let updated_at = timestamp(&run.updated_at);

        let existing = self
            .conn
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO runs (id, flight_type, status, parent_id, submitted_at, updated_at, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![id, flight_type, status, parent_id, submitted_at, updated_at, payload],
                )?;
                if inserted == 1 {
                    return Ok(None);
                }

                let payload: String =
                    conn.query_row("SELECT payload FROM runs WHERE id = ?1", [&id], |row| row.get(0))?;
                Ok(Some(payload))
            })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match existing {
            None => {
                debug!("Created run '{}'", run.id);
                Ok(CreateOutcome::Created)
            }
            Some(payload) => Ok(CreateOutcome::Existing(decode(&payload)?)),
        }
    }

    async fn load_run(&self, id: &RunId) -> Result<Option<Run>, StoreError> {
        let id = id.to_string();
        let payload = self
            .conn
            .call(move |conn| {
                let payload = conn
                    .query_row("SELECT payload FROM runs WHERE id = ?1", [&id], |row| row.get::<_, String>(0))
                    .optional()?;
                Ok(payload)
            })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        payload.as_deref().map(decode).transpose()
    }

    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let payload = encode(run)?;
        let id = run.id.to_string();
        let status = run.status.as_str();
        let updated_at = timestamp(&run.updated_at);

        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE runs SET status = ?2, updated_at = ?3, payload = ?4 WHERE id = ?1",
                    params![id, status, updated_at, payload],
                )?;
                Ok(updated)
            })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if updated == 0 {
            return Err(StoreError::NotFound(run.id.clone()));
        }
        debug!("Saved run '{}' ({})", run.id, run.status);
        Ok(())
    }

    async fn list_runs_by_status(&self, statuses: &[RunStatus]) -> Result<Vec<Run>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "SELECT payload FROM runs WHERE status IN ({}) ORDER BY submitted_at ASC",
            placeholders
        );

        let payloads = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(names.iter()), |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        payloads.iter().map(|p| decode(p)).collect()
    }
}

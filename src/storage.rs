//! Session persistence. Exchanges (one user message and the reply it
//! produced) are recorded per session; the session endpoint reads them back
//! as a summary.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::error::{AttacheError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub exchanges: i64,
    pub last_message: Option<String>,
    pub last_activity: Option<String>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn record_exchange(&self, session_id: &str, message: &str, reply: &str) -> Result<()>;

    /// Summary of a session, or `None` when nothing was recorded under the
    /// given id.
    async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>>;

    /// Cheap liveness check for the readiness probe.
    async fn ping(&self) -> Result<()>;
}

pub struct SqlMessageStore {
    pool: SqlitePool,
}

impl SqlMessageStore {
    const INIT_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS exchanges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            message TEXT NOT NULL,
            reply TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
    "#;

    const INIT_INDEX: &'static str =
        "CREATE INDEX IF NOT EXISTS idx_exchanges_session ON exchanges (session_id)";

    pub async fn connect(connection_url: impl AsRef<str>) -> Result<Self> {
        // One connection keeps `sqlite::memory:` pointing at a single
        // database instead of a fresh one per checkout.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(connection_url.as_ref())
            .await
            .map_err(|err| {
                AttacheError::Storage(format!(
                    "failed connecting to `{}`: {err}",
                    connection_url.as_ref()
                ))
            })?;

        for statement in [Self::INIT_TABLE, Self::INIT_INDEX] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|err| {
                    AttacheError::Storage(format!("failed initializing schema: {err}"))
                })?;
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl MessageStore for SqlMessageStore {
    async fn record_exchange(&self, session_id: &str, message: &str, reply: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO exchanges (session_id, message, reply, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(message)
        .bind(reply)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|err| AttacheError::Storage(format!("failed recording exchange: {err}")))
    }

    async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS exchanges, MAX(created_at) AS last_activity \
             FROM exchanges WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| AttacheError::Storage(format!("failed reading session: {err}")))?;

        let exchanges: i64 = row
            .try_get("exchanges")
            .map_err(|err| AttacheError::Storage(format!("failed decoding count: {err}")))?;
        if exchanges == 0 {
            return Ok(None);
        }
        let last_activity: Option<String> = row
            .try_get("last_activity")
            .map_err(|err| AttacheError::Storage(format!("failed decoding timestamp: {err}")))?;

        let last_message: Option<String> = sqlx::query(
            "SELECT message FROM exchanges WHERE session_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| AttacheError::Storage(format!("failed reading last message: {err}")))?
        .map(|row| {
            row.try_get("message")
                .map_err(|err| AttacheError::Storage(format!("failed decoding message: {err}")))
        })
        .transpose()?;

        Ok(Some(SessionSummary {
            session_id: session_id.to_string(),
            exchanges,
            last_message,
            last_activity,
        }))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| AttacheError::DependencyUnavailable(format!("database: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_summarizes_exchanges() {
        let store = SqlMessageStore::connect("sqlite::memory:").await.unwrap();

        store
            .record_exchange("s1", "schedule a meeting", "done")
            .await
            .unwrap();
        store
            .record_exchange("s1", "and a reminder", "created")
            .await
            .unwrap();
        store.record_exchange("s2", "unrelated", "ok").await.unwrap();

        let summary = store.session_summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.exchanges, 2);
        assert_eq!(summary.last_message.as_deref(), Some("and a reminder"));
        assert!(summary.last_activity.is_some());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let store = SqlMessageStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.session_summary("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ping_succeeds_on_live_pool() {
        let store = SqlMessageStore::connect("sqlite::memory:").await.unwrap();
        store.ping().await.unwrap();
    }
}

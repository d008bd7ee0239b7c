use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use relay_core::UserSession;
use sqlx::{Row, SqlitePool};

use crate::ledger::EventLedger;

pub trait SessionRepository: Send + Sync {
    async fn load_session(&self, user_id: &str) -> Result<Option<UserSession>>;
    async fn upsert_session(&self, session: &UserSession) -> Result<()>;
    async fn delete_session(&self, user_id: &str) -> Result<()>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn record_event(
        &self,
        user_id: &str,
        event_id: &str,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<bool>;
    async fn forget_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, UserSession>>>,
    events: EventLedger,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl SessionRepository for MemoryStore {
    async fn load_session(&self, user_id: &str) -> Result<Option<UserSession>> {
        Ok(self.sessions.read().get(user_id).cloned())
    }

    async fn upsert_session(&self, session: &UserSession) -> Result<()> {
        self.sessions
            .write()
            .insert(session.user_id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, user_id: &str) -> Result<()> {
        self.sessions.write().remove(user_id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0_u64;
        self.sessions.write().retain(|_, value| {
            let keep = !value.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }

    async fn record_event(
        &self,
        user_id: &str,
        event_id: &str,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.events.record(user_id, event_id, now, not_before))
    }

    async fn forget_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(self.events.forget_before(cutoff))
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_sessions (
              user_id TEXT PRIMARY KEY,
              topic TEXT,
              step INTEGER NOT NULL,
              history_json TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              expires_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_events (
              user_id TEXT NOT NULL,
              event_id TEXT NOT NULL,
              seen_at TEXT NOT NULL,
              PRIMARY KEY (user_id, event_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl SessionRepository for SqliteStore {
    async fn load_session(&self, user_id: &str) -> Result<Option<UserSession>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, topic, step, history_json, updated_at, expires_at
            FROM user_sessions
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let history_json: String = row.get("history_json");
        let history = serde_json::from_str(&history_json).unwrap_or_default();
        let step: i64 = row.get("step");

        let session = UserSession {
            user_id: row.get("user_id"),
            topic: row.get("topic"),
            step: usize::try_from(step).unwrap_or_default(),
            history,
            updated_at: row
                .get::<String, _>("updated_at")
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            // An unreadable expiry is treated as already expired.
            expires_at: row
                .get::<String, _>("expires_at")
                .parse()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        };

        Ok(Some(session))
    }

    async fn upsert_session(&self, session: &UserSession) -> Result<()> {
        let history_json = serde_json::to_string(&session.history)?;
        let step = i64::try_from(session.step).context("session step out of range")?;

        sqlx::query(
            r#"
            INSERT INTO user_sessions (user_id, topic, step, history_json, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
              topic=excluded.topic,
              step=excluded.step,
              history_json=excluded.history_json,
              updated_at=excluded.updated_at,
              expires_at=excluded.expires_at
            "#,
        )
        .bind(&session.user_id)
        .bind(&session.topic)
        .bind(step)
        .bind(history_json)
        .bind(session.updated_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_session(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_sessions WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at <= ?1")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn record_event(
        &self,
        user_id: &str,
        event_id: &str,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<bool> {
        // A stale row is refreshed and counts as a first delivery.
        let result = sqlx::query(
            r#"
            INSERT INTO seen_events (user_id, event_id, seen_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, event_id) DO UPDATE SET
              seen_at=excluded.seen_at
            WHERE seen_events.seen_at < ?4
            "#,
        )
        .bind(user_id)
        .bind(event_id)
        .bind(event_timestamp(now))
        .bind(event_timestamp(not_before))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn forget_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM seen_events WHERE seen_at < ?1")
            .bind(event_timestamp(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn event_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl SessionRepository for Store {
    async fn load_session(&self, user_id: &str) -> Result<Option<UserSession>> {
        match self {
            Store::Memory(store) => store.load_session(user_id).await,
            Store::Sqlite(store) => store.load_session(user_id).await,
        }
    }

    async fn upsert_session(&self, session: &UserSession) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_session(session).await,
            Store::Sqlite(store) => store.upsert_session(session).await,
        }
    }

    async fn delete_session(&self, user_id: &str) -> Result<()> {
        match self {
            Store::Memory(store) => store.delete_session(user_id).await,
            Store::Sqlite(store) => store.delete_session(user_id).await,
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self {
            Store::Memory(store) => store.purge_expired(now).await,
            Store::Sqlite(store) => store.purge_expired(now).await,
        }
    }

    async fn record_event(
        &self,
        user_id: &str,
        event_id: &str,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<bool> {
        match self {
            Store::Memory(store) => store.record_event(user_id, event_id, now, not_before).await,
            Store::Sqlite(store) => store.record_event(user_id, event_id, now, not_before).await,
        }
    }

    async fn forget_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        match self {
            Store::Memory(store) => store.forget_events_before(cutoff).await,
            Store::Sqlite(store) => store.forget_events_before(cutoff).await,
        }
    }
}

mod ledger;
mod locks;
mod repository;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_core::{ErrorKind, HistoryEntry, UserSession};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

pub use ledger::EventLedger;
pub use locks::UserLocks;
pub use repository::{MemoryStore, SessionRepository, SqliteStore, Store};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session for user {0}")]
    NotFound(String),
    #[error("session backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Backend(_) => ErrorKind::Transport,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub history_limit: usize,
    pub event_window: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            history_limit: 10,
            event_window: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct SessionStore<R>
where
    R: SessionRepository,
{
    repo: Arc<R>,
    locks: UserLocks,
    settings: SessionSettings,
}

impl<R> SessionStore<R>
where
    R: SessionRepository,
{
    pub fn new(repo: Arc<R>, settings: SessionSettings) -> Self {
        Self {
            repo,
            locks: UserLocks::new(),
            settings,
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub async fn open(&self, user_id: &str) -> SessionHandle<'_, R> {
        let guard = self.locks.acquire(user_id).await;
        SessionHandle {
            store: self,
            user_id: user_id.to_string(),
            _guard: guard,
        }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserSession>, SessionError> {
        self.open(user_id).await.get().await
    }

    pub async fn start(&self, user_id: &str, topic: &str) -> Result<UserSession, SessionError> {
        self.open(user_id).await.start(topic).await
    }

    pub async fn advance(&self, user_id: &str) -> Result<UserSession, SessionError> {
        self.open(user_id).await.advance().await
    }

    pub async fn clear(&self, user_id: &str) -> Result<(), SessionError> {
        self.open(user_id).await.clear().await
    }

    pub async fn purge_expired(&self) -> Result<u64, SessionError> {
        let now = Utc::now();
        let forgotten = self.repo.forget_events_before(now - self.event_window()).await?;
        debug!(forgotten, "event ids aged out");
        Ok(self.repo.purge_expired(now).await?)
    }

    fn idle(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(30))
    }

    fn event_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.event_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1))
    }
}

pub struct SessionHandle<'a, R>
where
    R: SessionRepository,
{
    store: &'a SessionStore<R>,
    user_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl<R> SessionHandle<'_, R>
where
    R: SessionRepository,
{
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// `false` when this event id was already processed for the user. The
    /// record lives in the repository, so it outlasts a restart whenever the
    /// sessions do.
    pub async fn first_delivery(&self, event_id: &str) -> Result<bool, SessionError> {
        if event_id.is_empty() {
            return Ok(true);
        }
        let now = Utc::now();
        let not_before = now - self.store.event_window();
        Ok(self
            .store
            .repo
            .record_event(&self.user_id, event_id, now, not_before)
            .await?)
    }

    pub async fn get(&self) -> Result<Option<UserSession>, SessionError> {
        let Some(session) = self.store.repo.load_session(&self.user_id).await? else {
            return Ok(None);
        };

        if session.is_expired(Utc::now()) {
            debug!(user_id = %self.user_id, "session expired");
            self.store.repo.delete_session(&self.user_id).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub async fn start(&self, topic: &str) -> Result<UserSession, SessionError> {
        let idle = self.store.idle();
        let mut session = self
            .get()
            .await?
            .unwrap_or_else(|| UserSession::new(self.user_id.clone(), idle));

        session.topic = Some(topic.to_string());
        session.step = 0;
        session.touch(idle);
        self.store.repo.upsert_session(&session).await?;
        Ok(session)
    }

    pub async fn advance(&self) -> Result<UserSession, SessionError> {
        let mut session = self
            .get()
            .await?
            .filter(|session| session.topic.is_some())
            .ok_or_else(|| SessionError::NotFound(self.user_id.clone()))?;

        session.step += 1;
        session.touch(self.store.idle());
        self.store.repo.upsert_session(&session).await?;
        Ok(session)
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.store.repo.delete_session(&self.user_id).await?;
        Ok(())
    }

    pub async fn push_history(
        &self,
        entries: Vec<HistoryEntry>,
    ) -> Result<UserSession, SessionError> {
        let idle = self.store.idle();
        let mut session = self
            .get()
            .await?
            .unwrap_or_else(|| UserSession::new(self.user_id.clone(), idle));

        for entry in entries {
            session.push_history(entry, self.store.settings.history_limit);
        }
        session.touch(idle);
        self.store.repo.upsert_session(&session).await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Role;

    fn store() -> SessionStore<MemoryStore> {
        SessionStore::new(
            Arc::new(MemoryStore::new()),
            SessionSettings {
                idle_timeout: Duration::from_secs(60),
                history_limit: 4,
                ..SessionSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn start_then_advance_moves_step() {
        let store = store();
        let started = store.start("U1", "talk").await.unwrap();
        assert_eq!(started.step, 0);
        assert_eq!(started.active_topic(), Some("talk"));

        let advanced = store.advance("U1").await.unwrap();
        assert_eq!(advanced.step, 1);
    }

    #[tokio::test]
    async fn advance_without_session_is_not_found() {
        let err = store().advance("ghost").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn advance_without_topic_is_not_found() {
        let store = store();
        let handle = store.open("U1").await;
        handle
            .push_history(vec![HistoryEntry {
                role: Role::User,
                content: "hi".to_string(),
            }])
            .await
            .unwrap();
        assert!(matches!(
            handle.advance().await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn restart_resets_step_and_keeps_history() {
        let store = store();
        let handle = store.open("U1").await;
        handle.start("talk").await.unwrap();
        handle.advance().await.unwrap();
        handle
            .push_history(vec![HistoryEntry {
                role: Role::User,
                content: "hi".to_string(),
            }])
            .await
            .unwrap();

        let restarted = handle.start("talk").await.unwrap();
        assert_eq!(restarted.step, 0);
        assert_eq!(restarted.history.len(), 1);
    }

    #[tokio::test]
    async fn clear_destroys_session() {
        let store = store();
        store.start("U1", "relax").await.unwrap();
        store.clear("U1").await.unwrap();
        assert!(store.get("U1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_reads_as_absent() {
        let repo = Arc::new(MemoryStore::new());
        let store = SessionStore::new(repo.clone(), SessionSettings::default());
        let mut session = UserSession::new("U1", chrono::Duration::minutes(1));
        session.topic = Some("talk".to_string());
        session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        repo.upsert_session(&session).await.unwrap();

        assert!(store.get("U1").await.unwrap().is_none());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let store = store();
        let handle = store.open("U1").await;
        for index in 0..6 {
            handle
                .push_history(vec![HistoryEntry {
                    role: Role::User,
                    content: format!("m{index}"),
                }])
                .await
                .unwrap();
        }
        let session = handle.get().await.unwrap().unwrap();
        assert_eq!(session.history.len(), 4);
        assert_eq!(session.history.front().unwrap().content, "m2");
    }

    #[tokio::test]
    async fn concurrent_advances_for_one_user_are_not_lost() {
        let store = store();
        store.start("U1", "talk").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.advance("U1").await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.get("U1").await.unwrap().unwrap().step, 8);
    }

    #[tokio::test]
    async fn duplicate_event_is_reported_once() {
        let store = store();
        let handle = store.open("U1").await;
        assert!(handle.first_delivery("evt-1").await.unwrap());
        assert!(!handle.first_delivery("evt-1").await.unwrap());
        assert!(handle.first_delivery("").await.unwrap());
        assert!(handle.first_delivery("").await.unwrap());
    }

    #[tokio::test]
    async fn redelivery_after_restart_is_still_a_duplicate() {
        let path = std::env::temp_dir().join(format!(
            "relay-sessions-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let url = format!("sqlite://{}?mode=rwc", path.display());

        {
            let store = SessionStore::new(
                Arc::new(Store::sqlite(&url).await.unwrap()),
                SessionSettings::default(),
            );
            let handle = store.open("U1").await;
            handle.start("talk").await.unwrap();
            assert!(handle.first_delivery("evt-answer").await.unwrap());
            handle.advance().await.unwrap();
        }

        let restarted = SessionStore::new(
            Arc::new(Store::sqlite(&url).await.unwrap()),
            SessionSettings::default(),
        );
        let handle = restarted.open("U1").await;
        assert!(!handle.first_delivery("evt-answer").await.unwrap());
        assert_eq!(handle.get().await.unwrap().unwrap().step, 1);

        drop(handle);
        let _ = std::fs::remove_file(&path);
    }
}

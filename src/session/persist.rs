//! Session persistence.
//!
//! A key-value store keyed by composite session id holds everything
//! needed to reconstruct a session and its message-manager snapshot.
//! Soft-deleted entries move to a history table kept for a bounded time.

use crate::error::{PersistError, Result};
use crate::message::prompt::PendingContextPrompt;
use crate::message::ManagerSnapshot;
use crate::session::{SessionLifecycle, SessionMeta, WorktreeInfo};
use crate::{PostId, SessionKey};
use async_trait::async_trait;
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");

/// Everything persisted for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub platform_id: String,
    pub thread_id: String,
    pub claude_session_id: Option<String>,
    pub started_by: String,
    pub started_by_display_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub session_number: u64,
    pub working_dir: std::path::PathBuf,
    pub plan_approved: bool,
    pub session_allowed_users: Vec<String>,
    pub force_interactive_permissions: bool,
    pub session_start_post_id: Option<PostId>,
    pub tasks_post_id: Option<PostId>,
    pub last_tasks_content: String,
    pub tasks_completed: bool,
    pub tasks_minimized: bool,
    pub worktree_info: Option<WorktreeInfo>,
    pub is_worktree_owner: Option<bool>,
    pub pending_worktree_prompt: Option<bool>,
    pub worktree_prompt_disabled: Option<bool>,
    pub queued_prompt: Option<String>,
    #[serde(default)]
    pub queued_files: Vec<String>,
    pub first_prompt: Option<String>,
    pub pending_context_prompt: Option<PendingContextPrompt>,
    pub needs_context_prompt_on_next_message: Option<bool>,
    pub lifecycle_post_id: Option<PostId>,
    pub is_paused: bool,
    pub session_title: Option<String>,
    pub session_description: Option<String>,
    #[serde(default)]
    pub session_tags: Vec<String>,
    pub pull_request_url: Option<String>,
    pub message_count: u64,
    pub resume_fail_count: u32,
}

impl PersistedSession {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.platform_id, &self.thread_id)
    }

    pub fn composite_id(&self) -> String {
        self.key().composite()
    }

    /// Assemble a record from live session state plus the manager snapshot.
    pub fn from_parts(key: &SessionKey, meta: &SessionMeta, snapshot: &ManagerSnapshot) -> Self {
        Self {
            platform_id: key.platform_id.clone(),
            thread_id: key.thread_id.clone(),
            claude_session_id: meta.claude_session_id.clone(),
            started_by: meta.owner.clone(),
            started_by_display_name: meta.owner_display.clone(),
            started_at: meta.started_at,
            last_activity_at: meta.last_activity_at,
            session_number: meta.session_number,
            working_dir: meta.working_dir.clone(),
            plan_approved: meta.plan_approved,
            session_allowed_users: meta.allowed_users.iter().cloned().collect(),
            force_interactive_permissions: meta.force_interactive,
            session_start_post_id: meta.session_start_post_id.clone(),
            tasks_post_id: snapshot.tasks_post_id.clone(),
            last_tasks_content: snapshot.last_tasks_content.clone(),
            tasks_completed: snapshot.tasks_completed,
            tasks_minimized: snapshot.tasks_minimized,
            worktree_info: meta.worktree.clone(),
            is_worktree_owner: meta.worktree.as_ref().map(|w| w.is_owner),
            pending_worktree_prompt: Some(meta.pending_worktree_prompt),
            worktree_prompt_disabled: Some(meta.worktree_prompt_disabled),
            queued_prompt: meta.queued_prompt.clone(),
            queued_files: meta.queued_files.clone(),
            first_prompt: meta.first_prompt.clone(),
            pending_context_prompt: snapshot.pending_context_prompt.clone(),
            needs_context_prompt_on_next_message: Some(meta.needs_context_prompt),
            lifecycle_post_id: meta.lifecycle_post_id.clone(),
            is_paused: meta.lifecycle == SessionLifecycle::Paused,
            session_title: meta.title.clone(),
            session_description: meta.description.clone(),
            session_tags: meta.tags.clone(),
            pull_request_url: meta.pull_request_url.clone(),
            message_count: meta.message_count,
            resume_fail_count: meta.resume_fail_count,
        }
    }

    /// Rebuild live session metadata and the manager snapshot.
    pub fn into_parts(self) -> (SessionMeta, ManagerSnapshot) {
        let mut meta = SessionMeta::new(
            &self.started_by,
            &self.started_by_display_name,
            self.working_dir.clone(),
        );
        meta.started_at = self.started_at;
        meta.last_activity_at = self.last_activity_at;
        meta.lifecycle = if self.is_paused {
            SessionLifecycle::Paused
        } else {
            SessionLifecycle::Active
        };
        meta.allowed_users.extend(self.session_allowed_users);
        meta.allowed_users.insert(meta.owner.clone());
        meta.claude_session_id = self.claude_session_id;
        meta.session_number = self.session_number;
        meta.plan_approved = self.plan_approved;
        meta.force_interactive = self.force_interactive_permissions;
        meta.session_start_post_id = self.session_start_post_id;
        meta.worktree = self.worktree_info;
        meta.pending_worktree_prompt = self.pending_worktree_prompt.unwrap_or(false);
        meta.worktree_prompt_disabled = self.worktree_prompt_disabled.unwrap_or(false);
        meta.queued_prompt = self.queued_prompt;
        meta.queued_files = self.queued_files;
        meta.first_prompt = self.first_prompt;
        meta.needs_context_prompt = self.needs_context_prompt_on_next_message.unwrap_or(false);
        meta.lifecycle_post_id = self.lifecycle_post_id;
        meta.title = self.session_title;
        meta.description = self.session_description;
        meta.tags = self.session_tags;
        meta.pull_request_url = self.pull_request_url;
        meta.message_count = self.message_count;
        meta.resume_fail_count = self.resume_fail_count;

        let snapshot = ManagerSnapshot {
            tasks_post_id: self.tasks_post_id,
            last_tasks_content: self.last_tasks_content,
            tasks_completed: self.tasks_completed,
            tasks_minimized: self.tasks_minimized,
            pending_context_prompt: self.pending_context_prompt,
        };
        (meta, snapshot)
    }

    /// Whether any persisted post id matches.
    fn references_post(&self, post_id: &str) -> bool {
        [
            self.session_start_post_id.as_deref(),
            self.tasks_post_id.as_deref(),
            self.lifecycle_post_id.as_deref(),
            self.pending_context_prompt.as_ref().map(|p| p.post_id.as_str()),
        ]
        .into_iter()
        .flatten()
        .any(|id| id == post_id)
    }
}

/// A soft-deleted entry in the history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryRecord {
    deleted_at: chrono::DateTime<chrono::Utc>,
    session: PersistedSession,
}

/// Persistence contract consumed by the session manager.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn save(&self, session: &PersistedSession) -> Result<()>;

    /// Move an entry to history. Unknown ids are a no-op.
    async fn soft_delete(&self, composite_id: &str) -> Result<()>;

    async fn load(&self) -> Result<HashMap<String, PersistedSession>>;

    async fn find_by_post_id(&self, post_id: &str) -> Result<Option<PersistedSession>>;

    async fn find_by_thread(
        &self,
        platform_id: &str,
        thread_id: &str,
    ) -> Result<Option<PersistedSession>>;

    /// Soft-delete live entries idle past `max_age`. Returns how many.
    async fn clean_stale(&self, max_age: std::time::Duration) -> Result<usize>;

    /// Drop history entries older than `max_age_days`. Returns how many.
    async fn clean_history(&self, max_age_days: u64) -> Result<usize>;
}

/// redb-backed store: one live table, one history table, serde_json
/// values.
pub struct RedbSessionStore {
    db: Arc<redb::Database>,
}

impl RedbSessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = redb::Database::create(path)
            .map_err(|e| PersistError::Open(e.to_string()))?;
        // Make sure both tables exist before the first read.
        let tx = db
            .begin_write()
            .map_err(|e| PersistError::Storage(e.into()))?;
        {
            tx.open_table(SESSIONS)
                .map_err(|e| PersistError::Storage(e.into()))?;
            tx.open_table(HISTORY)
                .map_err(|e| PersistError::Storage(e.into()))?;
        }
        tx.commit().map_err(|e| PersistError::Storage(e.into()))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run a blocking redb operation off the async executor.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&redb::Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| PersistError::Other(e.into()))?
    }

    fn load_all(db: &redb::Database) -> Result<HashMap<String, PersistedSession>> {
        let tx = db
            .begin_read()
            .map_err(|e| PersistError::Storage(e.into()))?;
        let table = tx
            .open_table(SESSIONS)
            .map_err(|e| PersistError::Storage(e.into()))?;
        let mut out = HashMap::new();
        for entry in table.iter().map_err(|e| PersistError::Storage(e.into()))? {
            let (key, value) = entry.map_err(|e| PersistError::Storage(e.into()))?;
            match serde_json::from_slice::<PersistedSession>(value.value()) {
                Ok(session) => {
                    out.insert(key.value().to_string(), session);
                }
                Err(error) => {
                    tracing::warn!(%error, key = key.value(), "skipping undecodable session record");
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for RedbSessionStore {
    async fn save(&self, session: &PersistedSession) -> Result<()> {
        let composite = session.composite_id();
        let bytes = serde_json::to_vec(session).map_err(PersistError::Encode)?;
        self.blocking(move |db| {
            let tx = db
                .begin_write()
                .map_err(|e| PersistError::Storage(e.into()))?;
            {
                let mut table = tx
                    .open_table(SESSIONS)
                    .map_err(|e| PersistError::Storage(e.into()))?;
                table
                    .insert(composite.as_str(), bytes.as_slice())
                    .map_err(|e| PersistError::Storage(e.into()))?;
            }
            tx.commit().map_err(|e| PersistError::Storage(e.into()))?;
            Ok(())
        })
        .await
    }

    async fn soft_delete(&self, composite_id: &str) -> Result<()> {
        let composite = composite_id.to_string();
        self.blocking(move |db| {
            let tx = db
                .begin_write()
                .map_err(|e| PersistError::Storage(e.into()))?;
            {
                let mut sessions = tx
                    .open_table(SESSIONS)
                    .map_err(|e| PersistError::Storage(e.into()))?;
                let removed = sessions
                    .remove(composite.as_str())
                    .map_err(|e| PersistError::Storage(e.into()))?
                    .map(|guard| guard.value().to_vec());
                drop(sessions);
                if let Some(bytes) = removed {
                    if let Ok(session) = serde_json::from_slice::<PersistedSession>(&bytes) {
                        let record = HistoryRecord {
                            deleted_at: chrono::Utc::now(),
                            session,
                        };
                        let encoded =
                            serde_json::to_vec(&record).map_err(PersistError::Encode)?;
                        let mut history = tx
                            .open_table(HISTORY)
                            .map_err(|e| PersistError::Storage(e.into()))?;
                        history
                            .insert(composite.as_str(), encoded.as_slice())
                            .map_err(|e| PersistError::Storage(e.into()))?;
                    }
                }
            }
            tx.commit().map_err(|e| PersistError::Storage(e.into()))?;
            Ok(())
        })
        .await
    }

    async fn load(&self) -> Result<HashMap<String, PersistedSession>> {
        self.blocking(Self::load_all).await
    }

    async fn find_by_post_id(&self, post_id: &str) -> Result<Option<PersistedSession>> {
        let post_id = post_id.to_string();
        self.blocking(move |db| {
            Ok(Self::load_all(db)?
                .into_values()
                .find(|s| s.references_post(&post_id)))
        })
        .await
    }

    async fn find_by_thread(
        &self,
        platform_id: &str,
        thread_id: &str,
    ) -> Result<Option<PersistedSession>> {
        let composite = SessionKey::new(platform_id, thread_id).composite();
        self.blocking(move |db| {
            let tx = db
                .begin_read()
                .map_err(|e| PersistError::Storage(e.into()))?;
            let table = tx
                .open_table(SESSIONS)
                .map_err(|e| PersistError::Storage(e.into()))?;
            let found = table
                .get(composite.as_str())
                .map_err(|e| PersistError::Storage(e.into()))?
                .and_then(|guard| serde_json::from_slice(guard.value()).ok());
            Ok(found)
        })
        .await
    }

    async fn clean_stale(&self, max_age: std::time::Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::days(365));
        let stale: Vec<String> = self
            .load()
            .await?
            .into_iter()
            .filter(|(_, s)| s.last_activity_at < cutoff)
            .map(|(id, _)| id)
            .collect();
        let count = stale.len();
        for id in stale {
            self.soft_delete(&id).await?;
        }
        Ok(count)
    }

    async fn clean_history(&self, max_age_days: u64) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(max_age_days as i64);
        self.blocking(move |db| {
            let tx = db
                .begin_write()
                .map_err(|e| PersistError::Storage(e.into()))?;
            let removed;
            {
                let mut history = tx
                    .open_table(HISTORY)
                    .map_err(|e| PersistError::Storage(e.into()))?;
                let mut expired = Vec::new();
                for entry in history.iter().map_err(|e| PersistError::Storage(e.into()))? {
                    let (key, value) = entry.map_err(|e| PersistError::Storage(e.into()))?;
                    let keep = serde_json::from_slice::<HistoryRecord>(value.value())
                        .map(|r| r.deleted_at >= cutoff)
                        .unwrap_or(false);
                    if !keep {
                        expired.push(key.value().to_string());
                    }
                }
                removed = expired.len();
                for key in expired {
                    history
                        .remove(key.as_str())
                        .map_err(|e| PersistError::Storage(e.into()))?;
                }
            }
            tx.commit().map_err(|e| PersistError::Storage(e.into()))?;
            Ok(removed)
        })
        .await
    }
}

/// In-memory store used by tests and as a fallback.
#[derive(Default)]
pub struct MemorySessionStore {
    live: std::sync::RwLock<HashMap<String, PersistedSession>>,
    history: std::sync::RwLock<HashMap<String, HistoryRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().unwrap().len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &PersistedSession) -> Result<()> {
        self.live
            .write()
            .unwrap()
            .insert(session.composite_id(), session.clone());
        Ok(())
    }

    async fn soft_delete(&self, composite_id: &str) -> Result<()> {
        if let Some(session) = self.live.write().unwrap().remove(composite_id) {
            self.history.write().unwrap().insert(
                composite_id.to_string(),
                HistoryRecord {
                    deleted_at: chrono::Utc::now(),
                    session,
                },
            );
        }
        Ok(())
    }

    async fn load(&self) -> Result<HashMap<String, PersistedSession>> {
        Ok(self.live.read().unwrap().clone())
    }

    async fn find_by_post_id(&self, post_id: &str) -> Result<Option<PersistedSession>> {
        Ok(self
            .live
            .read()
            .unwrap()
            .values()
            .find(|s| s.references_post(post_id))
            .cloned())
    }

    async fn find_by_thread(
        &self,
        platform_id: &str,
        thread_id: &str,
    ) -> Result<Option<PersistedSession>> {
        let composite = SessionKey::new(platform_id, thread_id).composite();
        Ok(self.live.read().unwrap().get(&composite).cloned())
    }

    async fn clean_stale(&self, max_age: std::time::Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::days(365));
        let stale: Vec<String> = self
            .live
            .read()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.last_activity_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        let count = stale.len();
        for id in &stale {
            self.soft_delete(id).await?;
        }
        Ok(count)
    }

    async fn clean_history(&self, max_age_days: u64) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(max_age_days as i64);
        let mut history = self.history.write().unwrap();
        let before = history.len();
        history.retain(|_, record| record.deleted_at >= cutoff);
        Ok(before - history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemorySessionStore, PersistedSession, RedbSessionStore, SessionStore};
    use crate::message::ManagerSnapshot;
    use crate::session::SessionMeta;
    use crate::SessionKey;
    use std::path::PathBuf;

    fn sample(thread: &str) -> PersistedSession {
        let key = SessionKey::new("mock", thread);
        let meta = SessionMeta::new("admin", "Admin", PathBuf::from("/tmp"));
        let snapshot = ManagerSnapshot {
            tasks_post_id: Some(format!("tasks-{thread}")),
            last_tasks_content: "**Tasks** 0/1 · 0%".into(),
            ..ManagerSnapshot::default()
        };
        PersistedSession::from_parts(&key, &meta, &snapshot)
    }

    #[test]
    fn parts_round_trip() {
        let record = sample("t1");
        let (meta, snapshot) = record.clone().into_parts();
        let rebuilt = PersistedSession::from_parts(&record.key(), &meta, &snapshot);
        assert_eq!(rebuilt.session_start_post_id, record.session_start_post_id);
        assert_eq!(rebuilt.tasks_post_id, record.tasks_post_id);
        assert_eq!(rebuilt.started_by, record.started_by);
        assert_eq!(rebuilt.message_count, record.message_count);
    }

    #[tokio::test]
    async fn redb_store_round_trips() {
        let dir = std::env::temp_dir().join(format!("threadbot-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = RedbSessionStore::open(&dir.join("sessions.redb")).unwrap();

        let record = sample("t1");
        store.save(&record).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.get(&record.composite_id()), Some(&record));

        let by_thread = store.find_by_thread("mock", "t1").await.unwrap();
        assert_eq!(by_thread, Some(record.clone()));

        let by_post = store.find_by_post_id("tasks-t1").await.unwrap();
        assert_eq!(by_post, Some(record.clone()));

        store.soft_delete(&record.composite_id()).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        // History still holds it until clean_history expires it.
        assert_eq!(store.clean_history(30).await.unwrap(), 0);
        assert_eq!(store.clean_history(0).await.unwrap(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn stale_entries_are_swept() {
        let store = MemorySessionStore::new();
        let mut old = sample("old");
        old.last_activity_at = chrono::Utc::now() - chrono::Duration::hours(3);
        store.save(&old).await.unwrap();
        store.save(&sample("fresh")).await.unwrap();

        let swept = store
            .clean_stale(std::time::Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(swept, 1);
        assert_eq!(store.load().await.unwrap().len(), 1);
        assert_eq!(store.history_len(), 1);
    }
}

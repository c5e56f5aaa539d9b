//! Background lifecycle work: idle monitoring and periodic cleanup.
//!
//! The monitor sweeps active sessions on an interval, warning and then
//! pausing idle ones. The cleanup task prunes stale persisted sessions,
//! expired history, and unreferenced worktrees.

use crate::message::ops::SystemLevel;
use crate::session::manager::SessionManager;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Periodic idle sweep over active sessions.
pub struct SessionMonitor {
    manager: Arc<SessionManager>,
}

impl SessionMonitor {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Spawn the monitor loop.
    pub fn start(self, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if self.manager.is_shutting_down() {
                    break;
                }
                self.sweep().await;
            }
        })
    }

    /// One pass: warn sessions near the idle threshold, pause the ones
    /// past it.
    pub async fn sweep(&self) {
        let config = self.manager.config().session;
        let warning = chrono::Duration::seconds(config.idle_warning_secs as i64);
        let timeout = chrono::Duration::seconds(config.idle_timeout_secs as i64);
        let now = chrono::Utc::now();

        for session in self.manager.registry().all() {
            if !session.lifecycle().is_running() {
                continue;
            }
            let (idle_for, warned) = {
                let meta = session.meta.read().unwrap();
                (now - meta.last_activity_at, meta.timeout_warning_posted)
            };

            if idle_for >= timeout {
                self.manager
                    .pause_session(&session.key.clone(), "idle timeout")
                    .await;
                continue;
            }
            if idle_for >= warning && !warned {
                session.meta.write().unwrap().timeout_warning_posted = true;
                let remaining = (timeout - idle_for).num_minutes().max(1);
                let text = format!(
                    "No activity for a while; pausing in about {remaining} minute(s) unless someone posts."
                );
                let mut messages = session.messages.lock().await;
                messages.post_system(SystemLevel::Warning, &text).await;
            }
        }

        self.manager.refresh_tracked_stickies().await;
    }
}

/// Periodic store and worktree garbage collection.
pub struct BackgroundCleanup {
    manager: Arc<SessionManager>,
}

impl BackgroundCleanup {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn start(self, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if self.manager.is_shutting_down() {
                    break;
                }
                self.sweep().await;
            }
        })
    }

    /// One pass: stale persisted sessions, expired history, worktree GC.
    pub async fn sweep(&self) {
        let config = self.manager.config();
        let stale_after =
            std::time::Duration::from_secs(config.session.idle_timeout_secs * 2);
        match self.manager.store().clean_stale(stale_after).await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "stale persisted sessions swept"),
            Err(error) => tracing::warn!(%error, "stale sweep failed"),
        }
        match self
            .manager
            .store()
            .clean_history(config.cleanup.history_days)
            .await
        {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "history entries purged"),
            Err(error) => tracing::warn!(%error, "history purge failed"),
        }

        for repo_root in self.manager.repo_roots() {
            let removed = self.manager.collect_worktrees(&repo_root).await;
            if removed > 0 {
                tracing::info!(
                    repo_root = %repo_root.display(),
                    removed,
                    "worktrees garbage-collected"
                );
            }
        }

        prune_old_logs(&config.data_dir.join("logs"), config.cleanup.history_days).await;
    }
}

/// Delete rolled log files older than `max_age_days`.
async fn prune_old_logs(log_dir: &std::path::Path, max_age_days: u64) {
    let Ok(mut entries) = tokio::fs::read_dir(log_dir).await else {
        return;
    };
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(max_age_days * 24 * 3600);
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let old = metadata
            .modified()
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if metadata.is_file() && old {
            if let Err(error) = tokio::fs::remove_file(entry.path()).await {
                tracing::debug!(%error, path = %entry.path().display(), "log prune failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BackgroundCleanup, SessionMonitor};
    use crate::config::Config;
    use crate::session::manager::SessionManager;
    use crate::session::persist::{MemorySessionStore, PersistedSession, SessionStore};
    use crate::session::worktree::GitWorktrees;
    use crate::message::ManagerSnapshot;
    use crate::session::SessionMeta;
    use crate::SessionKey;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[tokio::test]
    async fn cleanup_sweeps_stale_store_entries() {
        let config = Arc::new(Config::default());
        let store = Arc::new(MemorySessionStore::new());

        let key = SessionKey::new("mock", "old-thread");
        let mut meta = SessionMeta::new("admin", "Admin", PathBuf::from("/tmp"));
        meta.last_activity_at =
            chrono::Utc::now() - chrono::Duration::seconds((config.session.idle_timeout_secs * 3) as i64);
        let record = PersistedSession::from_parts(&key, &meta, &ManagerSnapshot::default());
        store.save(&record).await.unwrap();

        let manager = SessionManager::new(config, store.clone(), Arc::new(GitWorktrees));
        let cleanup = BackgroundCleanup::new(manager.clone());
        cleanup.sweep().await;

        assert!(store.load().await.unwrap().is_empty());
        let _ = SessionMonitor::new(manager);
    }
}

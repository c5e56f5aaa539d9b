//! Session and post indexes.
//!
//! Two O(1) lookups: composite session key → live session, and post id →
//! owning session (for reaction routing). Post registrations come from
//! executors at post-creation time; session registrations only from the
//! session manager.

use crate::session::Session;
use crate::{PostId, SessionKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Global post-id → session-key index shared with executor contexts.
#[derive(Debug, Default)]
pub struct PostIndex {
    map: RwLock<HashMap<PostId, SessionKey>>,
}

impl PostIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, post_id: &str, key: SessionKey) {
        self.map.write().unwrap().insert(post_id.to_string(), key);
    }

    pub fn unregister(&self, post_id: &str) {
        self.map.write().unwrap().remove(post_id);
    }

    pub fn lookup(&self, post_id: &str) -> Option<SessionKey> {
        self.map.read().unwrap().get(post_id).cloned()
    }

    /// Drop every post belonging to a thread (pause/kill teardown).
    pub fn clear_thread(&self, key: &SessionKey) {
        self.map.write().unwrap().retain(|_, owner| owner != key);
    }
}

/// Live session index.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .unwrap()
            .insert(session.key.clone(), session);
    }

    pub fn remove(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.write().unwrap().remove(key)
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    /// Sessions on one platform, for sticky summaries.
    pub fn for_platform(&self, platform_id: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.key.platform_id == platform_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::PostIndex;
    use crate::SessionKey;

    #[test]
    fn post_index_routes_and_clears_by_thread() {
        let index = PostIndex::new();
        let a = SessionKey::new("mock", "t1");
        let b = SessionKey::new("mock", "t2");
        index.register("p1", a.clone());
        index.register("p2", a.clone());
        index.register("p3", b.clone());

        assert_eq!(index.lookup("p1"), Some(a.clone()));
        index.clear_thread(&a);
        assert_eq!(index.lookup("p1"), None);
        assert_eq!(index.lookup("p3"), Some(b));
    }

    #[test]
    fn post_index_last_writer_wins() {
        let index = PostIndex::new();
        let a = SessionKey::new("mock", "t1");
        let b = SessionKey::new("mock", "t2");
        index.register("p1", a);
        index.register("p1", b.clone());
        assert_eq!(index.lookup("p1"), Some(b));
    }
}

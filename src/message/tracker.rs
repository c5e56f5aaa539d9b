//! Post role tracking.
//!
//! Maps platform post ids to the semantic role of the executor that owns
//! them so reactions can be routed. Per-session, single-writer, no I/O.

use crate::PostId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Semantic role of a tracked post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostRole {
    Content,
    TaskList,
    Question,
    Approval,
    MessageApproval,
    ContextPrompt,
    WorktreePrompt,
    UpdatePrompt,
    Subagent,
    BugReport,
    System,
    SessionStart,
    Lifecycle,
    Status,
    Sticky,
}

/// Role metadata for one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMeta {
    pub role: PostRole,
    /// Owning tool-use id, for subagent and question posts.
    pub tool_use_id: Option<String>,
}

impl PostMeta {
    pub fn role(role: PostRole) -> Self {
        Self {
            role,
            tool_use_id: None,
        }
    }

    pub fn with_tool_use(role: PostRole, tool_use_id: impl Into<String>) -> Self {
        Self {
            role,
            tool_use_id: Some(tool_use_id.into()),
        }
    }
}

/// Post-id → role map. Cheap to clone; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct PostTracker {
    inner: Arc<Mutex<HashMap<PostId, PostMeta>>>,
}

impl PostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a post. Idempotent; last writer wins for a given post id
    /// (posts are repurposed in the bump protocol).
    pub fn register(&self, post_id: impl Into<PostId>, meta: PostMeta) {
        self.inner.lock().unwrap().insert(post_id.into(), meta);
    }

    pub fn lookup(&self, post_id: &str) -> Option<PostMeta> {
        self.inner.lock().unwrap().get(post_id).cloned()
    }

    /// Remove a post mapping. Used when a post is deleted.
    pub fn unregister(&self, post_id: &str) {
        self.inner.lock().unwrap().remove(post_id);
    }

    /// Drop every tracked post (session teardown).
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Ids of all posts currently registered with the given role.
    pub fn posts_with_role(&self, role: PostRole) -> Vec<PostId> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, meta)| meta.role == role)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{PostMeta, PostRole, PostTracker};

    #[test]
    fn last_writer_wins() {
        let tracker = PostTracker::new();
        tracker.register("p1", PostMeta::role(PostRole::TaskList));
        tracker.register("p1", PostMeta::role(PostRole::Content));
        assert_eq!(tracker.lookup("p1"), Some(PostMeta::role(PostRole::Content)));
    }

    #[test]
    fn unregister_removes_the_mapping() {
        let tracker = PostTracker::new();
        tracker.register("p1", PostMeta::role(PostRole::System));
        tracker.unregister("p1");
        assert_eq!(tracker.lookup("p1"), None);
    }

    #[test]
    fn clones_share_state() {
        let tracker = PostTracker::new();
        let other = tracker.clone();
        tracker.register("p1", PostMeta::with_tool_use(PostRole::Subagent, "t1"));
        let meta = other.lookup("p1").unwrap();
        assert_eq!(meta.tool_use_id.as_deref(), Some("t1"));
    }
}

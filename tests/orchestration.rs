//! End-to-end orchestration scenarios against the mock platform.
//!
//! The assistant child is `cat`: it stays alive, accepts stdin, and its
//! echoed command lines decode as unknown events, which the manager
//! ignores.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use threadbot::config::Config;
use threadbot::error::Result;
use threadbot::platform::mock::{MockCall, MockPlatform};
use threadbot::platform::{PlatformDyn, PlatformUser, Post};
use threadbot::session::manager::SessionManager;
use threadbot::session::persist::{MemorySessionStore, SessionStore};
use threadbot::session::worktree::WorktreeOps;
use threadbot::session::WorktreeInfo;
use threadbot::{ReactionAction, ReactionEvent, SessionKey};

/// Worktree ops that never touch git.
#[derive(Default)]
struct FakeWorktrees {
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl WorktreeOps for FakeWorktrees {
    async fn create(&self, repo_root: &Path, branch: &str) -> Result<WorktreeInfo> {
        self.created.lock().push(branch.to_string());
        Ok(WorktreeInfo {
            repo_root: repo_root.to_path_buf(),
            path: repo_root.join(".worktrees").join(branch),
            branch: branch.to_string(),
            is_owner: true,
        })
    }

    async fn find(&self, _repo_root: &Path, _branch: &str) -> Result<Option<WorktreeInfo>> {
        Ok(None)
    }

    async fn list(&self, _repo_root: &Path) -> Result<Vec<WorktreeInfo>> {
        Ok(Vec::new())
    }

    async fn remove(&self, _repo_root: &Path, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn age_hours(&self, _path: &Path) -> Result<u64> {
        Ok(0)
    }
}

struct Harness {
    manager: Arc<SessionManager>,
    platform: Arc<MockPlatform>,
    worktrees: Arc<FakeWorktrees>,
    store: Arc<MemorySessionStore>,
}

fn harness() -> Harness {
    harness_with_store(Arc::new(MemorySessionStore::new()), MockPlatform::new("mock"))
}

fn harness_with_store(store: Arc<MemorySessionStore>, platform: Arc<MockPlatform>) -> Harness {
    let mut config = Config::default();
    config.assistant.command = "cat".to_string();
    config.assistant.args = Vec::new();
    let worktrees = Arc::new(FakeWorktrees::default());
    let manager = SessionManager::new(Arc::new(config), store.clone(), worktrees.clone());
    manager.register_platform(platform.clone() as Arc<dyn PlatformDyn>);
    Harness {
        manager,
        platform,
        worktrees,
        store,
    }
}

fn user(name: &str) -> PlatformUser {
    PlatformUser {
        id: name.to_string(),
        username: name.to_string(),
        display_name: name.to_string(),
    }
}

fn message(thread: &str, text: &str, author: &str) -> Post {
    Post {
        id: format!("user-{thread}-{}", text.len()),
        message: text.to_string(),
        author: author.to_string(),
        thread_id: thread.to_string(),
        channel_id: None,
        is_thread_root: true,
    }
}

#[tokio::test]
async fn start_then_stop_via_command() {
    let h = harness();
    let key = SessionKey::new("mock", "t1");

    h.manager
        .handle_message("mock", message("t1", "@threadbot hi", "admin"), user("admin"))
        .await;
    let session = h.manager.registry().get(&key).expect("session started");
    assert_eq!(session.owner(), "admin");
    assert!(session.is_allowed("admin"));

    h.manager
        .handle_message("mock", message("t1", "!stop", "admin"), user("admin"))
        .await;
    assert!(h.manager.registry().get(&key).is_none());

    // A plain message afterwards does not revive anything: the record
    // was soft-deleted, and there is no mention.
    h.manager
        .handle_message("mock", message("t1", "hello again", "admin"), user("admin"))
        .await;
    assert!(h.manager.registry().get(&key).is_none());
}

#[tokio::test]
async fn cancel_reaction_on_session_start_post() {
    let h = harness();
    let key = SessionKey::new("mock", "t1");
    h.manager
        .handle_message("mock", message("t1", "@threadbot hi", "admin"), user("admin"))
        .await;
    assert!(h.manager.registry().get(&key).is_some());

    // The session-start post is the first interactive post.
    h.manager
        .handle_reaction(
            "mock",
            ReactionEvent {
                post_id: "p1".to_string(),
                emoji: "octagonal_sign".to_string(),
                username: "admin".to_string(),
                action: ReactionAction::Added,
            },
        )
        .await;
    assert!(h.manager.registry().get(&key).is_none());
}

#[tokio::test]
async fn unauthorized_user_cannot_start() {
    let h = harness();
    h.manager
        .handle_message("mock", message("t1", "@threadbot hi", "mallory"), user("mallory"))
        .await;
    assert!(h.manager.registry().get(&SessionKey::new("mock", "t1")).is_none());
    let contents = h.platform.thread_contents("t1");
    assert!(contents.iter().any(|c| c.contains("not authorized")));
}

#[tokio::test]
async fn kill_requires_platform_authorization() {
    let h = harness();
    h.platform.allow_user("admin");

    h.manager
        .handle_message("mock", message("t1", "@threadbot one", "admin"), user("admin"))
        .await;
    h.manager
        .handle_message("mock", message("t2", "@threadbot two", "admin"), user("admin"))
        .await;
    assert_eq!(h.manager.registry().len(), 2);

    // Invite mallory into t1 so their command reaches dispatch, then
    // watch !kill bounce off platform authorization.
    h.manager
        .handle_message("mock", message("t1", "!invite @mallory", "admin"), user("admin"))
        .await;
    h.manager
        .handle_message("mock", message("t1", "!kill", "mallory"), user("mallory"))
        .await;
    assert_eq!(h.manager.registry().len(), 2);
    let contents = h.platform.thread_contents("t1");
    assert!(contents.iter().any(|c| c.contains("requires platform-level authorization")));

    // An allowed user kills everything; the other thread is notified.
    h.manager
        .handle_message("mock", message("t1", "!kill", "admin"), user("admin"))
        .await;
    assert_eq!(h.manager.registry().len(), 0);
    let t1 = h.platform.thread_contents("t1");
    assert!(t1.iter().any(|c| c.contains("killing 2 active sessions")));
    let t2 = h.platform.thread_contents("t2");
    assert!(t2.iter().any(|c| c.contains("terminated by @admin")));
    assert_eq!(
        h.platform.count_calls(|c| matches!(c, MockCall::Disconnect)),
        1
    );
}

#[tokio::test]
async fn inline_branch_prefix_starts_a_worktree_session() {
    let h = harness();
    let key = SessionKey::new("mock", "t1");
    h.manager
        .handle_message(
            "mock",
            message("t1", "@threadbot on branch feature-x help me", "admin"),
            user("admin"),
        )
        .await;

    let session = h.manager.registry().get(&key).expect("session started");
    let meta = session.meta.read().unwrap();
    let worktree = meta.worktree.as_ref().expect("worktree attached");
    assert_eq!(worktree.branch, "feature-x");
    assert_eq!(meta.working_dir, worktree.path);
    assert_eq!(meta.first_prompt.as_deref(), Some("help me"));
    assert_eq!(*h.worktrees.created.lock(), vec!["feature-x".to_string()]);
}

#[tokio::test]
async fn root_worktree_switch_is_not_a_create_named_switch() {
    let h = harness();
    h.manager
        .handle_message(
            "mock",
            message("t1", "@threadbot !worktree switch feature-branch", "admin"),
            user("admin"),
        )
        .await;

    let created = h.worktrees.created.lock().clone();
    assert_eq!(created, vec!["feature-branch".to_string()]);
    assert!(!created.iter().any(|b| b == "switch"));

    let session = h
        .manager
        .registry()
        .get(&SessionKey::new("mock", "t1"))
        .expect("session started on the branch");
    assert_eq!(
        session.meta.read().unwrap().worktree.as_ref().unwrap().branch,
        "feature-branch"
    );
}

#[tokio::test]
async fn pause_then_resume_updates_lifecycle_post_in_place() {
    let platform = MockPlatform::new("mock");
    let store = Arc::new(MemorySessionStore::new());
    let h = harness_with_store(store.clone(), platform.clone());
    let key = SessionKey::new("mock", "t1");

    h.manager
        .handle_message("mock", message("t1", "@threadbot hi", "admin"), user("admin"))
        .await;
    h.manager.pause_session(&key, "idle timeout").await;
    assert!(h.manager.registry().get(&key).is_none());

    let persisted = store.find_by_thread("mock", "t1").await.unwrap().unwrap();
    assert!(persisted.is_paused);
    let lifecycle_post = persisted.lifecycle_post_id.clone().expect("lifecycle post");
    assert!(h
        .platform
        .post_content(&lifecycle_post)
        .unwrap()
        .contains("paused"));

    // Restart: a fresh manager over the same store and platform.
    let h2 = harness_with_store(store.clone(), platform.clone());

    // A non-allowed user cannot resume.
    h2.manager
        .handle_message("mock", message("t1", "continue", "mallory"), user("mallory"))
        .await;
    assert!(h2.manager.registry().get(&key).is_none());

    // An allowed user resumes; the lifecycle post is edited, not
    // replaced.
    let posts_before = platform.post_count("t1");
    h2.manager
        .handle_message("mock", message("t1", "continue please", "admin"), user("admin"))
        .await;
    let session = h2.manager.registry().get(&key).expect("session resumed");
    assert!(session.lifecycle().is_running());
    assert!(platform
        .post_content(&lifecycle_post)
        .unwrap()
        .contains("resumed"));
    assert_eq!(platform.post_count("t1"), posts_before);
}

#[tokio::test]
async fn follow_up_from_stranger_requests_message_approval() {
    let h = harness();
    let key = SessionKey::new("mock", "t1");
    h.manager
        .handle_message("mock", message("t1", "@threadbot hi", "admin"), user("admin"))
        .await;
    let posts_before = h.platform.post_count("t1");

    h.manager
        .handle_message("mock", message("t1", "run my deploy", "stranger"), user("stranger"))
        .await;

    // One approval post went up; the message was not delivered.
    assert_eq!(h.platform.post_count("t1"), posts_before + 1);
    let contents = h.platform.thread_contents("t1");
    assert!(contents.iter().any(|c| c.contains("Message approval")));
    let session = h.manager.registry().get(&key).unwrap();
    assert!(!session.is_allowed("stranger"));
}

#[tokio::test]
async fn permissions_cannot_be_upgraded_from_chat() {
    let h = harness();
    h.manager
        .handle_message("mock", message("t1", "@threadbot hi", "admin"), user("admin"))
        .await;
    h.manager
        .handle_message("mock", message("t1", "!permissions auto", "admin"), user("admin"))
        .await;
    let contents = h.platform.thread_contents("t1");
    assert!(contents.iter().any(|c| c.contains("Cannot upgrade permissions")));
}

#[tokio::test]
async fn max_sessions_is_enforced() {
    let platform = MockPlatform::new("mock");
    let store = Arc::new(MemorySessionStore::new());
    let mut config = Config::default();
    config.assistant.command = "cat".to_string();
    config.session.max_sessions = 1;
    let manager = SessionManager::new(
        Arc::new(config),
        store,
        Arc::new(FakeWorktrees::default()),
    );
    manager.register_platform(platform.clone() as Arc<dyn PlatformDyn>);

    manager
        .handle_message("mock", message("t1", "@threadbot one", "admin"), user("admin"))
        .await;
    manager
        .handle_message("mock", message("t2", "@threadbot two", "admin"), user("admin"))
        .await;

    assert_eq!(manager.registry().len(), 1);
    let contents = platform.thread_contents("t2");
    assert!(contents.iter().any(|c| c.contains("Session limit reached")));
}

#[tokio::test]
async fn context_prompt_defers_the_first_turn() {
    let h = harness();
    let key = SessionKey::new("mock", "t1");
    h.platform.set_thread_message_count("t1", 7);

    h.manager
        .handle_message(
            "mock",
            message("t1", "@threadbot summarize this thread", "admin"),
            user("admin"),
        )
        .await;

    let session = h.manager.registry().get(&key).expect("session started");
    {
        let messages = session.messages.lock().await;
        assert!(messages.has_pending_context_prompt());
    }
    // The child is deferred until the context question resolves.
    assert!(session.child.lock().await.is_none());

    // Find the context prompt post and answer "one" (= last 1 message).
    let prompt_post = session
        .messages
        .lock()
        .await
        .pending_context_prompt()
        .unwrap()
        .post_id;
    h.manager
        .handle_reaction(
            "mock",
            ReactionEvent {
                post_id: prompt_post,
                emoji: "one".to_string(),
                username: "admin".to_string(),
                action: ReactionAction::Added,
            },
        )
        .await;

    // Give the completion listener a moment to spawn the child.
    for _ in 0..50 {
        if session.child.lock().await.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(session.child.lock().await.is_some());
}

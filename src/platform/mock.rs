//! Recording in-memory platform used by the test suite.

use crate::error::{PlatformError, Result};
use crate::platform::format::{Formatter, MarkdownFormatter};
use crate::platform::{EventStream, MessageLimits, Platform, PlatformEvent, PlatformUser, Post};
use crate::PostId;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A post as the mock platform stores it.
#[derive(Debug, Clone)]
pub struct MockPost {
    pub thread_id: String,
    pub content: String,
    pub reactions: Vec<String>,
    pub pinned: bool,
}

/// Every mutating call the mock has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreatePost { thread_id: String, content: String },
    UpdatePost { post_id: String, content: String },
    DeletePost { post_id: String },
    CreateInteractivePost {
        thread_id: String,
        content: String,
        reactions: Vec<String>,
    },
    PinPost { post_id: String },
    UnpinPost { post_id: String },
    AddReaction { post_id: String, emoji: String },
    RemoveReaction { post_id: String, emoji: String },
    Disconnect,
}

/// In-memory platform that records calls and supports failure injection.
pub struct MockPlatform {
    id: String,
    bot: PlatformUser,
    allowed: Mutex<HashSet<String>>,
    limits: Mutex<MessageLimits>,
    next_id: AtomicU64,
    posts: Mutex<BTreeMap<PostId, MockPost>>,
    calls: Mutex<Vec<MockCall>>,
    fail_create: AtomicBool,
    fail_update: AtomicBool,
    fail_delete: AtomicBool,
    events_tx: mpsc::Sender<PlatformEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PlatformEvent>>>,
    thread_counts: Mutex<BTreeMap<String, usize>>,
}

impl MockPlatform {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(64);
        Arc::new(Self {
            id: id.into(),
            bot: PlatformUser {
                id: "bot".to_string(),
                username: "threadbot".to_string(),
                display_name: "Threadbot".to_string(),
            },
            allowed: Mutex::new(HashSet::from(["admin".to_string()])),
            limits: Mutex::new(MessageLimits::default()),
            next_id: AtomicU64::new(1),
            posts: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            thread_counts: Mutex::new(BTreeMap::new()),
        })
    }

    /// Sender tests use to inject inbound platform events.
    pub fn event_sender(&self) -> mpsc::Sender<PlatformEvent> {
        self.events_tx.clone()
    }

    pub fn set_limits(&self, limits: MessageLimits) {
        *self.limits.lock().unwrap() = limits;
    }

    pub fn allow_user(&self, username: &str) {
        self.allowed.lock().unwrap().insert(username.to_string());
    }

    /// Pretend a thread already holds `count` earlier messages.
    pub fn set_thread_message_count(&self, thread_id: &str, count: usize) {
        self.thread_counts
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), count);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Current content of a post, if it exists.
    pub fn post_content(&self, post_id: &str) -> Option<String> {
        self.posts
            .lock()
            .unwrap()
            .get(post_id)
            .map(|p| p.content.clone())
    }

    pub fn post_exists(&self, post_id: &str) -> bool {
        self.posts.lock().unwrap().contains_key(post_id)
    }

    /// Number of live posts in a thread.
    pub fn post_count(&self, thread_id: &str) -> usize {
        self.posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.thread_id == thread_id)
            .count()
    }

    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    /// Content of every live post in a thread, in creation order.
    pub fn thread_contents(&self, thread_id: &str) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.thread_id == thread_id)
            .map(|p| p.content.clone())
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn fresh_post(&self, thread_id: &str, content: &str, reactions: Vec<String>) -> Post {
        let id = format!("p{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.posts.lock().unwrap().insert(
            id.clone(),
            MockPost {
                thread_id: thread_id.to_string(),
                content: content.to_string(),
                reactions,
                pinned: false,
            },
        );
        Post {
            id,
            message: content.to_string(),
            author: self.bot.username.clone(),
            thread_id: thread_id.to_string(),
            channel_id: None,
            is_thread_root: false,
        }
    }
}

impl Platform for MockPlatform {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<EventStream> {
        let rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| PlatformError::Request("mock already started".into()))?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn create_post(&self, thread_id: &str, content: &str) -> Result<Post> {
        tokio::task::yield_now().await;
        self.record(MockCall::CreatePost {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
        });
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("injected create failure".into()).into());
        }
        Ok(self.fresh_post(thread_id, content, Vec::new()))
    }

    async fn update_post(&self, post_id: &str, content: &str) -> Result<Post> {
        tokio::task::yield_now().await;
        self.record(MockCall::UpdatePost {
            post_id: post_id.to_string(),
            content: content.to_string(),
        });
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("injected update failure".into()).into());
        }
        let mut posts = self.posts.lock().unwrap();
        let post = posts.get_mut(post_id).ok_or(PlatformError::PostNotFound {
            post_id: post_id.to_string(),
        })?;
        post.content = content.to_string();
        Ok(Post {
            id: post_id.to_string(),
            message: content.to_string(),
            author: self.bot.username.clone(),
            thread_id: post.thread_id.clone(),
            channel_id: None,
            is_thread_root: false,
        })
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.record(MockCall::DeletePost {
            post_id: post_id.to_string(),
        });
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("injected delete failure".into()).into());
        }
        self.posts.lock().unwrap().remove(post_id);
        Ok(())
    }

    async fn create_interactive_post(
        &self,
        thread_id: &str,
        content: &str,
        reactions: &[String],
    ) -> Result<Post> {
        tokio::task::yield_now().await;
        self.record(MockCall::CreateInteractivePost {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            reactions: reactions.to_vec(),
        });
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("injected create failure".into()).into());
        }
        Ok(self.fresh_post(thread_id, content, reactions.to_vec()))
    }

    async fn pin_post(&self, post_id: &str) -> Result<()> {
        self.record(MockCall::PinPost {
            post_id: post_id.to_string(),
        });
        if let Some(post) = self.posts.lock().unwrap().get_mut(post_id) {
            post.pinned = true;
        }
        Ok(())
    }

    async fn unpin_post(&self, post_id: &str) -> Result<()> {
        self.record(MockCall::UnpinPost {
            post_id: post_id.to_string(),
        });
        if let Some(post) = self.posts.lock().unwrap().get_mut(post_id) {
            post.pinned = false;
        }
        Ok(())
    }

    async fn add_reaction(&self, post_id: &str, emoji: &str) -> Result<()> {
        self.record(MockCall::AddReaction {
            post_id: post_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn remove_reaction(&self, post_id: &str, emoji: &str) -> Result<()> {
        self.record(MockCall::RemoveReaction {
            post_id: post_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    fn formatter(&self) -> Arc<dyn Formatter> {
        Arc::new(MarkdownFormatter)
    }

    fn message_limits(&self) -> MessageLimits {
        *self.limits.lock().unwrap()
    }

    fn bot_name(&self) -> &str {
        &self.bot.username
    }

    fn bot_user(&self) -> PlatformUser {
        self.bot.clone()
    }

    fn is_bot_mentioned(&self, text: &str) -> bool {
        text.contains(&format!("@{}", self.bot.username))
    }

    fn extract_prompt(&self, text: &str) -> String {
        text.replace(&format!("@{}", self.bot.username), "")
            .trim()
            .to_string()
    }

    fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed.lock().unwrap().contains(username)
    }

    async fn thread_message_count(&self, thread_id: &str) -> Result<usize> {
        Ok(self
            .thread_counts
            .lock()
            .unwrap()
            .get(thread_id)
            .copied()
            .unwrap_or(0))
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(MockCall::Disconnect);
        Ok(())
    }
}

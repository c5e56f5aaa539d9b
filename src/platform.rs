//! Platform adapter contract and dynamic dispatch companion.
//!
//! The core consumes an abstract chat platform: posts, interactive posts
//! with seeded reactions, pins, and an inbound event stream. Adapter
//! internals (SDKs, wire formats) live outside this crate.

pub mod emoji;
pub mod format;
pub mod mock;

use crate::error::Result;
use crate::{PostId, ReactionEvent, ThreadId};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Inbound platform event stream type.
pub type EventStream = Pin<Box<dyn Stream<Item = PlatformEvent> + Send>>;

/// An addressable message on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub message: String,
    pub author: String,
    pub thread_id: ThreadId,
    /// Channel the thread lives in, when the platform reports it.
    pub channel_id: Option<String>,
    /// Whether this post is the root of its thread.
    pub is_thread_root: bool,
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

/// Size limits a platform imposes on a single post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    /// Absolute maximum characters per post.
    pub max_length: usize,
    /// Size at which streaming content must be split.
    pub hard_threshold: usize,
}

impl MessageLimits {
    /// Size below which an existing post is grown in place instead of split.
    pub fn soft_threshold(&self) -> usize {
        self.hard_threshold * 3 / 4
    }
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_length: 16_000,
            hard_threshold: 12_000,
        }
    }
}

/// Events delivered by a platform adapter.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// A new message was posted.
    Message { post: Post, user: PlatformUser },
    /// A reaction was added to or removed from a post.
    Reaction(ReactionEvent),
    /// Activity in a channel outside any tracked thread.
    ChannelPost { channel_id: String },
}

/// Static trait for platform adapters.
/// Use this for type-safe implementations.
pub trait Platform: Send + Sync + 'static {
    /// Unique name for this platform (e.g. "mattermost").
    fn id(&self) -> &str;

    /// Start the adapter and return the inbound event stream.
    fn start(&self) -> impl std::future::Future<Output = Result<EventStream>> + Send;

    /// Create a plain post in a thread.
    fn create_post(
        &self,
        thread_id: &str,
        content: &str,
    ) -> impl std::future::Future<Output = Result<Post>> + Send;

    /// Update a post in place. Fails with `PlatformError::PostNotFound` if
    /// the post no longer exists.
    fn update_post(
        &self,
        post_id: &str,
        content: &str,
    ) -> impl std::future::Future<Output = Result<Post>> + Send;

    /// Delete a post. Idempotent on "not found".
    fn delete_post(&self, post_id: &str)
    -> impl std::future::Future<Output = Result<()>> + Send;

    /// Create a post and seed the supplied reactions as its control surface.
    fn create_interactive_post(
        &self,
        thread_id: &str,
        content: &str,
        reactions: &[String],
    ) -> impl std::future::Future<Output = Result<Post>> + Send;

    /// Pin a post. Best-effort; failures are ignored by callers.
    fn pin_post(&self, post_id: &str) -> impl std::future::Future<Output = Result<()>> + Send {
        let _ = post_id;
        async { Ok(()) }
    }

    /// Unpin a post. Best-effort; failures are ignored by callers.
    fn unpin_post(&self, post_id: &str) -> impl std::future::Future<Output = Result<()>> + Send {
        let _ = post_id;
        async { Ok(()) }
    }

    /// Add a reaction from the bot. Idempotent; failures are ignored.
    fn add_reaction(
        &self,
        post_id: &str,
        emoji: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove a bot reaction. Idempotent; failures are ignored.
    fn remove_reaction(
        &self,
        post_id: &str,
        emoji: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Text formatter for this platform's markup dialect.
    fn formatter(&self) -> Arc<dyn format::Formatter>;

    /// Post size limits.
    fn message_limits(&self) -> MessageLimits;

    /// The bot's own display name.
    fn bot_name(&self) -> &str;

    /// The bot's own user record.
    fn bot_user(&self) -> PlatformUser;

    /// Whether the text mentions the bot.
    fn is_bot_mentioned(&self, text: &str) -> bool;

    /// Strip the bot mention and return the remaining prompt.
    fn extract_prompt(&self, text: &str) -> String;

    /// Whether the user is on the platform-level allow list.
    fn is_user_allowed(&self, username: &str) -> bool;

    /// Messages already in a thread, for the context prompt. Adapters
    /// that cannot count return 0.
    fn thread_message_count(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<usize>> + Send {
        let _ = thread_id;
        async { Ok(0) }
    }

    /// Graceful shutdown.
    fn disconnect(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn PlatformDyn>` for storing different adapters.
pub trait PlatformDyn: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn start<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<EventStream>> + Send + 'a>>;

    fn create_post<'a>(
        &'a self,
        thread_id: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Post>> + Send + 'a>>;

    fn update_post<'a>(
        &'a self,
        post_id: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Post>> + Send + 'a>>;

    fn delete_post<'a>(
        &'a self,
        post_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn create_interactive_post<'a>(
        &'a self,
        thread_id: &'a str,
        content: &'a str,
        reactions: &'a [String],
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Post>> + Send + 'a>>;

    fn pin_post<'a>(
        &'a self,
        post_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn unpin_post<'a>(
        &'a self,
        post_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn add_reaction<'a>(
        &'a self,
        post_id: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn remove_reaction<'a>(
        &'a self,
        post_id: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn formatter(&self) -> Arc<dyn format::Formatter>;

    fn message_limits(&self) -> MessageLimits;

    fn bot_name(&self) -> &str;

    fn bot_user(&self) -> PlatformUser;

    fn is_bot_mentioned(&self, text: &str) -> bool;

    fn extract_prompt(&self, text: &str) -> String;

    fn is_user_allowed(&self, username: &str) -> bool;

    fn thread_message_count<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<usize>> + Send + 'a>>;

    fn disconnect<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing Platform automatically
/// implements PlatformDyn.
impl<T: Platform> PlatformDyn for T {
    fn id(&self) -> &str {
        Platform::id(self)
    }

    fn start<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<EventStream>> + Send + 'a>> {
        Box::pin(Platform::start(self))
    }

    fn create_post<'a>(
        &'a self,
        thread_id: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Post>> + Send + 'a>> {
        Box::pin(Platform::create_post(self, thread_id, content))
    }

    fn update_post<'a>(
        &'a self,
        post_id: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Post>> + Send + 'a>> {
        Box::pin(Platform::update_post(self, post_id, content))
    }

    fn delete_post<'a>(
        &'a self,
        post_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Platform::delete_post(self, post_id))
    }

    fn create_interactive_post<'a>(
        &'a self,
        thread_id: &'a str,
        content: &'a str,
        reactions: &'a [String],
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Post>> + Send + 'a>> {
        Box::pin(Platform::create_interactive_post(
            self, thread_id, content, reactions,
        ))
    }

    fn pin_post<'a>(
        &'a self,
        post_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Platform::pin_post(self, post_id))
    }

    fn unpin_post<'a>(
        &'a self,
        post_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Platform::unpin_post(self, post_id))
    }

    fn add_reaction<'a>(
        &'a self,
        post_id: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Platform::add_reaction(self, post_id, emoji))
    }

    fn remove_reaction<'a>(
        &'a self,
        post_id: &'a str,
        emoji: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Platform::remove_reaction(self, post_id, emoji))
    }

    fn formatter(&self) -> Arc<dyn format::Formatter> {
        Platform::formatter(self)
    }

    fn message_limits(&self) -> MessageLimits {
        Platform::message_limits(self)
    }

    fn bot_name(&self) -> &str {
        Platform::bot_name(self)
    }

    fn bot_user(&self) -> PlatformUser {
        Platform::bot_user(self)
    }

    fn is_bot_mentioned(&self, text: &str) -> bool {
        Platform::is_bot_mentioned(self, text)
    }

    fn extract_prompt(&self, text: &str) -> String {
        Platform::extract_prompt(self, text)
    }

    fn is_user_allowed(&self, username: &str) -> bool {
        Platform::is_user_allowed(self, username)
    }

    fn thread_message_count<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(Platform::thread_message_count(self, thread_id))
    }

    fn disconnect<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Platform::disconnect(self))
    }
}

#[cfg(test)]
mod tests {
    use super::MessageLimits;

    #[test]
    fn soft_threshold_sits_below_hard() {
        let limits = MessageLimits::default();
        assert!(limits.soft_threshold() < limits.hard_threshold);
        assert_eq!(limits.soft_threshold(), 9_000);
    }
}

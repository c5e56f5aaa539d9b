//! Streaming content executor.
//!
//! Converts append/flush operations from the assistant into chat posts
//! with low perceived latency and no duplication. Appended text grows the
//! current post in place until the soft threshold; past it the buffer is
//! split at natural boundaries and committed as finished posts.

use crate::PostId;
use crate::message::breaker;
use crate::message::ops::FlushReason;
use crate::message::tasklist::TaskListExecutor;
use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::session::SessionSignal;
use tokio::task::JoinHandle;

pub struct ContentExecutor {
    ctx: ExecutorContext,
    current_post_id: Option<PostId>,
    /// What the platform currently shows in the streaming post.
    current_post_content: String,
    /// Appended but not yet flushed.
    pending_content: String,
    flush_task: Option<JoinHandle<()>>,
    /// Set by `cancel`; suppresses flushes until the next append.
    cancelled: bool,
}

impl ContentExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            current_post_id: None,
            current_post_content: String::new(),
            pending_content: String::new(),
            flush_task: None,
            cancelled: false,
        }
    }

    pub fn current_post_id(&self) -> Option<&str> {
        self.current_post_id.as_deref()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_content.is_empty()
    }

    /// Append streamed text. Flushes immediately past the hard threshold,
    /// otherwise schedules a debounced flush.
    pub async fn append(&mut self, text: &str, tasklist: &TaskListExecutor) -> crate::Result<()> {
        self.cancelled = false;
        self.pending_content.push_str(text);

        let combined = self.current_post_content.len() + self.pending_content.len();
        if combined > self.ctx.limits().hard_threshold {
            return self.flush(FlushReason::HardThreshold, tasklist).await;
        }

        self.schedule_flush();
        Ok(())
    }

    fn schedule_flush(&mut self) {
        if self.flush_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let signals = self.ctx.signals.clone();
        let debounce = self.ctx.debounce;
        self.flush_task = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = signals
                .send(SessionSignal::FlushContent(FlushReason::LogicalBreak))
                .await;
        }));
    }

    /// Drop the pending flush timer and suppress flushes until the next
    /// append. Pending content is kept.
    pub fn cancel(&mut self) {
        if let Some(task) = self.flush_task.take() {
            task.abort();
        }
        self.cancelled = true;
    }

    /// Flush pending content to the platform.
    ///
    /// Transient platform failures never escape: the unposted tail goes
    /// back into the pending buffer and the next append retries.
    pub async fn flush(
        &mut self,
        reason: FlushReason,
        tasklist: &TaskListExecutor,
    ) -> crate::Result<()> {
        if let Some(task) = self.flush_task.take() {
            task.abort();
        }
        if self.cancelled || self.pending_content.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            thread_id = %self.ctx.key.thread_id,
            ?reason,
            pending = self.pending_content.len(),
            "flushing content"
        );

        let pending = std::mem::take(&mut self.pending_content);
        let combined_len = self.current_post_content.len() + pending.len();
        let limits = self.ctx.limits();

        let mut remaining = if self.current_post_id.is_some() {
            if combined_len <= limits.soft_threshold() {
                // Fast path: grow the current post in place.
                let mut combined = std::mem::take(&mut self.current_post_content);
                combined.push_str(&pending);
                return self.update_in_place(combined).await;
            }
            if combined_len <= limits.hard_threshold {
                // Freeze the current post at what it already shows and
                // stream the tail into a fresh post.
                self.current_post_id = None;
                self.current_post_content.clear();
                pending
            } else {
                // Over the hard threshold: split the whole buffer; the
                // first chunk lands in the existing post.
                let mut combined = std::mem::take(&mut self.current_post_content);
                combined.push_str(&pending);
                combined
            }
        } else {
            pending
        };

        loop {
            let broken = breaker::break_chunk(&remaining, &limits);
            if broken.remainder.is_empty() {
                return self.place_final_chunk(remaining, tasklist).await;
            }

            if !self.commit_chunk(&broken.first).await {
                // Transient failure: retry the whole tail on next append.
                self.pending_content = remaining;
                return Ok(());
            }
            remaining = broken.remainder;
        }
    }

    /// Grow the current post in place. On failure apply the replace
    /// policy and park the text for the next append to retry.
    async fn update_in_place(&mut self, combined: String) -> crate::Result<()> {
        let post_id = match self.current_post_id.clone() {
            Some(post_id) => post_id,
            None => {
                self.pending_content = combined;
                return Ok(());
            }
        };
        match self.ctx.update_post(&post_id, &combined).await {
            Ok(_) => {
                self.current_post_content = combined;
            }
            Err(error) => {
                tracing::warn!(%error, post_id, "content update failed, replacing");
                let _ = self.replace_failed_post(&post_id).await;
                self.current_post_id = None;
                self.current_post_content.clear();
                self.pending_content = combined;
            }
        }
        Ok(())
    }

    /// Post a finished (non-growing) chunk, reusing the current post when
    /// one exists. Returns false on a transient failure.
    async fn commit_chunk(&mut self, chunk: &str) -> bool {
        if let Some(post_id) = self.current_post_id.take() {
            match self.ctx.update_post(&post_id, chunk).await {
                Ok(_) => return true,
                Err(error) => {
                    tracing::warn!(%error, post_id, "content commit update failed, replacing");
                    if !self.replace_failed_post(&post_id).await {
                        // The stale post may still exist; never duplicate.
                        return false;
                    }
                }
            }
        }
        match self.ctx.create_post(chunk).await {
            Ok(post) => {
                self.ctx
                    .register_post(&post.id, PostMeta::role(PostRole::Content));
                true
            }
            Err(error) => {
                tracing::warn!(%error, "content commit create failed");
                false
            }
        }
    }

    /// Place the last chunk as the new streaming post, repurposing a
    /// bumped task-list post when one is offered.
    async fn place_final_chunk(
        &mut self,
        chunk: String,
        tasklist: &TaskListExecutor,
    ) -> crate::Result<()> {
        if self.current_post_id.is_some() {
            return self.update_in_place(chunk).await;
        }

        match tasklist.bump_and_get_old_post(&chunk).await? {
            Some(repurposed) => {
                self.current_post_id = Some(repurposed);
                self.current_post_content = chunk;
            }
            None => match self.ctx.create_post(&chunk).await {
                Ok(post) => {
                    self.ctx
                        .register_post(&post.id, PostMeta::role(PostRole::Content));
                    self.current_post_id = Some(post.id);
                    self.current_post_content = chunk;
                }
                Err(error) => {
                    tracing::warn!(%error, "content post create failed");
                    self.pending_content = chunk;
                }
            },
        }
        Ok(())
    }

    /// Replace policy for a post that failed to update: delete it; if the
    /// delete also fails, drop the id and log. Never create a duplicate.
    /// Returns whether the stale post is known to be gone.
    async fn replace_failed_post(&mut self, post_id: &str) -> bool {
        match self.ctx.delete_post(post_id).await {
            Ok(()) => {
                self.ctx.unregister_post(post_id);
                true
            }
            Err(error) => {
                tracing::warn!(%error, post_id, "failed to delete stale content post");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ContentExecutor;
    use crate::message::ops::FlushReason;
    use crate::message::tasklist::TaskListExecutor;
    use crate::message::test_support::test_context;
    use crate::platform::MessageLimits;

    #[tokio::test]
    async fn appends_accumulate_then_flush_in_place() {
        let (ctx, platform, _signals) = test_context();
        let tasklist = TaskListExecutor::new(ctx.clone());
        let mut content = ContentExecutor::new(ctx);

        content.append("hello ", &tasklist).await.unwrap();
        content.append("world", &tasklist).await.unwrap();
        content.flush(FlushReason::Explicit, &tasklist).await.unwrap();

        let post_id = content.current_post_id().unwrap().to_string();
        assert_eq!(platform.post_content(&post_id).unwrap(), "hello world");

        content.append("!", &tasklist).await.unwrap();
        content.flush(FlushReason::Result, &tasklist).await.unwrap();
        assert_eq!(content.current_post_id().unwrap(), post_id);
        assert_eq!(platform.post_content(&post_id).unwrap(), "hello world!");
    }

    #[tokio::test]
    async fn splits_at_a_paragraph_under_size_pressure() {
        let (ctx, platform, _signals) = test_context();
        platform.set_limits(MessageLimits {
            max_length: 16_000,
            hard_threshold: 12_000,
        });
        let tasklist = TaskListExecutor::new(ctx.clone());
        let mut content = ContentExecutor::new(ctx);

        // Five appends totaling 15,000 chars with one paragraph boundary
        // at 11,000.
        let mut pieces = vec!["a".repeat(5_000), "b".repeat(5_000)];
        pieces.push(format!("{}\n\n{}", "c".repeat(1_000), "d".repeat(1_000)));
        pieces.push("e".repeat(1_500));
        pieces.push("f".repeat(1_498));
        for piece in &pieces {
            content.append(piece, &tasklist).await.unwrap();
        }
        content.flush(FlushReason::Explicit, &tasklist).await.unwrap();

        let thread_posts = platform.thread_contents("thread-1");
        assert_eq!(thread_posts.len(), 2);
        assert_eq!(thread_posts[0].len(), 11_000);
        let current = content.current_post_id().unwrap();
        assert!(platform.post_content(current).unwrap().starts_with('d'));
    }

    #[tokio::test]
    async fn failed_update_replaces_without_duplicating() {
        let (ctx, platform, _signals) = test_context();
        let tasklist = TaskListExecutor::new(ctx.clone());
        let mut content = ContentExecutor::new(ctx);

        content.append("first", &tasklist).await.unwrap();
        content.flush(FlushReason::Explicit, &tasklist).await.unwrap();
        let old_post = content.current_post_id().unwrap().to_string();

        platform.set_fail_update(true);
        content.append(" more", &tasklist).await.unwrap();
        content.flush(FlushReason::Explicit, &tasklist).await.unwrap();
        platform.set_fail_update(false);

        // Old post was deleted, nothing new was created in its place.
        assert!(content.current_post_id().is_none());
        assert!(!platform.post_exists(&old_post));
        assert!(content.has_pending());

        // Next append retries cleanly.
        content.append("!", &tasklist).await.unwrap();
        content.flush(FlushReason::Explicit, &tasklist).await.unwrap();
        let current = content.current_post_id().unwrap();
        assert_eq!(platform.post_content(current).unwrap(), "first more!");
    }

    #[tokio::test]
    async fn cancel_keeps_pending_and_suppresses_flush() {
        let (ctx, platform, _signals) = test_context();
        let tasklist = TaskListExecutor::new(ctx.clone());
        let mut content = ContentExecutor::new(ctx);

        content.append("buffered", &tasklist).await.unwrap();
        content.cancel();
        content.flush(FlushReason::Explicit, &tasklist).await.unwrap();
        assert!(content.has_pending());
        assert_eq!(platform.post_count("thread-1"), 0);

        content.append(" text", &tasklist).await.unwrap();
        content.flush(FlushReason::Explicit, &tasklist).await.unwrap();
        let current = content.current_post_id().unwrap();
        assert_eq!(platform.post_content(current).unwrap(), "buffered text");
    }
}

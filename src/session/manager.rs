//! Session manager: the top-level coordinator.
//!
//! Owns the platform adapters, fans their events into per-thread
//! sessions, drives session lifecycle (start, follow-up, pause, resume,
//! kill), counts worktree references, coordinates auto-update prompts,
//! and maintains sticky channel summaries.

use crate::assistant::process::{AssistantProcess, SpawnOptions};
use crate::assistant::{AssistantCommand, AssistantEvent};
use crate::commands::{self, Command, PluginCommand, WorktreeCommand};
use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::message::ops::{FlushReason, SystemLevel};
use crate::message::tracker::{PostMeta, PostRole, PostTracker};
use crate::message::{ExecutorContext, MessageManager};
use crate::platform::emoji::{self, EmojiKind};
use crate::platform::{PlatformDyn, PlatformEvent, PlatformUser, Post};
use crate::session::persist::{PersistedSession, SessionStore};
use crate::session::registry::{PostIndex, SessionRegistry};
use crate::session::worktree::{WorktreeOps, WorktreeRegistry};
use crate::session::{PumpInput, Session, SessionLifecycle, SessionMeta, SessionSignal, WorktreeInfo};
use crate::{MessageApprovalDecision, PostId, ReactionAction, ReactionEvent, SessionEvent, SessionKey};
use futures::StreamExt as _;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::sync::{broadcast, mpsc};

/// Message counts offered by the context prompt, largest first trimmed
/// to what the thread actually holds.
const CONTEXT_OPTIONS: [usize; 4] = [1, 3, 5, 10];

#[derive(Debug)]
struct StickyState {
    platform_id: String,
    post_id: PostId,
    last_update: tokio::time::Instant,
}

pub struct SessionManager {
    weak_self: std::sync::Weak<SessionManager>,
    config: Arc<Config>,
    platforms: StdRwLock<HashMap<String, Arc<dyn PlatformDyn>>>,
    registry: SessionRegistry,
    post_index: Arc<PostIndex>,
    store: Arc<dyn SessionStore>,
    worktree_ops: Arc<dyn WorktreeOps>,
    worktrees: WorktreeRegistry,
    known_repo_roots: StdMutex<HashSet<PathBuf>>,
    events_tx: broadcast::Sender<SessionEvent>,
    is_shutting_down: AtomicBool,
    session_counter: AtomicU64,
    sticky: StdMutex<HashMap<String, StickyState>>,
    update_available: StdMutex<Option<String>>,
}

impl SessionManager {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn SessionStore>,
        worktree_ops: Arc<dyn WorktreeOps>,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        let manager = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            config,
            platforms: StdRwLock::new(HashMap::new()),
            registry: SessionRegistry::new(),
            post_index: Arc::new(PostIndex::new()),
            store,
            worktree_ops,
            worktrees: WorktreeRegistry::new(),
            known_repo_roots: StdMutex::new(HashSet::new()),
            events_tx,
            is_shutting_down: AtomicBool::new(false),
            session_counter: AtomicU64::new(0),
            sticky: StdMutex::new(HashMap::new()),
            update_available: StdMutex::new(None),
        });
        manager.clone().spawn_completion_listener();
        manager
    }

    /// Strong handle for spawned tasks. The manager lives for the whole
    /// process, so the upgrade cannot fail while tasks run.
    fn arc(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("session manager dropped")
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn worktrees(&self) -> &WorktreeRegistry {
        &self.worktrees
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub fn register_platform(&self, platform: Arc<dyn PlatformDyn>) {
        let id = platform.id().to_string();
        tracing::info!(platform_id = %id, "platform registered");
        self.platforms.write().unwrap().insert(id, platform);
    }

    fn platform(&self, platform_id: &str) -> Option<Arc<dyn PlatformDyn>> {
        self.platforms.read().unwrap().get(platform_id).cloned()
    }

    pub fn platform_count(&self) -> usize {
        self.platforms.read().unwrap().len()
    }

    /// Start every registered platform's event intake.
    pub async fn run(&self) -> Result<()> {
        let platforms: Vec<_> = self.platforms.read().unwrap().values().cloned().collect();
        for platform in platforms {
            let platform_id = platform.id().to_string();
            let mut stream = platform.start().await?;
            let manager = self.arc();
            tokio::spawn(async move {
                while let Some(event) = stream.next().await {
                    manager.handle_platform_event(&platform_id, event).await;
                }
                tracing::info!(platform_id, "platform stream ended");
            });
        }
        Ok(())
    }

    pub async fn handle_platform_event(&self, platform_id: &str, event: PlatformEvent) {
        match event {
            PlatformEvent::Message { post, user } => {
                self.handle_message(platform_id, post, user).await;
            }
            PlatformEvent::Reaction(reaction) => {
                self.handle_reaction(platform_id, reaction).await;
            }
            PlatformEvent::ChannelPost { channel_id } => {
                self.refresh_sticky(platform_id, &channel_id).await;
            }
        }
    }

    /// Message fan-in: follow-ups and commands for live sessions, resume
    /// for paused threads, session start on an authorized mention.
    pub async fn handle_message(&self, platform_id: &str, post: Post, user: PlatformUser) {
        let Some(platform) = self.platform(platform_id) else {
            return;
        };
        if user.username == platform.bot_name() {
            return;
        }
        let key = SessionKey::new(platform_id, &post.thread_id);

        let text = if platform.is_bot_mentioned(&post.message) {
            platform.extract_prompt(&post.message)
        } else {
            post.message.clone()
        };

        if let Some(session) = self.registry.get(&key) {
            let dynamic = session.meta.read().unwrap().dynamic_commands.clone();
            if let Some(command) =
                commands::parse(&text, &self.config.assistant.known_slash_commands, &dynamic)
            {
                self.dispatch_command(&session, command, &user).await;
            } else if text.trim_start().starts_with('!') {
                tracing::debug!(%key, text, "unknown command, ignoring");
            } else {
                self.follow_up(&session, &user, &text).await;
            }
            return;
        }

        // No live session: a paused one may be waiting in the store.
        match self.store.find_by_thread(platform_id, &post.thread_id).await {
            Ok(Some(persisted)) if persisted.is_paused => {
                if persisted.session_allowed_users.iter().any(|u| u == &user.username) {
                    if let Err(error) = self
                        .resume_paused_session(persisted, &user, Some(text))
                        .await
                    {
                        tracing::warn!(%error, %key, "resume failed");
                    }
                } else {
                    tracing::debug!(%key, user = %user.username, "resume refused: not allowed");
                }
                return;
            }
            Err(error) => tracing::warn!(%error, "persisted lookup failed"),
            _ => {}
        }

        if !platform.is_bot_mentioned(&post.message) {
            return;
        }
        if !platform.is_user_allowed(&user.username) {
            let refusal = format!(
                "Sorry {}, you are not authorized to start sessions.",
                platform.formatter().user_mention(&user.username)
            );
            if let Err(error) = platform.create_post(&post.thread_id, &refusal).await {
                tracing::warn!(%error, "refusal post failed");
            }
            return;
        }

        // Root-message commands, e.g. `@bot !worktree switch feature-x`.
        if let Some(command) =
            commands::parse(&text, &self.config.assistant.known_slash_commands, &[])
        {
            match command {
                Command::Worktree(WorktreeCommand::Switch(branch)) => {
                    if let Err(error) = self.switch_to_worktree(&key, &branch, &user).await {
                        tracing::warn!(%error, %key, "worktree switch failed");
                    }
                }
                Command::Kill => {
                    self.kill_all(platform_id, &post.thread_id, &user).await;
                }
                other => {
                    tracing::debug!(%key, ?other, "command outside a session, ignoring");
                }
            }
            return;
        }

        let (branch, prompt) = match commands::parse_branch_prefix(&text) {
            Some((branch, rest)) => (Some(branch), rest),
            None => (None, text),
        };
        if let Err(error) = self
            .start_session(platform_id, &post, &user, prompt, branch)
            .await
        {
            tracing::warn!(%error, %key, "session start failed");
            let message = format!("Could not start a session: {error}");
            if let Err(error) = platform.create_post(&post.thread_id, &message).await {
                tracing::warn!(%error, "start failure post failed");
            }
        }
    }

    /// Start a session for a thread. `branch` requests a worktree.
    pub async fn start_session(
        &self,
        platform_id: &str,
        post: &Post,
        user: &PlatformUser,
        prompt: String,
        branch: Option<String>,
    ) -> Result<()> {
        if self.is_shutting_down() {
            return Err(SessionError::Other(anyhow::anyhow!("shutting down")).into());
        }
        let platform = self
            .platform(platform_id)
            .ok_or_else(|| SessionError::Other(anyhow::anyhow!("unknown platform {platform_id}")))?;
        let key = SessionKey::new(platform_id, &post.thread_id);
        if self.registry.get(&key).is_some() {
            return Err(SessionError::AlreadyActive {
                thread_id: key.thread_id.clone(),
            }
            .into());
        }
        if self.registry.len() >= self.config.session.max_sessions {
            let message = format!(
                "Session limit reached ({} active). Try again once one finishes.",
                self.registry.len()
            );
            let _ = platform.create_post(&post.thread_id, &message).await;
            return Err(SessionError::MaxSessions {
                max: self.config.session.max_sessions,
            }
            .into());
        }

        tracing::info!(%key, owner = %user.username, "starting session");

        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut meta = SessionMeta::new(&user.username, &user.display_name, working_dir);
        meta.session_number = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        meta.first_prompt = Some(prompt.clone());
        tracing::debug!(run_id = %meta.run_id, "session run id assigned");

        let (session, mut signal_rx) = self.build_session(&platform, key.clone(), meta);

        // Session-start post carries the cancel/escape control surface.
        let start_reactions = vec![
            emoji::shortcode(EmojiKind::Cancel).to_string(),
            emoji::shortcode(EmojiKind::Escape).to_string(),
        ];
        let banner = format!(
            "Session #{} started by {} — react 🛑 to cancel, ↩️ to interrupt.",
            session.meta.read().unwrap().session_number,
            platform.formatter().user_mention(&user.username),
        );
        match platform
            .create_interactive_post(&post.thread_id, &banner, &start_reactions)
            .await
        {
            Ok(start_post) => {
                session.meta.write().unwrap().session_start_post_id = Some(start_post.id.clone());
                let messages = session.messages.lock().await;
                messages
                    .context()
                    .register_post(&start_post.id, PostMeta::role(PostRole::SessionStart));
            }
            Err(error) => tracing::warn!(%error, "session start post failed"),
        }

        self.registry.insert(session.clone());
        self.spawn_pump(&session, signal_rx.take());

        // Worktree handling before the child starts.
        if let Some(branch) = branch {
            let repo_root = session.meta.read().unwrap().working_dir.clone();
            match self.worktree_ops.find(&repo_root, &branch).await {
                Ok(Some(_existing)) if !session.meta.read().unwrap().worktree_prompt_disabled => {
                    // Defer the child until the join/skip decision.
                    {
                        let mut meta = session.meta.write().unwrap();
                        meta.queued_prompt = Some(prompt);
                        meta.pending_worktree_prompt = true;
                    }
                    session
                        .messages
                        .lock()
                        .await
                        .show_worktree_prompt(&branch)
                        .await?;
                    {
                        let mut meta = session.meta.write().unwrap();
                        meta.worktree = Some(WorktreeInfo {
                            repo_root: repo_root.clone(),
                            path: PathBuf::new(),
                            branch: branch.clone(),
                            is_owner: false,
                        });
                    }
                    self.persist(&session).await;
                    return Ok(());
                }
                _ => {
                    self.attach_worktree(&session, &repo_root, &branch).await?;
                }
            }
        }

        // Mid-thread mentions offer prior messages as context.
        let prior = platform
            .thread_message_count(&post.thread_id)
            .await
            .unwrap_or(0);
        if prior > 0 {
            let options: Vec<usize> = CONTEXT_OPTIONS
                .iter()
                .copied()
                .filter(|n| *n <= prior)
                .collect();
            if !options.is_empty() {
                session
                    .messages
                    .lock()
                    .await
                    .show_context_prompt(&prompt, Vec::new(), prior, options)
                    .await?;
                self.spawn_context_timeout(&session);
                self.persist(&session).await;
                return Ok(());
            }
        }

        self.spawn_child(&session, None).await?;
        session.set_lifecycle(SessionLifecycle::Active);
        if !prompt.trim().is_empty() {
            let _ = session
                .send(&AssistantCommand::UserMessage {
                    text: prompt,
                    files: Vec::new(),
                })
                .await;
        }
        self.persist(&session).await;
        Ok(())
    }

    /// Assemble the session object, its executor context, and channels.
    fn build_session(
        &self,
        platform: &Arc<dyn PlatformDyn>,
        key: SessionKey,
        meta: SessionMeta,
    ) -> (Arc<Session>, Option<mpsc::Receiver<SessionSignal>>) {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let (pump_tx, pump_rx) = mpsc::channel::<PumpInput>(256);
        let ctx = ExecutorContext {
            key: key.clone(),
            platform: platform.clone(),
            tracker: PostTracker::new(),
            post_index: self.post_index.clone(),
            events: self.events_tx.clone(),
            signals: signal_tx.clone(),
            debounce: std::time::Duration::from_millis(self.config.streaming.flush_debounce_ms),
            call_timeout: std::time::Duration::from_millis(
                self.config.streaming.platform_call_timeout_ms,
            ),
        };
        let messages = MessageManager::new(ctx);
        let session = Session::new(key, meta, messages, signal_tx);
        session.pump_tx.lock().unwrap().replace(pump_tx);
        session.pump_rx.lock().unwrap().replace(pump_rx);
        (session, Some(signal_rx))
    }

    /// One logical event loop per session: assistant events and timer
    /// signals funnel through here, keeping the message manager
    /// single-writer.
    fn spawn_pump(&self, session: &Arc<Session>, signal_rx: Option<mpsc::Receiver<SessionSignal>>) {
        let Some(mut signal_rx) = signal_rx else {
            return;
        };
        let Some(mut pump_rx) = session.pump_rx.lock().unwrap().take() else {
            return;
        };
        let manager = self.arc();
        let session_for_task = session.clone();
        let handle = tokio::spawn(async move {
            let session = session_for_task;
            loop {
                tokio::select! {
                    input = pump_rx.recv() => match input {
                        Some(PumpInput::Assistant(event)) => {
                            manager.on_assistant_event(&session, event).await;
                        }
                        Some(PumpInput::ChildClosed) => {
                            manager.on_child_exit(&session).await;
                        }
                        None => break,
                    },
                    signal = signal_rx.recv() => match signal {
                        Some(SessionSignal::FlushContent(reason)) => {
                            session.messages.lock().await.flush(reason).await;
                        }
                        Some(SessionSignal::SubagentTick) => {
                            session.messages.lock().await.subagent_tick().await;
                        }
                        Some(SessionSignal::ContextPromptTimeout) => {
                            session.messages.lock().await.resolve_context_timeout().await;
                        }
                        None => break,
                    },
                }
            }
        });
        session.track_task(handle);
    }

    /// Spawn (or respawn) the assistant child and wire its event stream
    /// into the pump.
    async fn spawn_child(&self, session: &Arc<Session>, resume_id: Option<String>) -> Result<()> {
        let (working_dir, skip_permissions, force_interactive) = {
            let meta = session.meta.read().unwrap();
            (
                meta.working_dir.clone(),
                meta.skip_permissions,
                meta.force_interactive,
            )
        };
        let options = SpawnOptions {
            working_dir,
            resume_session_id: resume_id,
            skip_permissions,
            force_interactive,
        };
        let (process, mut event_rx) = AssistantProcess::spawn(&self.config.assistant, &options)?;
        *session.child.lock().await = Some(process);

        let pump_tx = session.pump_tx.lock().unwrap().clone();
        let Some(pump_tx) = pump_tx else {
            return Ok(());
        };
        let forward = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if pump_tx.send(PumpInput::Assistant(event)).await.is_err() {
                    return;
                }
            }
            let _ = pump_tx.send(PumpInput::ChildClosed).await;
        });
        session.track_task(forward);
        Ok(())
    }

    async fn on_assistant_event(&self, session: &Arc<Session>, event: AssistantEvent) {
        session.touch();
        match &event {
            AssistantEvent::Init {
                session_id,
                available_slash_commands,
            } => {
                let mut meta = session.meta.write().unwrap();
                if session_id.is_some() {
                    meta.claude_session_id = session_id.clone();
                }
                meta.dynamic_commands = available_slash_commands.clone();
                return;
            }
            AssistantEvent::Result { .. } => {
                if session.lifecycle() == SessionLifecycle::Active {
                    session.set_lifecycle(SessionLifecycle::Idle);
                }
            }
            AssistantEvent::Error { message } => {
                session.meta.write().unwrap().last_error = Some(message.clone());
            }
            _ => {}
        }
        session.messages.lock().await.handle_event(event).await;
    }

    /// Assistant subprocess exit: post a status and end the session,
    /// unless it was paused (the kill was ours).
    async fn on_child_exit(&self, session: &Arc<Session>) {
        let lifecycle = session.lifecycle();
        if matches!(
            lifecycle,
            SessionLifecycle::Paused | SessionLifecycle::Ending | SessionLifecycle::Ended
        ) {
            return;
        }
        tracing::warn!(key = %session.key, "assistant exited unexpectedly");
        {
            let mut messages = session.messages.lock().await;
            messages.flush(FlushReason::Explicit).await;
            messages
                .post_system(SystemLevel::Error, "The assistant process exited.")
                .await;
        }
        self.end_session(&session.key.clone(), false).await;
    }

    /// Append a user message to the running session.
    pub async fn follow_up(&self, session: &Arc<Session>, user: &PlatformUser, text: &str) {
        if !session.is_allowed(&user.username) {
            let mut messages = session.messages.lock().await;
            if let Err(error) = messages.request_message_approval(&user.username, text).await {
                tracing::warn!(%error, "message approval request failed");
            }
            return;
        }

        session.touch();
        {
            let mut meta = session.meta.write().unwrap();
            meta.message_count += 1;
        }

        // A pending context prompt swallows follow-ups into the queue.
        {
            let mut messages = session.messages.lock().await;
            if messages.append_queued_message(text) {
                self.persist(session).await;
                return;
            }
        }

        if session.lifecycle() == SessionLifecycle::Interrupted {
            session.set_lifecycle(SessionLifecycle::Active);
        }
        if let Err(error) = session
            .send(&AssistantCommand::UserMessage {
                text: text.to_string(),
                files: Vec::new(),
            })
            .await
        {
            tracing::warn!(%error, key = %session.key, "user message delivery failed");
        }
        self.persist(session).await;
    }

    /// Reaction fan-in: session-start controls, resume, then the
    /// message manager's chain, then session-level triggers.
    pub async fn handle_reaction(&self, platform_id: &str, reaction: ReactionEvent) {
        let Some(platform) = self.platform(platform_id) else {
            return;
        };
        if reaction.username == platform.bot_name() {
            return;
        }
        let kind = emoji::normalize(&reaction.emoji);

        let Some(key) = self.post_index.lookup(&reaction.post_id) else {
            // Possibly a resume reaction on a persisted lifecycle post.
            if kind == EmojiKind::Resume && reaction.action == ReactionAction::Added {
                self.try_resume_from_post(platform_id, &reaction).await;
            }
            return;
        };

        let Some(session) = self.registry.get(&key) else {
            if kind == EmojiKind::Resume && reaction.action == ReactionAction::Added {
                self.try_resume_from_post(platform_id, &reaction).await;
            }
            return;
        };

        if !session.is_allowed(&reaction.username) {
            tracing::debug!(key = %key, user = %reaction.username, "reaction from non-allowed user ignored");
            return;
        }

        let role = {
            let messages = session.messages.lock().await;
            messages.context().tracker.lookup(&reaction.post_id)
        };
        if let Some(meta) = &role {
            if meta.role == PostRole::SessionStart && reaction.action == ReactionAction::Added {
                match kind {
                    EmojiKind::Cancel => {
                        self.cancel_session(&key, &reaction.username).await;
                        return;
                    }
                    EmojiKind::Escape => {
                        self.interrupt_session(&key, &reaction.username).await;
                        return;
                    }
                    _ => {}
                }
            }
        }

        let handled = {
            let mut messages = session.messages.lock().await;
            messages
                .handle_reaction(&reaction.post_id, kind, &reaction.username, reaction.action)
                .await
                .unwrap_or(false)
        };
        if handled {
            session.touch();
            self.persist(&session).await;
            return;
        }

        // Session-level triggers for unclaimed reactions.
        if kind == EmojiKind::BugReport && reaction.action == ReactionAction::Added {
            let last_error_post = {
                let messages = session.messages.lock().await;
                messages.last_error_post_id().map(str::to_string)
            };
            if last_error_post.as_deref() == Some(reaction.post_id.as_str()) {
                self.start_bug_report(&session).await;
            }
        }
    }

    async fn start_bug_report(&self, session: &Arc<Session>) {
        let last_error = session.meta.read().unwrap().last_error.clone();
        let mut messages = session.messages.lock().await;
        let report = crate::BugReport {
            title: last_error
                .clone()
                .unwrap_or_else(|| "Assistant session error".to_string()),
            body: format!(
                "Session {} hit an error:\n{}",
                session.key,
                last_error.unwrap_or_default()
            ),
            user_description: String::new(),
            image_urls: Vec::new(),
            image_errors: Vec::new(),
            error_context: messages.last_error_post_id().map(str::to_string),
        };
        if let Err(error) = messages.start_bug_report(report).await {
            tracing::warn!(%error, "bug report start failed");
        }
    }

    async fn try_resume_from_post(&self, platform_id: &str, reaction: &ReactionEvent) {
        match self.store.find_by_post_id(&reaction.post_id).await {
            Ok(Some(persisted))
                if persisted.is_paused
                    && persisted.lifecycle_post_id.as_deref() == Some(reaction.post_id.as_str()) =>
            {
                if !persisted
                    .session_allowed_users
                    .iter()
                    .any(|u| u == &reaction.username)
                {
                    return;
                }
                let user = PlatformUser {
                    id: reaction.username.clone(),
                    username: reaction.username.clone(),
                    display_name: reaction.username.clone(),
                };
                if let Err(error) = self.resume_paused_session(persisted, &user, None).await {
                    tracing::warn!(%error, platform_id, "resume from reaction failed");
                }
            }
            Err(error) => tracing::warn!(%error, "persisted post lookup failed"),
            _ => {}
        }
    }

    /// Rehydrate a paused session: rebuild state, respawn the child with
    /// the stored assistant session id, update the lifecycle post in
    /// place.
    pub async fn resume_paused_session(
        &self,
        persisted: PersistedSession,
        user: &PlatformUser,
        follow_up_text: Option<String>,
    ) -> Result<()> {
        let key = persisted.key();
        let platform = self.platform(&key.platform_id).ok_or_else(|| {
            SessionError::Other(anyhow::anyhow!("platform {} not registered", key.platform_id))
        })?;
        if self.registry.get(&key).is_some() {
            return Err(SessionError::AlreadyActive {
                thread_id: key.thread_id.clone(),
            }
            .into());
        }
        tracing::info!(%key, user = %user.username, "resuming session");

        let resume_id = persisted.claude_session_id.clone();
        let lifecycle_post_id = persisted.lifecycle_post_id.clone();
        let (mut meta, snapshot) = persisted.into_parts();
        meta.lifecycle = SessionLifecycle::Active;

        let (session, mut signal_rx) = self.build_session(&platform, key.clone(), meta);
        {
            let mut messages = session.messages.lock().await;
            messages.hydrate(snapshot);
            let ctx = messages.context();
            let meta = session.meta.read().unwrap();
            if let Some(post_id) = &meta.session_start_post_id {
                ctx.register_post(post_id, PostMeta::role(PostRole::SessionStart));
            }
            if let Some(post_id) = &meta.lifecycle_post_id {
                ctx.register_post(post_id, PostMeta::role(PostRole::Lifecycle));
            }
        }
        self.registry.insert(session.clone());
        self.spawn_pump(&session, signal_rx.take());

        if let Some(worktree) = session.meta.read().unwrap().worktree.clone() {
            self.worktrees
                .register(&worktree.path, &session.key.composite());
        }

        if let Err(error) = self.spawn_child(&session, resume_id).await {
            // Count the failure and give up after repeated attempts.
            let fail_count = {
                let mut meta = session.meta.write().unwrap();
                meta.resume_fail_count += 1;
                meta.lifecycle = SessionLifecycle::Paused;
                meta.resume_fail_count
            };
            self.registry.remove(&key);
            self.post_index.clear_thread(&key);
            session.abort_tasks();
            if fail_count >= self.config.session.max_resume_failures {
                let _ = self.store.soft_delete(&key.composite()).await;
                let _ = platform
                    .create_post(
                        &key.thread_id,
                        "❌ This session could not be resumed; start a new one with a mention.",
                    )
                    .await;
            } else {
                self.persist_offline(&session).await;
            }
            return Err(error);
        }

        session.meta.write().unwrap().resume_fail_count = 0;

        // Update the lifecycle post in place rather than posting again.
        if let Some(post_id) = lifecycle_post_id {
            let text = format!(
                "▶️ Session resumed by {}.",
                platform.formatter().user_mention(&user.username)
            );
            if let Err(error) = platform.update_post(&post_id, &text).await {
                tracing::debug!(%error, post_id, "lifecycle post update failed");
            }
        }

        self.persist(&session).await;

        if let Some(text) = follow_up_text {
            if !text.trim().is_empty() && !text.trim_start().starts_with('!') {
                self.follow_up(&session, user, &text).await;
            }
        }
        Ok(())
    }

    /// Cancel: user-requested stop; posts a notice and ends the session.
    pub async fn cancel_session(&self, key: &SessionKey, by: &str) {
        if self.registry.get(key).is_none() {
            return;
        }
        tracing::info!(%key, by, "cancelling session");
        // Posted directly so the notice survives ephemeral cleanup.
        if let Some(platform) = self.platform(&key.platform_id) {
            let text = format!("🛑 Session cancelled by @{by}.");
            if let Err(error) = platform.create_post(&key.thread_id, &text).await {
                tracing::warn!(%error, "cancel notice failed");
            }
        }
        self.end_session(key, false).await;
    }

    /// Interrupt: SIGINT to the child, session stays alive.
    pub async fn interrupt_session(&self, key: &SessionKey, by: &str) {
        let Some(session) = self.registry.get(key) else {
            return;
        };
        tracing::info!(%key, by, "interrupting session");
        session.interrupt_child().await;
        session.set_lifecycle(SessionLifecycle::Interrupted);
        let mut messages = session.messages.lock().await;
        messages.flush(FlushReason::Explicit).await;
        messages
            .post_system(
                SystemLevel::Warning,
                "Interrupted. Send a message to continue.",
            )
            .await;
    }

    /// Pause on idle timeout: persist, kill the child, leave a resume
    /// handle in the thread.
    pub async fn pause_session(&self, key: &SessionKey, reason: &str) {
        let Some(session) = self.registry.get(key) else {
            return;
        };
        tracing::info!(%key, reason, "pausing session");
        session.set_lifecycle(SessionLifecycle::Paused);
        {
            let mut messages = session.messages.lock().await;
            messages.flush(FlushReason::Explicit).await;
            messages.cancel_timers();
        }

        // Lifecycle post carries the resume reaction.
        let platform = self.platform(&key.platform_id);
        if let Some(platform) = platform {
            let text = format!("⏸️ Session paused ({reason}). React ▶️ to resume.");
            let reactions = vec![emoji::shortcode(EmojiKind::Resume).to_string()];
            match platform
                .create_interactive_post(&key.thread_id, &text, &reactions)
                .await
            {
                Ok(post) => {
                    session.meta.write().unwrap().lifecycle_post_id = Some(post.id);
                }
                Err(error) => tracing::warn!(%error, "lifecycle post failed"),
            }
        }

        self.persist_offline(&session).await;
        session.kill_child().await;
        session.abort_tasks();
        if let Some(worktree) = session.meta.read().unwrap().worktree.clone() {
            self.worktrees
                .unregister(&worktree.path, &key.composite());
        }
        self.registry.remove(key);
        self.post_index.clear_thread(key);
    }

    /// Tear down a session. Graceful shutdown keeps the persisted record;
    /// anything else soft-deletes it.
    pub async fn end_session(&self, key: &SessionKey, graceful: bool) {
        let Some(session) = self.registry.remove(key) else {
            return;
        };
        session.set_lifecycle(SessionLifecycle::Ending);
        {
            let mut messages = session.messages.lock().await;
            messages.teardown().await;
        }
        session.kill_child().await;
        if let Some(worktree) = session.meta.read().unwrap().worktree.clone() {
            self.worktrees
                .unregister(&worktree.path, &key.composite());
        }
        self.post_index.clear_thread(key);
        if !graceful {
            if let Err(error) = self.store.soft_delete(&key.composite()).await {
                tracing::warn!(%error, "unpersist failed");
            }
        }
        session.set_lifecycle(SessionLifecycle::Ended);
        tracing::info!(%key, graceful, "session ended");
        // Last: this may be running on the session's own pump task, and
        // an aborted task stops at its next await.
        session.abort_tasks();
    }

    /// `!kill`: terminate every session. The caller has already passed
    /// platform authorization.
    pub async fn kill_all(&self, platform_id: &str, invoking_thread: &str, user: &PlatformUser) {
        let Some(platform) = self.platform(platform_id) else {
            return;
        };
        if !platform.is_user_allowed(&user.username) {
            let refusal = format!(
                "Sorry {}, `!kill` requires platform-level authorization.",
                platform.formatter().user_mention(&user.username)
            );
            if let Err(error) = platform.create_post(invoking_thread, &refusal).await {
                tracing::warn!(%error, "kill refusal post failed");
            }
            return;
        }

        let sessions = self.registry.all();
        let count = sessions.len();
        let confirmation = format!("☠️ killing {count} active sessions.");
        if let Err(error) = platform.create_post(invoking_thread, &confirmation).await {
            tracing::warn!(%error, "kill confirmation post failed");
        }

        for session in sessions {
            if session.key.thread_id != invoking_thread {
                // Best-effort notification; a failure must not stop the kill.
                if let Some(p) = self.platform(&session.key.platform_id) {
                    let note = format!("Session terminated by @{} via !kill.", user.username);
                    if let Err(error) = p.create_post(&session.key.thread_id, &note).await {
                        tracing::warn!(%error, key = %session.key, "kill notification failed");
                    }
                }
            }
            self.end_session(&session.key.clone(), false).await;
        }

        let platforms: Vec<_> = self.platforms.read().unwrap().values().cloned().collect();
        for p in platforms {
            if let Err(error) = p.disconnect().await {
                tracing::warn!(%error, "platform disconnect failed");
            }
        }
    }

    /// Command dispatch for an existing session.
    pub async fn dispatch_command(&self, session: &Arc<Session>, command: Command, user: &PlatformUser) {
        let key = session.key.clone();

        // !kill is platform-scoped; everything else is session-scoped.
        if let Command::Kill = command {
            self.kill_all(&key.platform_id, &key.thread_id, user).await;
            return;
        }
        if !session.is_allowed(&user.username) {
            let mut messages = session.messages.lock().await;
            let text = format!("@{} is not allowed in this session.", user.username);
            messages.post_system(SystemLevel::Warning, &text).await;
            return;
        }
        session.touch();

        match command {
            Command::Stop => self.cancel_session(&key, &user.username).await,
            Command::Escape => self.interrupt_session(&key, &user.username).await,
            Command::Help => {
                let mut messages = session.messages.lock().await;
                messages
                    .post_system(SystemLevel::Info, commands::help_text())
                    .await;
            }
            Command::Invite(username) => {
                session.meta.write().unwrap().invite(&username);
                self.persist(session).await;
                let mut messages = session.messages.lock().await;
                let text = format!("@{username} can now use this session.");
                messages.post_system(SystemLevel::Success, &text).await;
            }
            Command::Kick(username) => {
                let kicked = session.meta.write().unwrap().kick(&username);
                let (level, text) = if kicked {
                    self.persist(session).await;
                    (
                        SystemLevel::Success,
                        format!("@{username} removed from this session."),
                    )
                } else {
                    (
                        SystemLevel::Warning,
                        format!("@{username} cannot be removed."),
                    )
                };
                let mut messages = session.messages.lock().await;
                messages.post_system(level, &text).await;
            }
            Command::PermissionsInteractive => {
                session.meta.write().unwrap().force_interactive = true;
                self.persist(session).await;
                let mut messages = session.messages.lock().await;
                messages
                    .post_system(
                        SystemLevel::Success,
                        "Interactive permissions enforced from the next turn.",
                    )
                    .await;
            }
            Command::PermissionsAuto => {
                let mut messages = session.messages.lock().await;
                messages
                    .post_system(
                        SystemLevel::Warning,
                        "Cannot upgrade permissions from chat.",
                    )
                    .await;
            }
            Command::Cd(path) => {
                session.meta.write().unwrap().working_dir = PathBuf::from(&path);
                self.persist(session).await;
                let mut messages = session.messages.lock().await;
                let text = format!("Working directory set to `{path}` (applies on restart).");
                messages.post_system(SystemLevel::Info, &text).await;
            }
            Command::Worktree(sub) => self.worktree_command(session, sub, user).await,
            Command::Update => {
                let available = self.update_available.lock().unwrap().clone();
                let text = match available {
                    Some(version) => format!(
                        "Running {} — update {version} available.",
                        env!("CARGO_PKG_VERSION")
                    ),
                    None => format!("Running {} — up to date.", env!("CARGO_PKG_VERSION")),
                };
                let mut messages = session.messages.lock().await;
                messages.post_system(SystemLevel::Info, &text).await;
            }
            Command::ReleaseNotes => {
                let notes = self
                    .config
                    .update
                    .release_notes
                    .clone()
                    .unwrap_or_else(|| "No release notes available.".to_string());
                let mut messages = session.messages.lock().await;
                messages.post_system(SystemLevel::Info, &notes).await;
            }
            Command::Plugin(plugin) => {
                // Plugin handling belongs to the platform adapter layer.
                let text = match plugin {
                    PluginCommand::List => "Plugins are managed by the platform adapter.".to_string(),
                    PluginCommand::Install(name) => {
                        format!("Plugin install requested: {name} (platform-managed).")
                    }
                    PluginCommand::Uninstall(name) => {
                        format!("Plugin uninstall requested: {name} (platform-managed).")
                    }
                };
                let mut messages = session.messages.lock().await;
                messages.post_system(SystemLevel::Info, &text).await;
            }
            Command::Slash { name, args } => {
                let command = if args.is_empty() {
                    format!("/{name}")
                } else {
                    format!("/{name} {args}")
                };
                if let Err(error) = session
                    .send(&AssistantCommand::SlashCommand { command })
                    .await
                {
                    tracing::warn!(%error, "slash relay failed");
                }
            }
            Command::Kill => unreachable!("handled above"),
        }
    }

    async fn worktree_command(&self, session: &Arc<Session>, sub: WorktreeCommand, user: &PlatformUser) {
        let repo_root = session.meta.read().unwrap().working_dir.clone();
        match sub {
            WorktreeCommand::List => {
                let listed = self.worktree_ops.list(&repo_root).await;
                let text = match listed {
                    Ok(worktrees) if worktrees.is_empty() => "No worktrees.".to_string(),
                    Ok(worktrees) => worktrees
                        .iter()
                        .map(|w| {
                            let refs = self.worktrees.reference_count(&w.path);
                            format!("- `{}` at {} ({refs} session(s))", w.branch, w.path.display())
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(error) => format!("Could not list worktrees: {error}"),
                };
                let mut messages = session.messages.lock().await;
                messages.post_system(SystemLevel::Info, &text).await;
            }
            WorktreeCommand::Switch(branch) | WorktreeCommand::Create(branch) => {
                if let Err(error) = self
                    .switch_to_worktree(&session.key.clone(), &branch, user)
                    .await
                {
                    let mut messages = session.messages.lock().await;
                    let text = format!("Worktree switch failed: {error}");
                    messages.post_system(SystemLevel::Error, &text).await;
                }
            }
            WorktreeCommand::Remove(branch) => {
                let found = self.worktree_ops.find(&repo_root, &branch).await;
                match found {
                    Ok(Some(worktree)) => {
                        let composite = session.key.composite();
                        if let Err(error) =
                            self.worktrees.check_removable(&worktree.path, &composite)
                        {
                            let mut messages = session.messages.lock().await;
                            messages
                                .post_system(SystemLevel::Warning, &error.to_string())
                                .await;
                            return;
                        }
                        let result = self.worktree_ops.remove(&repo_root, &worktree.path).await;
                        let (level, text) = match result {
                            Ok(()) => (SystemLevel::Success, format!("Worktree `{branch}` removed.")),
                            Err(error) => {
                                (SystemLevel::Error, format!("Worktree removal failed: {error}"))
                            }
                        };
                        let mut messages = session.messages.lock().await;
                        messages.post_system(level, &text).await;
                    }
                    Ok(None) => {
                        let mut messages = session.messages.lock().await;
                        let text = format!("No worktree for `{branch}`.");
                        messages.post_system(SystemLevel::Warning, &text).await;
                    }
                    Err(error) => {
                        let mut messages = session.messages.lock().await;
                        messages
                            .post_system(SystemLevel::Error, &error.to_string())
                            .await;
                    }
                }
            }
            WorktreeCommand::Cleanup => {
                let removed = self.collect_worktrees(&repo_root).await;
                let text = format!("Cleaned up {removed} unreferenced worktree(s).");
                let mut messages = session.messages.lock().await;
                messages.post_system(SystemLevel::Info, &text).await;
            }
            WorktreeCommand::Off => {
                {
                    let mut meta = session.meta.write().unwrap();
                    meta.worktree_prompt_disabled = true;
                    meta.pending_worktree_prompt = false;
                }
                self.persist(session).await;
                let mut messages = session.messages.lock().await;
                messages
                    .post_system(SystemLevel::Info, "Worktree prompts disabled for this session.")
                    .await;
            }
        }
    }

    /// Move a session (or a fresh one) onto a worktree for `branch`.
    pub async fn switch_to_worktree(
        &self,
        key: &SessionKey,
        branch: &str,
        user: &PlatformUser,
    ) -> Result<()> {
        if let Some(session) = self.registry.get(key) {
            let repo_root = {
                let meta = session.meta.read().unwrap();
                meta.worktree
                    .as_ref()
                    .map(|w| w.repo_root.clone())
                    .unwrap_or_else(|| meta.working_dir.clone())
            };
            // Leaving the old worktree drops its reference.
            if let Some(old) = session.meta.read().unwrap().worktree.clone() {
                self.worktrees.unregister(&old.path, &key.composite());
            }
            self.attach_worktree(&session, &repo_root, branch).await?;
            self.persist(&session).await;
            let mut messages = session.messages.lock().await;
            let text = format!("Switched to the `{branch}` worktree.");
            messages.post_system(SystemLevel::Success, &text).await;
            return Ok(());
        }

        // No session yet (root-message switch): start one on the branch.
        let post = Post {
            id: String::new(),
            message: String::new(),
            author: user.username.clone(),
            thread_id: key.thread_id.clone(),
            channel_id: None,
            is_thread_root: true,
        };
        self.start_session(
            &key.platform_id,
            &post,
            user,
            String::new(),
            Some(branch.to_string()),
        )
        .await
    }

    async fn attach_worktree(
        &self,
        session: &Arc<Session>,
        repo_root: &std::path::Path,
        branch: &str,
    ) -> Result<()> {
        let worktree = self.worktree_ops.create(repo_root, branch).await?;
        self.known_repo_roots
            .lock()
            .unwrap()
            .insert(repo_root.to_path_buf());
        self.worktrees
            .register(&worktree.path, &session.key.composite());
        let mut meta = session.meta.write().unwrap();
        meta.working_dir = worktree.path.clone();
        meta.worktree = Some(worktree);
        meta.pending_worktree_prompt = false;
        Ok(())
    }

    /// Remove unreferenced worktrees older than the configured age.
    pub async fn collect_worktrees(&self, repo_root: &std::path::Path) -> usize {
        let Ok(worktrees) = self.worktree_ops.list(repo_root).await else {
            return 0;
        };
        let mut removed = 0;
        for worktree in worktrees {
            if self.worktrees.is_referenced(&worktree.path) {
                continue;
            }
            let age = self
                .worktree_ops
                .age_hours(&worktree.path)
                .await
                .unwrap_or(0);
            if age < self.config.cleanup.max_worktree_age_hours {
                continue;
            }
            match self.worktree_ops.remove(repo_root, &worktree.path).await {
                Ok(()) => removed += 1,
                Err(error) => {
                    tracing::warn!(%error, path = %worktree.path.display(), "worktree GC failed")
                }
            }
        }
        removed
    }

    /// All repo roots that have hosted worktrees this process lifetime.
    pub fn repo_roots(&self) -> Vec<PathBuf> {
        self.known_repo_roots.lock().unwrap().iter().cloned().collect()
    }

    fn spawn_context_timeout(&self, session: &Arc<Session>) {
        let signals = session.signal_tx.clone();
        let timeout = std::time::Duration::from_secs(self.config.session.context_prompt_timeout_secs);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = signals.send(SessionSignal::ContextPromptTimeout).await;
        });
        session.track_task(handle);
    }

    /// Completion-event listener: the message-passing half of executor
    /// coordination.
    fn spawn_completion_listener(self: Arc<Self>) {
        let mut rx = self.events_tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle_completion(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "completion listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_completion(&self, event: SessionEvent) {
        let key = event.key().clone();
        let Some(session) = self.registry.get(&key) else {
            return;
        };
        match event {
            SessionEvent::QuestionComplete {
                tool_use_id,
                answers,
                ..
            } => {
                let _ = session
                    .send(&AssistantCommand::QuestionAnswer {
                        tool_use_id,
                        answers,
                    })
                    .await;
            }
            SessionEvent::ApprovalComplete {
                tool_use_id,
                kind,
                approved,
                ..
            } => {
                if kind == crate::ApprovalKind::Plan && approved {
                    session.meta.write().unwrap().plan_approved = true;
                }
                let _ = session
                    .send(&AssistantCommand::ApprovalDecision {
                        tool_use_id,
                        approved,
                    })
                    .await;
            }
            SessionEvent::MessageApprovalComplete {
                decision,
                from_user,
                original_message,
                ..
            } => {
                match decision {
                    MessageApprovalDecision::Deny => {}
                    MessageApprovalDecision::Allow | MessageApprovalDecision::Invite => {
                        if decision == MessageApprovalDecision::Invite {
                            session.meta.write().unwrap().invite(&from_user);
                            self.persist(&session).await;
                        }
                        let _ = session
                            .send(&AssistantCommand::UserMessage {
                                text: original_message,
                                files: Vec::new(),
                            })
                            .await;
                    }
                }
            }
            SessionEvent::ContextPromptComplete {
                messages,
                queued_prompt,
                queued_files,
                ..
            } => {
                session.meta.write().unwrap().needs_context_prompt = false;
                if session.child.lock().await.is_none() {
                    if let Err(error) = self.spawn_child(&session, None).await {
                        tracing::warn!(%error, %key, "deferred child spawn failed");
                        return;
                    }
                    session.set_lifecycle(SessionLifecycle::Active);
                }
                let text = if messages > 0 {
                    format!("[context: include the last {messages} thread messages]\n{queued_prompt}")
                } else {
                    queued_prompt
                };
                let _ = session
                    .send(&AssistantCommand::UserMessage {
                        text,
                        files: queued_files,
                    })
                    .await;
                self.persist(&session).await;
            }
            SessionEvent::WorktreePromptComplete { join, .. } => {
                let (branch, repo_root, queued) = {
                    let mut meta = session.meta.write().unwrap();
                    meta.pending_worktree_prompt = false;
                    (
                        meta.worktree.as_ref().map(|w| w.branch.clone()),
                        meta.worktree
                            .as_ref()
                            .map(|w| w.repo_root.clone())
                            .unwrap_or_else(|| meta.working_dir.clone()),
                        meta.queued_prompt.take().unwrap_or_default(),
                    )
                };
                if join {
                    if let Some(branch) = branch {
                        if let Err(error) = self.attach_worktree(&session, &repo_root, &branch).await
                        {
                            tracing::warn!(%error, "worktree join failed");
                        }
                    }
                } else {
                    session.meta.write().unwrap().worktree = None;
                }
                if session.child.lock().await.is_none() {
                    if let Err(error) = self.spawn_child(&session, None).await {
                        tracing::warn!(%error, %key, "deferred child spawn failed");
                        return;
                    }
                    session.set_lifecycle(SessionLifecycle::Active);
                }
                if !queued.trim().is_empty() {
                    let _ = session
                        .send(&AssistantCommand::UserMessage {
                            text: queued,
                            files: Vec::new(),
                        })
                        .await;
                }
                self.persist(&session).await;
            }
            SessionEvent::UpdatePromptComplete { update_now, .. } => {
                if update_now {
                    self.apply_update().await;
                } else {
                    self.schedule_update_retry();
                }
            }
            SessionEvent::BugReportComplete {
                approved, report, ..
            } => {
                tracing::info!(%key, approved, title = %report.title, "bug report resolved");
            }
        }
    }

    /// Record that an update is available and ask every active thread.
    /// Versions at or below the running one are ignored.
    pub async fn broadcast_update_prompt(&self, version: &str) {
        if let (Ok(offered), Ok(running)) = (
            semver::Version::parse(version),
            semver::Version::parse(env!("CARGO_PKG_VERSION")),
        ) {
            if offered <= running {
                tracing::debug!(version, "offered update is not newer, ignoring");
                return;
            }
        }
        *self.update_available.lock().unwrap() = Some(version.to_string());
        for session in self.registry.all() {
            {
                let mut messages = session.messages.lock().await;
                if let Err(error) = messages.show_update_prompt(version).await {
                    tracing::warn!(%error, key = %session.key, "update prompt failed");
                    continue;
                }
            }
            // Unanswered prompts force the update after the timeout.
            let manager = self.arc();
            let session_for_task = session.clone();
            let timeout =
                std::time::Duration::from_secs(self.config.update.prompt_timeout_secs);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let still_pending = session_for_task.messages.lock().await.has_pending_update_prompt();
                if still_pending {
                    tracing::info!(key = %session_for_task.key, "update prompt timed out, forcing update");
                    manager.apply_update().await;
                }
            });
            session.track_task(handle);
        }
    }

    async fn apply_update(&self) {
        let version = self.update_available.lock().unwrap().clone();
        let Some(version) = version else {
            return;
        };
        tracing::info!(version, "applying update: shutting down for restart");
        self.shutdown(true).await;
    }

    fn schedule_update_retry(&self) {
        let manager = self.arc();
        let delay = std::time::Duration::from_secs(self.config.update.defer_retry_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let version = manager.update_available.lock().unwrap().clone();
            if let Some(version) = version {
                manager.broadcast_update_prompt(&version).await;
            }
        });
    }

    /// Persist a live session (non-paused form).
    pub async fn persist(&self, session: &Arc<Session>) {
        let record = {
            let snapshot = session.messages.lock().await.snapshot();
            let meta = session.meta.read().unwrap();
            PersistedSession::from_parts(&session.key, &meta, &snapshot)
        };
        if let Err(error) = self.store.save(&record).await {
            tracing::warn!(%error, key = %session.key, "persist failed; continuing in memory");
        }
    }

    /// Persist with `is_paused` semantics (lifecycle already Paused).
    async fn persist_offline(&self, session: &Arc<Session>) {
        self.persist(session).await;
    }

    /// Graceful shutdown: persist every session as paused, tell the
    /// threads, kill children, disconnect platforms.
    pub async fn shutdown(&self, graceful: bool) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        tracing::info!(graceful, "shutting down");
        for session in self.registry.all() {
            if graceful {
                let platform = self.platform(&session.key.platform_id);
                session.set_lifecycle(SessionLifecycle::Paused);
                {
                    let mut messages = session.messages.lock().await;
                    messages.flush(FlushReason::Explicit).await;
                    messages.cancel_timers();
                }
                if let Some(platform) = platform {
                    let reactions = vec![emoji::shortcode(EmojiKind::Resume).to_string()];
                    match platform
                        .create_interactive_post(
                            &session.key.thread_id,
                            "🤖 Bot shutting down; react ▶️ to resume once it returns.",
                            &reactions,
                        )
                        .await
                    {
                        Ok(post) => {
                            session.meta.write().unwrap().lifecycle_post_id = Some(post.id);
                        }
                        Err(error) => tracing::warn!(%error, "shutdown post failed"),
                    }
                }
                self.persist_offline(&session).await;
                session.kill_child().await;
                session.abort_tasks();
                self.registry.remove(&session.key);
                self.post_index.clear_thread(&session.key);
            } else {
                self.end_session(&session.key.clone(), false).await;
            }
        }
        let platforms: Vec<_> = self.platforms.read().unwrap().values().cloned().collect();
        for platform in platforms {
            if let Err(error) = platform.disconnect().await {
                tracing::warn!(%error, "platform disconnect failed");
            }
        }
    }

    /// Rate-limited per-channel summary of active sessions.
    pub async fn refresh_sticky(&self, platform_id: &str, channel_id: &str) {
        if !self.config.sticky.enabled {
            return;
        }
        let Some(platform) = self.platform(platform_id) else {
            return;
        };
        let min_interval =
            std::time::Duration::from_secs(self.config.sticky.min_update_interval_secs);
        let existing = {
            let sticky = self.sticky.lock().unwrap();
            match sticky.get(channel_id) {
                Some(state) if state.last_update.elapsed() < min_interval => return,
                Some(state) => Some(state.post_id.clone()),
                None => None,
            }
        };

        let sessions = self.registry.for_platform(platform_id);
        let mut content = platform.formatter().bold("Active sessions");
        content.push('\n');
        if sessions.is_empty() {
            content.push_str("_none_");
        } else {
            for session in &sessions {
                let meta = session.meta.read().unwrap();
                content.push_str(&format!(
                    "- #{} {} — {} ({})\n",
                    meta.session_number,
                    meta.title.as_deref().unwrap_or("untitled"),
                    meta.owner,
                    meta.lifecycle,
                ));
            }
        }

        let post_id = match existing {
            Some(post_id) => match platform.update_post(&post_id, &content).await {
                Ok(_) => Some(post_id),
                Err(_) => match platform.create_post(channel_id, &content).await {
                    Ok(post) => Some(post.id),
                    Err(error) => {
                        tracing::debug!(%error, "sticky create failed");
                        None
                    }
                },
            },
            None => match platform.create_post(channel_id, &content).await {
                Ok(post) => Some(post.id),
                Err(error) => {
                    tracing::debug!(%error, "sticky create failed");
                    None
                }
            },
        };
        if let Some(post_id) = post_id {
            self.sticky.lock().unwrap().insert(
                channel_id.to_string(),
                StickyState {
                    platform_id: platform_id.to_string(),
                    post_id,
                    last_update: tokio::time::Instant::now(),
                },
            );
        }
    }

    /// Re-render every channel summary the manager already tracks.
    pub async fn refresh_tracked_stickies(&self) {
        let tracked: Vec<(String, String)> = self
            .sticky
            .lock()
            .unwrap()
            .iter()
            .map(|(channel, state)| (state.platform_id.clone(), channel.clone()))
            .collect();
        for (platform_id, channel_id) in tracked {
            self.refresh_sticky(&platform_id, &channel_id).await;
        }
    }

    /// Restore persisted sessions at process start. Paused sessions wait
    /// for a user to resume them; nothing is respawned eagerly.
    pub async fn restore_persisted(&self) {
        match self.store.load().await {
            Ok(persisted) => {
                tracing::info!(count = persisted.len(), "persisted sessions found");
                let max = persisted
                    .values()
                    .map(|p| p.session_number)
                    .max()
                    .unwrap_or(0);
                self.session_counter.store(max, Ordering::SeqCst);
            }
            Err(error) => tracing::warn!(%error, "persisted session load failed"),
        }
    }
}

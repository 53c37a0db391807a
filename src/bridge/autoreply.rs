//! Unattended-mode auto-replies.
//!
//! Each sender gets a lane: a task fed by its own queue, so one sender's messages are
//! answered strictly one after another while different senders proceed independently.
//! A lane runs [`reply_to`] for every message it receives; failures are logged and never
//! leave the lane. Lanes with nothing queued are closed the next time work arrives, and
//! messages still queued when unattended mode is switched off are dropped unanswered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::UnattendedMode;
use crate::bridge::conversation::{ConversationStore, ConversationTurn, Role};
use crate::chat::{ChatMessage, ChatPlatform};
use crate::llm::{LanguageModel, UpstreamError};
use crate::logutil::{chunk_utf8, truncate_for_log};
use crate::meshtastic::{LinkError, MeshLink};
use crate::metrics;
use crate::validation::{parse_node_id, InputError};

/// Radio channel auto-replies are sent on (the destination makes them direct messages).
const REPLY_CHANNEL_INDEX: u32 = 0;

#[derive(Debug, thiserror::Error)]
pub enum AutoReplyError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("cannot address reply: {0}")]
    Destination(#[from] InputError),
    #[error("radio send failed: {0}")]
    Link(#[from] LinkError),
}

/// What a single auto-reply turn did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Sent(String),
    /// The model answered with nothing; no state changed beyond the user turn.
    Empty,
}

/// Settings and collaborators shared by every lane.
pub struct ReplyContext {
    pub store: ConversationStore,
    pub model: Arc<dyn LanguageModel>,
    pub link: Arc<dyn MeshLink>,
    pub chat: Arc<dyn ChatPlatform>,
    pub relay_channel_id: String,
    pub system_prompt: String,
    pub timeout: Duration,
    pub max_text_bytes: usize,
}

/// Answer one inbound message from `sender_id`.
///
/// The user turn is recorded first. The model sees the system prompt followed by the
/// sender's full history. On timeout or upstream failure nothing else happens.
pub async fn reply_to(ctx: &ReplyContext, sender_id: &str, text: &str) -> Result<ReplyOutcome, AutoReplyError> {
    ctx.store.append_user_turn(sender_id, text);

    let mut prompt = vec![ConversationTurn::new(Role::System, ctx.system_prompt.clone())];
    prompt.extend(ctx.store.history_for(sender_id));

    let reply = tokio::time::timeout(ctx.timeout, ctx.model.complete(&prompt))
        .await
        .map_err(|_| UpstreamError::Timeout(ctx.timeout))??;
    let reply = reply.trim();
    if reply.is_empty() {
        debug!("Language model returned an empty reply for {}", sender_id);
        return Ok(ReplyOutcome::Empty);
    }

    ctx.store.append_assistant_turn(sender_id, reply);

    let destination = parse_node_id(sender_id)?;
    for chunk in chunk_utf8(reply, ctx.max_text_bytes) {
        ctx.link.send_text(&chunk, REPLY_CHANNEL_INDEX, Some(destination)).await?;
    }

    let echo = ChatMessage::text(format!("**[Auto-reply]** to {}: {}", sender_id, reply));
    if let Err(e) = ctx.chat.send(&ctx.relay_channel_id, echo).await {
        warn!("Failed to echo auto-reply for {}: {}", sender_id, e);
    }
    Ok(ReplyOutcome::Sent(reply.to_string()))
}

struct Lane {
    tx: mpsc::UnboundedSender<String>,
    /// Messages sent to the lane and not yet finished.
    pending: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

async fn run_lane(
    ctx: Arc<ReplyContext>,
    mode: UnattendedMode,
    sender_id: String,
    pending: Arc<AtomicUsize>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if mode.is_enabled() {
            answer(&ctx, &sender_id, &text).await;
        } else {
            debug!("Unattended mode is off; dropping queued message from {}", sender_id);
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    debug!("Auto-reply lane for {} closed", sender_id);
}

async fn answer(ctx: &ReplyContext, sender_id: &str, text: &str) {
    match reply_to(ctx, sender_id, text).await {
        Ok(ReplyOutcome::Sent(reply)) => {
            metrics::inc_autoreply_sent();
            info!("Auto-replied to {}: {}", sender_id, truncate_for_log(&reply, 120));
        }
        Ok(ReplyOutcome::Empty) => {}
        Err(AutoReplyError::Upstream(e)) => {
            metrics::inc_autoreply_failed();
            warn!("Auto-reply to {} skipped: {}", sender_id, e);
        }
        Err(e) => {
            metrics::inc_autoreply_failed();
            error!("Auto-reply to {} failed: {}", sender_id, e);
        }
    }
}

/// Owns the per-sender lanes. Lives on the bridge loop.
pub struct AutoReplyEngine {
    ctx: Arc<ReplyContext>,
    mode: UnattendedMode,
    lanes: HashMap<String, Lane>,
}

impl AutoReplyEngine {
    pub fn new(ctx: ReplyContext, mode: UnattendedMode) -> Self {
        Self {
            ctx: Arc::new(ctx),
            mode,
            lanes: HashMap::new(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.ctx.store
    }

    /// Queue `text` on the sender's lane, starting the lane if needed. Returns at once.
    pub fn handle(&mut self, sender_id: &str, text: &str) {
        self.close_idle_lanes();
        let mut pending = text.to_string();
        if let Some(lane) = self.lanes.get(sender_id) {
            lane.pending.fetch_add(1, Ordering::AcqRel);
            match lane.tx.send(pending) {
                Ok(()) => return,
                // The lane task died; start a fresh one below.
                Err(mpsc::error::SendError(returned)) => pending = returned,
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = Arc::new(AtomicUsize::new(1));
        let handle = tokio::spawn(run_lane(
            self.ctx.clone(),
            self.mode.clone(),
            sender_id.to_string(),
            counter.clone(),
            rx,
        ));
        if tx.send(pending).is_err() {
            warn!("Auto-reply lane for {} closed before first message", sender_id);
        }
        self.lanes.insert(
            sender_id.to_string(),
            Lane {
                tx,
                pending: counter,
                handle,
            },
        );
    }

    /// Drop lanes that have finished everything sent to them; their tasks then end.
    fn close_idle_lanes(&mut self) {
        self.lanes.retain(|_, lane| lane.pending.load(Ordering::Acquire) > 0);
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Stop accepting work and wait for every queued reply to finish.
    pub async fn shutdown(self) {
        let mut handles = Vec::with_capacity(self.lanes.len());
        for (_, lane) in self.lanes {
            drop(lane.tx);
            handles.push(lane.handle);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Auto-reply lane panicked: {}", e);
            }
        }
    }
}

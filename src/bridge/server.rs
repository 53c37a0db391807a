//! The bridge event loop.
//!
//! [`BridgeServer::run`] owns all bridge state (sessions, auto-reply lanes, the
//! unattended flag) and processes one item at a time: mesh events from the relay queue,
//! chat interactions from the gateway, and a one-second housekeeping tick that expires
//! sessions, sends the device keepalive and logs metrics. Every handler logs its own
//! failures; nothing a handler does can end the loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::bridge::autoreply::{AutoReplyEngine, ReplyContext};
use crate::bridge::commands::{CommandDispatcher, CommandReply, RemoteCommand, DEFAULT_TRACE_HOP_LIMIT};
use crate::bridge::conversation::ConversationStore;
use crate::bridge::directory::NodeDirectory;
use crate::bridge::relay::{BridgeEvent, InboundMeshMessage};
use crate::bridge::views::{
    device_info_pages, node_detail_page, node_list_pages, parse_custom_id, render, NodeCommand, Session,
    SessionKind, SessionManager, UiPageState, ViewAction, ViewOutcome, EXPIRED_NOTICE,
};
use crate::bridge::UnattendedMode;
use crate::chat::{ChatMessage, ChatPlatform, Interaction, InteractionKind, InteractionResponse};
use crate::config::Config;
use crate::llm::LanguageModel;
use crate::logutil::{escape_log, truncate_for_log};
use crate::meshtastic::{LinkError, MeshLink};
use crate::metrics;
use crate::validation::{parse_node_id, validate_mesh_text};

/// Runtime settings of the bridge, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub relay_channel_id: String,
    pub page_size: usize,
    pub session_timeout: Duration,
    pub unattended_at_startup: bool,
    pub max_text_bytes: usize,
    pub default_lora_channel: u32,
    /// `None` disables the device keepalive.
    pub heartbeat_interval: Option<Duration>,
    /// `None` disables the periodic metrics line.
    pub stats_interval: Option<Duration>,
    pub system_prompt: String,
    pub llm_timeout: Duration,
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
                relay_channel_id: config.discord.channel_id.clone(),
            page_size: config.bridge.page_size,
            session_timeout: Duration::from_secs(config.bridge.session_timeout_seconds),
            unattended_at_startup: config.bridge.unattended_at_startup,
            max_text_bytes: config.bridge.max_text_bytes,
            default_lora_channel: config.bridge.default_lora_channel,
            heartbeat_interval: nonzero_secs(config.meshtastic.heartbeat_interval_seconds),
            stats_interval: nonzero_secs(config.bridge.stats_interval_seconds),
            system_prompt: config.llm.system_prompt.clone(),
            llm_timeout: config.llm.timeout(),
        }
    }
}

pub struct BridgeServer {
    settings: BridgeSettings,
    link: Arc<dyn MeshLink>,
    chat: Arc<dyn ChatPlatform>,
    directory: NodeDirectory,
    dispatcher: CommandDispatcher,
    sessions: SessionManager,
    autoreply: AutoReplyEngine,
    unattended: UnattendedMode,
    last_heartbeat: Instant,
    last_stats: Instant,
}

impl BridgeServer {
    pub fn new(
        settings: BridgeSettings,
        link: Arc<dyn MeshLink>,
        chat: Arc<dyn ChatPlatform>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let unattended = UnattendedMode::new(settings.unattended_at_startup);
        let dispatcher = CommandDispatcher::new(
            link.clone(),
            chat.clone(),
            unattended.clone(),
            settings.default_lora_channel,
        );
        let autoreply = AutoReplyEngine::new(
            ReplyContext {
                store: ConversationStore::new(),
                model,
                link: link.clone(),
                chat: chat.clone(),
                relay_channel_id: settings.relay_channel_id.clone(),
                system_prompt: settings.system_prompt.clone(),
                timeout: settings.llm_timeout,
                max_text_bytes: settings.max_text_bytes,
            },
            unattended.clone(),
        );
        let now = Instant::now();
        Self {
            directory: NodeDirectory::new(link.clone()),
            sessions: SessionManager::new(settings.session_timeout),
            settings,
            link,
            chat,
            dispatcher,
            autoreply,
            unattended,
            last_heartbeat: now,
            last_stats: now,
        }
    }

    pub fn unattended(&self) -> &UnattendedMode {
        &self.unattended
    }

    pub fn conversations(&self) -> &ConversationStore {
        self.autoreply.store()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Senders with auto-replies still queued or running.
    pub fn active_reply_lanes(&self) -> usize {
        self.autoreply.active_lanes()
    }

    /// Run until Ctrl-C or until the interaction stream ends, then drain auto-replies.
    ///
    /// A closed mesh event queue means the device link dropped; the loop keeps serving
    /// chat so commands report the link error instead of going silent.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<BridgeEvent>,
        mut interactions: mpsc::UnboundedReceiver<Interaction>,
    ) -> Result<()> {
        info!(
            "Bridge running (relay channel {}, unattended {})",
            self.settings.relay_channel_id,
            if self.unattended.is_enabled() { "ON" } else { "OFF" }
        );
        let presence = UnattendedMode::presence_text(self.unattended.is_enabled());
        if let Err(e) = self.chat.set_presence(presence).await {
            debug!("Initial presence not set: {}", e);
        }

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.housekeeping(Instant::now()).await;
                }
                event = events.recv(), if events_open => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Mesh event queue closed; the device link is down");
                            events_open = false;
                        }
                    }
                }
                interaction = interactions.recv() => {
                    match interaction {
                        Some(interaction) => self.handle_interaction(interaction).await,
                        None => {
                            info!("Chat interaction stream ended");
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Wait for in-flight auto-replies to finish.
    pub async fn shutdown(self) {
        info!("Bridge stopping: {}", metrics::snapshot());
        self.autoreply.shutdown().await;
    }

    pub async fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::MeshText(msg) => self.handle_mesh_text(msg).await,
            BridgeEvent::Traceroute { destination, route } => {
                let text = format!("Traceroute to {}: {}", destination, route.join(" > "));
                info!("{}", text);
                if let Err(e) = self.chat.send(&self.settings.relay_channel_id, ChatMessage::text(text)).await {
                    warn!("Failed to relay traceroute result: {}", e);
                }
            }
        }
    }

    async fn handle_mesh_text(&mut self, msg: InboundMeshMessage) {
        info!(
            "Mesh text from {} on channel {}: {}",
            msg.sender_label(),
            msg.channel_index,
            truncate_for_log(&msg.text, 200)
        );
        let echo = ChatMessage::text(format!("**[Mesh]** Message from {}: {}", msg.sender_label(), msg.text));
        match self.chat.send(&self.settings.relay_channel_id, echo).await {
            Ok(_) => metrics::inc_mesh_text_relayed(),
            Err(e) => warn!("Failed to relay mesh text from {}: {}", msg.sender_label(), e),
        }

        if !self.unattended.is_enabled() {
            return;
        }
        match &msg.sender_id {
            Some(sender) => self.autoreply.handle(sender, &msg.text),
            None => debug!("Not auto-replying to a message without a sender"),
        }
    }

    pub async fn handle_interaction(&mut self, interaction: Interaction) {
        match &interaction.kind {
            InteractionKind::Command { name, options } => {
                info!("/{} from {}", name, escape_log(interaction.user.label()));
                match self.dispatcher.dispatch(name, options).await {
                    CommandReply::Message(msg) => self.respond(&interaction, InteractionResponse::Message(msg)).await,
                    CommandReply::OpenView(kind) => self.open_view(kind, &interaction).await,
                }
            }
            InteractionKind::Component { custom_id, values } => {
                let parsed = parse_custom_id(custom_id)
                    .map(|(id, name)| (id, ViewAction::from_component(name, values)));
                self.handle_view_action(&interaction, parsed).await;
            }
            InteractionKind::PromptSubmit { custom_id, fields } => {
                let parsed = parse_custom_id(custom_id).map(|(id, name)| (id, ViewAction::from_prompt(name, fields)));
                self.handle_view_action(&interaction, parsed).await;
            }
        }
    }

    async fn respond(&self, interaction: &Interaction, response: InteractionResponse) {
        if let Err(e) = self.chat.respond(interaction, response).await {
            warn!("Failed to answer interaction {}: {}", interaction.id, e);
        }
    }

    async fn open_view(&mut self, kind: SessionKind, interaction: &Interaction) {
        let now = Utc::now();
        let pages = match kind {
            SessionKind::NodeList => node_list_pages("Mesh Nodes", &self.directory.snapshot(), self.settings.page_size, now),
            SessionKind::DmPicker => node_list_pages(
                "Send a direct message",
                &self.directory.snapshot(),
                self.settings.page_size,
                now,
            ),
            SessionKind::DeviceInfo => device_info_pages(&self.link.describe_device(), &self.link.list_channels()),
            SessionKind::NodeActions => {
                warn!("Node action views are opened from a node list, not a command");
                return;
            }
        };
        let session = Session::new(kind, UiPageState::new(pages), interaction.token.clone());
        let message = render(&session);
        let id = self.sessions.insert(session);
        debug!("Opened {:?} session {}", kind, id);
        if let Err(e) = self.chat.respond(interaction, InteractionResponse::Message(message)).await {
            warn!("Failed to open {:?} view: {}", kind, e);
            self.sessions.remove(&id);
        }
    }

    async fn handle_view_action(&mut self, interaction: &Interaction, parsed: Option<(Uuid, Option<ViewAction>)>) {
        let expired = InteractionResponse::Message(ChatMessage::text(EXPIRED_NOTICE).ephemeral());
        let Some((session_id, action)) = parsed else {
            self.respond(interaction, expired).await;
            return;
        };
        let applied = self
            .sessions
            .active_mut(&session_id, Instant::now())
            .map(|session| action.map(|a| (session.apply(a), render(session))));
        let (outcome, rendered) = match applied {
            None => {
                debug!("Interaction for unknown or expired session {}", session_id);
                self.respond(interaction, expired).await;
                return;
            }
            Some(None) => {
                self.respond(interaction, InteractionResponse::Acknowledge).await;
                return;
            }
            Some(Some(applied)) => applied,
        };

        match outcome {
            ViewOutcome::Render | ViewOutcome::Ignored => {
                self.respond(interaction, InteractionResponse::Update(rendered)).await;
            }
            ViewOutcome::Prompt(prompt) => {
                self.respond(interaction, InteractionResponse::Prompt(prompt)).await;
            }
            ViewOutcome::OpenDetail(node) => {
                let page = node_detail_page(&node, Utc::now());
                let detail = Session::new(
                    SessionKind::NodeActions,
                    UiPageState::new(vec![page]),
                    interaction.token.clone(),
                );
                let message = render(&detail);
                let id = self.sessions.insert(detail);
                if let Err(e) = self.chat.respond(interaction, InteractionResponse::Message(message)).await {
                    warn!("Failed to open node detail for {}: {}", node.id, e);
                    self.sessions.remove(&id);
                }
            }
            ViewOutcome::Execute { node_id, command } => {
                self.sessions.remove(&session_id);
                let result = self.run_node_command(&node_id, command).await;
                self.respond(interaction, InteractionResponse::Update(result)).await;
            }
            ViewOutcome::Dismiss => {
                if let Some(session) = self.sessions.remove(&session_id) {
                    self.respond(interaction, InteractionResponse::Acknowledge).await;
                    if let Err(e) = self.chat.delete_original(&session.token).await {
                        warn!("Failed to delete dismissed view: {}", e);
                    }
                }
            }
        }
    }

    /// Run a view's node command; the returned message replaces the view.
    async fn run_node_command(&self, node_id: &str, command: NodeCommand) -> ChatMessage {
        let destination = match parse_node_id(node_id) {
            Ok(d) => d,
            Err(e) => return ChatMessage::text(format!("Invalid node: {}", e)),
        };
        let remote = match command {
            NodeCommand::DirectMessage(text) => match validate_mesh_text(&text) {
                Ok(message) => RemoteCommand::Message { destination, message },
                Err(e) => return ChatMessage::text(format!("Invalid arguments: {}", e)),
            },
            NodeCommand::Traceroute => RemoteCommand::Trace {
                destination,
                hop_limit: DEFAULT_TRACE_HOP_LIMIT as u32,
                channel_index: 0,
            },
            NodeCommand::Location => {
                return match self.link.request_position(destination, 0).await {
                    Ok(()) => ChatMessage::text(format!("Location request sent to {}.", node_id)),
                    Err(e) => location_error(node_id, e),
                };
            }
        };
        match self.dispatcher.execute(remote).await {
            Ok(CommandReply::Message(msg)) => msg,
            Ok(CommandReply::OpenView(_)) => ChatMessage::text("Done."),
            Err(e) => {
                warn!("View command for {} failed: {}", node_id, e);
                ChatMessage::text(e.to_string())
            }
        }
    }

    /// Expire idle sessions, keep the device link alive, log metrics.
    pub async fn housekeeping(&mut self, now: Instant) {
        self.expire_sessions(now).await;

        if let Some(every) = self.settings.heartbeat_interval {
            if now.duration_since(self.last_heartbeat) >= every {
                self.last_heartbeat = now;
                match self.link.send_heartbeat().await {
                    Ok(()) => debug!("Device heartbeat sent"),
                    Err(e) => warn!("Device heartbeat failed: {}", e),
                }
            }
        }

        if let Some(every) = self.settings.stats_interval {
            if now.duration_since(self.last_stats) >= every {
                self.last_stats = now;
                info!(
                    "Bridge stats: {} | live sessions={} lanes={} conversations={}",
                    metrics::snapshot(),
                    self.sessions.len(),
                    self.autoreply.active_lanes(),
                    self.conversations().sender_count()
                );
            }
        }
    }

    /// Strip controls from every expired session's message.
    pub async fn expire_sessions(&mut self, now: Instant) {
        for session in self.sessions.take_expired(now) {
            debug!("Session {} ({:?}) expired", session.id, session.kind);
            let inert = render(&session).without_controls();
            if let Err(e) = self.chat.edit_original(&session.token, inert).await {
                debug!("Could not strip controls from expired session {}: {}", session.id, e);
            }
        }
    }
}

fn location_error(node_id: &str, e: LinkError) -> ChatMessage {
    warn!("Location request to {} failed: {}", node_id, e);
    ChatMessage::text(format!("Error requesting location from {}: {}", node_id, e))
}

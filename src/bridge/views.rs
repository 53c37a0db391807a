//! # Interactive Session Views
//!
//! Paginated, stateful views attached to a single chat message: the node list, the
//! device info pages, the DM node picker and the per-node action view.
//!
//! A [`Session`] holds its own snapshot ([`UiPageState`]) taken when it was opened and a
//! [`ViewState`]. Control presses arrive as [`ViewAction`]s; [`Session::apply`] is the
//! transition function and [`render`] is a pure function from the session to the
//! message (including only the controls valid in the current state).
//!
//! Controls carry custom ids of the form `mc:<session uuid>:<action>`.
//!
//! ```text
//! ListPage(i) --prev/next--> ListPage(i -/+ 1)          (edge buttons not rendered)
//! ListPage(i) --select-->    new NodeDetail session      (node list)
//!                            DmCompose                   (DM picker, opens prompt)
//! NodeDetail  --actions-->   ActionMenu
//! ActionMenu  --message-->   DmCompose                   (opens prompt)
//! ActionMenu  --traceroute/location--> run, terminate
//! DmCompose   --submit-->    send DM, terminate
//! DmCompose   --select/prev/next--> as ListPage             (DM picker, prompt closed)
//! any         --dismiss-->   delete message, terminate
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::chat::{ActionRow, Button, ButtonStyle, ChatMessage, Component, Embed, SelectMenu, SelectOption, TextPrompt};
use crate::meshtastic::{ChannelInfo, ChannelRole, DeviceDescription, MeshNode, MAX_PAYLOAD_LEN};
use crate::metrics;

pub const CUSTOM_ID_PREFIX: &str = "mc";
/// Field id of the DM prompt's single text input.
pub const PROMPT_FIELD_ID: &str = "text";
pub const EXPIRED_NOTICE: &str = "This session has expired.";

const COLOR_MESH: u32 = 0x67ea94;
const COLOR_DEVICE: u32 = 0x5865f2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    NodeList,
    DeviceInfo,
    DmPicker,
    NodeActions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    ListPage(usize),
    NodeDetail(String),
    ActionMenu(String),
    DmCompose(String),
}

/// One pre-rendered page and the nodes it shows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub embed: Embed,
    pub nodes: Vec<MeshNode>,
}

/// Pages of a session plus the current index, which is always a valid page.
#[derive(Debug, Clone, PartialEq)]
pub struct UiPageState {
    pages: Vec<Page>,
    current: usize,
}

impl UiPageState {
    /// An empty page list is replaced by a single placeholder page.
    pub fn new(mut pages: Vec<Page>) -> Self {
        if pages.is_empty() {
            pages.push(Page {
                embed: Embed::new("Nothing to show"),
                nodes: Vec::new(),
            });
        }
        Self { pages, current: 0 }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_page(&self) -> &Page {
        &self.pages[self.current]
    }

    pub fn has_previous(&self) -> bool {
        self.current > 0
    }

    pub fn has_next(&self) -> bool {
        self.current + 1 < self.pages.len()
    }

    fn previous(&mut self) -> bool {
        if self.has_previous() {
            self.current -= 1;
            true
        } else {
            false
        }
    }

    fn next(&mut self) -> bool {
        if self.has_next() {
            self.current += 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewAction {
    Previous,
    Next,
    Select(String),
    Actions,
    Message,
    Traceroute,
    Location,
    Back,
    Dismiss,
    /// Text submitted from the DM prompt.
    Compose(String),
}

impl ViewAction {
    fn name(&self) -> &'static str {
        match self {
            ViewAction::Previous => "prev",
            ViewAction::Next => "next",
            ViewAction::Select(_) => "select",
            ViewAction::Actions => "actions",
            ViewAction::Message => "message",
            ViewAction::Traceroute => "traceroute",
            ViewAction::Location => "location",
            ViewAction::Back => "back",
            ViewAction::Dismiss => "dismiss",
            ViewAction::Compose(_) => "compose",
        }
    }

    /// Map a control press (`name` from the custom id, `values` from a select menu).
    pub fn from_component(name: &str, values: &[String]) -> Option<Self> {
        Some(match name {
            "prev" => ViewAction::Previous,
            "next" => ViewAction::Next,
            "select" => ViewAction::Select(values.first()?.clone()),
            "actions" => ViewAction::Actions,
            "message" => ViewAction::Message,
            "traceroute" => ViewAction::Traceroute,
            "location" => ViewAction::Location,
            "back" => ViewAction::Back,
            "dismiss" => ViewAction::Dismiss,
            _ => return None,
        })
    }

    /// Map a prompt submission.
    pub fn from_prompt(name: &str, fields: &[(String, String)]) -> Option<Self> {
        if name != "compose" {
            return None;
        }
        fields
            .iter()
            .find(|(id, _)| id == PROMPT_FIELD_ID)
            .map(|(_, value)| ViewAction::Compose(value.clone()))
    }
}

pub fn custom_id(session: Uuid, action: &str) -> String {
    format!("{}:{}:{}", CUSTOM_ID_PREFIX, session, action)
}

/// Split `mc:<uuid>:<action>`. Ids from other bots or malformed ids yield `None`.
pub fn parse_custom_id(id: &str) -> Option<(Uuid, &str)> {
    let mut parts = id.splitn(3, ':');
    if parts.next()? != CUSTOM_ID_PREFIX {
        return None;
    }
    let session = Uuid::parse_str(parts.next()?).ok()?;
    Some((session, parts.next()?))
}

/// Radio command a view asks the bridge to run against a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    DirectMessage(String),
    Traceroute,
    Location,
}

/// Result of a transition, interpreted by the bridge loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome {
    /// State changed; replace the message with a fresh render.
    Render,
    /// Action not valid here; the message is left as rendered.
    Ignored,
    /// Open a separate detail session for this node.
    OpenDetail(MeshNode),
    Prompt(TextPrompt),
    /// Run a command, then end the session with its result.
    Execute { node_id: String, command: NodeCommand },
    Dismiss,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub kind: SessionKind,
    pub state: ViewState,
    pub pages: UiPageState,
    /// Token of the interaction whose response is this session's message.
    pub token: String,
    last_active: Instant,
}

impl Session {
    pub fn new(kind: SessionKind, pages: UiPageState, token: impl Into<String>) -> Self {
        let state = match (kind, pages.current_page().nodes.first()) {
            (SessionKind::NodeActions, Some(node)) => ViewState::NodeDetail(node.id.clone()),
            _ => ViewState::ListPage(pages.current()),
        };
        Self {
            id: Uuid::new_v4(),
            kind,
            state,
            pages,
            token: token.into(),
            last_active: Instant::now(),
        }
    }

    /// Transition on `action`.
    pub fn apply(&mut self, action: ViewAction) -> ViewOutcome {
        use ViewAction as A;
        use ViewState as S;

        if action == A::Dismiss {
            return ViewOutcome::Dismiss;
        }
        // A picker with a pending prompt still shows its list; the user may have closed
        // the prompt and moved on to another node.
        let state = match (&self.state, self.kind) {
            (S::DmCompose(_), SessionKind::DmPicker) if !matches!(action, A::Compose(_)) => {
                S::ListPage(self.pages.current())
            }
            (state, _) => state.clone(),
        };
        match (state, action) {
            (S::ListPage(_), A::Previous) => self.turn_page(false),
            (S::ListPage(_), A::Next) => self.turn_page(true),
            (S::ListPage(_), A::Select(node_id)) => {
                let Some(node) = self.pages.current_page().nodes.iter().find(|n| n.id == node_id).cloned() else {
                    return ViewOutcome::Ignored;
                };
                match self.kind {
                    SessionKind::NodeList => ViewOutcome::OpenDetail(node),
                    SessionKind::DmPicker => {
                        self.state = S::DmCompose(node.id.clone());
                        ViewOutcome::Prompt(dm_prompt(self.id, &node))
                    }
                    _ => ViewOutcome::Ignored,
                }
            }
            (S::NodeDetail(id), A::Actions) => {
                self.state = S::ActionMenu(id);
                ViewOutcome::Render
            }
            (S::ActionMenu(id) | S::DmCompose(id), A::Message) => {
                let prompt = match self.node(&id) {
                    Some(node) => dm_prompt(self.id, node),
                    None => return ViewOutcome::Ignored,
                };
                self.state = S::DmCompose(id);
                ViewOutcome::Prompt(prompt)
            }
            (S::ActionMenu(id) | S::DmCompose(id), A::Traceroute) => ViewOutcome::Execute {
                node_id: id,
                command: NodeCommand::Traceroute,
            },
            (S::ActionMenu(id) | S::DmCompose(id), A::Location) => ViewOutcome::Execute {
                node_id: id,
                command: NodeCommand::Location,
            },
            (S::ActionMenu(id) | S::DmCompose(id), A::Back) if self.kind == SessionKind::NodeActions => {
                self.state = S::NodeDetail(id);
                ViewOutcome::Render
            }
            (S::DmCompose(id), A::Compose(text)) => ViewOutcome::Execute {
                node_id: id,
                command: NodeCommand::DirectMessage(text),
            },
            _ => ViewOutcome::Ignored,
        }
    }

    fn turn_page(&mut self, forward: bool) -> ViewOutcome {
        let moved = if forward { self.pages.next() } else { self.pages.previous() };
        if moved {
            self.state = ViewState::ListPage(self.pages.current());
            ViewOutcome::Render
        } else {
            ViewOutcome::Ignored
        }
    }

    fn node(&self, node_id: &str) -> Option<&MeshNode> {
        self.pages
            .pages
            .iter()
            .flat_map(|p| p.nodes.iter())
            .find(|n| n.id == node_id)
    }

    fn id_for(&self, action: &str) -> String {
        custom_id(self.id, action)
    }
}

fn dm_prompt(session: Uuid, node: &MeshNode) -> TextPrompt {
    let mut title = format!("Message {}", node.display_name());
    if title.len() > 45 {
        title = format!("Message {}", node.id);
    }
    TextPrompt {
        custom_id: custom_id(session, "compose"),
        title,
        field_id: PROMPT_FIELD_ID.to_string(),
        label: "Message".to_string(),
        placeholder: Some(format!("Text to send to {}", node.id)),
        max_length: MAX_PAYLOAD_LEN as u16,
    }
}

/// Render a session as a message with the controls valid in its current state.
pub fn render(session: &Session) -> ChatMessage {
    let page = session.pages.current_page();
    let mut msg = ChatMessage::embed(page.embed.clone());
    msg.ephemeral = matches!(session.kind, SessionKind::NodeActions | SessionKind::DmPicker);
    let dismiss = Button::new(session.id_for("dismiss"), "Dismiss", ButtonStyle::Danger);

    match &session.state {
        ViewState::ListPage(_) => list_controls(session, msg, dismiss),
        ViewState::DmCompose(_) if session.kind == SessionKind::DmPicker => list_controls(session, msg, dismiss),
        ViewState::NodeDetail(_) => msg.with_row(ActionRow::new(vec![
            Button::new(session.id_for("actions"), "Actions", ButtonStyle::Primary),
            dismiss,
        ])),
        ViewState::ActionMenu(_) | ViewState::DmCompose(_) => {
            let mut row = vec![
                Button::new(session.id_for("message"), "Message", ButtonStyle::Primary),
                Button::new(session.id_for("traceroute"), "Traceroute", ButtonStyle::Secondary),
                Button::new(session.id_for("location"), "Request location", ButtonStyle::Secondary),
            ];
            if session.kind == SessionKind::NodeActions {
                row.push(Button::new(session.id_for("back"), "Back", ButtonStyle::Secondary));
            }
            row.push(dismiss);
            msg.with_row(ActionRow::new(row))
        }
    }
}

fn list_controls(session: &Session, mut msg: ChatMessage, dismiss: Component) -> ChatMessage {
    let page = session.pages.current_page();
    if session.kind != SessionKind::DeviceInfo && !page.nodes.is_empty() {
        let placeholder = match session.kind {
            SessionKind::DmPicker => "Choose a node to message",
            _ => "Choose a node for details",
        };
        let select = Component::Select(SelectMenu {
            custom_id: session.id_for("select"),
            placeholder: placeholder.to_string(),
            options: page.nodes.iter().map(select_option).collect(),
        });
        msg = msg.with_row(ActionRow::new(vec![select]));
    }
    let mut nav = Vec::new();
    if session.pages.has_previous() {
        nav.push(Button::new(session.id_for("prev"), "Previous", ButtonStyle::Secondary));
    }
    if session.pages.has_next() {
        nav.push(Button::new(session.id_for("next"), "Next", ButtonStyle::Secondary));
    }
    nav.push(dismiss);
    msg.with_row(ActionRow::new(nav))
}

fn select_option(node: &MeshNode) -> SelectOption {
    let mut label = node.display_name().to_string();
    if label.chars().count() > 100 {
        label = label.chars().take(99).collect::<String>() + "…";
    }
    SelectOption {
        label,
        value: node.id.clone(),
        description: Some(node.id.clone()),
    }
}

/// "never", "just now", "5m ago", "3h ago", "2d ago".
pub fn format_last_heard(last_heard: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(t) = last_heard else {
        return "never".to_string();
    };
    let secs = (now - t).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn node_summary(node: &MeshNode, now: DateTime<Utc>) -> String {
    let mut parts = vec![format!("Last heard: {}", format_last_heard(node.last_heard, now))];
    if let Some(snr) = node.snr {
        parts.push(format!("SNR: {:.1} dB", snr));
    }
    if let Some(battery) = node.battery_level {
        parts.push(format!("Battery: {}%", battery));
    }
    parts.join(" | ")
}

/// Node list pages, `page_size` nodes each, in the given order.
pub fn node_list_pages(title: &str, nodes: &[MeshNode], page_size: usize, now: DateTime<Utc>) -> Vec<Page> {
    let chunks = crate::bridge::directory::paginate(nodes, page_size);
    let total_pages = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut embed = Embed::new(title)
                .color(COLOR_MESH)
                .footer(format!("Page {}/{} | {} nodes", i + 1, total_pages, nodes.len()));
            if chunk.is_empty() {
                embed = embed.description("No nodes heard yet.");
            }
            for node in &chunk {
                let star = if node.is_favorite { " ★" } else { "" };
                embed = embed.field(
                    format!("{} ({}){}", node.display_name(), node.id, star),
                    node_summary(node, now),
                    false,
                );
            }
            Page { embed, nodes: chunk }
        })
        .collect()
}

fn opt_or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn node_detail_page(node: &MeshNode, now: DateTime<Utc>) -> Page {
    let embed = Embed::new(node.display_name())
        .color(COLOR_MESH)
        .field("Node ID", node.id.clone(), true)
        .field(
            "Short name",
            if node.short_name.is_empty() { "-".to_string() } else { node.short_name.clone() },
            true,
        )
        .field("Last heard", format_last_heard(node.last_heard, now), true)
        .field("SNR", opt_or_dash(node.snr.map(|s| format!("{:.1} dB", s))), true)
        .field("Battery", opt_or_dash(node.battery_level.map(|b| format!("{}%", b))), true)
        .field("Hops away", opt_or_dash(node.hops_away), true)
        .field(
            "Channel utilization",
            opt_or_dash(node.channel_utilization.map(|c| format!("{:.1}%", c))),
            true,
        )
        .field("Air util TX", opt_or_dash(node.air_util_tx.map(|a| format!("{:.1}%", a))), true)
        .field("Favorite", if node.is_favorite { "yes" } else { "no" }, true);
    Page {
        embed,
        nodes: vec![node.clone()],
    }
}

fn role_label(role: ChannelRole) -> &'static str {
    match role {
        ChannelRole::Primary => "primary",
        ChannelRole::Secondary => "secondary",
        ChannelRole::Disabled => "disabled",
    }
}

/// Embed listing the enabled channels.
pub fn channels_embed(channels: &[ChannelInfo]) -> Embed {
    let enabled: Vec<&ChannelInfo> = channels.iter().filter(|c| c.enabled()).collect();
    let mut embed = Embed::new("Channels").color(COLOR_DEVICE);
    if enabled.is_empty() {
        return embed.description("No channels reported by the device.");
    }
    for ch in enabled {
        let name = if ch.name.is_empty() { "(default)" } else { ch.name.as_str() };
        embed = embed.field(format!("Channel {}", ch.index), format!("{} ({})", name, role_label(ch.role)), false);
    }
    embed
}

/// Device info as three pages: owner and node, device metadata, channels.
pub fn device_info_pages(description: &DeviceDescription, channels: &[ChannelInfo]) -> Vec<Page> {
    let info = &description.device_info;
    let mut owner = Embed::new("Device: owner and node").color(COLOR_DEVICE);
    match &description.owner {
        Some(o) => {
            owner = owner
                .field("Owner", o.long_name.clone(), true)
                .field("Short name", o.short_name.clone(), true)
                .field("Node ID", o.id.clone(), true);
        }
        None => owner = owner.description("The device has not reported its owner yet."),
    }
    owner = owner
        .field("Known nodes", info.node_count.to_string(), true)
        .field("Channels", info.channel_count.to_string(), true)
        .field("Reboots", info.reboot_count.to_string(), true)
        .field("Synced", if info.synced { "yes" } else { "no" }, true)
        .field("Connected", if info.connected { "yes" } else { "no" }, true);

    let mut metadata = Embed::new("Device: metadata").color(COLOR_DEVICE);
    match &description.metadata {
        Some(m) => {
            metadata = metadata
                .field("Firmware", m.firmware_version.clone(), true)
                .field("Hardware model", m.hw_model.to_string(), true)
                .field("Role", m.role.to_string(), true)
                .field("WiFi", if m.has_wifi { "yes" } else { "no" }, true)
                .field("Bluetooth", if m.has_bluetooth { "yes" } else { "no" }, true)
                .field("Ethernet", if m.has_ethernet { "yes" } else { "no" }, true);
        }
        None => metadata = metadata.description("No metadata reported."),
    }

    let pages = [owner, metadata, channels_embed(channels)];
    let total = pages.len();
    pages
        .into_iter()
        .enumerate()
        .map(|(i, embed)| Page {
            embed: embed.footer(format!("Page {}/{}", i + 1, total)),
            nodes: Vec::new(),
        })
        .collect()
}

/// Live sessions keyed by id. Owned by the bridge loop.
pub struct SessionManager {
    sessions: HashMap<Uuid, Session>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            timeout,
        }
    }

    pub fn insert(&mut self, session: Session) -> Uuid {
        metrics::inc_sessions_opened();
        let id = session.id;
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Live session for an interaction, refreshing its inactivity window.
    /// Sessions past their window are treated as gone even before the sweep removes them.
    pub fn active_mut(&mut self, id: &Uuid, now: Instant) -> Option<&mut Session> {
        let timeout = self.timeout;
        let session = self.sessions.get_mut(id)?;
        if now.duration_since(session.last_active) >= timeout {
            return None;
        }
        session.last_active = now;
        Some(session)
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Remove and return every session idle for at least the timeout.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Session> {
        let timeout = self.timeout;
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_active) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .inspect(|_| metrics::inc_sessions_expired())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: u32) -> Vec<MeshNode> {
        (1..=n)
            .map(|i| {
                let mut node = MeshNode::new(0x1000 + i);
                node.long_name = format!("Node {}", i);
                node
            })
            .collect()
    }

    fn list_session(kind: SessionKind, count: u32, page_size: usize) -> Session {
        let pages = node_list_pages("Mesh Nodes", &nodes(count), page_size, Utc::now());
        Session::new(kind, UiPageState::new(pages), "tok")
    }

    #[test]
    fn custom_ids_roundtrip() {
        let id = Uuid::new_v4();
        let cid = custom_id(id, "next");
        assert_eq!(parse_custom_id(&cid), Some((id, "next")));
        assert_eq!(parse_custom_id("other:abc:next"), None);
        assert_eq!(parse_custom_id("mc:not-a-uuid:next"), None);
    }

    #[test]
    fn edge_buttons_are_absent() {
        let mut s = list_session(SessionKind::NodeList, 25, 10);
        let msg = render(&s);
        let ids = msg.custom_ids().join(" ");
        assert!(!ids.contains(":prev"));
        assert!(ids.contains(":next"));

        assert_eq!(s.apply(ViewAction::Previous), ViewOutcome::Ignored);
        assert_eq!(s.apply(ViewAction::Next), ViewOutcome::Render);
        assert_eq!(s.apply(ViewAction::Next), ViewOutcome::Render);
        assert_eq!(s.state, ViewState::ListPage(2));
        assert_eq!(s.apply(ViewAction::Next), ViewOutcome::Ignored);
        assert_eq!(s.pages.current(), 2);

        let msg = render(&s);
        let ids = msg.custom_ids().join(" ");
        assert!(ids.contains(":prev"));
        assert!(!ids.contains(":next"));
    }

    #[test]
    fn single_page_has_no_navigation() {
        let s = list_session(SessionKind::NodeList, 3, 10);
        let msg = render(&s);
        let ids = msg.custom_ids();
        assert_eq!(ids.len(), 2); // select + dismiss
        assert!(ids[1].ends_with(":dismiss"));
    }

    #[test]
    fn selecting_in_list_opens_detail() {
        let mut s = list_session(SessionKind::NodeList, 3, 10);
        let target = s.pages.current_page().nodes[1].clone();
        assert_eq!(s.apply(ViewAction::Select(target.id.clone())), ViewOutcome::OpenDetail(target));
        assert_eq!(s.state, ViewState::ListPage(0));
        assert_eq!(s.apply(ViewAction::Select("!deadbeef".into())), ViewOutcome::Ignored);
    }

    #[test]
    fn picker_selection_opens_prompt() {
        let mut s = list_session(SessionKind::DmPicker, 3, 10);
        let target = s.pages.current_page().nodes[0].id.clone();
        match s.apply(ViewAction::Select(target.clone())) {
            ViewOutcome::Prompt(p) => {
                assert_eq!(p.field_id, PROMPT_FIELD_ID);
                assert!(p.custom_id.ends_with(":compose"));
            }
            other => panic!("expected prompt, got {:?}", other),
        }
        assert_eq!(s.state, ViewState::DmCompose(target.clone()));
        assert_eq!(
            s.apply(ViewAction::Compose("hi".into())),
            ViewOutcome::Execute {
                node_id: target,
                command: NodeCommand::DirectMessage("hi".into())
            }
        );
    }

    #[test]
    fn picker_accepts_another_node_after_closed_prompt() {
        let mut s = list_session(SessionKind::DmPicker, 3, 10);
        let first = s.pages.current_page().nodes[0].id.clone();
        let second = s.pages.current_page().nodes[1].id.clone();
        assert!(matches!(s.apply(ViewAction::Select(first)), ViewOutcome::Prompt(_)));

        let msg = render(&s);
        let ids = msg.custom_ids();
        assert!(ids.iter().any(|id| id.ends_with(":select")));
        assert!(ids.iter().all(|id| !id.ends_with(":message")));

        match s.apply(ViewAction::Select(second.clone())) {
            ViewOutcome::Prompt(p) => assert!(p.title.contains("Node 2")),
            other => panic!("expected prompt, got {:?}", other),
        }
        assert_eq!(s.state, ViewState::DmCompose(second.clone()));
        assert_eq!(
            s.apply(ViewAction::Compose("later".into())),
            ViewOutcome::Execute {
                node_id: second,
                command: NodeCommand::DirectMessage("later".into())
            }
        );
    }

    #[test]
    fn detail_to_actions_and_back() {
        let node = nodes(1).remove(0);
        let mut s = Session::new(
            SessionKind::NodeActions,
            UiPageState::new(vec![node_detail_page(&node, Utc::now())]),
            "tok",
        );
        assert_eq!(s.state, ViewState::NodeDetail(node.id.clone()));
        assert_eq!(s.apply(ViewAction::Traceroute), ViewOutcome::Ignored);
        assert_eq!(s.apply(ViewAction::Actions), ViewOutcome::Render);
        assert!(render(&s).custom_ids().iter().any(|id| id.ends_with(":location")));
        assert_eq!(
            s.apply(ViewAction::Location),
            ViewOutcome::Execute {
                node_id: node.id.clone(),
                command: NodeCommand::Location
            }
        );
        assert_eq!(s.apply(ViewAction::Back), ViewOutcome::Render);
        assert_eq!(s.state, ViewState::NodeDetail(node.id));
        assert_eq!(s.apply(ViewAction::Dismiss), ViewOutcome::Dismiss);
    }

    #[test]
    fn device_info_has_no_select() {
        let pages = device_info_pages(&DeviceDescription::default(), &[]);
        let s = Session::new(SessionKind::DeviceInfo, UiPageState::new(pages), "tok");
        let msg = render(&s);
        let ids = msg.custom_ids();
        assert!(ids.iter().all(|id| !id.ends_with(":select")));
        assert_eq!(s.pages.page_count(), 3);
    }

    #[test]
    fn last_heard_formats() {
        let now = Utc::now();
        assert_eq!(format_last_heard(None, now), "never");
        assert_eq!(format_last_heard(Some(now - chrono::Duration::seconds(10)), now), "just now");
        assert_eq!(format_last_heard(Some(now - chrono::Duration::minutes(5)), now), "5m ago");
        assert_eq!(format_last_heard(Some(now - chrono::Duration::hours(3)), now), "3h ago");
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_expire_after_inactivity() {
        let mut mgr = SessionManager::new(Duration::from_secs(60));
        let id = mgr.insert(list_session(SessionKind::NodeList, 3, 10));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(mgr.active_mut(&id, Instant::now()).is_some());
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(mgr.take_expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(mgr.active_mut(&id, Instant::now()).is_none());
        assert_eq!(mgr.take_expired(Instant::now()).len(), 1);
        assert!(mgr.is_empty());
    }
}

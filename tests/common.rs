// Shared test helpers: recording fakes for the device link, the chat platform and the
// language model, plus builders for interactions and settings.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshcord::bridge::BridgeSettings;
use meshcord::chat::{
    ChatError, ChatMessage, ChatPlatform, ChatUser, CommandOptions, CommandSpec, Interaction, InteractionKind,
    InteractionResponse, OptionValue,
};
use meshcord::llm::{LanguageModel, UpstreamError};
use meshcord::bridge::conversation::ConversationTurn;
use meshcord::meshtastic::{ChannelInfo, DeviceDescription, LinkError, MeshLink, MeshNode};

pub const RELAY_CHANNEL: &str = "relay-channel";

#[derive(Debug, Clone, PartialEq)]
pub enum LinkCall {
    Text {
        text: String,
        channel: u32,
        destination: Option<u32>,
    },
    Position {
        latitude: f64,
        longitude: f64,
        altitude: i32,
    },
    Telemetry,
    Traceroute {
        destination: u32,
        hop_limit: u32,
        channel: u32,
    },
    PositionRequest {
        destination: u32,
        channel: u32,
    },
    RawData {
        payload: Vec<u8>,
        port: u32,
    },
    Heartbeat,
}

/// Device link that records every call instead of touching a radio.
#[derive(Default)]
pub struct FakeLink {
    pub nodes: Mutex<Vec<MeshNode>>,
    pub channels: Mutex<Vec<ChannelInfo>>,
    pub description: Mutex<DeviceDescription>,
    calls: Mutex<Vec<LinkCall>>,
    failing: AtomicBool,
}

impl FakeLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_nodes(nodes: Vec<MeshNode>) -> Arc<Self> {
        let link = Self::default();
        *link.nodes.lock().unwrap() = nodes;
        Arc::new(link)
    }

    /// Make every later send fail with a timeout.
    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<(String, u32, Option<u32>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LinkCall::Text {
                    text,
                    channel,
                    destination,
                } => Some((text, channel, destination)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: LinkCall) -> Result<(), LinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LinkError::Timeout(Duration::from_millis(2500)));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl MeshLink for FakeLink {
    async fn send_text(&self, text: &str, channel_index: u32, destination: Option<u32>) -> Result<(), LinkError> {
        self.record(LinkCall::Text {
            text: text.to_string(),
            channel: channel_index,
            destination,
        })
    }

    async fn send_position(&self, latitude: f64, longitude: f64, altitude: i32) -> Result<(), LinkError> {
        self.record(LinkCall::Position {
            latitude,
            longitude,
            altitude,
        })
    }

    async fn send_telemetry_request(&self) -> Result<(), LinkError> {
        self.record(LinkCall::Telemetry)
    }

    async fn send_traceroute(&self, destination: u32, hop_limit: u32, channel_index: u32) -> Result<(), LinkError> {
        self.record(LinkCall::Traceroute {
            destination,
            hop_limit,
            channel: channel_index,
        })
    }

    async fn request_position(&self, destination: u32, channel_index: u32) -> Result<(), LinkError> {
        self.record(LinkCall::PositionRequest {
            destination,
            channel: channel_index,
        })
    }

    async fn send_raw_data(&self, payload: Vec<u8>, port: u32) -> Result<(), LinkError> {
        self.record(LinkCall::RawData { payload, port })
    }

    async fn send_heartbeat(&self) -> Result<(), LinkError> {
        self.record(LinkCall::Heartbeat)
    }

    fn list_nodes(&self) -> Vec<MeshNode> {
        self.nodes.lock().unwrap().clone()
    }

    fn list_channels(&self) -> Vec<ChannelInfo> {
        self.channels.lock().unwrap().clone()
    }

    fn describe_device(&self) -> DeviceDescription {
        self.description.lock().unwrap().clone()
    }
}

/// Chat platform that records everything the bridge shows.
#[derive(Default)]
pub struct FakeChat {
    pub sent: Mutex<Vec<(String, ChatMessage)>>,
    pub responses: Mutex<Vec<(String, InteractionResponse)>>,
    pub edits: Mutex<Vec<(String, ChatMessage)>>,
    pub deletes: Mutex<Vec<String>>,
    pub presence: Mutex<Vec<String>>,
}

impl FakeChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Text content of every message posted to a channel.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, m)| m.content.clone())
            .collect()
    }

    pub fn responses(&self) -> Vec<InteractionResponse> {
        self.responses.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn last_response(&self) -> InteractionResponse {
        self.responses().last().cloned().expect("no interaction response recorded")
    }
}

#[async_trait]
impl ChatPlatform for FakeChat {
    async fn send(&self, channel_id: &str, message: ChatMessage) -> Result<String, ChatError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((channel_id.to_string(), message));
        Ok(format!("msg-{}", sent.len()))
    }

    async fn respond(&self, interaction: &Interaction, response: InteractionResponse) -> Result<(), ChatError> {
        self.responses.lock().unwrap().push((interaction.id.clone(), response));
        Ok(())
    }

    async fn edit_original(&self, token: &str, message: ChatMessage) -> Result<(), ChatError> {
        self.edits.lock().unwrap().push((token.to_string(), message));
        Ok(())
    }

    async fn delete_original(&self, token: &str) -> Result<(), ChatError> {
        self.deletes.lock().unwrap().push(token.to_string());
        Ok(())
    }

    async fn set_presence(&self, status: &str) -> Result<(), ChatError> {
        self.presence.lock().unwrap().push(status.to_string());
        Ok(())
    }

    async fn register_commands(&self, _commands: &[CommandSpec]) -> Result<(), ChatError> {
        Ok(())
    }
}

pub enum Script {
    Reply(String),
    /// Never answers; exercises the reply timeout.
    Hang,
    Fail,
}

/// Language model with a fixed behavior that records each prompt it was given.
pub struct ScriptedModel {
    script: Script,
    pub prompts: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedModel {
    pub fn replying(text: &str) -> Arc<Self> {
        Self::with(Script::Reply(text.to_string()))
    }

    pub fn with(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, UpstreamError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        match &self.script {
            Script::Reply(text) => Ok(text.clone()),
            Script::Hang => std::future::pending().await,
            Script::Fail => Err(UpstreamError::Status { status: 500 }),
        }
    }
}

pub fn settings() -> BridgeSettings {
    BridgeSettings {
        relay_channel_id: RELAY_CHANNEL.to_string(),
        page_size: 2,
        session_timeout: Duration::from_secs(180),
        unattended_at_startup: false,
        max_text_bytes: 200,
        default_lora_channel: 1,
        heartbeat_interval: None,
        stats_interval: None,
        system_prompt: "You answer mesh users briefly.".to_string(),
        llm_timeout: Duration::from_secs(30),
    }
}

pub fn node(num: u32, long_name: &str) -> MeshNode {
    let mut node = MeshNode::new(num);
    node.long_name = long_name.to_string();
    node
}

pub fn command(name: &str, options: &[(&str, OptionValue)]) -> Interaction {
    interaction(
        &format!("cmd-{}", name),
        InteractionKind::Command {
            name: name.to_string(),
            options: CommandOptions(options.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()),
        },
    )
}

pub fn press(custom_id: &str) -> Interaction {
    select(custom_id, &[])
}

pub fn select(custom_id: &str, values: &[&str]) -> Interaction {
    interaction(
        &format!("press-{}", custom_id),
        InteractionKind::Component {
            custom_id: custom_id.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        },
    )
}

pub fn submit(custom_id: &str, text: &str) -> Interaction {
    interaction(
        &format!("submit-{}", custom_id),
        InteractionKind::PromptSubmit {
            custom_id: custom_id.to_string(),
            fields: vec![("text".to_string(), text.to_string())],
        },
    )
}

fn interaction(id: &str, kind: InteractionKind) -> Interaction {
    Interaction {
        id: id.to_string(),
        token: format!("token-{}", id),
        channel_id: Some(RELAY_CHANNEL.to_string()),
        user: ChatUser::new("operator"),
        kind,
    }
}

/// The message carried by a Message or Update response.
pub fn response_message(response: &InteractionResponse) -> &ChatMessage {
    match response {
        InteractionResponse::Message(m) | InteractionResponse::Update(m) => m,
        other => panic!("expected a message response, got {:?}", other),
    }
}

/// Custom id of the control whose id ends with `:<action>`.
pub fn control(message: &ChatMessage, action: &str) -> String {
    let suffix = format!(":{}", action);
    message
        .custom_ids()
        .into_iter()
        .find(|id| id.ends_with(&suffix))
        .unwrap_or_else(|| panic!("no '{}' control on {:?}", action, message.custom_ids()))
        .to_string()
}

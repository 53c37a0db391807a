//! # Discord Chat Platform
//!
//! [`DiscordClient`] implements [`ChatPlatform`] over the Discord REST API (v10) with a
//! bot token. Interactions and presence go through the [`gateway`] websocket.
//!
//! The JSON shapes are built and parsed by free functions ([`message_json`],
//! [`response_json`], [`command_json`], [`parse_interaction`]) so they can be tested
//! without a network.

pub mod gateway;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::chat::{
    ActionRow, ButtonStyle, ChatError, ChatMessage, ChatPlatform, ChatUser, CommandOptions, CommandSpec, Component,
    Embed, Interaction, InteractionKind, InteractionResponse, OptionKind, OptionValue, TextPrompt,
};
pub use gateway::{GatewayHandle, GatewaySettings};

const FLAG_EPHEMERAL: u64 = 1 << 6;

// Interaction callback types.
const CALLBACK_MESSAGE: u8 = 4;
const CALLBACK_DEFERRED_UPDATE: u8 = 6;
const CALLBACK_UPDATE: u8 = 7;
const CALLBACK_MODAL: u8 = 9;

// Interaction types.
const INTERACTION_COMMAND: u64 = 2;
const INTERACTION_COMPONENT: u64 = 3;
const INTERACTION_MODAL_SUBMIT: u64 = 5;

fn style_code(style: ButtonStyle) -> u8 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Secondary => 2,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

fn embed_json(embed: &Embed) -> Value {
    let mut v = json!({ "title": embed.title });
    if let Some(description) = &embed.description {
        v["description"] = json!(description);
    }
    if !embed.fields.is_empty() {
        v["fields"] = embed
            .fields
            .iter()
            .map(|f| json!({ "name": f.name, "value": f.value, "inline": f.inline }))
            .collect();
    }
    if let Some(footer) = &embed.footer {
        v["footer"] = json!({ "text": footer });
    }
    if let Some(color) = embed.color {
        v["color"] = json!(color);
    }
    v
}

fn component_json(component: &Component) -> Value {
    match component {
        Component::Button(b) => json!({
            "type": 2,
            "style": style_code(b.style),
            "label": b.label,
            "custom_id": b.custom_id,
        }),
        Component::Select(s) => json!({
            "type": 3,
            "custom_id": s.custom_id,
            "placeholder": s.placeholder,
            "options": s.options.iter().map(|o| {
                let mut opt = json!({ "label": o.label, "value": o.value });
                if let Some(d) = &o.description {
                    opt["description"] = json!(d);
                }
                opt
            }).collect::<Vec<_>>(),
        }),
    }
}

fn row_json(row: &ActionRow) -> Value {
    json!({ "type": 1, "components": row.components.iter().map(component_json).collect::<Vec<_>>() })
}

/// Message body for create/edit/callback payloads. Always carries `components` so an
/// edit with no rows clears existing controls.
pub fn message_json(message: &ChatMessage) -> Value {
    let mut v = json!({
        "content": message.content.clone().unwrap_or_default(),
        "embeds": message.embeds.iter().map(embed_json).collect::<Vec<_>>(),
        "components": message.components.iter().map(row_json).collect::<Vec<_>>(),
        "allowed_mentions": { "parse": [] },
    });
    if message.ephemeral {
        v["flags"] = json!(FLAG_EPHEMERAL);
    }
    v
}

fn prompt_json(prompt: &TextPrompt) -> Value {
    let mut input = json!({
        "type": 4,
        "custom_id": prompt.field_id,
        "style": 2,
        "label": prompt.label,
        "max_length": prompt.max_length,
        "required": true,
    });
    if let Some(placeholder) = &prompt.placeholder {
        input["placeholder"] = json!(placeholder);
    }
    json!({
        "custom_id": prompt.custom_id,
        "title": prompt.title,
        "components": [{ "type": 1, "components": [input] }],
    })
}

/// Interaction callback body.
pub fn response_json(response: &InteractionResponse) -> Value {
    match response {
        InteractionResponse::Message(m) => json!({ "type": CALLBACK_MESSAGE, "data": message_json(m) }),
        InteractionResponse::Update(m) => {
            let mut data = message_json(m);
            // Ephemerality is fixed when a message is created.
            if let Some(obj) = data.as_object_mut() {
                obj.remove("flags");
            }
            json!({ "type": CALLBACK_UPDATE, "data": data })
        }
        InteractionResponse::Prompt(p) => json!({ "type": CALLBACK_MODAL, "data": prompt_json(p) }),
        InteractionResponse::Acknowledge => json!({ "type": CALLBACK_DEFERRED_UPDATE }),
    }
}

fn option_type(kind: OptionKind) -> u8 {
    match kind {
        OptionKind::String => 3,
        OptionKind::Integer => 4,
        OptionKind::Boolean => 5,
        OptionKind::Number => 10,
    }
}

/// Application command registration body (chat input command).
pub fn command_json(spec: &CommandSpec) -> Value {
    json!({
        "name": spec.name,
        "description": spec.description,
        "type": 1,
        "options": spec.options.iter().map(|o| json!({
            "name": o.name,
            "description": o.description,
            "type": option_type(o.kind),
            "required": o.required,
        })).collect::<Vec<_>>(),
    })
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_user(d: &Value) -> Option<ChatUser> {
    // Guild interactions put the user under `member`, DMs at the top level.
    let user = d.get("member").and_then(|m| m.get("user")).or_else(|| d.get("user"))?;
    Some(ChatUser {
        id: str_field(user, "id")?,
        display_name: str_field(user, "global_name").or_else(|| str_field(user, "username")),
    })
}

fn parse_options(data: &Value) -> CommandOptions {
    let options = data
        .get("options")
        .and_then(Value::as_array)
        .map(|opts| {
            opts.iter()
                .filter_map(|o| {
                    let name = str_field(o, "name")?;
                    let value = o.get("value")?;
                    let value = match o.get("type").and_then(Value::as_u64) {
                        Some(4) => OptionValue::Integer(value.as_i64()?),
                        Some(10) => match value.as_i64() {
                            Some(i) => OptionValue::Integer(i),
                            None => OptionValue::Number(value.as_f64()?),
                        },
                        Some(5) => OptionValue::Boolean(value.as_bool()?),
                        _ => OptionValue::String(value.as_str()?.to_string()),
                    };
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default();
    CommandOptions(options)
}

fn parse_modal_fields(data: &Value) -> Vec<(String, String)> {
    data.get("components")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|row| row.get("components").and_then(Value::as_array))
        .flatten()
        .filter_map(|c| Some((str_field(c, "custom_id")?, str_field(c, "value")?)))
        .collect()
}

/// Parse the `d` payload of an `INTERACTION_CREATE` dispatch. Unsupported interaction
/// types (pings, autocomplete) yield `None`.
pub fn parse_interaction(d: &Value) -> Option<Interaction> {
    let data = d.get("data")?;
    let kind = match d.get("type").and_then(Value::as_u64)? {
        INTERACTION_COMMAND => InteractionKind::Command {
            name: str_field(data, "name")?,
            options: parse_options(data),
        },
        INTERACTION_COMPONENT => InteractionKind::Component {
            custom_id: str_field(data, "custom_id")?,
            values: data
                .get("values")
                .and_then(Value::as_array)
                .map(|vals| vals.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
        },
        INTERACTION_MODAL_SUBMIT => InteractionKind::PromptSubmit {
            custom_id: str_field(data, "custom_id")?,
            fields: parse_modal_fields(data),
        },
        _ => return None,
    };
    Some(Interaction {
        id: str_field(d, "id")?,
        token: str_field(d, "token")?,
        channel_id: str_field(d, "channel_id"),
        user: parse_user(d)?,
        kind,
    })
}

/// REST client for one bot.
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    guild_id: Option<String>,
    application_id: OnceCell<String>,
    gateway: Option<GatewayHandle>,
}

impl DiscordClient {
    pub fn new(token: &str, api_base: &str, guild_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            guild_id,
            application_id: OnceCell::new(),
            gateway: None,
        }
    }

    /// Route presence updates through a running gateway.
    pub fn with_gateway(mut self, gateway: GatewayHandle) -> Self {
        self.gateway = Some(gateway);
        self
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Option<Value>, ChatError> {
        let url = format!("{}{}", self.api_base, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| ChatError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ChatError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!("{} {} -> {}", method, path, status);
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ChatError::Decode(e.to_string()))
    }

    /// The bot's application id, fetched once.
    pub async fn application_id(&self) -> Result<&str, ChatError> {
        self.application_id
            .get_or_try_init(|| async {
                let app = self
                    .request(Method::GET, "/oauth2/applications/@me", None)
                    .await?
                    .ok_or_else(|| ChatError::Decode("empty application response".into()))?;
                str_field(&app, "id").ok_or_else(|| ChatError::Decode("application has no id".into()))
            })
            .await
            .map(String::as_str)
    }

    async fn original_path(&self, token: &str) -> Result<String, ChatError> {
        Ok(format!("/webhooks/{}/{}/messages/@original", self.application_id().await?, token))
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    async fn send(&self, channel_id: &str, message: ChatMessage) -> Result<String, ChatError> {
        let mut body = message_json(&message);
        if let Some(obj) = body.as_object_mut() {
            obj.remove("flags");
        }
        let created = self
            .request(Method::POST, &format!("/channels/{}/messages", channel_id), Some(body))
            .await?
            .ok_or_else(|| ChatError::Decode("empty message response".into()))?;
        str_field(&created, "id").ok_or_else(|| ChatError::Decode("message has no id".into()))
    }

    async fn respond(&self, interaction: &Interaction, response: InteractionResponse) -> Result<(), ChatError> {
        let path = format!("/interactions/{}/{}/callback", interaction.id, interaction.token);
        self.request(Method::POST, &path, Some(response_json(&response))).await?;
        Ok(())
    }

    async fn edit_original(&self, token: &str, message: ChatMessage) -> Result<(), ChatError> {
        let mut body = message_json(&message);
        if let Some(obj) = body.as_object_mut() {
            obj.remove("flags");
        }
        let path = self.original_path(token).await?;
        self.request(Method::PATCH, &path, Some(body)).await?;
        Ok(())
    }

    async fn delete_original(&self, token: &str) -> Result<(), ChatError> {
        let path = self.original_path(token).await?;
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn set_presence(&self, status: &str) -> Result<(), ChatError> {
        match &self.gateway {
            Some(gateway) => gateway.set_presence(status),
            None => Err(ChatError::NotConnected),
        }
    }

    async fn register_commands(&self, commands: &[CommandSpec]) -> Result<(), ChatError> {
        let app_id = self.application_id().await?.to_string();
        let path = match &self.guild_id {
            Some(guild) => format!("/applications/{}/guilds/{}/commands", app_id, guild),
            None => format!("/applications/{}/commands", app_id),
        };
        let body = Value::Array(commands.iter().map(command_json).collect());
        self.request(Method::PUT, &path, Some(body)).await?;
        info!(
            "Registered {} commands {}",
            commands.len(),
            match &self.guild_id {
                Some(g) => format!("for guild {}", g),
                None => "globally".to_string(),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Button, OptionSpec};

    #[test]
    fn ephemeral_message_sets_flag_and_rows() {
        let msg = ChatMessage::text("hi")
            .ephemeral()
            .with_row(ActionRow::new(vec![Button::new("mc:x:next", "Next", ButtonStyle::Secondary)]));
        let v = message_json(&msg);
        assert_eq!(v["flags"], 64);
        assert_eq!(v["components"][0]["type"], 1);
        assert_eq!(v["components"][0]["components"][0]["custom_id"], "mc:x:next");
        assert_eq!(v["components"][0]["components"][0]["style"], 2);
    }

    #[test]
    fn update_and_modal_callbacks() {
        let update = response_json(&InteractionResponse::Update(ChatMessage::text("done").ephemeral()));
        assert_eq!(update["type"], 7);
        assert!(update["data"].get("flags").is_none());
        assert_eq!(update["data"]["components"], json!([]));

        let modal = response_json(&InteractionResponse::Prompt(TextPrompt {
            custom_id: "mc:x:compose".into(),
            title: "Message Node".into(),
            field_id: "text".into(),
            label: "Message".into(),
            placeholder: None,
            max_length: 233,
        }));
        assert_eq!(modal["type"], 9);
        assert_eq!(modal["data"]["components"][0]["components"][0]["custom_id"], "text");
        assert_eq!(response_json(&InteractionResponse::Acknowledge)["type"], 6);
    }

    #[test]
    fn command_registration_shape() {
        let spec = CommandSpec {
            name: "position",
            description: "Broadcast a position",
            options: vec![OptionSpec {
                name: "latitude",
                description: "deg",
                kind: OptionKind::Number,
                required: true,
            }],
        };
        let v = command_json(&spec);
        assert_eq!(v["options"][0]["type"], 10);
        assert_eq!(v["options"][0]["required"], true);
    }

    #[test]
    fn parses_slash_command_with_member_user() {
        let d = json!({
            "id": "1", "token": "tok", "type": 2, "channel_id": "c",
            "member": { "user": { "id": "u1", "username": "op", "global_name": "Operator" } },
            "data": { "name": "trace", "options": [
                { "name": "destination", "type": 3, "value": "!a1b2" },
                { "name": "hoplimit", "type": 4, "value": 5 },
                { "name": "latitude", "type": 10, "value": 45.5 }
            ]}
        });
        let i = parse_interaction(&d).unwrap();
        assert_eq!(i.user.label(), "Operator");
        match i.kind {
            InteractionKind::Command { name, options } => {
                assert_eq!(name, "trace");
                assert_eq!(options.string("destination").unwrap(), "!a1b2");
                assert_eq!(options.integer("hoplimit").unwrap(), 5);
                assert_eq!(options.number("latitude").unwrap(), 45.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_components_and_modal_submits() {
        let select = json!({
            "id": "2", "token": "t2", "type": 3, "user": { "id": "u2", "username": "dm-user" },
            "data": { "custom_id": "mc:abc:select", "values": ["!0000a1b2"] }
        });
        match parse_interaction(&select).unwrap().kind {
            InteractionKind::Component { custom_id, values } => {
                assert_eq!(custom_id, "mc:abc:select");
                assert_eq!(values, vec!["!0000a1b2"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let modal = json!({
            "id": "3", "token": "t3", "type": 5, "user": { "id": "u3", "username": "x" },
            "data": { "custom_id": "mc:abc:compose", "components": [
                { "type": 1, "components": [ { "type": 4, "custom_id": "text", "value": "hello node" } ] }
            ]}
        });
        match parse_interaction(&modal).unwrap().kind {
            InteractionKind::PromptSubmit { fields, .. } => {
                assert_eq!(fields, vec![("text".to_string(), "hello node".to_string())]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(parse_interaction(&json!({ "id": "4", "token": "t", "type": 1 })).is_none());
    }
}

//! Remote command catalog, argument parsing and dispatch.
//!
//! Every command validates its arguments into a [`RemoteCommand`] before anything touches
//! the radio, then issues exactly one link call. View commands (`nodes`, `dm`, `info`)
//! return [`CommandReply::OpenView`] and the bridge loop opens the session.

use std::sync::Arc;

use log::{info, warn};

use crate::bridge::views::{channels_embed, SessionKind};
use crate::bridge::UnattendedMode;
use crate::chat::{ChatMessage, ChatPlatform, CommandOptions, CommandSpec, OptionKind, OptionSpec};
use crate::meshtastic::{node_id_string, LinkError, MeshLink};
use crate::validation::{
    parse_hex_payload, parse_node_id, validate_altitude, validate_channel_index, validate_hop_limit,
    validate_latitude, validate_longitude, validate_mesh_text, validate_port, InputError,
};

pub const DEFAULT_TRACE_HOP_LIMIT: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid arguments: {0}")]
    Input(#[from] InputError),
    #[error("{context}: {source}")]
    Link {
        context: String,
        #[source]
        source: LinkError,
    },
}

impl CommandError {
    fn link(context: impl Into<String>) -> impl FnOnce(LinkError) -> CommandError {
        let context = context.into();
        move |source| CommandError::Link { context, source }
    }
}

/// A command with validated arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    Lora {
        message: String,
        channel: u32,
    },
    Message {
        destination: u32,
        message: String,
    },
    Dm,
    Nodes,
    Info,
    Position {
        latitude: f64,
        longitude: f64,
        altitude: i32,
    },
    Telemetry,
    Trace {
        destination: u32,
        hop_limit: u32,
        channel_index: u32,
    },
    SendData {
        port: u32,
        payload: Vec<u8>,
    },
    Ping,
    Channels,
    Unattended,
}

impl RemoteCommand {
    /// Validate `options` for command `name`. `default_lora_channel` fills `lora`'s channel.
    pub fn parse(name: &str, options: &CommandOptions, default_lora_channel: u32) -> Result<Self, InputError> {
        Ok(match name {
            "lora" => RemoteCommand::Lora {
                message: validate_mesh_text(&options.string("message")?)?,
                channel: validate_channel_index(options.integer_or("channel", default_lora_channel as i64)?)?,
            },
            "message" => RemoteCommand::Message {
                destination: parse_node_id(&options.string("nodeid")?)?,
                message: validate_mesh_text(&options.string("message")?)?,
            },
            "dm" => RemoteCommand::Dm,
            "nodes" => RemoteCommand::Nodes,
            "info" => RemoteCommand::Info,
            "position" => RemoteCommand::Position {
                latitude: validate_latitude(options.number("latitude")?)?,
                longitude: validate_longitude(options.number("longitude")?)?,
                altitude: validate_altitude(options.integer_or("altitude", 0)?)?,
            },
            "telemetry" => RemoteCommand::Telemetry,
            "trace" => RemoteCommand::Trace {
                destination: parse_node_id(&options.string("destination")?)?,
                hop_limit: validate_hop_limit(options.integer_or("hoplimit", DEFAULT_TRACE_HOP_LIMIT)?)?,
                channel_index: validate_channel_index(options.integer_or("channel_index", 0)?)?,
            },
            "senddata" => RemoteCommand::SendData {
                port: validate_port(options.integer("port")?)?,
                payload: parse_hex_payload(&options.string("data")?)?,
            },
            "ping" => RemoteCommand::Ping,
            "channels" => RemoteCommand::Channels,
            "unattended" => RemoteCommand::Unattended,
            other => return Err(InputError::UnknownCommand(other.to_string())),
        })
    }
}

fn opt(name: &'static str, description: &'static str, kind: OptionKind, required: bool) -> OptionSpec {
    OptionSpec {
        name,
        description,
        kind,
        required,
    }
}

/// Every remote command as registered with the chat platform.
pub fn command_catalog() -> Vec<CommandSpec> {
    use OptionKind::*;
    vec![
        CommandSpec {
            name: "lora",
            description: "Send a message over LoRa",
            options: vec![
                opt("message", "Text to send", String, true),
                opt("channel", "Channel index (default 1)", Integer, false),
            ],
        },
        CommandSpec {
            name: "message",
            description: "Send a direct message to a node",
            options: vec![
                opt("nodeid", "Node id, e.g. !a1b2c3d4", String, true),
                opt("message", "Text to send", String, true),
            ],
        },
        CommandSpec {
            name: "dm",
            description: "Pick a node and send it a direct message",
            options: vec![],
        },
        CommandSpec {
            name: "nodes",
            description: "List mesh nodes, most recently heard first",
            options: vec![],
        },
        CommandSpec {
            name: "info",
            description: "Show gateway device information",
            options: vec![],
        },
        CommandSpec {
            name: "position",
            description: "Broadcast a position",
            options: vec![
                opt("latitude", "Latitude in degrees", Number, true),
                opt("longitude", "Longitude in degrees", Number, true),
                opt("altitude", "Altitude in meters (default 0)", Integer, false),
            ],
        },
        CommandSpec {
            name: "telemetry",
            description: "Broadcast device telemetry",
            options: vec![],
        },
        CommandSpec {
            name: "trace",
            description: "Run a traceroute to a node",
            options: vec![
                opt("destination", "Node id, e.g. !a1b2c3d4", String, true),
                opt("hoplimit", "Hop limit (default 10)", Integer, false),
                opt("channel_index", "Channel index (default 0)", Integer, false),
            ],
        },
        CommandSpec {
            name: "senddata",
            description: "Send raw bytes on a port",
            options: vec![
                opt("port", "Port number (0-511)", Integer, true),
                opt("data", "Hex-encoded payload", String, true),
            ],
        },
        CommandSpec {
            name: "ping",
            description: "Send a heartbeat to the gateway device",
            options: vec![],
        },
        CommandSpec {
            name: "channels",
            description: "List configured channels",
            options: vec![],
        },
        CommandSpec {
            name: "unattended",
            description: "Toggle language-model auto-replies to mesh messages",
            options: vec![],
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Message(ChatMessage),
    OpenView(SessionKind),
}

pub struct CommandDispatcher {
    link: Arc<dyn MeshLink>,
    chat: Arc<dyn ChatPlatform>,
    unattended: UnattendedMode,
    default_lora_channel: u32,
}

impl CommandDispatcher {
    pub fn new(
        link: Arc<dyn MeshLink>,
        chat: Arc<dyn ChatPlatform>,
        unattended: UnattendedMode,
        default_lora_channel: u32,
    ) -> Self {
        Self {
            link,
            chat,
            unattended,
            default_lora_channel,
        }
    }

    /// Run a command and always produce something to show the user.
    /// Argument errors are shown only to the invoking user.
    pub async fn dispatch(&self, name: &str, options: &CommandOptions) -> CommandReply {
        match self.try_dispatch(name, options).await {
            Ok(reply) => reply,
            Err(e @ CommandError::Input(_)) => {
                info!("/{} rejected: {}", name, e);
                CommandReply::Message(ChatMessage::text(e.to_string()).ephemeral())
            }
            Err(e) => {
                warn!("/{} failed: {}", name, e);
                CommandReply::Message(ChatMessage::text(e.to_string()))
            }
        }
    }

    pub async fn try_dispatch(&self, name: &str, options: &CommandOptions) -> Result<CommandReply, CommandError> {
        let command = RemoteCommand::parse(name, options, self.default_lora_channel)?;
        self.execute(command).await
    }

    pub async fn execute(&self, command: RemoteCommand) -> Result<CommandReply, CommandError> {
        let text = match command {
            RemoteCommand::Lora { message, channel } => {
                self.link
                    .send_text(&message, channel, None)
                    .await
                    .map_err(CommandError::link("Error sending message"))?;
                format!("Message sent over LoRa on channel {}: {}", channel, message)
            }
            RemoteCommand::Message { destination, message } => {
                let node_id = node_id_string(destination);
                self.link
                    .send_text(&message, 0, Some(destination))
                    .await
                    .map_err(CommandError::link(format!("Error sending direct message to {}", node_id)))?;
                format!("Direct message sent to {}: {}", node_id, message)
            }
            RemoteCommand::Dm => return Ok(CommandReply::OpenView(SessionKind::DmPicker)),
            RemoteCommand::Nodes => return Ok(CommandReply::OpenView(SessionKind::NodeList)),
            RemoteCommand::Info => return Ok(CommandReply::OpenView(SessionKind::DeviceInfo)),
            RemoteCommand::Position {
                latitude,
                longitude,
                altitude,
            } => {
                self.link
                    .send_position(latitude, longitude, altitude)
                    .await
                    .map_err(CommandError::link("Error sending position"))?;
                format!("Position sent: lat={}, lon={}, alt={}", latitude, longitude, altitude)
            }
            RemoteCommand::Telemetry => {
                self.link
                    .send_telemetry_request()
                    .await
                    .map_err(CommandError::link("Error requesting telemetry"))?;
                "Telemetry request sent.".to_string()
            }
            RemoteCommand::Trace {
                destination,
                hop_limit,
                channel_index,
            } => {
                let node_id = node_id_string(destination);
                self.link
                    .send_traceroute(destination, hop_limit, channel_index)
                    .await
                    .map_err(CommandError::link(format!("Error sending traceroute to {}", node_id)))?;
                format!(
                    "Traceroute request sent to {} with hoplimit {} on channel {}.",
                    node_id, hop_limit, channel_index
                )
            }
            RemoteCommand::SendData { port, payload } => {
                let shown = hex::encode(&payload);
                self.link
                    .send_raw_data(payload, port)
                    .await
                    .map_err(CommandError::link("Error sending data"))?;
                format!("Data sent on port {}: {}", port, shown)
            }
            RemoteCommand::Ping => {
                self.link
                    .send_heartbeat()
                    .await
                    .map_err(CommandError::link("Error sending heartbeat"))?;
                "Heartbeat sent to Meshtastic node.".to_string()
            }
            RemoteCommand::Channels => {
                return Ok(CommandReply::Message(ChatMessage::embed(channels_embed(
                    &self.link.list_channels(),
                ))));
            }
            RemoteCommand::Unattended => {
                let enabled = self.unattended.toggle();
                info!("Unattended mode is now {}", if enabled { "ON" } else { "OFF" });
                if let Err(e) = self.chat.set_presence(UnattendedMode::presence_text(enabled)).await {
                    warn!("Failed to update presence: {}", e);
                }
                format!("Unattended mode is now {}.", if enabled { "ON" } else { "OFF" })
            }
        };
        Ok(CommandReply::Message(ChatMessage::text(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::OptionValue;

    fn opts(pairs: &[(&str, OptionValue)]) -> CommandOptions {
        CommandOptions(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn lora_defaults_to_configured_channel() {
        let cmd = RemoteCommand::parse("lora", &opts(&[("message", OptionValue::String("hi".into()))]), 1).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::Lora {
                message: "hi".into(),
                channel: 1
            }
        );
    }

    #[test]
    fn trace_defaults() {
        let cmd = RemoteCommand::parse(
            "trace",
            &opts(&[("destination", OptionValue::String("!a1b2".into()))]),
            1,
        )
        .unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::Trace {
                destination: 0xa1b2,
                hop_limit: 10,
                channel_index: 0
            }
        );
    }

    #[test]
    fn bad_arguments_are_input_errors() {
        let bad_lat = opts(&[
            ("latitude", OptionValue::Number(91.0)),
            ("longitude", OptionValue::Number(0.0)),
        ]);
        assert!(matches!(
            RemoteCommand::parse("position", &bad_lat, 1),
            Err(InputError::OutOfRange { field: "latitude", .. })
        ));
        let bad_hex = opts(&[
            ("port", OptionValue::Integer(256)),
            ("data", OptionValue::String("xyz".into())),
        ]);
        assert!(matches!(
            RemoteCommand::parse("senddata", &bad_hex, 1),
            Err(InputError::InvalidHex { .. })
        ));
        assert!(matches!(
            RemoteCommand::parse("frobnicate", &CommandOptions::default(), 1),
            Err(InputError::UnknownCommand(_))
        ));
    }

    #[test]
    fn catalog_covers_every_parseable_command() {
        let catalog = command_catalog();
        assert_eq!(catalog.len(), 12);
        for spec in &catalog {
            let err = RemoteCommand::parse(spec.name, &CommandOptions::default(), 1).err();
            assert!(!matches!(err, Some(InputError::UnknownCommand(_))), "{}", spec.name);
            assert!(spec.options.len() <= 25);
        }
    }
}

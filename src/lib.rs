//! # meshcord - Meshtastic ↔ Discord Bridge
//!
//! meshcord connects a Meshtastic LoRa mesh network to a Discord channel. It relays
//! primary-channel mesh text into Discord, exposes slash commands that drive the gateway
//! radio, and can auto-reply to mesh senders through a local language model while the
//! operator is away.
//!
//! ## Features
//!
//! - **Mesh relay**: text heard on channel 0 is echoed to a Discord channel, in order.
//! - **Remote commands**: `/lora`, `/message`, `/position`, `/telemetry`, `/trace`, `/senddata`,
//!   `/ping`, `/channels`, plus the interactive `/nodes`, `/info` and `/dm` views.
//! - **Unattended mode**: `/unattended` toggles per-sender language-model conversations
//!   answered over the mesh.
//! - **Single device link**: one process-wide connection over TCP or serial, with a bounded
//!   command queue and per-command timeouts.
//! - **Daemon Mode**: background service support (Unix) with TTY-aware logging.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshcord::bridge::{BridgeServer, BridgeSettings, CrossThreadRelay};
//! use meshcord::config::Config;
//! use meshcord::discord::DiscordClient;
//! use meshcord::llm::OllamaClient;
//! use meshcord::meshtastic::{DeviceAddress, RadioLinkHandle};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (relay, events) = CrossThreadRelay::new();
//!     let address = DeviceAddress::parse(&config.meshtastic.address, config.meshtastic.baud_rate)?;
//!     let link = RadioLinkHandle::connect(&address, config.meshtastic.link_options(), Arc::new(relay))?;
//!     let discord = DiscordClient::new(config.require_token()?, &config.discord.api_base, None);
//!     let (_tx, interactions) = tokio::sync::mpsc::unbounded_channel();
//!     let server = BridgeServer::new(
//!         BridgeSettings::from_config(&config),
//!         Arc::new(link),
//!         Arc::new(discord),
//!         Arc::new(OllamaClient::new(&config.llm)),
//!     );
//!     server.run(events, interactions).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - relay, conversations, auto-reply, views, commands and the event loop
//! - [`meshtastic`] - device link: framing, transport, receiver and command threads
//! - [`chat`] - chat platform abstraction used by the bridge
//! - [`discord`] - Discord REST and gateway implementation of [`chat::ChatPlatform`]
//! - [`llm`] - language model client for unattended mode
//! - [`config`] - configuration management and validation
//! - [`validation`] - command argument parsing and range checks
//! - [`protobuf`] - Meshtastic protobuf messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐        ┌─────────────────┐
//! │  Discord        │◀──────▶│  Bridge loop    │ ← commands, views, relay echo
//! │  (REST/Gateway) │        └─────────────────┘
//! └─────────────────┘          ▲           │
//!                              │ relay     │ commands
//! ┌─────────────────┐          │           ▼
//! │  Language model │◀── auto-reply ──┌─────────────────┐
//! └─────────────────┘                 │  Device link    │ ← receiver + command threads
//!                                     └─────────────────┘
//! ```

pub mod bridge;
pub mod chat;
pub mod config;
pub mod discord;
pub mod llm;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod protobuf;
pub mod validation;

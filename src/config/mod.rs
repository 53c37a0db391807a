//! # Configuration Management Module
//!
//! All runtime settings for meshcord live in one TOML file. Sections:
//!
//! - [`DiscordConfig`] - bot token, relay channel, optional guild for command registration
//! - [`MeshtasticConfig`] - device address and link tuning (timeouts, queue depth, heartbeat)
//! - [`BridgeConfig`] - paging, session timeout, auto-reply chunking, startup mode
//! - [`LlmConfig`] - language model endpoint used in unattended mode
//! - [`LoggingConfig`] - level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshcord::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Device: {}", config.meshtastic.address);
//!     Config::create_default("config.example.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [discord]
//! token = ""
//! channel_id = "123456789012345678"
//!
//! [meshtastic]
//! address = "192.168.1.50"
//!
//! [bridge]
//! page_size = 10
//!
//! [llm]
//! model = "llama3"
//! ```
//!
//! The `MESHCORD_DISCORD_TOKEN` environment variable takes precedence over `discord.token`,
//! so the token can stay out of the file.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::meshtastic::LinkOptions;

/// Environment variable that overrides `discord.token`.
pub const TOKEN_ENV: &str = "MESHCORD_DISCORD_TOKEN";

/// Discord allows at most 25 options in a select menu.
pub const MAX_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    /// Channel that receives relayed mesh traffic.
    pub channel_id: String,
    /// Register commands for this guild only (instant update) instead of globally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    /// `host`, `host:port` or a serial device path.
    pub address: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// How long startup waits for the device's initial config dump.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_seconds: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_queue_depth")]
    pub command_queue_depth: usize,
    /// 0 disables the keepalive.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

fn default_baud_rate() -> u32 {
    115200
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_sync_timeout() -> u64 {
    20
}
fn default_command_timeout_ms() -> u64 {
    2500
}
fn default_queue_depth() -> usize {
    16
}
fn default_heartbeat_interval() -> u64 {
    300
}

impl MeshtasticConfig {
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            queue_depth: self.command_queue_depth,
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub page_size: usize,
    /// Inactivity window after which a view's controls go inert.
    pub session_timeout_seconds: u64,
    pub unattended_at_startup: bool,
    /// Auto-replies are split into chunks of at most this many bytes before radio send.
    pub max_text_bytes: usize,
    pub default_lora_channel: u32,
    /// 0 disables the periodic metrics line.
    pub stats_interval_seconds: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            session_timeout_seconds: 180,
            unattended_at_startup: false,
            max_text_bytes: 200, // leaves room for protocol overhead under the 233 byte payload cap
            default_lora_channel: 1,
            stats_interval_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/chat".to_string(),
            model: "llama3".to_string(),
            max_tokens: 120,
            timeout_seconds: 30,
            system_prompt: "You are answering messages from a LoRa mesh radio network on behalf of an \
                            operator who is away. Keep every reply short, plain text, and under 200 characters."
                .to_string(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("meshcord.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file, then apply the token environment override.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.discord.token = token.trim().to_string();
            }
        }
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings the bridge cannot run with. The token is checked separately by
    /// the commands that talk to Discord.
    pub fn validate(&self) -> Result<()> {
        if self.discord.channel_id.trim().is_empty() {
            return Err(anyhow!("discord.channel_id must be set"));
        }
        if self.meshtastic.address.trim().is_empty() {
            return Err(anyhow!("meshtastic.address must be set"));
        }
        if self.meshtastic.command_queue_depth == 0 {
            return Err(anyhow!("meshtastic.command_queue_depth must be at least 1"));
        }
        if self.meshtastic.command_timeout_ms == 0 {
            return Err(anyhow!("meshtastic.command_timeout_ms must be greater than 0"));
        }
        if self.bridge.page_size == 0 || self.bridge.page_size > MAX_PAGE_SIZE {
            return Err(anyhow!(
                "bridge.page_size must be between 1 and {} (got {})",
                MAX_PAGE_SIZE,
                self.bridge.page_size
            ));
        }
        if self.bridge.session_timeout_seconds == 0 {
            return Err(anyhow!("bridge.session_timeout_seconds must be greater than 0"));
        }
        if self.bridge.max_text_bytes < 16 || self.bridge.max_text_bytes > crate::meshtastic::MAX_PAYLOAD_LEN {
            return Err(anyhow!(
                "bridge.max_text_bytes must be between 16 and {}",
                crate::meshtastic::MAX_PAYLOAD_LEN
            ));
        }
        if self.bridge.default_lora_channel > 7 {
            return Err(anyhow!("bridge.default_lora_channel must be between 0 and 7"));
        }
        if self.llm.timeout_seconds == 0 {
            return Err(anyhow!("llm.timeout_seconds must be greater than 0"));
        }
        Ok(())
    }

    /// Fail early when no bot token is available from the file or environment.
    pub fn require_token(&self) -> Result<&str> {
        let token = self.discord.token.trim();
        if token.is_empty() {
            Err(anyhow!(
                "No Discord bot token: set discord.token or the {} environment variable",
                TOKEN_ENV
            ))
        } else {
            Ok(token)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            discord: DiscordConfig {
                token: String::new(),
                channel_id: "000000000000000000".to_string(),
                guild_id: None,
                api_base: default_api_base(),
                gateway_url: default_gateway_url(),
            },
            meshtastic: MeshtasticConfig {
                address: "/dev/ttyUSB0".to_string(),
                baud_rate: default_baud_rate(),
                connect_timeout_seconds: default_connect_timeout(),
                sync_timeout_seconds: default_sync_timeout(),
                command_timeout_ms: default_command_timeout_ms(),
                command_queue_depth: default_queue_depth(),
                heartbeat_interval_seconds: default_heartbeat_interval(),
            },
            bridge: BridgeConfig::default(),
            llm: LlmConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

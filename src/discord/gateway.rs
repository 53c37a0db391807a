//! Discord Gateway connection.
//!
//! Keeps one websocket session alive: Hello → Identify → periodic Heartbeat, forwarding
//! `INTERACTION_CREATE` dispatches to the bridge and sending presence updates (op 3).
//! Closed connections, Reconnect (op 7) and Invalid Session (op 9) start a fresh session
//! after an exponential backoff. Authentication failures stop the gateway.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::chat::{ChatError, Interaction};
use crate::discord::parse_interaction;

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_PRESENCE: u64 = 3;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

/// Close codes after which reconnecting cannot help.
const FATAL_CLOSE_CODES: [u16; 5] = [4004, 4010, 4011, 4013, 4014];

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("gateway protocol error: {0}")]
    Protocol(String),
    #[error("gateway rejected the session (close code {0})")]
    Fatal(u16),
}

#[derive(Debug)]
enum GatewayCommand {
    Presence(String),
}

#[derive(Debug, PartialEq)]
enum SessionEnd {
    Reconnect,
    /// The bridge stopped listening; the gateway exits.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub url: String,
    pub token: String,
    pub initial_presence: Option<String>,
}

/// Control side of a running gateway. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    tx: mpsc::UnboundedSender<GatewayCommand>,
}

impl GatewayHandle {
    /// Queue a presence update; re-sent after every reconnect.
    pub fn set_presence(&self, status: &str) -> Result<(), ChatError> {
        self.tx
            .send(GatewayCommand::Presence(status.to_string()))
            .map_err(|_| ChatError::NotConnected)
    }
}

/// Start the gateway task. Interactions are delivered on `interactions` until either side stops.
pub fn spawn(settings: GatewaySettings, interactions: mpsc::UnboundedSender<Interaction>) -> (GatewayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let gateway = Gateway {
        presence: settings.initial_presence.clone(),
        settings,
        interactions,
        commands: rx,
        seq: None,
    };
    (GatewayHandle { tx }, tokio::spawn(gateway.run()))
}

fn presence_payload(status: &str) -> Value {
    json!({
        "op": OP_PRESENCE,
        "d": {
            "since": null,
            "activities": [{ "name": "Custom Status", "type": 4, "state": status }],
            "status": "online",
            "afk": false,
        }
    })
}

fn identify_payload(token: &str, presence: Option<&str>) -> Value {
    let mut d = json!({
        "token": token,
        // Interactions arrive without privileged intents; GUILDS keeps the session useful.
        "intents": 1,
        "properties": { "os": std::env::consts::OS, "browser": "meshcord", "device": "meshcord" },
    });
    if let Some(status) = presence {
        d["presence"] = presence_payload(status)["d"].clone();
    }
    json!({ "op": OP_IDENTIFY, "d": d })
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

struct Gateway {
    settings: GatewaySettings,
    interactions: mpsc::UnboundedSender<Interaction>,
    commands: mpsc::UnboundedReceiver<GatewayCommand>,
    presence: Option<String>,
    seq: Option<u64>,
}

impl Gateway {
    async fn run(mut self) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let mut ready = false;
            match self.session(&mut ready).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Gateway stopping");
                    return;
                }
                Ok(SessionEnd::Reconnect) => debug!("Gateway asked for a new session"),
                Err(GatewayError::Fatal(code)) => {
                    error!("Discord closed the gateway with code {}; check the bot token and intents", code);
                    return;
                }
                Err(e) => warn!("Gateway session ended: {}", e),
            }
            if ready {
                backoff = INITIAL_BACKOFF;
            }
            info!("Reconnecting to Discord gateway in {:?}", backoff);
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }
    }

    async fn session(&mut self, ready: &mut bool) -> Result<SessionEnd, GatewayError> {
        let (ws, _) = connect_async(self.settings.url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        let hello = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(text.as_str())
                    .map_err(|e| GatewayError::Protocol(e.to_string()))?,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(GatewayError::Protocol("closed before Hello".into())),
            }
        };
        if hello["op"].as_u64() != Some(OP_HELLO) {
            return Err(GatewayError::Protocol(format!("expected Hello, got op {}", hello["op"])));
        }
        let interval_ms = hello["d"]["heartbeat_interval"]
            .as_u64()
            .ok_or_else(|| GatewayError::Protocol("Hello without heartbeat_interval".into()))?;
        self.seq = None;

        let identify = identify_payload(&self.settings.token, self.presence.as_deref());
        write.send(Message::Text(identify.to_string().into())).await?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
        heartbeat.tick().await;
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        warn!("Gateway heartbeat not acknowledged; reconnecting");
                        return Ok(SessionEnd::Reconnect);
                    }
                    let beat = json!({ "op": OP_HEARTBEAT, "d": self.seq });
                    write.send(Message::Text(beat.to_string().into())).await?;
                    awaiting_ack = true;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(GatewayCommand::Presence(status)) => {
                            write.send(Message::Text(presence_payload(&status).to_string().into())).await?;
                            self.presence = Some(status);
                        }
                        None => return Ok(SessionEnd::Shutdown),
                    }
                }
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(close))) => {
                            let code = close.as_ref().map(|c| u16::from(c.code)).unwrap_or(u16::from(CloseCode::Normal));
                            if FATAL_CLOSE_CODES.contains(&code) {
                                return Err(GatewayError::Fatal(code));
                            }
                            info!("Gateway closed (code {})", code);
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::Reconnect),
                    };
                    let payload: Value = match serde_json::from_str(text.as_str()) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Ignoring undecodable gateway frame: {}", e);
                            continue;
                        }
                    };
                    if let Some(seq) = payload["s"].as_u64() {
                        self.seq = Some(seq);
                    }
                    match payload["op"].as_u64() {
                        Some(OP_DISPATCH) => {
                            if let Some(end) = self.dispatch(&payload, ready) {
                                return Ok(end);
                            }
                        }
                        Some(OP_HEARTBEAT) => {
                            let beat = json!({ "op": OP_HEARTBEAT, "d": self.seq });
                            write.send(Message::Text(beat.to_string().into())).await?;
                        }
                        Some(OP_HEARTBEAT_ACK) => awaiting_ack = false,
                        Some(OP_RECONNECT) => return Ok(SessionEnd::Reconnect),
                        Some(OP_INVALID_SESSION) => {
                            warn!("Gateway session invalidated");
                            return Ok(SessionEnd::Reconnect);
                        }
                        other => trace!("Unhandled gateway op {:?}", other),
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, payload: &Value, ready: &mut bool) -> Option<SessionEnd> {
        match payload["t"].as_str() {
            Some("READY") => {
                *ready = true;
                let user = payload["d"]["user"]["username"].as_str().unwrap_or("?");
                info!("Connected to Discord as {}", user);
            }
            Some("INTERACTION_CREATE") => match parse_interaction(&payload["d"]) {
                Some(interaction) => {
                    if self.interactions.send(interaction).is_err() {
                        return Some(SessionEnd::Shutdown);
                    }
                }
                None => debug!("Ignoring unsupported interaction"),
            },
            Some(other) => trace!("Ignoring dispatch {}", other),
            None => {}
        }
        None
    }
}

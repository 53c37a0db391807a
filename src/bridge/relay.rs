//! Hand-off from the radio receiver thread to the bridge event loop.
//!
//! [`CrossThreadRelay`] is the [`MeshEventSink`] installed on the device link. It runs on
//! the receiver thread, so it only filters, parses and posts: every event goes onto one
//! unbounded FIFO channel and the bridge loop drains it in post order. Because the
//! receiver posts in receipt order and there is a single queue, messages from the same
//! sender are handled in the order they arrived.

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use tokio::sync::mpsc;

use crate::logutil::{escape_log, truncate_for_log};
use crate::meshtastic::{MeshEvent, MeshEventSink, TextPacket};
use crate::metrics;

/// Only text on the primary channel is relayed or auto-answered.
pub const RELAY_CHANNEL_INDEX: u32 = 0;

/// A text message from the mesh, accepted for relay.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMeshMessage {
    /// `!a1b2c3d4`, or `None` when the packet carried no sender.
    pub sender_id: Option<String>,
    pub channel_index: u32,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMeshMessage {
    pub fn sender_label(&self) -> &str {
        self.sender_id.as_deref().unwrap_or("unknown node")
    }
}

/// Work posted from the radio thread to the bridge loop.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    MeshText(InboundMeshMessage),
    Traceroute { destination: String, route: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum RelayParseError {
    #[error("text from {sender} is not valid UTF-8: {source}")]
    InvalidUtf8 {
        sender: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Turn a text packet into a relay message.
///
/// `Ok(None)` means the packet is deliberately ignored (non-primary channel or empty text).
pub fn parse_text_packet(packet: TextPacket) -> Result<Option<InboundMeshMessage>, RelayParseError> {
    if packet.channel_index != RELAY_CHANNEL_INDEX {
        return Ok(None);
    }
    let sender_label = packet.sender_id.clone().unwrap_or_else(|| "unknown node".to_string());
    let text = String::from_utf8(packet.payload).map_err(|source| RelayParseError::InvalidUtf8 {
        sender: sender_label,
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(InboundMeshMessage {
        sender_id: packet.sender_id,
        channel_index: packet.channel_index,
        text,
        received_at: packet.received_at,
    }))
}

/// Posts mesh events onto the bridge loop's queue. Never blocks the caller.
#[derive(Debug, Clone)]
pub struct CrossThreadRelay {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl CrossThreadRelay {
    /// Create the relay and the receiving end the bridge loop drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn post(&self, event: BridgeEvent) {
        if self.tx.send(event).is_err() {
            debug!("Bridge loop has stopped; dropping mesh event");
        }
    }

    fn on_text(&self, packet: TextPacket) {
        metrics::inc_mesh_text_received();
        let channel = packet.channel_index;
        let sender = packet.sender_id.clone();
        match parse_text_packet(packet) {
            Ok(Some(msg)) => {
                trace!(
                    "Relaying text from {} ({} bytes): {}",
                    msg.sender_label(),
                    msg.text.len(),
                    truncate_for_log(&msg.text, 120)
                );
                self.post(BridgeEvent::MeshText(msg));
            }
            Ok(None) if channel != RELAY_CHANNEL_INDEX => {
                metrics::inc_mesh_text_filtered();
                trace!(
                    "Ignoring text on channel {} from {}",
                    channel,
                    sender.as_deref().unwrap_or("unknown node")
                );
            }
            Ok(None) => {
                metrics::inc_mesh_text_dropped();
                debug!("Dropping empty text from {}", sender.as_deref().unwrap_or("unknown node"));
            }
            Err(e) => {
                metrics::inc_mesh_text_dropped();
                warn!("Dropping mesh text: {}", escape_log(&e.to_string()));
            }
        }
    }
}

impl MeshEventSink for CrossThreadRelay {
    fn on_mesh_event(&self, event: MeshEvent) {
        match event {
            MeshEvent::Text(packet) => self.on_text(packet),
            MeshEvent::TracerouteResult { destination, route } => {
                self.post(BridgeEvent::Traceroute { destination, route });
            }
        }
    }
}

//! # Meshtastic Device Link
//!
//! This module owns the single connection to the mesh gateway device. It speaks the
//! Meshtastic client API (framed `ToRadio`/`FromRadio` protobufs) over TCP or serial.
//!
//! ## Threads
//!
//! The link runs on two dedicated OS threads, never on the async runtime:
//!
//! - **receiver**: blocking reads, frame decoding, [`DeviceState`] updates, and delivery
//!   of [`MeshEvent`]s to a [`MeshEventSink`] (the bridge's cross-thread relay).
//! - **command worker**: drains a bounded queue of [`LinkCommand`]s, encodes each into a
//!   `ToRadio` frame and writes it. Callers wait on a oneshot reply with a timeout, so a
//!   stalled device surfaces as [`LinkError::Timeout`] or [`LinkError::Busy`] instead of
//!   blocking the chat event loop.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshcord::meshtastic::{DeviceAddress, LinkOptions, MeshEvent, MeshEventSink, MeshLink, RadioLinkHandle};
//!
//! struct Print;
//! impl MeshEventSink for Print {
//!     fn on_mesh_event(&self, event: MeshEvent) { println!("{:?}", event); }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let address = DeviceAddress::parse("192.168.1.50", 115200)?;
//!     let link = RadioLinkHandle::connect(&address, LinkOptions::default(), Arc::new(Print))?;
//!     link.wait_for_sync(std::time::Duration::from_secs(15)).await;
//!     link.send_text("hello mesh", 0, None).await?;
//!     Ok(())
//! }
//! ```

pub mod framer;
pub mod transport;

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, info, trace, warn};
use prost::Message;
use tokio::sync::{mpsc, oneshot};

use crate::logutil::{escape_log, truncate_for_log};
use crate::metrics;
use crate::protobuf::meshtastic as proto;

pub use framer::{encode_frame, StreamFramer};
pub use transport::DeviceAddress;

/// Destination number meaning "every node".
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

/// Largest `Data.payload` the firmware accepts (`DATA_PAYLOAD_LEN`).
pub const MAX_PAYLOAD_LEN: usize = 233;

const DEFAULT_HOP_LIMIT: u32 = 3;
const MAX_HOP_LIMIT: u32 = 7;

/// Render a node number the way Meshtastic clients display it (`!a1b2c3d4`).
pub fn node_id_string(num: u32) -> String {
    format!("!{:08x}", num)
}

/// Errors raised by the device link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("device unavailable at {address}: {reason}")]
    Unavailable { address: String, reason: String },
    #[error("a device link is already open in this process")]
    AlreadyOpen,
    #[error("device link is busy ({0} commands already queued)")]
    Busy(usize),
    #[error("device did not complete the command within {0:?}")]
    Timeout(Duration),
    #[error("device link is closed")]
    Closed,
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// One node as last reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshNode {
    pub num: u32,
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub last_heard: Option<DateTime<Utc>>,
    pub snr: Option<f32>,
    pub battery_level: Option<u32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub hops_away: Option<u32>,
    pub is_favorite: bool,
}

impl MeshNode {
    pub fn new(num: u32) -> Self {
        Self {
            num,
            id: node_id_string(num),
            long_name: String::new(),
            short_name: String::new(),
            last_heard: None,
            snr: None,
            battery_level: None,
            channel_utilization: None,
            air_util_tx: None,
            hops_away: None,
            is_favorite: false,
        }
    }

    /// Long name, else short name, else the node id.
    pub fn display_name(&self) -> &str {
        if !self.long_name.is_empty() {
            &self.long_name
        } else if !self.short_name.is_empty() {
            &self.short_name
        } else {
            &self.id
        }
    }

    fn apply_user(&mut self, user: &proto::User) {
        let long_name = user.long_name.trim();
        let short_name = user.short_name.trim();
        if !long_name.is_empty() {
            self.long_name = long_name.to_string();
        }
        if !short_name.is_empty() {
            self.short_name = short_name.to_string();
        }
    }

    fn apply_metrics(&mut self, m: &proto::DeviceMetrics) {
        if m.battery_level.is_some() {
            self.battery_level = m.battery_level;
        }
        if m.channel_utilization.is_some() {
            self.channel_utilization = m.channel_utilization;
        }
        if m.air_util_tx.is_some() {
            self.air_util_tx = m.air_util_tx;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Disabled,
    Primary,
    Secondary,
}

/// One configured radio channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub index: u32,
    pub name: String,
    pub role: ChannelRole,
}

impl ChannelInfo {
    pub fn enabled(&self) -> bool {
        self.role != ChannelRole::Disabled
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerInfo {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub my_node_num: Option<u32>,
    pub reboot_count: u32,
    pub node_count: usize,
    pub channel_count: usize,
    pub synced: bool,
    pub connected: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMetadataInfo {
    pub firmware_version: String,
    pub hw_model: i32,
    pub role: i32,
    pub has_wifi: bool,
    pub has_bluetooth: bool,
    pub has_ethernet: bool,
}

/// Structured `{owner, deviceInfo, metadata}` view of the gateway device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDescription {
    pub owner: Option<OwnerInfo>,
    pub device_info: DeviceInfo,
    pub metadata: Option<DeviceMetadataInfo>,
}

/// Raw text packet as it came off the radio; the relay turns it into a chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPacket {
    pub sender_id: Option<String>,
    pub channel_index: u32,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Events the receiver thread hands to its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    Text(TextPacket),
    TracerouteResult {
        destination: String,
        route: Vec<String>,
    },
}

/// Receives events on the radio thread. Implementations must not block.
pub trait MeshEventSink: Send + Sync + 'static {
    fn on_mesh_event(&self, event: MeshEvent);
}

/// Live device snapshot maintained by the receiver thread.
#[derive(Debug, Default)]
pub struct DeviceState {
    order: Vec<u32>,
    nodes: std::collections::HashMap<u32, MeshNode>,
    channels: Vec<ChannelInfo>,
    my_node_num: Option<u32>,
    reboot_count: u32,
    metadata: Option<DeviceMetadataInfo>,
    config_complete: bool,
    connected: bool,
}

fn epoch_to_utc(secs: u32) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs as i64, 0).single()
}

impl DeviceState {
    pub fn my_node_num(&self) -> Option<u32> {
        self.my_node_num
    }

    pub fn is_synced(&self) -> bool {
        self.config_complete
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Nodes in the order the device first reported them.
    pub fn nodes(&self) -> Vec<MeshNode> {
        self.order
            .iter()
            .filter_map(|num| self.nodes.get(num).cloned())
            .collect()
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.channels.clone()
    }

    fn node_mut(&mut self, num: u32) -> &mut MeshNode {
        if !self.nodes.contains_key(&num) {
            self.order.push(num);
        }
        self.nodes.entry(num).or_insert_with(|| MeshNode::new(num))
    }

    pub fn describe(&self) -> DeviceDescription {
        let owner = self
            .my_node_num
            .and_then(|n| self.nodes.get(&n))
            .map(|node| OwnerInfo {
                id: node.id.clone(),
                long_name: node.long_name.clone(),
                short_name: node.short_name.clone(),
            });
        DeviceDescription {
            owner,
            device_info: DeviceInfo {
                my_node_num: self.my_node_num,
                reboot_count: self.reboot_count,
                node_count: self.order.len(),
                channel_count: self.channels.iter().filter(|c| c.enabled()).count(),
                synced: self.config_complete,
                connected: self.connected,
            },
            metadata: self.metadata.clone(),
        }
    }

    fn local_metrics(&self) -> proto::DeviceMetrics {
        let node = self.my_node_num.and_then(|n| self.nodes.get(&n));
        proto::DeviceMetrics {
            battery_level: node.and_then(|n| n.battery_level),
            channel_utilization: node.and_then(|n| n.channel_utilization),
            air_util_tx: node.and_then(|n| n.air_util_tx),
            ..Default::default()
        }
    }

    /// Fold one `FromRadio` message into the snapshot, returning an event for the sink
    /// when the message carries something the bridge relays.
    pub fn apply(&mut self, msg: proto::FromRadio, now: DateTime<Utc>) -> Option<MeshEvent> {
        use proto::from_radio::PayloadVariant as FR;
        match msg.payload_variant? {
            FR::MyInfo(info) => {
                debug!("MyInfo: node=0x{:08x} reboots={}", info.my_node_num, info.reboot_count);
                self.my_node_num = Some(info.my_node_num);
                self.reboot_count = info.reboot_count;
                None
            }
            FR::NodeInfo(info) => {
                let node = self.node_mut(info.num);
                if let Some(user) = &info.user {
                    node.apply_user(user);
                }
                if let Some(m) = &info.device_metrics {
                    node.apply_metrics(m);
                }
                if let Some(ts) = epoch_to_utc(info.last_heard) {
                    node.last_heard = Some(ts);
                }
                if info.snr != 0.0 {
                    node.snr = Some(info.snr);
                }
                node.hops_away = info.hops_away;
                node.is_favorite = info.is_favorite;
                trace!("NodeInfo 0x{:08x} '{}'", info.num, escape_log(node.display_name()));
                None
            }
            FR::Channel(ch) => {
                let role = match proto::channel::Role::try_from(ch.role) {
                    Ok(proto::channel::Role::Primary) => ChannelRole::Primary,
                    Ok(proto::channel::Role::Secondary) => ChannelRole::Secondary,
                    _ => ChannelRole::Disabled,
                };
                let info = ChannelInfo {
                    index: ch.index.max(0) as u32,
                    name: ch.settings.map(|s| s.name).unwrap_or_default(),
                    role,
                };
                match self.channels.iter_mut().find(|c| c.index == info.index) {
                    Some(existing) => *existing = info,
                    None => {
                        self.channels.push(info);
                        self.channels.sort_by_key(|c| c.index);
                    }
                }
                None
            }
            FR::Metadata(md) => {
                self.metadata = Some(DeviceMetadataInfo {
                    firmware_version: md.firmware_version,
                    hw_model: md.hw_model,
                    role: md.role,
                    has_wifi: md.has_wifi,
                    has_bluetooth: md.has_bluetooth,
                    has_ethernet: md.has_ethernet,
                });
                None
            }
            FR::ConfigCompleteId(id) => {
                info!(
                    "Device sync complete (config id 0x{:08x}, {} nodes, {} channels)",
                    id,
                    self.order.len(),
                    self.channels.len()
                );
                self.config_complete = true;
                None
            }
            FR::Rebooted(_) => {
                warn!("Device reported a reboot; node table will refresh on next sync");
                None
            }
            FR::Packet(pkt) => self.apply_packet(pkt, now),
        }
    }

    fn apply_packet(&mut self, pkt: proto::MeshPacket, now: DateTime<Utc>) -> Option<MeshEvent> {
        use proto::mesh_packet::PayloadVariant as MP;
        use proto::PortNum;
        let data = match pkt.payload_variant {
            Some(MP::Decoded(d)) => d,
            Some(MP::Encrypted(bytes)) => {
                trace!("Encrypted packet from 0x{:08x} ({} bytes)", pkt.from, bytes.len());
                return None;
            }
            None => return None,
        };
        let heard = epoch_to_utc(pkt.rx_time).unwrap_or(now);
        if pkt.from != 0 {
            let node = self.node_mut(pkt.from);
            node.last_heard = Some(heard);
            if pkt.rx_snr != 0.0 {
                node.snr = Some(pkt.rx_snr);
            }
            if pkt.hop_start >= pkt.hop_limit && pkt.hop_start > 0 {
                node.hops_away = Some(pkt.hop_start - pkt.hop_limit);
            }
        }
        let port = PortNum::try_from(data.portnum).unwrap_or(PortNum::UnknownApp);
        match port {
            PortNum::TextMessageApp => Some(MeshEvent::Text(TextPacket {
                sender_id: (pkt.from != 0).then(|| node_id_string(pkt.from)),
                channel_index: pkt.channel,
                payload: data.payload,
                received_at: heard,
            })),
            PortNum::NodeinfoApp => {
                if let Ok(user) = proto::User::decode(data.payload.as_slice()) {
                    self.node_mut(pkt.from).apply_user(&user);
                    debug!(
                        "Updated node info for 0x{:08x}: {} ({})",
                        pkt.from,
                        escape_log(user.long_name.trim()),
                        escape_log(user.short_name.trim())
                    );
                }
                None
            }
            PortNum::TelemetryApp => {
                if let Ok(t) = proto::Telemetry::decode(data.payload.as_slice()) {
                    if let Some(proto::telemetry::Variant::DeviceMetrics(m)) = t.variant {
                        self.node_mut(pkt.from).apply_metrics(&m);
                    }
                }
                None
            }
            PortNum::TracerouteApp if data.request_id != 0 => {
                let rd = proto::RouteDiscovery::decode(data.payload.as_slice()).ok()?;
                // Reply travels from the traced node back to us; `to` is us, `from` the target.
                let mut route = Vec::with_capacity(rd.route.len() + 2);
                route.push(node_id_string(pkt.to));
                route.extend(rd.route.iter().map(|n| node_id_string(*n)));
                route.push(node_id_string(pkt.from));
                Some(MeshEvent::TracerouteResult {
                    destination: node_id_string(pkt.from),
                    route,
                })
            }
            other => {
                if let Some(summary) = summarize_payload(other, &data.payload) {
                    debug!("Non-text packet from 0x{:08x}: port={:?} {}", pkt.from, other, summary);
                } else {
                    debug!(
                        "Non-text packet from 0x{:08x}: port={:?} len={} hex={}...",
                        pkt.from,
                        other,
                        data.payload.len(),
                        hex_snippet(&data.payload, 16)
                    );
                }
                None
            }
        }
    }
}

fn hex_snippet(data: &[u8], max: usize) -> String {
    hex::encode(&data[..data.len().min(max)])
}

fn summarize_payload(port: proto::PortNum, payload: &[u8]) -> Option<String> {
    match port {
        proto::PortNum::PositionApp => {
            let pos = proto::Position::decode(payload).ok()?;
            let (lat, lon) = (pos.latitude_i?, pos.longitude_i?);
            Some(format!("position lat={:.5} lon={:.5}", lat as f64 * 1e-7, lon as f64 * 1e-7))
        }
        proto::PortNum::RoutingApp => Some(format!("routing len={}", payload.len())),
        _ => None,
    }
}

/// Outbound operations accepted by the command worker.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    WantConfig(u32),
    Text {
        text: String,
        channel_index: u32,
        destination: Option<u32>,
    },
    Position {
        latitude: f64,
        longitude: f64,
        altitude: i32,
    },
    TelemetryRequest,
    Traceroute {
        destination: u32,
        hop_limit: u32,
        channel_index: u32,
    },
    PositionRequest {
        destination: u32,
        channel_index: u32,
    },
    RawData {
        payload: Vec<u8>,
        port: u32,
    },
    Heartbeat,
}

impl LinkCommand {
    fn label(&self) -> &'static str {
        match self {
            LinkCommand::WantConfig(_) => "want_config",
            LinkCommand::Text { .. } => "text",
            LinkCommand::Position { .. } => "position",
            LinkCommand::TelemetryRequest => "telemetry",
            LinkCommand::Traceroute { .. } => "traceroute",
            LinkCommand::PositionRequest { .. } => "position_request",
            LinkCommand::RawData { .. } => "raw_data",
            LinkCommand::Heartbeat => "heartbeat",
        }
    }
}

fn next_packet_id() -> u32 {
    loop {
        let id: u32 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

fn data_packet(to: u32, channel: u32, data: proto::Data, want_ack: bool, hop_limit: u32) -> proto::ToRadio {
    use proto::mesh_packet::{PayloadVariant as MP, Priority};
    use proto::to_radio::PayloadVariant as TR;
    let pkt = proto::MeshPacket {
        from: 0, // filled by firmware
        to,
        channel,
        id: next_packet_id(),
        hop_limit,
        want_ack,
        priority: if want_ack { Priority::Reliable as i32 } else { Priority::Unset as i32 },
        payload_variant: Some(MP::Decoded(data)),
        ..Default::default()
    };
    proto::ToRadio {
        payload_variant: Some(TR::Packet(pkt)),
    }
}

/// Encode a command into the `ToRadio` message the firmware expects.
pub fn build_to_radio(command: &LinkCommand, state: &DeviceState) -> Result<proto::ToRadio, LinkError> {
    use proto::to_radio::PayloadVariant as TR;
    use proto::PortNum;
    let data = |port: PortNum, payload: Vec<u8>, want_response: bool| proto::Data {
        portnum: port as i32,
        payload,
        want_response,
        ..Default::default()
    };
    let check_len = |len: usize| {
        if len > MAX_PAYLOAD_LEN {
            Err(LinkError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD_LEN,
            })
        } else {
            Ok(())
        }
    };
    let msg = match command {
        LinkCommand::WantConfig(id) => proto::ToRadio {
            payload_variant: Some(TR::WantConfigId(*id)),
        },
        LinkCommand::Heartbeat => proto::ToRadio {
            payload_variant: Some(TR::Heartbeat(proto::Heartbeat {
                nonce: rand::random(),
            })),
        },
        LinkCommand::Text {
            text,
            channel_index,
            destination,
        } => {
            check_len(text.len())?;
            let to = destination.unwrap_or(BROADCAST_ADDR);
            let is_dm = to != BROADCAST_ADDR;
            data_packet(
                to,
                *channel_index,
                data(PortNum::TextMessageApp, text.as_bytes().to_vec(), false),
                is_dm,
                DEFAULT_HOP_LIMIT,
            )
        }
        LinkCommand::Position {
            latitude,
            longitude,
            altitude,
        } => {
            let pos = proto::Position {
                latitude_i: Some((latitude * 1e7).round() as i32),
                longitude_i: Some((longitude * 1e7).round() as i32),
                altitude: (*altitude != 0).then_some(*altitude),
                time: Utc::now().timestamp() as u32,
            };
            data_packet(
                BROADCAST_ADDR,
                0,
                data(PortNum::PositionApp, pos.encode_to_vec(), false),
                false,
                DEFAULT_HOP_LIMIT,
            )
        }
        LinkCommand::TelemetryRequest => {
            let t = proto::Telemetry {
                time: Utc::now().timestamp() as u32,
                variant: Some(proto::telemetry::Variant::DeviceMetrics(state.local_metrics())),
            };
            data_packet(
                BROADCAST_ADDR,
                0,
                data(PortNum::TelemetryApp, t.encode_to_vec(), false),
                false,
                DEFAULT_HOP_LIMIT,
            )
        }
        LinkCommand::Traceroute {
            destination,
            hop_limit,
            channel_index,
        } => data_packet(
            *destination,
            *channel_index,
            data(
                PortNum::TracerouteApp,
                proto::RouteDiscovery::default().encode_to_vec(),
                true,
            ),
            false,
            (*hop_limit).min(MAX_HOP_LIMIT),
        ),
        LinkCommand::PositionRequest {
            destination,
            channel_index,
        } => data_packet(
            *destination,
            *channel_index,
            data(PortNum::PositionApp, proto::Position::default().encode_to_vec(), true),
            false,
            DEFAULT_HOP_LIMIT,
        ),
        LinkCommand::RawData { payload, port } => {
            check_len(payload.len())?;
            let mut d = data(PortNum::UnknownApp, payload.clone(), false);
            d.portnum = *port as i32;
            data_packet(BROADCAST_ADDR, 0, d, false, DEFAULT_HOP_LIMIT)
        }
    };
    Ok(msg)
}

/// Link tuning.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub command_timeout: Duration,
    pub queue_depth: usize,
    pub connect_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(2500),
            queue_depth: 16,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

static LINK_OPEN: AtomicBool = AtomicBool::new(false);

/// Marks the process-wide device link as taken until dropped.
#[derive(Debug)]
struct LinkGuard;

impl LinkGuard {
    fn acquire() -> Result<Self, LinkError> {
        LINK_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| LinkGuard)
            .map_err(|_| LinkError::AlreadyOpen)
    }
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        LINK_OPEN.store(false, Ordering::Release);
    }
}

struct LinkRequest {
    command: LinkCommand,
    reply: oneshot::Sender<Result<(), LinkError>>,
}

struct LinkInner {
    commands: mpsc::Sender<LinkRequest>,
    state: Arc<Mutex<DeviceState>>,
    shutdown: Arc<AtomicBool>,
    options: LinkOptions,
    _guard: Option<LinkGuard>,
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Shared handle to the one device link. Cheap to clone.
#[derive(Clone)]
pub struct RadioLinkHandle {
    inner: Arc<LinkInner>,
}

fn lock_state(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    // A panicked holder leaves the snapshot usable; keep serving it.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RadioLinkHandle {
    /// Open the device and start the receiver and command threads.
    ///
    /// Fails with [`LinkError::AlreadyOpen`] if another link is live in this process and
    /// with [`LinkError::Unavailable`] if the device cannot be reached.
    pub fn connect(
        address: &DeviceAddress,
        options: LinkOptions,
        sink: Arc<dyn MeshEventSink>,
    ) -> Result<Self, LinkError> {
        let guard = LinkGuard::acquire()?;
        info!("Connecting to Meshtastic device at {}", address);
        let (reader, writer) = transport::open(address, options.connect_timeout)?;
        Self::start(reader, writer, options, sink, Some(guard))
    }

    /// Run the link over caller-provided byte streams (custom transports, tests).
    pub fn from_transport(
        reader: transport::ReadHalf,
        writer: transport::WriteHalf,
        options: LinkOptions,
        sink: Arc<dyn MeshEventSink>,
    ) -> Result<Self, LinkError> {
        Self::start(reader, writer, options, sink, None)
    }

    fn start(
        reader: transport::ReadHalf,
        writer: transport::WriteHalf,
        options: LinkOptions,
        sink: Arc<dyn MeshEventSink>,
        guard: Option<LinkGuard>,
    ) -> Result<Self, LinkError> {
        let state = Arc::new(Mutex::new(DeviceState {
            connected: true,
            ..Default::default()
        }));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(options.queue_depth.max(1));

        let worker_state = state.clone();
        std::thread::Builder::new()
            .name("radio-commands".into())
            .spawn(move || run_command_worker(writer, rx, worker_state))?;

        let rx_state = state.clone();
        let rx_shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name("radio-receiver".into())
            .spawn(move || run_receiver(reader, rx_state, sink, rx_shutdown))?;

        let handle = RadioLinkHandle {
            inner: Arc::new(LinkInner {
                commands: tx,
                state,
                shutdown,
                options,
                _guard: guard,
            }),
        };
        // Ask the device to push its node database, channels and metadata.
        let (reply, _ignored) = oneshot::channel();
        handle
            .inner
            .commands
            .try_send(LinkRequest {
                command: LinkCommand::WantConfig(next_packet_id()),
                reply,
            })
            .map_err(|_| LinkError::Closed)?;
        Ok(handle)
    }

    /// Wait until the device finished its initial config dump. Returns whether it did.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let state = lock_state(&self.inner.state);
                if state.is_synced() {
                    return true;
                }
                if !state.is_connected() {
                    return false;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn is_connected(&self) -> bool {
        lock_state(&self.inner.state).is_connected()
    }

    /// Queue a command and wait for the worker to write it.
    ///
    /// A full queue fails immediately with [`LinkError::Busy`]. A command that times out
    /// stays queued and may still reach the device.
    pub async fn submit(&self, command: LinkCommand) -> Result<(), LinkError> {
        let label = command.label();
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .try_send(LinkRequest { command, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => LinkError::Busy(self.inner.options.queue_depth),
                mpsc::error::TrySendError::Closed(_) => LinkError::Closed,
            })?;
        let timeout = self.inner.options.command_timeout;
        match tokio::time::timeout(timeout, response).await {
            Err(_) => {
                warn!("Device command '{}' timed out after {:?}", label, timeout);
                Err(LinkError::Timeout(timeout))
            }
            Ok(Err(_)) => Err(LinkError::Closed),
            Ok(Ok(result)) => result,
        }
    }
}

fn run_command_worker(
    mut writer: transport::WriteHalf,
    mut rx: mpsc::Receiver<LinkRequest>,
    state: Arc<Mutex<DeviceState>>,
) {
    while let Some(req) = rx.blocking_recv() {
        let result = {
            let guard = lock_state(&state);
            if !guard.is_connected() {
                Err(LinkError::Closed)
            } else {
                build_to_radio(&req.command, &guard)
            }
        }
        .and_then(|msg| write_to_radio(&mut writer, &msg));
        match &result {
            Ok(()) => {
                metrics::inc_link_commands_ok();
                if let LinkCommand::Text { text, destination, channel_index } = &req.command {
                    debug!(
                        "Sent text to {} on channel {}: '{}'",
                        destination.map(node_id_string).unwrap_or_else(|| "broadcast".into()),
                        channel_index,
                        truncate_for_log(text, 80)
                    );
                } else {
                    debug!("Sent {} command", req.command.label());
                }
            }
            Err(e) => {
                metrics::inc_link_commands_failed();
                warn!("Device command '{}' failed: {}", req.command.label(), e);
            }
        }
        let _ = req.reply.send(result);
    }
    debug!("Command worker exiting; link handle dropped");
}

fn write_to_radio(writer: &mut transport::WriteHalf, msg: &proto::ToRadio) -> Result<(), LinkError> {
    let payload = msg.encode_to_vec();
    let frame = encode_frame(&payload).ok_or(LinkError::PayloadTooLarge {
        size: payload.len(),
        max: framer::MAX_FRAME_SIZE,
    })?;
    writer.write_all(&frame)?;
    writer.flush()?;
    if log::log_enabled!(log::Level::Trace) {
        trace!("ToRadio payload hex:{}", hex::encode(&payload));
    }
    Ok(())
}

fn run_receiver(
    mut reader: transport::ReadHalf,
    state: Arc<Mutex<DeviceState>>,
    sink: Arc<dyn MeshEventSink>,
    shutdown: Arc<AtomicBool>,
) {
    let mut framer = StreamFramer::new();
    let mut buf = [0u8; 1024];
    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("Receiver stopping on shutdown");
            break;
        }
        match reader.read(&mut buf) {
            Ok(0) => {
                error!("Device closed the connection");
                break;
            }
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(frame) = framer.next_frame() {
                    let event = match proto::FromRadio::decode(frame.as_ref()) {
                        Ok(msg) => lock_state(&state).apply(msg, Utc::now()),
                        Err(e) => {
                            debug!("Undecodable FromRadio frame ({} bytes): {}", frame.len(), e);
                            None
                        }
                    };
                    if let Some(event) = event {
                        sink.on_mesh_event(event);
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => {
                error!("Device read failed: {}", e);
                break;
            }
        }
    }
    lock_state(&state).connected = false;
}

#[async_trait]
pub trait MeshLink: Send + Sync {
    async fn send_text(&self, text: &str, channel_index: u32, destination: Option<u32>) -> Result<(), LinkError>;
    async fn send_position(&self, latitude: f64, longitude: f64, altitude: i32) -> Result<(), LinkError>;
    async fn send_telemetry_request(&self) -> Result<(), LinkError>;
    async fn send_traceroute(&self, destination: u32, hop_limit: u32, channel_index: u32) -> Result<(), LinkError>;
    async fn request_position(&self, destination: u32, channel_index: u32) -> Result<(), LinkError>;
    async fn send_raw_data(&self, payload: Vec<u8>, port: u32) -> Result<(), LinkError>;
    async fn send_heartbeat(&self) -> Result<(), LinkError>;
    fn list_nodes(&self) -> Vec<MeshNode>;
    fn list_channels(&self) -> Vec<ChannelInfo>;
    fn describe_device(&self) -> DeviceDescription;
}

#[async_trait]
impl MeshLink for RadioLinkHandle {
    async fn send_text(&self, text: &str, channel_index: u32, destination: Option<u32>) -> Result<(), LinkError> {
        self.submit(LinkCommand::Text {
            text: text.to_string(),
            channel_index,
            destination,
        })
        .await
    }

    async fn send_position(&self, latitude: f64, longitude: f64, altitude: i32) -> Result<(), LinkError> {
        self.submit(LinkCommand::Position {
            latitude,
            longitude,
            altitude,
        })
        .await
    }

    async fn send_telemetry_request(&self) -> Result<(), LinkError> {
        self.submit(LinkCommand::TelemetryRequest).await
    }

    async fn send_traceroute(&self, destination: u32, hop_limit: u32, channel_index: u32) -> Result<(), LinkError> {
        self.submit(LinkCommand::Traceroute {
            destination,
            hop_limit,
            channel_index,
        })
        .await
    }

    async fn request_position(&self, destination: u32, channel_index: u32) -> Result<(), LinkError> {
        self.submit(LinkCommand::PositionRequest {
            destination,
            channel_index,
        })
        .await
    }

    async fn send_raw_data(&self, payload: Vec<u8>, port: u32) -> Result<(), LinkError> {
        self.submit(LinkCommand::RawData { payload, port }).await
    }

    async fn send_heartbeat(&self) -> Result<(), LinkError> {
        self.submit(LinkCommand::Heartbeat).await
    }

    fn list_nodes(&self) -> Vec<MeshNode> {
        lock_state(&self.inner.state).nodes()
    }

    fn list_channels(&self) -> Vec<ChannelInfo> {
        lock_state(&self.inner.state).channels()
    }

    fn describe_device(&self) -> DeviceDescription {
        lock_state(&self.inner.state).describe()
    }
}

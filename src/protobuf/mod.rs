//! Meshtastic protobuf messages used on the device link.
//!
//! Only the subset of `mesh.proto`, `portnums.proto`, `telemetry.proto` and
//! `channel.proto` that the bridge reads or writes is declared here. Field tags
//! match the upstream definitions, so unknown fields and oneof variants sent by
//! newer firmware are skipped by the decoder instead of failing the frame.

pub mod meshtastic {
    /// Application port numbers carried in [`Data::portnum`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PortNum {
        UnknownApp = 0,
        TextMessageApp = 1,
        RemoteHardwareApp = 2,
        PositionApp = 3,
        NodeinfoApp = 4,
        RoutingApp = 5,
        AdminApp = 6,
        TextMessageCompressedApp = 7,
        WaypointApp = 8,
        TelemetryApp = 67,
        TracerouteApp = 70,
        NeighborinfoApp = 71,
        PrivateApp = 256,
        Max = 511,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Data {
        #[prost(enumeration = "PortNum", tag = "1")]
        pub portnum: i32,
        #[prost(bytes = "vec", tag = "2")]
        pub payload: Vec<u8>,
        #[prost(bool, tag = "3")]
        pub want_response: bool,
        #[prost(fixed32, tag = "4")]
        pub dest: u32,
        #[prost(fixed32, tag = "5")]
        pub source: u32,
        #[prost(fixed32, tag = "6")]
        pub request_id: u32,
        #[prost(fixed32, tag = "7")]
        pub reply_id: u32,
        #[prost(fixed32, tag = "8")]
        pub emoji: u32,
        #[prost(uint32, optional, tag = "9")]
        pub bitfield: Option<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MeshPacket {
        #[prost(fixed32, tag = "1")]
        pub from: u32,
        #[prost(fixed32, tag = "2")]
        pub to: u32,
        #[prost(uint32, tag = "3")]
        pub channel: u32,
        #[prost(fixed32, tag = "6")]
        pub id: u32,
        #[prost(fixed32, tag = "7")]
        pub rx_time: u32,
        #[prost(float, tag = "8")]
        pub rx_snr: f32,
        #[prost(uint32, tag = "9")]
        pub hop_limit: u32,
        #[prost(bool, tag = "10")]
        pub want_ack: bool,
        #[prost(enumeration = "mesh_packet::Priority", tag = "11")]
        pub priority: i32,
        #[prost(int32, tag = "12")]
        pub rx_rssi: i32,
        #[prost(bool, tag = "14")]
        pub via_mqtt: bool,
        #[prost(uint32, tag = "15")]
        pub hop_start: u32,
        #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
        pub payload_variant: Option<mesh_packet::PayloadVariant>,
    }

    pub mod mesh_packet {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Priority {
            Unset = 0,
            Min = 1,
            Background = 10,
            Default = 64,
            Reliable = 70,
            Ack = 120,
            Max = 127,
        }

        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "4")]
            Decoded(super::Data),
            #[prost(bytes, tag = "5")]
            Encrypted(Vec<u8>),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct User {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub long_name: String,
        #[prost(string, tag = "3")]
        pub short_name: String,
        #[prost(bytes = "vec", tag = "4")]
        pub macaddr: Vec<u8>,
        #[prost(int32, tag = "5")]
        pub hw_model: i32,
        #[prost(bool, tag = "6")]
        pub is_licensed: bool,
        #[prost(int32, tag = "7")]
        pub role: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Position {
        #[prost(sfixed32, optional, tag = "1")]
        pub latitude_i: Option<i32>,
        #[prost(sfixed32, optional, tag = "2")]
        pub longitude_i: Option<i32>,
        #[prost(int32, optional, tag = "3")]
        pub altitude: Option<i32>,
        #[prost(fixed32, tag = "4")]
        pub time: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeviceMetrics {
        #[prost(uint32, optional, tag = "1")]
        pub battery_level: Option<u32>,
        #[prost(float, optional, tag = "2")]
        pub voltage: Option<f32>,
        #[prost(float, optional, tag = "3")]
        pub channel_utilization: Option<f32>,
        #[prost(float, optional, tag = "4")]
        pub air_util_tx: Option<f32>,
        #[prost(uint32, optional, tag = "5")]
        pub uptime_seconds: Option<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Telemetry {
        #[prost(fixed32, tag = "1")]
        pub time: u32,
        #[prost(oneof = "telemetry::Variant", tags = "2")]
        pub variant: Option<telemetry::Variant>,
    }

    pub mod telemetry {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Variant {
            #[prost(message, tag = "2")]
            DeviceMetrics(super::DeviceMetrics),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RouteDiscovery {
        #[prost(fixed32, repeated, tag = "1")]
        pub route: Vec<u32>,
        #[prost(int32, repeated, tag = "2")]
        pub snr_towards: Vec<i32>,
        #[prost(fixed32, repeated, tag = "3")]
        pub route_back: Vec<u32>,
        #[prost(int32, repeated, tag = "4")]
        pub snr_back: Vec<i32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NodeInfo {
        #[prost(uint32, tag = "1")]
        pub num: u32,
        #[prost(message, optional, tag = "2")]
        pub user: Option<User>,
        #[prost(message, optional, tag = "3")]
        pub position: Option<Position>,
        #[prost(float, tag = "4")]
        pub snr: f32,
        #[prost(fixed32, tag = "5")]
        pub last_heard: u32,
        #[prost(message, optional, tag = "6")]
        pub device_metrics: Option<DeviceMetrics>,
        #[prost(uint32, tag = "7")]
        pub channel: u32,
        #[prost(bool, tag = "8")]
        pub via_mqtt: bool,
        #[prost(uint32, optional, tag = "9")]
        pub hops_away: Option<u32>,
        #[prost(bool, tag = "10")]
        pub is_favorite: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MyNodeInfo {
        #[prost(uint32, tag = "1")]
        pub my_node_num: u32,
        #[prost(uint32, tag = "8")]
        pub reboot_count: u32,
        #[prost(uint32, tag = "11")]
        pub min_app_version: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeviceMetadata {
        #[prost(string, tag = "1")]
        pub firmware_version: String,
        #[prost(uint32, tag = "2")]
        pub device_state_version: u32,
        #[prost(bool, tag = "3")]
        pub can_shutdown: bool,
        #[prost(bool, tag = "4")]
        pub has_wifi: bool,
        #[prost(bool, tag = "5")]
        pub has_bluetooth: bool,
        #[prost(bool, tag = "6")]
        pub has_ethernet: bool,
        #[prost(int32, tag = "7")]
        pub role: i32,
        #[prost(uint32, tag = "8")]
        pub position_flags: u32,
        #[prost(int32, tag = "9")]
        pub hw_model: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ChannelSettings {
        #[prost(uint32, tag = "1")]
        pub channel_num: u32,
        #[prost(bytes = "vec", tag = "2")]
        pub psk: Vec<u8>,
        #[prost(string, tag = "3")]
        pub name: String,
        #[prost(fixed32, tag = "4")]
        pub id: u32,
        #[prost(bool, tag = "5")]
        pub uplink_enabled: bool,
        #[prost(bool, tag = "6")]
        pub downlink_enabled: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Channel {
        #[prost(int32, tag = "1")]
        pub index: i32,
        #[prost(message, optional, tag = "2")]
        pub settings: Option<ChannelSettings>,
        #[prost(enumeration = "channel::Role", tag = "3")]
        pub role: i32,
    }

    pub mod channel {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Role {
            Disabled = 0,
            Primary = 1,
            Secondary = 2,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Heartbeat {
        #[prost(uint32, tag = "1")]
        pub nonce: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FromRadio {
        #[prost(uint32, tag = "1")]
        pub id: u32,
        #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 4, 7, 8, 10, 13")]
        pub payload_variant: Option<from_radio::PayloadVariant>,
    }

    pub mod from_radio {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "2")]
            Packet(super::MeshPacket),
            #[prost(message, tag = "3")]
            MyInfo(super::MyNodeInfo),
            #[prost(message, tag = "4")]
            NodeInfo(super::NodeInfo),
            #[prost(uint32, tag = "7")]
            ConfigCompleteId(u32),
            #[prost(bool, tag = "8")]
            Rebooted(bool),
            #[prost(message, tag = "10")]
            Channel(super::Channel),
            #[prost(message, tag = "13")]
            Metadata(super::DeviceMetadata),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ToRadio {
        #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 4, 7")]
        pub payload_variant: Option<to_radio::PayloadVariant>,
    }

    pub mod to_radio {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum PayloadVariant {
            #[prost(message, tag = "1")]
            Packet(super::MeshPacket),
            #[prost(uint32, tag = "3")]
            WantConfigId(u32),
            #[prost(bool, tag = "4")]
            Disconnect(bool),
            #[prost(message, tag = "7")]
            Heartbeat(super::Heartbeat),
        }
    }
}

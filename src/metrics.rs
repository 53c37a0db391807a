//! Process-wide counters for the relay, auto-reply and device link.
//! Read with [`snapshot`]; the bridge loop logs one periodically.
use std::sync::atomic::{AtomicU64, Ordering};

static MESH_TEXT_RECEIVED: AtomicU64 = AtomicU64::new(0);
static MESH_TEXT_RELAYED: AtomicU64 = AtomicU64::new(0);
static MESH_TEXT_FILTERED: AtomicU64 = AtomicU64::new(0);
static MESH_TEXT_DROPPED: AtomicU64 = AtomicU64::new(0);
static AUTOREPLY_SENT: AtomicU64 = AtomicU64::new(0);
static AUTOREPLY_FAILED: AtomicU64 = AtomicU64::new(0);
static LINK_COMMANDS_OK: AtomicU64 = AtomicU64::new(0);
static LINK_COMMANDS_FAILED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_EXPIRED: AtomicU64 = AtomicU64::new(0);

pub fn inc_mesh_text_received() {
    MESH_TEXT_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_mesh_text_relayed() {
    MESH_TEXT_RELAYED.fetch_add(1, Ordering::Relaxed);
}
/// Text seen on a non-primary channel.
pub fn inc_mesh_text_filtered() {
    MESH_TEXT_FILTERED.fetch_add(1, Ordering::Relaxed);
}
/// Text that could not be parsed, or was empty.
pub fn inc_mesh_text_dropped() {
    MESH_TEXT_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_autoreply_sent() {
    AUTOREPLY_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_autoreply_failed() {
    AUTOREPLY_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_commands_ok() {
    LINK_COMMANDS_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_commands_failed() {
    LINK_COMMANDS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_opened() {
    SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_expired() {
    SESSIONS_EXPIRED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub mesh_text_received: u64,
    pub mesh_text_relayed: u64,
    pub mesh_text_filtered: u64,
    pub mesh_text_dropped: u64,
    pub autoreply_sent: u64,
    pub autoreply_failed: u64,
    pub link_commands_ok: u64,
    pub link_commands_failed: u64,
    pub sessions_opened: u64,
    pub sessions_expired: u64,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mesh rx={} relayed={} filtered={} dropped={} | autoreply ok={} fail={} | link ok={} fail={} | sessions opened={} expired={}",
            self.mesh_text_received,
            self.mesh_text_relayed,
            self.mesh_text_filtered,
            self.mesh_text_dropped,
            self.autoreply_sent,
            self.autoreply_failed,
            self.link_commands_ok,
            self.link_commands_failed,
            self.sessions_opened,
            self.sessions_expired
        )
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        mesh_text_received: MESH_TEXT_RECEIVED.load(Ordering::Relaxed),
        mesh_text_relayed: MESH_TEXT_RELAYED.load(Ordering::Relaxed),
        mesh_text_filtered: MESH_TEXT_FILTERED.load(Ordering::Relaxed),
        mesh_text_dropped: MESH_TEXT_DROPPED.load(Ordering::Relaxed),
        autoreply_sent: AUTOREPLY_SENT.load(Ordering::Relaxed),
        autoreply_failed: AUTOREPLY_FAILED.load(Ordering::Relaxed),
        link_commands_ok: LINK_COMMANDS_OK.load(Ordering::Relaxed),
        link_commands_failed: LINK_COMMANDS_FAILED.load(Ordering::Relaxed),
        sessions_opened: SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_expired: SESSIONS_EXPIRED.load(Ordering::Relaxed),
    }
}

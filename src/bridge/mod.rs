//! # Mesh ↔ Chat Bridge
//!
//! The core of meshcord. Radio events arrive on the device link's receiver thread and are
//! posted by the [`relay::CrossThreadRelay`] onto a queue drained by the
//! [`server::BridgeServer`] loop. The same loop handles chat interactions: remote
//! commands ([`commands`]) and the paginated views ([`views`]). Auto-replies in
//! unattended mode ([`autoreply`]) run on per-sender lanes spawned from the loop.
//!
//! ```text
//! radio thread ──▶ CrossThreadRelay ──▶ BridgeServer ──▶ relay channel echo
//!                                            │
//!                                            ├──▶ AutoReplyEngine ──▶ LanguageModel
//!                                            │                   └──▶ MeshLink (DM) + echo
//! chat gateway ──▶ Interaction ─────────────▶├──▶ CommandDispatcher ──▶ MeshLink
//!                                            └──▶ SessionManager / views
//! ```

pub mod autoreply;
pub mod commands;
pub mod conversation;
pub mod directory;
pub mod relay;
pub mod server;
pub mod views;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use relay::{BridgeEvent, CrossThreadRelay, InboundMeshMessage};
pub use server::{BridgeServer, BridgeSettings};

/// Process-wide unattended-mode flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct UnattendedMode(Arc<AtomicBool>);

impl UnattendedMode {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::AcqRel)
    }

    /// Bot presence text for a mode.
    pub fn presence_text(enabled: bool) -> &'static str {
        if enabled {
            "Unattended mode: ON"
        } else {
            "Watching the mesh"
        }
    }
}

use cmdrelay_common::protocol::{ClientId, Envelope, Metadata, Role};
use serde::Serialize;
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc;

/// Something the broker wants a connection task to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Write one frame to the socket
    Envelope(Envelope),
    /// Send a close frame with the given reason and stop the connection
    Close(String),
}

/// Non-owning handle to a connection's writer task.
pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Liveness state driven by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Seen traffic since the last probe
    Alive,
    /// Probed and not heard from since
    Suspect,
}

/// A socket that has been accepted but has not registered a role yet.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub id: ClientId,
    pub connected_at: SystemTime,
    pub last_seen: Instant,
    pub liveness: Liveness,
    pub outbox: Outbox,
}

/// A registered peer.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub role: Role,
    pub metadata: Metadata,
    pub connected_at: SystemTime,
    pub last_seen: Instant,
    pub liveness: Liveness,
    pub outbox: Outbox,
}

impl Client {
    pub(crate) fn from_handshake(handshake: Handshake, role: Role, metadata: Metadata) -> Self {
        Self {
            id: handshake.id,
            role,
            metadata,
            connected_at: handshake.connected_at,
            last_seen: handshake.last_seen,
            liveness: handshake.liveness,
            outbox: handshake.outbox,
        }
    }

    pub fn summary(&self, now: Instant) -> ClientSummary {
        let idle = now.saturating_duration_since(self.last_seen);
        let last_seen = SystemTime::now()
            .checked_sub(idle)
            .unwrap_or(self.connected_at);
        ClientSummary {
            id: self.id.clone(),
            role: self.role,
            metadata: self.metadata.clone(),
            connected_at: epoch_millis(self.connected_at),
            last_seen: epoch_millis(last_seen),
            idle_ms: idle.as_millis() as u64,
            liveness: self.liveness,
        }
    }
}

/// Read-only view of a client served on `/clients`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub id: ClientId,
    pub role: Role,
    pub metadata: Metadata,
    /// Unix epoch, ms
    pub connected_at: u64,
    /// Unix epoch, ms
    pub last_seen: u64,
    /// Time since the last frame from this client, ms
    pub idle_ms: u64,
    pub liveness: Liveness,
}

fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

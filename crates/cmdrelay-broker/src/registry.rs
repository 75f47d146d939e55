//! Client Registry
//!
//! Owns every connection the broker knows about. A socket enters as a
//! [`Handshake`] when it is accepted and becomes a [`Client`] once it
//! registers a role. Registered clients are kept in insertion order so
//! broadcasts fan out deterministically.

use crate::client::{Client, Handshake, Liveness, Outbox};
use cmdrelay_common::protocol::{ClientId, Metadata, RelayError, Result, Role, RoleCounts};
use std::collections::HashMap;
use std::time::{Instant, SystemTime};

/// What `unregister` removed.
#[derive(Debug)]
pub enum Departed {
    Handshake(Handshake),
    Client(Client),
}

impl Departed {
    pub fn outbox(&self) -> &Outbox {
        match self {
            Departed::Handshake(h) => &h.outbox,
            Departed::Client(c) => &c.outbox,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Departed::Handshake(_) => None,
            Departed::Client(c) => Some(c.role),
        }
    }
}

/// Outcome of one liveness round.
#[derive(Debug, Default, PartialEq)]
pub struct ProbeRound {
    /// Already suspect at the start of the round; to be evicted
    pub unresponsive: Vec<ClientId>,
    /// Were alive, now suspect; to be probed
    pub probed: Vec<ClientId>,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    handshakes: HashMap<ClientId, Handshake>,
    clients: Vec<Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an accepted socket and assigns it a fresh id.
    pub fn connect(&mut self, outbox: Outbox, now: Instant) -> ClientId {
        let mut id = ClientId::generate();
        while self.is_connected(&id) {
            id = ClientId::generate();
        }
        self.handshakes.insert(
            id.clone(),
            Handshake {
                id: id.clone(),
                connected_at: SystemTime::now(),
                last_seen: now,
                liveness: Liveness::Alive,
                outbox,
            },
        );
        id
    }

    /// Promotes a connection to a registered client.
    ///
    /// Registering again updates the role and metadata in place and keeps the
    /// client's position in fan-out order.
    ///
    /// # Errors
    ///
    /// `NotRegistered` if `id` is not a live connection.
    pub fn register(&mut self, id: &ClientId, role: Role, metadata: Metadata) -> Result<&Client> {
        if let Some(idx) = self.clients.iter().position(|c| &c.id == id) {
            let client = &mut self.clients[idx];
            client.role = role;
            client.metadata = metadata;
            return Ok(&self.clients[idx]);
        }

        let handshake = self
            .handshakes
            .remove(id)
            .ok_or(RelayError::NotRegistered)?;
        self.clients
            .push(Client::from_handshake(handshake, role, metadata));
        Ok(&self.clients[self.clients.len() - 1])
    }

    /// Removes a connection. Returns `None` if it was already gone.
    pub fn unregister(&mut self, id: &ClientId) -> Option<Departed> {
        if let Some(idx) = self.clients.iter().position(|c| &c.id == id) {
            return Some(Departed::Client(self.clients.remove(idx)));
        }
        self.handshakes.remove(id).map(Departed::Handshake)
    }

    pub fn find(&self, id: &ClientId) -> Option<&Client> {
        self.clients.iter().find(|c| &c.id == id)
    }

    pub fn is_connected(&self, id: &ClientId) -> bool {
        self.handshakes.contains_key(id) || self.find(id).is_some()
    }

    /// Registered clients with `role`, in registration order.
    pub fn list_by_role(&self, role: Role) -> impl Iterator<Item = &Client> {
        self.clients.iter().filter(move |c| c.role == role)
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn role_counts(&self) -> RoleCounts {
        let orchestrator = self.list_by_role(Role::Orchestrator).count();
        let executor = self.list_by_role(Role::Executor).count();
        RoleCounts {
            orchestrator,
            executor,
            total: self.clients.len(),
        }
    }

    /// Number of open sockets, registered or not.
    pub fn connection_count(&self) -> usize {
        self.handshakes.len() + self.clients.len()
    }

    /// Notes traffic from `id`: resets liveness and updates last-seen.
    pub fn touch(&mut self, id: &ClientId, now: Instant) {
        if let Some(client) = self.clients.iter_mut().find(|c| &c.id == id) {
            client.liveness = Liveness::Alive;
            client.last_seen = now;
        } else if let Some(handshake) = self.handshakes.get_mut(id) {
            handshake.liveness = Liveness::Alive;
            handshake.last_seen = now;
        }
    }

    pub fn outbox(&self, id: &ClientId) -> Option<&Outbox> {
        self.find(id)
            .map(|c| &c.outbox)
            .or_else(|| self.handshakes.get(id).map(|h| &h.outbox))
    }

    /// Every open connection, registered clients first in registration order.
    pub fn outboxes(&self) -> impl Iterator<Item = (&ClientId, &Outbox)> {
        self.clients
            .iter()
            .map(|c| (&c.id, &c.outbox))
            .chain(self.handshakes.values().map(|h| (&h.id, &h.outbox)))
    }

    /// Runs one mark-and-sweep liveness round.
    ///
    /// Connections already `Suspect` are reported as unresponsive and left for
    /// the caller to evict; every other connection is marked `Suspect`.
    pub fn probe_round(&mut self) -> ProbeRound {
        let mut round = ProbeRound::default();
        let states = self
            .clients
            .iter_mut()
            .map(|c| (&c.id, &mut c.liveness))
            .chain(self.handshakes.values_mut().map(|h| (&h.id, &mut h.liveness)));

        for (id, liveness) in states {
            match *liveness {
                Liveness::Suspect => round.unresponsive.push(id.clone()),
                Liveness::Alive => {
                    *liveness = Liveness::Suspect;
                    round.probed.push(id.clone());
                }
            }
        }
        round
    }
}

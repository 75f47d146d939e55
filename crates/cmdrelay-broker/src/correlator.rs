//! Command Correlation
//!
//! Tracks every routed command until its first response arrives or its
//! deadline passes. There is at most one [`PendingCommand`] per id, so a
//! second response for the same id finds nothing and is dropped by the
//! caller.

use cmdrelay_common::protocol::{ClientId, CommandId, RelayError, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub id: CommandId,
    /// Orchestrator that sent the command
    pub origin: ClientId,
    pub command: String,
    /// Executors the command was sent to
    pub targets: Vec<ClientId>,
    pub sent_at: Instant,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
pub struct CommandCorrelator {
    pending: HashMap<CommandId, PendingCommand>,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a command.
    ///
    /// # Errors
    ///
    /// `DuplicateCommand` if `id` is already pending.
    pub fn begin(
        &mut self,
        id: CommandId,
        origin: ClientId,
        command: String,
        targets: Vec<ClientId>,
        timeout: Duration,
        now: Instant,
    ) -> Result<&PendingCommand> {
        use std::collections::hash_map::Entry;

        match self.pending.entry(id) {
            Entry::Occupied(entry) => Err(RelayError::DuplicateCommand(entry.key().clone())),
            Entry::Vacant(entry) => {
                let pending = PendingCommand {
                    id: entry.key().clone(),
                    origin,
                    command,
                    targets,
                    sent_at: now,
                    deadline: now + timeout,
                };
                Ok(entry.insert(pending))
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&PendingCommand> {
        self.pending.get(id)
    }

    /// Removes and returns the pending entry for `id`.
    ///
    /// Idempotent: once an id has been resolved (or swept) this returns `None`.
    pub fn resolve(&mut self, id: &str) -> Option<PendingCommand> {
        self.pending.remove(id)
    }

    /// Removes every command whose deadline is at or before `now`, earliest
    /// deadline first.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<PendingCommand> {
        let expired_ids: Vec<CommandId> = self
            .pending
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.id.clone())
            .collect();

        let mut expired: Vec<PendingCommand> = expired_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        expired.sort_by_key(|p| p.deadline);
        expired
    }

    /// Removes every command sent by `origin`.
    pub fn drop_origin(&mut self, origin: &ClientId) -> Vec<PendingCommand> {
        let ids: Vec<CommandId> = self
            .pending
            .values()
            .filter(|p| &p.origin == origin)
            .map(|p| p.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.pending.remove(id)).collect()
    }

    /// Removes `target` from every pending command it was sent to.
    ///
    /// # Returns
    ///
    /// The commands left with no executor able to answer them; these are no
    /// longer pending.
    pub fn drop_target(&mut self, target: &ClientId) -> Vec<PendingCommand> {
        let mut orphaned = Vec::new();
        for pending in self.pending.values_mut() {
            if let Some(idx) = pending.targets.iter().position(|t| t == target) {
                pending.targets.swap_remove(idx);
                if pending.targets.is_empty() {
                    orphaned.push(pending.id.clone());
                }
            }
        }
        orphaned
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

//! Broker State Machine
//!
//! [`Broker`] owns all per-process state: the client registry, the command
//! correlator, the rate limiter, the validator and the history ring. Every
//! inbound frame is handled synchronously under one lock, so the
//! read-modify-write on those structures is serialized and frames from a
//! single connection are processed in arrival order.
//!
//! Outbound frames never touch a socket here. They are pushed onto the
//! target connection's [`Outbox`](crate::client::Outbox) and written by that
//! connection's task.

use crate::client::{ClientSummary, Outbound, Outbox};
use crate::config::BrokerConfig;
use crate::correlator::CommandCorrelator;
use crate::history::{HistoryEntry, HistoryPage, HistoryQuery, HistoryRecorder, HistoryStatus};
use crate::registry::{ClientRegistry, Departed};
use cmdrelay_common::protocol::{
    ClientId, Command, Envelope, ErrorCode, Metadata, RelayError, Response, Role, RoleCounts,
};
use cmdrelay_common::rate_limit::{RateLimitResult, RateLimiter};
use cmdrelay_common::validator::MessageValidator;
use cmdrelay_metrics::MetricsCollector;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The broker as shared between connection tasks and background tasks.
pub type SharedBroker = Arc<Mutex<Broker>>;

/// Served on `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub clients: RoleCounts,
    pub connections: usize,
    pub pending_commands: usize,
    pub uptime_seconds: u64,
}

/// Memory-related gauges reported alongside `/metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub history_entries: usize,
    pub pending_commands: usize,
    pub tracked_rate_windows: usize,
    pub connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resident_bytes: Option<u64>,
}

/// Outcome of one heartbeat tick.
#[derive(Debug, Default, PartialEq)]
pub struct HeartbeatReport {
    pub probed: usize,
    pub evicted: Vec<ClientId>,
}

pub struct Broker {
    registry: ClientRegistry,
    correlator: CommandCorrelator,
    limiter: RateLimiter,
    validator: MessageValidator,
    history: HistoryRecorder,
    metrics: Arc<dyn MetricsCollector>,
    message_timeout: Duration,
    started_at: Instant,
}

impl Broker {
    pub fn new(config: &BrokerConfig, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self {
            registry: ClientRegistry::new(),
            correlator: CommandCorrelator::new(),
            limiter: RateLimiter::new(config.rate_limit()),
            validator: MessageValidator::new(config.max_payload),
            history: HistoryRecorder::new(config.history_size),
            metrics,
            message_timeout: config.message_timeout(),
            started_at: Instant::now(),
        }
    }

    pub fn into_shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    /// Accepts a new socket, assigns its id and greets it with `connection`.
    pub fn connect(&mut self, outbox: Outbox, now: Instant) -> ClientId {
        let id = self.registry.connect(outbox, now);
        self.metrics.connection_opened();
        info!(client_id = %id, "connection accepted");
        self.send(
            &id,
            Envelope::Connection {
                client_id: id.clone(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
        id
    }

    /// Forgets a connection after its socket closed. Safe to call twice.
    pub fn disconnect(&mut self, id: &ClientId, now: Instant) -> bool {
        self.remove(id, now, "disconnected").is_some()
    }

    /// Notes non-envelope traffic (e.g. transport-level pongs) from `id`.
    pub fn touch(&mut self, id: &ClientId, now: Instant) {
        self.registry.touch(id, now);
    }

    /// Handles one raw text frame from `sender`.
    ///
    /// Order of checks: validation, then rate limiting, then routing. A frame
    /// that fails validation never consumes a rate-limit slot.
    pub fn handle_text(&mut self, sender: &ClientId, raw: &str, now: Instant) {
        self.metrics.record_message();
        self.registry.touch(sender, now);

        let envelope = match self.validator.validate(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(client_id = %sender, error = %err, "rejected invalid message");
                self.reject(sender, &err);
                return;
            }
        };

        // Pongs answer our own probes and are not charged to the client.
        if !matches!(envelope, Envelope::Pong { .. }) {
            if let RateLimitResult::RateLimited { retry_after } = self.limiter.admit(sender, now) {
                warn!(
                    client_id = %sender,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limit exceeded"
                );
                let err = RelayError::RateLimitExceeded {
                    retry_after_ms: retry_after.as_millis() as u64,
                };
                match &envelope {
                    Envelope::Command(command) => self.fail_command(sender, &command.id, &err),
                    _ => self.reject(sender, &err),
                }
                return;
            }
        }

        self.dispatch(sender, envelope, now);
    }

    /// Reports `error` to `sender` as an `error` envelope.
    pub fn reject(&self, sender: &ClientId, error: &RelayError) {
        self.metrics.record_error();
        self.send(sender, Envelope::Error { error: error.to_body() });
    }

    /// Answers a rejected command with a failed `Response` carrying its id,
    /// so the sender's waiter resolves instead of timing out.
    fn fail_command(&self, sender: &ClientId, id: &str, error: &RelayError) {
        self.metrics.record_error();
        self.send(
            sender,
            Envelope::Response(Response::failure(id, error.code(), error.to_string())),
        );
    }

    fn dispatch(&mut self, sender: &ClientId, envelope: Envelope, now: Instant) {
        match envelope {
            Envelope::Register { role, metadata } => self.register(sender, role, metadata, now),
            Envelope::Command(command) => self.route_command(sender, command, now),
            Envelope::Response(response) => self.route_response(sender, response, now),
            Envelope::Event { kind, data } => self.route_event(sender, kind, data),
            Envelope::Ping { timestamp } => self.send(sender, Envelope::pong(timestamp)),
            Envelope::Pong { .. } => {}
            other @ (Envelope::Connection { .. }
            | Envelope::Registered { .. }
            | Envelope::Status { .. }
            | Envelope::Error { .. }
            | Envelope::ServerShutdown { .. }) => {
                let role = self
                    .registry
                    .find(sender)
                    .map(|c| c.role.to_string())
                    .unwrap_or_else(|| "unregistered".to_string());
                self.reject(
                    sender,
                    &RelayError::InvalidSender {
                        message_type: other.type_name().to_string(),
                        role,
                    },
                );
            }
        }
    }

    fn register(&mut self, sender: &ClientId, role: Role, metadata: Metadata, now: Instant) {
        let previous = self.registry.find(sender).map(|c| c.role);
        if let Err(err) = self.registry.register(sender, role, metadata) {
            self.reject(sender, &err);
            return;
        }
        if previous == Some(Role::Executor) && role != Role::Executor {
            info!(client_id = %sender, %role, "executor re-registered with another role");
            self.fail_orphaned(sender, now);
        }

        let counts = self.registry.role_counts();
        info!(
            client_id = %sender,
            %role,
            orchestrators = counts.orchestrator,
            executors = counts.executor,
            "client registered"
        );
        self.send(
            sender,
            Envelope::Registered {
                client_id: sender.clone(),
                role,
                connected_clients: counts,
            },
        );
        self.broadcast_status();
    }

    /// Checks that `sender` is registered with `expected`.
    fn check_role(&self, sender: &ClientId, expected: Role, message_type: &str) -> Result<(), RelayError> {
        match self.registry.find(sender).map(|c| c.role) {
            Some(role) if role == expected => Ok(()),
            Some(role) => {
                warn!(client_id = %sender, %role, message_type, "message not allowed for role");
                Err(RelayError::InvalidSender {
                    message_type: message_type.to_string(),
                    role: role.to_string(),
                })
            }
            None => Err(RelayError::NotRegistered),
        }
    }

    /// Like [`check_role`](Self::check_role), reporting a mismatch to the
    /// sender as an `error` envelope.
    fn require_role(&self, sender: &ClientId, expected: Role, message_type: &str) -> bool {
        match self.check_role(sender, expected, message_type) {
            Ok(()) => true,
            Err(err) => {
                self.reject(sender, &err);
                false
            }
        }
    }

    fn route_command(&mut self, sender: &ClientId, command: Command, now: Instant) {
        if let Err(err) = self.check_role(sender, Role::Orchestrator, "command") {
            self.fail_command(sender, &command.id, &err);
            return;
        }

        let executors: Vec<ClientId> = self
            .registry
            .list_by_role(Role::Executor)
            .map(|c| c.id.clone())
            .collect();
        if executors.is_empty() {
            warn!(
                client_id = %sender,
                command_id = %command.id,
                command = %command.name,
                "no executor connected"
            );
            self.metrics.record_error();
            self.send(
                sender,
                Envelope::Response(Response::failure(
                    command.id,
                    ErrorCode::NoTargetAvailable,
                    "No executor connected",
                )),
            );
            return;
        }

        let targeted = command
            .target_id
            .as_ref()
            .filter(|target| executors.contains(target))
            .cloned();
        if let (Some(requested), None) = (&command.target_id, &targeted) {
            debug!(target_id = %requested, "requested executor not connected, broadcasting");
        }
        let targets = match &targeted {
            Some(target) => vec![target.clone()],
            None => executors,
        };

        let begun = self
            .correlator
            .begin(
                command.id.clone(),
                sender.clone(),
                command.name.clone(),
                targets.clone(),
                self.message_timeout,
                now,
            )
            .map(|_| ());
        if let Err(err) = begun {
            warn!(client_id = %sender, error = %err, "command rejected");
            // A reused id from the same origin must not answer the pending
            // command it collides with.
            match self.correlator.get(&command.id) {
                Some(pending) if &pending.origin == sender => self.reject(sender, &err),
                _ => self.fail_command(sender, &command.id, &err),
            }
            return;
        }

        self.history.record(HistoryEntry::pending(
            command.id.clone(),
            command.name.clone(),
            &command.params,
            sender.clone(),
            targeted.as_ref(),
        ));
        self.metrics.record_command(&command.name);
        debug!(
            command_id = %command.id,
            command = %command.name,
            targets = targets.len(),
            "routing command"
        );

        for target in &targets {
            self.send(target, Envelope::Command(command.clone()));
        }
    }

    fn route_response(&mut self, sender: &ClientId, response: Response, now: Instant) {
        if !self.require_role(sender, Role::Executor, "response") {
            return;
        }

        if let Some(pending) = self.correlator.get(&response.id) {
            if !pending.targets.contains(sender) {
                warn!(
                    client_id = %sender,
                    command_id = %response.id,
                    "response from an executor the command was not sent to"
                );
                return;
            }
        }

        let Some(pending) = self.correlator.resolve(&response.id) else {
            debug!(
                client_id = %sender,
                command_id = %response.id,
                "dropping late or duplicate response"
            );
            return;
        };

        let elapsed = now.saturating_duration_since(pending.sent_at);
        let status = if response.success {
            HistoryStatus::Success
        } else {
            HistoryStatus::Error
        };
        self.history
            .resolve(&pending.id, status, elapsed, Some(sender.clone()));
        self.metrics
            .record_response(&pending.command, elapsed, response.success);
        if response.healed {
            info!(
                command_id = %pending.id,
                heal_attempt = ?response.heal_attempt,
                "executor recovered the target through a fallback strategy"
            );
        }

        self.send(&pending.origin, Envelope::Response(response));
    }

    fn route_event(&mut self, sender: &ClientId, kind: String, data: Value) {
        if !self.require_role(sender, Role::Executor, "event") {
            return;
        }

        let orchestrators: Vec<ClientId> = self
            .registry
            .list_by_role(Role::Orchestrator)
            .map(|c| c.id.clone())
            .collect();
        for orchestrator in &orchestrators {
            self.send(
                orchestrator,
                Envelope::Event {
                    kind: kind.clone(),
                    data: data.clone(),
                },
            );
        }
    }

    /// Fails every command whose deadline has passed with a `TIMEOUT`
    /// response to its origin.
    ///
    /// # Returns
    ///
    /// The number of commands that timed out
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let expired = self.correlator.sweep_expired(now);
        for pending in &expired {
            let waited = now.saturating_duration_since(pending.sent_at);
            warn!(
                command_id = %pending.id,
                command = %pending.command,
                waited_ms = waited.as_millis() as u64,
                "command timed out"
            );
            self.history
                .resolve(&pending.id, HistoryStatus::Timeout, waited, None);
            self.metrics.record_timeout(&pending.command);
            self.metrics.record_error();
            self.send(
                &pending.origin,
                Envelope::Response(Response::failure(
                    pending.id.clone(),
                    ErrorCode::Timeout,
                    format!(
                        "Command '{}' timed out after {}ms",
                        pending.command,
                        self.message_timeout.as_millis()
                    ),
                )),
            );
        }
        expired.len()
    }

    /// Runs one liveness round: evicts connections that did not answer the
    /// previous probe and probes the rest.
    pub fn heartbeat(&mut self, now: Instant) -> HeartbeatReport {
        let round = self.registry.probe_round();

        let mut evicted = Vec::with_capacity(round.unresponsive.len());
        for id in round.unresponsive {
            if let Some(departed) = self.remove(&id, now, "unresponsive") {
                let _ = departed
                    .outbox()
                    .send(Outbound::Close("heartbeat timeout".to_string()));
                evicted.push(id);
            }
        }

        for id in &round.probed {
            self.send(id, Envelope::ping());
        }

        HeartbeatReport {
            probed: round.probed.len(),
            evicted,
        }
    }

    /// Drops rate windows for clients that have gone quiet.
    pub fn sweep_idle_rate_windows(&mut self, now: Instant) -> usize {
        self.limiter.sweep_idle(now)
    }

    /// Tells every connection the broker is going away and closes it.
    pub fn shutdown(&mut self, message: &str) -> usize {
        let mut notified = 0;
        for (_, outbox) in self.registry.outboxes() {
            let _ = outbox.send(Outbound::Envelope(Envelope::ServerShutdown {
                message: message.to_string(),
            }));
            let _ = outbox.send(Outbound::Close(message.to_string()));
            notified += 1;
        }
        info!(connections = notified, "notified clients of shutdown");
        notified
    }

    fn remove(&mut self, id: &ClientId, now: Instant, reason: &str) -> Option<Departed> {
        let departed = self.registry.unregister(id)?;
        self.limiter.reset(id);
        self.metrics.connection_closed();

        // The origin is gone, so these outcomes have nowhere to go.
        for pending in self.correlator.drop_origin(id) {
            debug!(command_id = %pending.id, "dropping pending command of departed client");
            self.history.resolve(
                &pending.id,
                HistoryStatus::Error,
                now.saturating_duration_since(pending.sent_at),
                None,
            );
        }

        self.fail_orphaned(id, now);

        info!(client_id = %id, role = ?departed.role(), reason, "client removed");
        if departed.role().is_some() {
            self.broadcast_status();
        }
        Some(departed)
    }

    /// Stops waiting on `executor`. Commands it was the last target of fail
    /// with `CONNECTION_LOST` to their origin.
    fn fail_orphaned(&mut self, executor: &ClientId, now: Instant) {
        for pending in self.correlator.drop_target(executor) {
            warn!(
                command_id = %pending.id,
                client_id = %executor,
                "executor left before answering"
            );
            self.history.resolve(
                &pending.id,
                HistoryStatus::Error,
                now.saturating_duration_since(pending.sent_at),
                None,
            );
            self.metrics.record_error();
            self.send(
                &pending.origin,
                Envelope::Response(Response::failure(
                    pending.id.clone(),
                    ErrorCode::ConnectionLost,
                    format!("Executor left before answering '{}'", pending.command),
                )),
            );
        }
    }

    fn broadcast_status(&self) {
        let status = Envelope::Status {
            clients: self.registry.role_counts(),
        };
        for (id, outbox) in self.registry.outboxes() {
            if outbox.send(Outbound::Envelope(status.clone())).is_err() {
                debug!(client_id = %id, "outbox closed, status not delivered");
            }
        }
    }

    fn send(&self, to: &ClientId, envelope: Envelope) {
        match self.registry.outbox(to) {
            Some(outbox) => {
                if outbox.send(Outbound::Envelope(envelope)).is_err() {
                    debug!(client_id = %to, "outbox closed, dropping frame");
                }
            }
            None => debug!(client_id = %to, "no connection for outbound frame"),
        }
    }

    pub fn role_counts(&self) -> RoleCounts {
        self.registry.role_counts()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            clients: self.registry.role_counts(),
            connections: self.registry.connection_count(),
            pending_commands: self.correlator.len(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn clients(&self, now: Instant) -> Vec<ClientSummary> {
        self.registry
            .clients()
            .iter()
            .map(|c| c.summary(now))
            .collect()
    }

    pub fn history(&self, query: &HistoryQuery) -> HistoryPage {
        self.history.query(query)
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            history_entries: self.history.len(),
            pending_commands: self.correlator.len(),
            tracked_rate_windows: self.limiter.tracked_clients(),
            connections: self.registry.connection_count(),
            resident_bytes: resident_memory_bytes(),
        }
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }
}

/// Resident set size of this process, where the platform exposes it.
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}

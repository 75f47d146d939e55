use cmdrelay_common::protocol::{
    ClientId, Command, CommandId, Envelope, ErrorBody, ErrorCode, Metadata, Response, Role,
    RoleCounts,
};
use cmdrelay_common::transport::JsonCodec;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

/// Longer than the broker's default command timeout, so the broker's own
/// `TIMEOUT` response normally arrives first.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(35);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingTable = Arc<Mutex<HashMap<CommandId, oneshot::Sender<Response>>>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker WebSocket URL, e.g. `ws://localhost:8080/ws`
    pub url: String,
    pub api_key: Option<String>,
    pub call_timeout: Duration,
    pub metadata: Metadata,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            metadata: Metadata::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Broker traffic that is not a reply to one of our calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Event { kind: String, data: Value },
    Status(RoleCounts),
    /// An `error` envelope; the broker does not say which request caused it.
    Error(ErrorBody),
    Shutdown(String),
}

/// Orchestrator connection to a broker.
///
/// Calls may run concurrently: each one parks a oneshot in the pending
/// table under its command id and the reader task completes it when the
/// matching `response` arrives.
pub struct RelayClient {
    client_id: ClientId,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingTable,
    status: watch::Receiver<RoleCounts>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    call_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RelayClient {
    /// Connects and registers as an orchestrator.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let mut request = config.url.as_str().into_client_request()?;
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ClientError::Config(format!("invalid API key: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut socket, _) = connect_async(request).await?;

        let client_id = match next_envelope(&mut socket).await? {
            Envelope::Connection { client_id, .. } => client_id,
            other => {
                return Err(ClientError::Handshake(format!(
                    "expected connection, got {}",
                    other.type_name()
                )))
            }
        };

        let register = Envelope::Register {
            role: Role::Orchestrator,
            metadata: config.metadata.clone(),
        };
        socket
            .send(Message::Text(JsonCodec::encode(&register)?.into()))
            .await?;

        let counts = loop {
            match next_envelope(&mut socket).await? {
                Envelope::Registered {
                    connected_clients, ..
                } => break connected_clients,
                Envelope::Error { error } => return Err(ClientError::Rejected(error)),
                other => debug!("Ignoring {} before registration", other.type_name()),
            }
        };
        info!(client_id = %client_id, executors = counts.executor, "Registered with broker");

        let (sink, stream) = socket.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(counts);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(
            stream,
            outbound.clone(),
            pending.clone(),
            status_tx,
            notify_tx,
        ));

        Ok(Self {
            client_id,
            outbound,
            pending,
            status,
            notifications: Mutex::new(Some(notify_rx)),
            call_timeout: config.call_timeout,
            reader,
            writer,
        })
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Latest role counts reported by the broker.
    pub fn status(&self) -> RoleCounts {
        *self.status.borrow()
    }

    /// Waits until the broker reports at least one executor.
    pub async fn wait_for_executor(&self) -> Result<RoleCounts> {
        let mut status = self.status.clone();
        let counts = status
            .wait_for(|counts| counts.executor > 0)
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(*counts)
    }

    /// Takes the notification stream. Only the first caller gets it.
    pub fn notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Sends a command and waits for its response.
    ///
    /// Failures reported by the broker or an executor come back as a
    /// `Response` with `success: false`; only transport problems and the
    /// client-side deadline are errors here.
    ///
    /// # Arguments
    /// * `name` - Command name
    /// * `params` - Command parameters
    /// * `target` - Executor to address; all executors if `None`
    pub async fn call(
        &self,
        name: impl Into<String>,
        params: Value,
        target: Option<ClientId>,
    ) -> Result<Response> {
        let id = format!("cmd-{}", uuid::Uuid::new_v4());
        let mut command = Command::new(id.clone(), name, params);
        if let Some(target) = target {
            command = command.with_target(target);
        }
        let name = command.name.clone();
        let text = JsonCodec::encode(&Envelope::Command(command))?;

        let (tx, rx) = oneshot::channel();
        self.pending_table().insert(id.clone(), tx);

        if self.outbound.send(Message::Text(text.into())).is_err() {
            self.pending_table().remove(&id);
            return Err(ClientError::Closed);
        }
        debug!(command_id = %id, command = %name, "Command sent");

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending_table().remove(&id);
                Err(ClientError::Timeout {
                    command: name,
                    timeout_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Like [`call`](Self::call), but unwraps the response data.
    pub async fn call_data(&self, name: impl Into<String>, params: Value) -> Result<Value> {
        let name = name.into();
        let response = self.call(name.clone(), params, None).await?;
        if response.success {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(ClientError::CommandFailed {
                command: name,
                error: response
                    .error
                    .unwrap_or_else(|| ErrorBody::new(ErrorCode::ExecutionError, "Unknown error")),
            })
        }
    }

    /// Number of calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending_table().len()
    }

    /// Closes the connection. In-flight calls fail with `Closed`.
    pub async fn close(mut self) {
        let _ = self.outbound.send(Message::Close(None));
        let _ = (&mut self.writer).await;
    }

    fn pending_table(&self) -> std::sync::MutexGuard<'_, HashMap<CommandId, oneshot::Sender<Response>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn next_envelope(socket: &mut Socket) -> Result<Envelope> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(JsonCodec::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("Send failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingTable,
    status: watch::Sender<RoleCounts>,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Receive failed: {}", e);
                break;
            }
        };

        let envelope = match JsonCodec::decode(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Undecodable frame from broker: {}", e);
                continue;
            }
        };

        match envelope {
            Envelope::Response(response) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&response.id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!(command_id = %response.id, "Response for unknown call"),
                }
            }
            Envelope::Ping { timestamp } => {
                if let Ok(text) = JsonCodec::encode(&Envelope::pong(timestamp)) {
                    let _ = outbound.send(Message::Text(text.into()));
                }
            }
            Envelope::Status { clients } | Envelope::Registered {
                connected_clients: clients,
                ..
            } => {
                status.send_replace(clients);
                let _ = notifications.send(Notification::Status(clients));
            }
            Envelope::Event { kind, data } => {
                let _ = notifications.send(Notification::Event { kind, data });
            }
            Envelope::Error { error } => {
                warn!(code = %error.code, "Broker reported an error: {}", error.message);
                let _ = notifications.send(Notification::Error(error));
            }
            Envelope::ServerShutdown { message } => {
                info!("Broker shutting down: {}", message);
                let _ = notifications.send(Notification::Shutdown(message));
            }
            Envelope::Pong { .. }
            | Envelope::Connection { .. }
            | Envelope::Register { .. }
            | Envelope::Command(_) => {}
        }
    }

    // Dropping the senders fails every waiting call with `Closed`.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("ws://localhost:8080/ws")
            .with_api_key("key")
            .with_call_timeout(Duration::from_secs(3));
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.call_timeout, Duration::from_secs(3));
        assert!(config.metadata.is_empty());
    }

    #[test]
    fn test_default_timeout_outlasts_broker_timeout() {
        assert!(DEFAULT_CALL_TIMEOUT > Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 is reserved and nothing listens there.
        let result = RelayClient::connect(ClientConfig::new("ws://127.0.0.1:1/ws")).await;
        assert!(matches!(result, Err(ClientError::Connect(_))));
    }
}

use cmdrelay_common::protocol::{ClientId, Envelope, Metadata, Role};
use cmdrelay_common::transport::JsonCodec;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchConfig, ResilientDispatcher};
use crate::error::ExecutorError;
use crate::handler::{ActionHandler, EventSender};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Executor runtime configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Broker WebSocket URL
    pub url: String,
    pub api_key: Option<String>,
    /// Sent with the `register` message
    pub metadata: Metadata,
    /// Wait between reconnect attempts
    ///
    /// Default: 5s
    pub reconnect_interval: Duration,
    /// Consecutive failed connects before giving up
    ///
    /// Default: 10
    pub max_reconnect_attempts: u32,
    /// Interval of the `ping` the executor sends to keep the connection warm
    ///
    /// Default: 25s
    pub keep_alive_interval: Duration,
    pub dispatch: DispatchConfig,
}

impl ExecutorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            metadata: Metadata::new(),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            keep_alive_interval: Duration::from_secs(25),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// How a registered session ended.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    /// The broker announced it is going away.
    Shutdown,
    /// The socket closed or failed.
    Lost,
}

/// Keeps an executor registered with the broker and runs the commands it
/// receives.
///
/// Each command runs in its own task so a slow action never delays pings or
/// other commands. Connection loss triggers a reconnect every
/// `reconnect_interval`; the runtime gives up after
/// `max_reconnect_attempts` consecutive failures.
pub struct ExecutorRuntime<H> {
    config: ExecutorConfig,
    dispatcher: Arc<ResilientDispatcher<H>>,
    events_tx: mpsc::UnboundedSender<(String, Value)>,
    events_rx: mpsc::UnboundedReceiver<(String, Value)>,
}

impl<H: ActionHandler> ExecutorRuntime<H> {
    pub fn new(config: ExecutorConfig, handler: Arc<H>) -> Self {
        let dispatcher = Arc::new(ResilientDispatcher::new(handler, config.dispatch.clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            dispatcher,
            events_tx,
            events_rx,
        }
    }

    /// Handle for emitting events to orchestrators.
    pub fn event_sender(&self) -> EventSender {
        EventSender::new(self.events_tx.clone())
    }

    /// Runs until reconnecting is exhausted.
    pub async fn run(mut self) -> Result<(), ExecutorError> {
        let mut failures = 0u32;

        loop {
            match self.connect().await {
                Ok((socket, client_id)) => {
                    failures = 0;
                    info!(client_id = %client_id, url = %self.config.url, "Executor registered");
                    let end = self.session(socket).await;
                    info!(client_id = %client_id, reason = ?end, "Session ended");
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        attempt = failures,
                        max = self.config.max_reconnect_attempts,
                        "Failed to connect to broker: {}",
                        e
                    );
                    if failures >= self.config.max_reconnect_attempts {
                        error!("Giving up on broker at {}", self.config.url);
                        return Err(ExecutorError::ReconnectExhausted { attempts: failures });
                    }
                }
            }
            tokio::time::sleep(self.config.reconnect_interval).await;
        }
    }

    /// Opens the socket and completes registration.
    async fn connect(&self) -> Result<(Socket, ClientId), ExecutorError> {
        let mut request = self.config.url.as_str().into_client_request()?;
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ExecutorError::Config(format!("invalid API key: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut socket, _) = connect_async(request).await?;

        let client_id = match next_envelope(&mut socket).await? {
            Envelope::Connection { client_id, .. } => client_id,
            other => {
                return Err(ExecutorError::Handshake(format!(
                    "expected connection, got {}",
                    other.type_name()
                )))
            }
        };

        let register = Envelope::Register {
            role: Role::Executor,
            metadata: self.config.metadata.clone(),
        };
        socket
            .send(Message::Text(JsonCodec::encode(&register)?.into()))
            .await?;

        loop {
            match next_envelope(&mut socket).await? {
                Envelope::Registered { .. } => return Ok((socket, client_id)),
                Envelope::Error { error } => {
                    return Err(ExecutorError::Handshake(error.to_string()))
                }
                other => debug!("Ignoring {} before registration", other.type_name()),
            }
        }
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let (responses_tx, mut responses) = mpsc::unbounded_channel::<Envelope>();
        let mut running = JoinSet::new();

        let mut keep_alive = tokio::time::interval(self.config.keep_alive_interval);
        keep_alive.tick().await;

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!("Receive failed: {}", e);
                            return SessionEnd::Lost;
                        }
                    };

                    match JsonCodec::decode(text.as_str()) {
                        Ok(Envelope::Command(command)) => {
                            debug!(command_id = %command.id, command = %command.name, "Command received");
                            let dispatcher = self.dispatcher.clone();
                            let responses_tx = responses_tx.clone();
                            running.spawn(async move {
                                let response = dispatcher.dispatch(&command).await;
                                let _ = responses_tx.send(Envelope::Response(response));
                            });
                        }
                        Ok(Envelope::Ping { timestamp }) => {
                            if !send(&mut sink, &Envelope::pong(timestamp)).await {
                                return SessionEnd::Lost;
                            }
                        }
                        Ok(Envelope::Error { error }) => {
                            warn!(code = %error.code, "Broker reported an error: {}", error.message);
                        }
                        Ok(Envelope::ServerShutdown { message }) => {
                            info!("Broker shutting down: {}", message);
                            return SessionEnd::Shutdown;
                        }
                        Ok(other) => debug!("Ignoring {}", other.type_name()),
                        Err(e) => warn!("Undecodable frame from broker: {}", e),
                    }
                }
                Some(response) = responses.recv() => {
                    if !send(&mut sink, &response).await {
                        return SessionEnd::Lost;
                    }
                }
                Some((kind, data)) = self.events_rx.recv() => {
                    if !send(&mut sink, &Envelope::Event { kind, data }).await {
                        return SessionEnd::Lost;
                    }
                }
                _ = keep_alive.tick() => {
                    if !send(&mut sink, &Envelope::ping()).await {
                        return SessionEnd::Lost;
                    }
                }
                Some(finished) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = finished {
                        error!("Command task failed: {}", e);
                    }
                }
            }
        }
    }
}

async fn send(sink: &mut SplitSink<Socket, Message>, envelope: &Envelope) -> bool {
    let text = match JsonCodec::encode(envelope) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode {}: {}", envelope.type_name(), e);
            return true;
        }
    };
    match sink.send(Message::Text(text.into())).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Send failed: {}", e);
            false
        }
    }
}

async fn next_envelope(socket: &mut Socket) -> Result<Envelope, ExecutorError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(JsonCodec::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => {
                return Err(ExecutorError::Handshake("connection closed".to_string()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

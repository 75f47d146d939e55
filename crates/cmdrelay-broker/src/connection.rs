//! Per-socket task.
//!
//! One task per accepted WebSocket. It registers the socket with the broker,
//! then multiplexes two directions with `select!`: frames queued on the
//! connection's outbox go out, and inbound frames are handed to the broker.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use cmdrelay_common::transport::JsonCodec;
use cmdrelay_common::RelayError;
use futures::{SinkExt, StreamExt};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::broker::SharedBroker;
use crate::client::Outbound;

/// Drives `socket` until either side closes, then removes it from the broker.
pub async fn serve(socket: WebSocket, broker: SharedBroker) {
    let (tx, mut outbox) = mpsc::unbounded_channel();
    let id = broker.lock().await.connect(tx, Instant::now());
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = outbox.recv() => match outbound {
                Some(Outbound::Envelope(envelope)) => {
                    let text = match JsonCodec::encode(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(client_id = %id, "Failed to encode {}: {}", envelope.type_name(), e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        debug!(client_id = %id, "Send failed: {}", e);
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    let frame = CloseFrame {
                        code: close_code::NORMAL,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                // The broker dropped this connection.
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    broker.lock().await.handle_text(&id, text.as_str(), Instant::now());
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let mut broker = broker.lock().await;
                    match std::str::from_utf8(&bytes) {
                        Ok(text) => broker.handle_text(&id, text, Instant::now()),
                        Err(_) => {
                            broker.touch(&id, Instant::now());
                            broker.reject(
                                &id,
                                &RelayError::Validation("binary frame is not valid UTF-8".to_string()),
                            );
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    broker.lock().await.touch(&id, Instant::now());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client_id = %id, "Receive failed: {}", e);
                    break;
                }
            },
        }
    }

    broker.lock().await.disconnect(&id, Instant::now());
    debug!(client_id = %id, "Connection task finished");
}

//! Orchestrator Client Integration Tests
//!
//! Starts a broker on an ephemeral port and pairs the client with a scripted
//! executor speaking raw WebSocket frames.

use cmdrelay_broker::{BrokerConfig, BrokerServer};
use cmdrelay_client::{ClientConfig, ClientError, Notification, RelayClient};
use cmdrelay_common::ErrorCode;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn start_broker(config: BrokerConfig) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = BrokerServer::new(config).unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await;
    });
    (addr, tx)
}

fn url(addr: SocketAddr) -> String {
    format!("ws://{}/ws", addr)
}

/// Executor that answers every command with `reply(command)` and emits one
/// `ready` event after registering. `None` from `reply` means stay silent.
async fn spawn_executor<F>(addr: SocketAddr, reply: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(&Value) -> Option<Value> + Send + 'static,
{
    let (mut ws, _) = connect_async(url(addr)).await.unwrap();
    ws.send(Message::Text(
        json!({"type": "register", "role": "executor"}).to_string().into(),
    ))
    .await
    .unwrap();

    tokio::spawn(async move {
        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else { continue };
            let message: Value = serde_json::from_str(text.as_str()).unwrap();
            match message["type"].as_str() {
                Some("registered") => {
                    let event = json!({"type": "event", "event": "ready", "data": {"tabs": 1}});
                    let _ = ws.send(Message::Text(event.to_string().into())).await;
                }
                Some("command") => {
                    if let Some(response) = reply(&message) {
                        let _ = ws.send(Message::Text(response.to_string().into())).await;
                    }
                }
                Some("ping") => {
                    let pong = json!({"type": "pong", "timestamp": 0});
                    let _ = ws.send(Message::Text(pong.to_string().into())).await;
                }
                _ => {}
            }
        }
    })
}

fn echo(command: &Value) -> Option<Value> {
    Some(json!({
        "type": "response",
        "id": command["id"],
        "success": true,
        "data": {"echo": command["params"]},
    }))
}

#[tokio::test]
async fn test_call_round_trip() {
    let (addr, _stop) = start_broker(BrokerConfig::default()).await;
    let client = RelayClient::connect(ClientConfig::new(url(addr))).await.unwrap();
    let _executor = spawn_executor(addr, echo).await;
    client.wait_for_executor().await.unwrap();

    let response = client
        .call("get_text", json!({"selector": "h1"}), None)
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.data.unwrap()["echo"]["selector"], "h1");

    let data = client.call_data("get_text", json!({"n": 2})).await.unwrap();
    assert_eq!(data["echo"]["n"], 2);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let (addr, _stop) = start_broker(BrokerConfig::default()).await;
    let client = RelayClient::connect(ClientConfig::new(url(addr))).await.unwrap();
    let _executor = spawn_executor(addr, echo).await;
    client.wait_for_executor().await.unwrap();

    let calls = (0..10).map(|i| client.call("count", json!({"i": i}), None));
    let responses = futures::future::join_all(calls).await;

    for (i, response) in responses.into_iter().enumerate() {
        let data = response.unwrap().data.unwrap();
        assert_eq!(data["echo"]["i"], i);
    }
}

#[tokio::test]
async fn test_call_without_executor() {
    let (addr, _stop) = start_broker(BrokerConfig::default()).await;
    let client = RelayClient::connect(ClientConfig::new(url(addr))).await.unwrap();

    let response = client.call("click", json!({}), None).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error_code(), Some(ErrorCode::NoTargetAvailable));

    let err = client.call_data("click", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::CommandFailed { .. }));
}

#[tokio::test]
async fn test_rate_limited_call_fails_promptly() {
    let config = BrokerConfig {
        max_requests_per_minute: 2,
        ..Default::default()
    };
    let (addr, _stop) = start_broker(config).await;
    let config = ClientConfig::new(url(addr)).with_call_timeout(Duration::from_secs(10));
    let client = RelayClient::connect(config).await.unwrap();

    // register used one slot, this call the other
    let first = client.call("a", json!({}), None).await.unwrap();
    assert_eq!(first.error_code(), Some(ErrorCode::NoTargetAvailable));

    let started = std::time::Instant::now();
    let second = client.call("b", json!({}), None).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!second.success);
    assert_eq!(second.error_code(), Some(ErrorCode::RateLimitExceeded));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_client_side_timeout() {
    let (addr, _stop) = start_broker(BrokerConfig::default()).await;
    let config = ClientConfig::new(url(addr)).with_call_timeout(Duration::from_millis(200));
    let client = RelayClient::connect(config).await.unwrap();
    let _executor = spawn_executor(addr, |_| None).await;
    client.wait_for_executor().await.unwrap();

    let err = client.call("hang", json!({}), None).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { timeout_ms: 200, .. }));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_broker_timeout_reaches_client() {
    let config = BrokerConfig {
        message_timeout: 200,
        sweep_interval: 50,
        ..Default::default()
    };
    let (addr, _stop) = start_broker(config).await;
    let client = RelayClient::connect(ClientConfig::new(url(addr))).await.unwrap();
    let _executor = spawn_executor(addr, |_| None).await;
    client.wait_for_executor().await.unwrap();

    let response = client.call("hang", json!({}), None).await.unwrap();
    assert_eq!(response.error_code(), Some(ErrorCode::Timeout));
}

#[tokio::test]
async fn test_notifications() {
    let (addr, stop) = start_broker(BrokerConfig::default()).await;
    let client = RelayClient::connect(ClientConfig::new(url(addr))).await.unwrap();
    let mut notifications = client.notifications().unwrap();
    assert!(client.notifications().is_none());

    let _executor = spawn_executor(addr, echo).await;

    let mut saw_status = false;
    loop {
        match tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .unwrap()
            .unwrap()
        {
            Notification::Status(counts) if counts.executor == 1 => saw_status = true,
            Notification::Event { kind, data } => {
                assert_eq!(kind, "ready");
                assert_eq!(data["tabs"], 1);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_status);
    assert_eq!(client.status().executor, 1);

    stop.send(()).unwrap();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .unwrap()
        {
            Some(Notification::Shutdown(_)) => break,
            Some(_) => continue,
            None => panic!("stream ended without a shutdown notice"),
        }
    }
}

#[tokio::test]
async fn test_api_key_sent_as_bearer() {
    let config = BrokerConfig {
        auth_enabled: true,
        api_key: Some("k3y".to_string()),
        ..Default::default()
    };
    let (addr, _stop) = start_broker(config).await;

    assert!(matches!(
        RelayClient::connect(ClientConfig::new(url(addr))).await,
        Err(ClientError::Connect(_))
    ));

    let client = RelayClient::connect(ClientConfig::new(url(addr)).with_api_key("k3y"))
        .await
        .unwrap();
    assert!(!client.client_id().as_str().is_empty());
    client.close().await;
}

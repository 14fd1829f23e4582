//! End-to-end WebSocket protocol tests against a live gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use pharmacy_agent::App;
use pharmacy_agent::channels::web::GatewayServer;
use pharmacy_agent::config::Config;
use pharmacy_agent::error::RecordError;
use pharmacy_agent::phone::CanonicalPhone;
use pharmacy_agent::records::{InMemoryRecordSource, Prescription, Record, RecordSource};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn healthfirst() -> Record {
    Record {
        id: 1,
        name: "HealthFirst Pharmacy".to_string(),
        phone: "+1-555-123-4567".to_string(),
        email: Some("contact@healthfirst.com".to_string()),
        city: "New York".to_string(),
        state: "NY".to_string(),
        prescriptions: vec![
            Prescription {
                drug: "Lisinopril".to_string(),
                count: 42,
            },
            Prescription {
                drug: "Metformin".to_string(),
                count: 17,
            },
        ],
    }
}

struct TestGateway {
    addr: SocketAddr,
    app: App,
    server: GatewayServer,
}

impl TestGateway {
    async fn start(source: Arc<dyn RecordSource>) -> Self {
        Self::start_with(Config::from_lookup(|_| None).unwrap(), source).await
    }

    async fn start_with(config: Config, source: Arc<dyn RecordSource>) -> Self {
        let app = App::with_source(config, source);
        let mut server = GatewayServer::new("127.0.0.1:0".parse().unwrap(), app.gateway_state());
        let addr = server.start().await.unwrap();
        Self { addr, app, server }
    }

    async fn with_records() -> Self {
        Self::start(Arc::new(InMemoryRecordSource::new(vec![healthfirst()]))).await
    }

    /// Connect and consume `connection_established`.
    async fn connect(&self) -> (Client, String) {
        let url = format!("ws://{}/ws/pharmacy-agent", self.addr);
        let (mut ws, _) = connect_async(url).await.unwrap();
        let hello = recv(&mut ws).await;
        assert_eq!(hello["type"], "connection_established");
        let session_id = hello["session_id"].as_str().unwrap().to_string();
        (ws, session_id)
    }

    async fn wait_for_no_sessions(&self) {
        for _ in 0..100 {
            if self.app.registry.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("sessions were not released");
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_known_caller_gets_info_agent() {
    let gateway = TestGateway::with_records().await;
    let (mut ws, session_id) = gateway.connect().await;
    assert!(uuid::Uuid::parse_str(&session_id).is_ok());

    send(&mut ws, json!({"type": "init", "phone": "+1-555-123-4567"})).await;
    let ready = recv(&mut ws).await;
    assert_eq!(ready["type"], "agent_ready");
    assert_eq!(ready["agent_type"], "info");
    assert!(ready["message"].as_str().unwrap().contains("HealthFirst Pharmacy"));

    send(
        &mut ws,
        json!({"type": "message", "content": "How many Lisinopril do you have?"}),
    )
    .await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "response");
    assert!(reply["content"].as_str().unwrap().contains("42"));

    send(&mut ws, json!({"type": "message", "content": "What's their email?"})).await;
    let reply = recv(&mut ws).await;
    assert!(
        reply["content"]
            .as_str()
            .unwrap()
            .contains("contact@healthfirst.com")
    );
}

#[tokio::test]
async fn test_unknown_caller_registers_in_one_message() {
    let gateway = TestGateway::with_records().await;
    let (mut ws, _) = gateway.connect().await;

    send(&mut ws, json!({"type": "init", "phone": "+1-555-000-0000"})).await;
    let ready = recv(&mut ws).await;
    assert_eq!(ready["agent_type"], "collection");

    send(
        &mut ws,
        json!({
            "type": "message",
            "content": "We're Sunrise Pharmacy in Austin, TX, contact sunrise@example.com"
        }),
    )
    .await;

    let progress = recv(&mut ws).await;
    assert_eq!(progress["type"], "collection_progress");
    assert_eq!(progress["fields_remaining"], json!([]));
    assert_eq!(
        progress["fields_collected"],
        json!(["phone", "name", "city", "state", "email"])
    );

    let complete = recv(&mut ws).await;
    assert_eq!(complete["type"], "collection_complete");
    let data = &complete["pharmacy_data"];
    assert_eq!(data["name"], "Sunrise Pharmacy");
    assert_eq!(data["city"], "Austin");
    assert_eq!(data["state"], "TX");
    assert_eq!(data["email"], "sunrise@example.com");
    assert_eq!(data["phone"], "5550000000");

    send(&mut ws, json!({"type": "message", "content": "anything else?"})).await;
    let after = recv(&mut ws).await;
    assert_eq!(after["type"], "error");
}

#[tokio::test]
async fn test_bad_email_is_explained_and_stays_remaining() {
    let gateway = TestGateway::with_records().await;
    let (mut ws, _) = gateway.connect().await;

    send(&mut ws, json!({"type": "init", "phone": "555-000-0000"})).await;
    recv(&mut ws).await;

    send(
        &mut ws,
        json!({"type": "message", "content": "Email: sunrise.example.com"}),
    )
    .await;
    let progress = recv(&mut ws).await;
    assert_eq!(progress["type"], "collection_progress");
    let remaining = progress["fields_remaining"].as_array().unwrap();
    assert!(remaining.contains(&json!("email")));
    assert!(progress["content"].as_str().unwrap().contains("valid email"));
}

#[tokio::test]
async fn test_protocol_errors_are_not_fatal() {
    let gateway = TestGateway::with_records().await;
    let (mut ws, _) = gateway.connect().await;

    send_raw(&mut ws, "this is not json").await;
    assert_eq!(recv(&mut ws).await["type"], "error");

    send(&mut ws, json!({"content": "no type"})).await;
    assert_eq!(recv(&mut ws).await["type"], "error");

    send(&mut ws, json!({"type": "teleport"})).await;
    let unknown = recv(&mut ws).await;
    assert_eq!(unknown["type"], "error");
    assert!(unknown["message"].as_str().unwrap().contains("teleport"));

    send(&mut ws, json!({"type": "message", "content": "hi"})).await;
    assert_eq!(recv(&mut ws).await["type"], "error");

    send(&mut ws, json!({"type": "init", "phone": "no digits"})).await;
    assert_eq!(recv(&mut ws).await["type"], "error");

    // Still awaiting init, so a valid init goes through.
    send(&mut ws, json!({"type": "init", "phone": "5551234567"})).await;
    assert_eq!(recv(&mut ws).await["type"], "agent_ready");

    send(&mut ws, json!({"type": "init", "phone": "5550000000"})).await;
    let reinit = recv(&mut ws).await;
    assert_eq!(reinit["type"], "error");

    // The original agent is still bound.
    send(&mut ws, json!({"type": "message", "content": "How many Metformin?"})).await;
    assert!(recv(&mut ws).await["content"].as_str().unwrap().contains("17"));
}

#[tokio::test]
async fn test_close_releases_session() {
    let gateway = TestGateway::with_records().await;
    let (mut ws, _) = gateway.connect().await;
    send(&mut ws, json!({"type": "init", "phone": "+1-555-123-4567"})).await;
    recv(&mut ws).await;
    assert_eq!(gateway.app.registry.len().await, 1);

    send(&mut ws, json!({"type": "close"})).await;

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "server did not close the connection");
    gateway.wait_for_no_sessions().await;
}

#[tokio::test]
async fn test_transport_drop_releases_session() {
    let gateway = TestGateway::with_records().await;
    let (ws, _) = gateway.connect().await;
    drop(ws);
    gateway.wait_for_no_sessions().await;
}

struct SlowCountingSource {
    calls: AtomicU32,
}

#[async_trait]
impl RecordSource for SlowCountingSource {
    fn name(&self) -> &str {
        "slow"
    }

    async fn fetch(&self, phone: &CanonicalPhone) -> Result<Option<Record>, RecordError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let record = healthfirst();
        Ok((record.canonical_phone().as_ref() == Some(phone)).then_some(record))
    }

    async fn list_all(&self) -> Result<Vec<Record>, RecordError> {
        Ok(vec![healthfirst()])
    }
}

#[tokio::test]
async fn test_concurrent_sessions_share_one_lookup() {
    let source = Arc::new(SlowCountingSource {
        calls: AtomicU32::new(0),
    });
    let gateway = TestGateway::start(source.clone()).await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(gateway.connect().await);
    }
    let ids: std::collections::HashSet<_> = clients.iter().map(|(_, id)| id.clone()).collect();
    assert_eq!(ids.len(), 5);

    for (ws, _) in clients.iter_mut() {
        send(ws, json!({"type": "init", "phone": "(555) 123-4567"})).await;
    }
    for (ws, _) in clients.iter_mut() {
        let ready = recv(ws).await;
        assert_eq!(ready["agent_type"], "info");
    }

    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let TestGateway {
        addr,
        app,
        mut server,
    } = TestGateway::with_records().await;
    let url = format!("ws://{}/ws/pharmacy-agent", addr);
    let (mut ws, _) = connect_async(url).await.unwrap();
    recv(&mut ws).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("server did not shut down");
    assert_eq!(closed, 1);
    assert!(app.registry.is_empty().await);

    // The client sees the connection end.
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}

/// Fails with a 503 for the first `fail_first` fetches.
struct FlakySource {
    calls: AtomicU32,
    fail_first: u32,
}

#[async_trait]
impl RecordSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn fetch(&self, phone: &CanonicalPhone) -> Result<Option<Record>, RecordError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(RecordError::Server {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let record = healthfirst();
        Ok((record.canonical_phone().as_ref() == Some(phone)).then_some(record))
    }

    async fn list_all(&self) -> Result<Vec<Record>, RecordError> {
        Ok(vec![healthfirst()])
    }
}

#[tokio::test]
async fn test_init_can_be_retried_after_upstream_failure() {
    let config = Config::from_lookup(|key| {
        (key == "PHARMACY_API_RETRY_COUNT").then(|| "1".to_string())
    })
    .unwrap();
    let source = Arc::new(FlakySource {
        calls: AtomicU32::new(0),
        fail_first: 1,
    });
    let gateway = TestGateway::start_with(config, source.clone()).await;
    let (mut ws, _) = gateway.connect().await;

    send(&mut ws, json!({"type": "init", "phone": "+1-555-000-0000"})).await;
    let failed = recv(&mut ws).await;
    assert_eq!(failed["type"], "error");
    assert!(
        failed["message"]
            .as_str()
            .unwrap()
            .contains("Unable to look up pharmacy records")
    );

    // Still awaiting init.
    send(&mut ws, json!({"type": "message", "content": "hello?"})).await;
    assert_eq!(recv(&mut ws).await["type"], "error");

    send(&mut ws, json!({"type": "init", "phone": "+1-555-000-0000"})).await;
    let ready = recv(&mut ws).await;
    assert_eq!(ready["type"], "agent_ready");
    assert_eq!(ready["agent_type"], "collection");
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_close_during_lookup_discards_reply_but_fills_cache() {
    let source = Arc::new(SlowCountingSource {
        calls: AtomicU32::new(0),
    });
    let gateway = TestGateway::start(source.clone()).await;

    let (mut first, _) = gateway.connect().await;
    send(&mut first, json!({"type": "init", "phone": "+1-555-123-4567"})).await;
    for _ in 0..100 {
        if source.calls.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(source.calls.load(Ordering::SeqCst), 1, "lookup never started");
    send(&mut first, json!({"type": "close"})).await;

    let replies = tokio::time::timeout(Duration::from_secs(5), async {
        let mut texts = Vec::new();
        loop {
            match first.next().await {
                Some(Ok(Message::Text(text))) => texts.push(text.as_str().to_string()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
        texts
    })
    .await
    .expect("server did not close the connection");
    assert!(replies.is_empty(), "unexpected replies: {replies:?}");

    for _ in 0..100 {
        if gateway.app.cache.len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(gateway.app.cache.len().await, 1);

    let (mut second, _) = gateway.connect().await;
    send(&mut second, json!({"type": "init", "phone": "5551234567"})).await;
    assert_eq!(recv(&mut second).await["agent_type"], "info");
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_frame_refreshes_idle_clock() {
    let gateway = TestGateway::with_records().await;
    let (mut ws, session_id) = gateway.connect().await;
    let id = uuid::Uuid::parse_str(&session_id).unwrap();
    let session = gateway.app.registry.get(id).await.unwrap();
    let before = session.lock().await.last_active_at;

    tokio::time::sleep(Duration::from_millis(20)).await;
    send_raw(&mut ws, "{not json").await;
    assert_eq!(recv(&mut ws).await["type"], "error");

    assert!(session.lock().await.last_active_at > before);
}

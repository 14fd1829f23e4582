//! WebSocket protocol handler.
//!
//! Each connection runs three tasks:
//! - a reader that parses frames and notices `close` or a dropped transport
//! - a dispatcher that handles parsed messages one at a time
//! - a writer that drains replies to the socket in order
//!
//! Closing cancels the session token, which stops the dispatcher even in
//! the middle of a lookup. The lookup itself keeps running in the cache.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::Session;
use crate::channels::web::GatewayState;
use crate::channels::web::types::{WsClientMessage, WsServerMessage};
use crate::error::{ProtocolError, RouteError};
use crate::phone::CanonicalPhone;

/// Outgoing frames buffered per connection.
const OUTBOUND_BUFFER: usize = 64;

/// Parsed frames waiting for dispatch.
const INBOUND_BUFFER: usize = 32;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (id, session) = state.registry.open().await;
    let span = tracing::info_span!("session", session_id = %id);

    async {
        tracing::info!("WebSocket connected");
        run_session(socket, &state, id, &session).await;

        if !state.registry.close(id).await {
            // Reaped while connected; the registry no longer holds it.
            session.lock().await.finish_close();
        }
        tracing::info!("WebSocket disconnected");
    }
    .instrument(span)
    .await
}

async fn run_session(
    socket: WebSocket,
    state: &GatewayState,
    id: Uuid,
    session: &Arc<Mutex<Session>>,
) {
    let cancel = session.lock().await.cancel_token();
    let (mut sink, mut stream) = socket.split();

    let (out_tx, out_rx) = mpsc::channel::<WsServerMessage>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(
        async move {
            let mut outgoing = ReceiverStream::new(out_rx);
            while let Some(msg) = outgoing.next().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to serialize WebSocket message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .in_current_span(),
    );

    let (in_tx, mut in_rx) = mpsc::channel::<Result<WsClientMessage, ProtocolError>>(INBOUND_BUFFER);
    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(
        async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = reader_cancel.cancelled() => break,
                    frame = stream.next() => frame,
                };
                let parsed = match frame {
                    Some(Ok(Message::Text(text))) => WsClientMessage::parse(text.as_str()),
                    Some(Ok(Message::Binary(_))) => Err(ProtocolError::Malformed(
                        "binary frames are not supported".to_string(),
                    )),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("Client closed the connection");
                        reader_cancel.cancel();
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket transport error: {}", e);
                        reader_cancel.cancel();
                        break;
                    }
                };
                if matches!(parsed, Ok(WsClientMessage::Close)) {
                    tracing::debug!("Received close message");
                    reader_cancel.cancel();
                    break;
                }
                if in_tx.send(parsed).await.is_err() {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    if out_tx
        .send(WsServerMessage::ConnectionEstablished { session_id: id })
        .await
        .is_ok()
    {
        session.lock().await.mark_established();

        'dispatch: loop {
            let parsed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = in_rx.recv() => match next {
                    Some(parsed) => parsed,
                    None => break,
                },
            };

            let replies = tokio::select! {
                biased;
                // Anything still in flight is discarded for this session.
                _ = cancel.cancelled() => break,
                replies = dispatch(state, session, parsed) => replies,
            };
            // Idle time counts from the end of the last dispatch.
            session.lock().await.touch();

            for reply in replies {
                if out_tx.send(reply).await.is_err() {
                    break 'dispatch;
                }
            }
        }
    }

    session.lock().await.begin_close();
    drop(out_tx);
    let _ = reader.await;
    let _ = writer.await;
}

/// Handle one parsed client message and produce its replies.
async fn dispatch(
    state: &GatewayState,
    session: &Mutex<Session>,
    parsed: Result<WsClientMessage, ProtocolError>,
) -> Vec<WsServerMessage> {
    let msg = match parsed {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("Rejected client frame: {}", e);
            return vec![WsServerMessage::error(e.to_string())];
        }
    };

    let mut session = session.lock().await;
    session.touch();

    match msg {
        WsClientMessage::Init { phone } => {
            if let Err(e) = session.check_init() {
                tracing::warn!("Rejected init: {}", e);
                return vec![WsServerMessage::error(e.to_string())];
            }
            let key = match CanonicalPhone::parse(&phone) {
                Ok(key) => key,
                Err(e) => return vec![WsServerMessage::error(e.to_string())],
            };

            match state.router.resolve_key(&key).await {
                Ok(agent) => {
                    let reply = WsServerMessage::AgentReady {
                        agent_type: agent.kind(),
                        message: agent.greeting(),
                    };
                    session.activate(key, agent);
                    vec![reply]
                }
                Err(RouteError::Upstream(e)) => {
                    tracing::error!("Record lookup failed during init: {}", e);
                    vec![WsServerMessage::error(
                        "Unable to look up pharmacy records right now. Please try again.",
                    )]
                }
                Err(RouteError::Protocol(e)) => vec![WsServerMessage::error(e.to_string())],
            }
        }
        WsClientMessage::Message { content } => {
            if let Err(e) = session.check_message() {
                tracing::warn!("Rejected message: {}", e);
                return vec![WsServerMessage::error(e.to_string())];
            }
            let Some(agent) = session.agent.as_mut() else {
                return vec![WsServerMessage::error(
                    ProtocolError::NotInitialized.to_string(),
                )];
            };
            match agent.handle(&content).await {
                Ok(events) => events.into_iter().map(WsServerMessage::from).collect(),
                Err(e) => vec![WsServerMessage::error(e.to_string())],
            }
        }
        WsClientMessage::Close => {
            session.begin_close();
            Vec::new()
        }
    }
}

//! WebSocket session driver
//!
//! Bridges one accepted WebSocket to its hub session: handshake with
//! timeout, an outbound pump draining the session's bounded queue, and
//! an inbound loop recording liveness acks. Whatever ends first tears
//! the session down, and unregistration runs exactly once.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::timeout;

use crate::hub::{BroadcastHub, Session, StreamEvent};
use crate::protocol::{ControlMessage, PROTOCOL_VERSION};
use crate::ui::server::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, addr, hub))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, hub: Arc<BroadcastHub>) {
    let session = match hub.register(addr.to_string()) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(peer = %addr, "connection rejected: {}", e);
            return;
        }
    };
    let id = session.id;

    let (mut sink, mut stream) = socket.split();

    match timeout(hub.handshake_timeout(), await_client_hello(&mut stream)).await {
        Ok(Some(version)) if version == PROTOCOL_VERSION => {
            let hello = ControlMessage::ServerHello {
                session_id: id,
                protocol_version: PROTOCOL_VERSION,
            };
            if sink.send(Message::Text(hello.to_json())).await.is_err()
                || hub.activate(id).is_err()
            {
                hub.unregister(id);
                return;
            }
        }
        Ok(Some(version)) => {
            tracing::warn!(session = %id, client_version = version, "protocol version mismatch");
            hub.unregister(id);
            return;
        }
        Ok(None) => {
            hub.unregister(id);
            return;
        }
        Err(_) => {
            tracing::warn!(session = %id, "handshake timeout");
            hub.unregister(id);
            return;
        }
    }

    let mut outbound = tokio::spawn(pump_outbound(session.clone(), sink));
    let mut inbound = tokio::spawn(pump_inbound(session.clone(), stream));

    // Either direction ending closes the session
    tokio::select! {
        _ = &mut outbound => { inbound.abort(); }
        _ = &mut inbound => {
            // Closing the session queue wakes the outbound pump
            session.close();
            outbound.abort();
        }
    }

    hub.unregister(id);
}

/// Wait for the client's hello; returns its protocol version
async fn await_client_hello(stream: &mut SplitStream<WebSocket>) -> Option<u16> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match ControlMessage::from_json(&text) {
                Ok(ControlMessage::ClientHello { protocol_version }) => {
                    return Some(protocol_version);
                }
                Ok(_) | Err(_) => return None,
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            // Binary or ping/pong before the hello is a protocol error
            Ok(Message::Binary(_)) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Drain the session queue into the socket until either side closes
async fn pump_outbound(session: Arc<Session>, mut sink: SplitSink<WebSocket, Message>) {
    while let Some(event) = session.next_event().await {
        let message = match event {
            StreamEvent::Chunk(chunk) => Message::Binary(chunk.encode().to_vec()),
            StreamEvent::Control(control) => Message::Text(control.to_json()),
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Record liveness; any inbound traffic counts as activity
async fn pump_inbound(session: Arc<Session>, mut stream: SplitStream<WebSocket>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if matches!(
                    ControlMessage::from_json(&text),
                    Ok(ControlMessage::Ack)
                ) {
                    session.touch();
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => session.touch(),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

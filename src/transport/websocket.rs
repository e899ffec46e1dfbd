//! NT4 WebSocket transport
//!
//! Accepts WebSocket connections, negotiates the NetworkTables subprotocol
//! and bridges each socket to the coordinator:
//! - text frames are decoded as control batches and applied in order
//! - binary frames are decoded as value frames; id `-1` is a time-sync probe
//! - a writer task drains the session's bounded queue onto the socket
//!
//! A handshake offering neither NT4 subprotocol is refused with HTTP 400.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::{HeaderValue, StatusCode, header::SEC_WEBSOCKET_PROTOCOL};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::engine::{SharedCoordinator, lock};
use crate::broker::message::Outgoing;
use crate::broker::session::{Generation, Session, SessionId, select_subprotocol};
use crate::codec::Value;
use crate::codec::nt4::{self, ValueFrame};
use crate::config::Settings;
use crate::utils::NtError;

pub async fn start_nt4_server(
    addr: &str,
    coordinator: SharedCoordinator,
    settings: Settings,
) -> Result<(), NtError> {
    let listener = TcpListener::bind(addr).await?;
    info!("NT4 server listening on ws://{}", listener.local_addr()?);
    serve_nt4(listener, coordinator, settings).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_nt4(
    listener: TcpListener,
    coordinator: SharedCoordinator,
    settings: Settings,
) -> Result<(), NtError> {
    while let Ok((stream, peer)) = listener.accept().await {
        let coordinator = coordinator.clone();
        let settings = settings.clone();

        spawn(async move {
            if let Err(e) = handle_connection(stream, coordinator, settings).await {
                debug!("NT4 connection from {} ended: {}", peer, e);
            }
        });
    }
    Ok(())
}

/// The list of subprotocols a client offered, across repeated headers.
fn offered_subprotocols(req: &Request) -> Vec<String> {
    req.headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_string())
        .collect()
}

async fn handle_connection(
    stream: TcpStream,
    coordinator: SharedCoordinator,
    settings: Settings,
) -> Result<(), NtError> {
    let mut negotiated: Option<&'static str> = None;
    let mut client_name = String::new();

    let callback = |req: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        client_name = req.uri().path().trim_start_matches("/nt/").to_string();
        match select_subprotocol(&offered_subprotocols(req)) {
            Some(protocol) => {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
                negotiated = Some(protocol);
                Ok(response)
            }
            None => {
                let mut refusal =
                    ErrorResponse::new(Some("no supported NetworkTables subprotocol".to_string()));
                *refusal.status_mut() = StatusCode::BAD_REQUEST;
                Err(refusal)
            }
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {}", e);
            return Err(NtError::ProtocolNegotiation(e.to_string()));
        }
    };
    let protocol = negotiated
        .ok_or_else(|| NtError::ProtocolNegotiation("no subprotocol negotiated".to_string()))?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Outgoing>(settings.session.outbound_queue_capacity);
    let session = Session::new(Generation::Nt4, Some(protocol.to_string()), tx);
    let session_id = lock(&coordinator).attach_nt4(session);
    info!("[{}] NT4 client '{}' connected ({})", session_id, client_name, protocol);

    // Forward queued events to the socket. Ends when the coordinator drops the
    // session's sender (detach or eviction) or the socket fails.
    let mut writer = {
        let session_id = session_id.clone();
        spawn(async move {
            while let Some(event) = rx.recv().await {
                let frame = match event.encode_nt4() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("[{}] dropping unencodable event: {}", session_id, e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(frame).await {
                    debug!("[{}] send failed: {}", session_id, e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!("[{}] send loop closed", session_id);
        })
    };

    let reader = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => handle_text(&coordinator, &session_id, &text),
                Ok(WsMessage::Binary(bytes)) => handle_binary(&coordinator, &session_id, &bytes),
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("[{}] read error: {}", session_id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {}
    }
    writer.abort();

    lock(&coordinator).detach(&session_id);
    info!("[{}] NT4 client '{}' disconnected", session_id, client_name);
    Ok(())
}

fn handle_text(coordinator: &SharedCoordinator, session_id: &SessionId, text: &str) {
    let batch = match nt4::decode_control(text) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(
                "[{}] {} | {}",
                session_id,
                e,
                text.chars().take(100).collect::<String>()
            );
            return;
        }
    };
    for rejected in &batch.rejected {
        warn!("[{}] control message dropped: {}", session_id, rejected);
    }
    let mut coordinator = lock(coordinator);
    for msg in batch.messages {
        coordinator.handle_control(session_id, msg);
    }
}

fn handle_binary(coordinator: &SharedCoordinator, session_id: &SessionId, bytes: &[u8]) {
    let frames = match nt4::decode_values(bytes) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("[{}] binary frame dropped: {}", session_id, e);
            return;
        }
    };
    let mut coordinator = lock(coordinator);
    for ValueFrame {
        id,
        timestamp,
        value,
    } in frames
    {
        if id == nt4::TIMESYNC_ID {
            match value {
                Value::Int(client_time) => coordinator.time_sync(session_id, client_time),
                other => warn!(
                    "[{}] time-sync probe with {} payload ignored",
                    session_id,
                    other.value_type()
                ),
            }
            continue;
        }
        coordinator.set_value(session_id, id, timestamp, value);
    }
}

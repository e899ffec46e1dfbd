use crate::broker::engine::{Coordinator, SharedCoordinator, lock};
use crate::codec::nt4::{self, ControlMessage, SUBPROTOCOL_V40, SUBPROTOCOL_V41, ValueFrame};
use crate::codec::{Value, ValueType};
use crate::config::Settings;
use crate::transport::websocket::serve_nt4;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
enum Incoming {
    Control(Vec<ControlMessage>),
    Values(Vec<ValueFrame>),
}

async fn start_server() -> (String, SharedCoordinator) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let coordinator = Coordinator::shared("test-server");
    tokio::spawn(serve_nt4(listener, coordinator.clone(), Settings::default()));
    (format!("ws://{}/nt/tester", addr), coordinator)
}

async fn connect_offering(url: &str, protocols: &str) -> Result<(Ws, String), tungstenite::Error> {
    let mut request = url.into_client_request().unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(protocols).unwrap(),
    );
    let (ws, response) = connect_async(request).await?;
    let chosen = response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Ok((ws, chosen))
}

async fn connect(url: &str) -> Ws {
    let offer = format!("{}, {}", SUBPROTOCOL_V41, SUBPROTOCOL_V40);
    connect_offering(url, &offer).await.expect("handshake failed").0
}

async fn recv(ws: &mut Ws) -> Incoming {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read error");
        match msg {
            WsMessage::Text(text) => {
                return Incoming::Control(nt4::decode_control(&text).unwrap().messages);
            }
            WsMessage::Binary(bytes) => {
                return Incoming::Values(nt4::decode_values(&bytes).unwrap());
            }
            _ => continue,
        }
    }
}

async fn send_control(ws: &mut Ws, batch: serde_json::Value) {
    ws.send(WsMessage::text(batch.to_string())).await.unwrap();
}

async fn send_values(ws: &mut Ws, frames: &[ValueFrame]) {
    let bytes = nt4::encode_values(frames).unwrap();
    ws.send(WsMessage::binary(bytes)).await.unwrap();
}

async fn wait_for(coordinator: &SharedCoordinator, check: impl Fn(&Coordinator) -> bool) {
    for _ in 0..200 {
        if check(&lock(coordinator)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("coordinator never reached the expected state");
}

fn expect_announce(incoming: Incoming) -> nt4::AnnounceParams {
    match incoming {
        Incoming::Control(messages) => match messages.into_iter().next() {
            Some(ControlMessage::Announce(params)) => params,
            other => panic!("expected announce, got {:?}", other),
        },
        other => panic!("expected control frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handshake_requires_subprotocol() {
    let (url, coordinator) = start_server().await;

    assert!(connect_async(url.as_str()).await.is_err());
    assert!(connect_offering(&url, "rtt.networktables.first.wpi.edu").await.is_err());

    let (_v40, chosen) = connect_offering(&url, SUBPROTOCOL_V40).await.unwrap();
    assert_eq!(chosen, SUBPROTOCOL_V40);
    let offer = format!("{}, {}", SUBPROTOCOL_V40, SUBPROTOCOL_V41);
    let (_v41, chosen) = connect_offering(&url, &offer).await.unwrap();
    assert_eq!(chosen, SUBPROTOCOL_V41);

    wait_for(&coordinator, |c| c.session_count() == 2).await;
}

#[tokio::test]
async fn test_publish_subscribe_value_end_to_end() {
    let (url, coordinator) = start_server().await;

    let mut subscriber = connect(&url).await;
    send_control(
        &mut subscriber,
        json!([{"method": "subscribe", "params": {"topics": ["/test"], "subuid": 1, "options": {"prefix": true}}}]),
    )
    .await;
    wait_for(&coordinator, |c| c.subscriptions().len() == 1).await;

    let mut publisher = connect(&url).await;
    send_control(
        &mut publisher,
        json!([{"method": "publish", "params": {"name": "/test/counter", "pubuid": 1, "type": "double"}}]),
    )
    .await;

    let own = expect_announce(recv(&mut publisher).await);
    assert_eq!(own.name, "/test/counter");
    assert_eq!(own.id, 1);
    assert_eq!(own.pubuid, Some(1));
    assert_eq!(own.value_type, ValueType::Double);

    let seen = expect_announce(recv(&mut subscriber).await);
    assert_eq!(seen.id, 1);
    assert_eq!(seen.pubuid, None);

    send_values(&mut publisher, &[ValueFrame::new(1, 1_000, Value::Double(3.14))]).await;
    match recv(&mut subscriber).await {
        Incoming::Values(frames) => {
            assert_eq!(frames, vec![ValueFrame::new(1, 1_000, Value::Double(3.14))]);
        }
        other => panic!("expected values, got {:?}", other),
    }

    // late joiner: announce, then the current value
    let mut late = connect(&url).await;
    let announced = expect_announce(recv(&mut late).await);
    assert_eq!(announced.name, "/test/counter");
    match recv(&mut late).await {
        Incoming::Values(frames) => assert_eq!(frames[0].value, Value::Double(3.14)),
        other => panic!("expected values, got {:?}", other),
    }
}

#[tokio::test]
async fn test_time_sync_probe_is_answered() {
    let (url, _coordinator) = start_server().await;
    let mut ws = connect(&url).await;

    send_values(&mut ws, &[ValueFrame::new(nt4::TIMESYNC_ID, 0, Value::Int(777))]).await;
    match recv(&mut ws).await {
        Incoming::Values(frames) => {
            assert_eq!(frames.len(), 1);
            assert!(frames[0].is_timesync());
            assert_eq!(frames[0].value, Value::Int(777));
            assert!(frames[0].timestamp > 0);
        }
        other => panic!("expected values, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_unannounces_exclusive_topics() {
    let (url, coordinator) = start_server().await;
    let mut observer = connect(&url).await;
    let mut publisher = connect(&url).await;

    send_control(
        &mut publisher,
        json!([{"method": "publish", "params": {"name": "/gone", "pubuid": 3, "type": "int"}}]),
    )
    .await;
    expect_announce(recv(&mut observer).await);

    publisher.close(None).await.unwrap();

    match recv(&mut observer).await {
        Incoming::Control(messages) => match &messages[..] {
            [ControlMessage::Unannounce(params)] => assert_eq!(params.name, "/gone"),
            other => panic!("expected unannounce, got {:?}", other),
        },
        other => panic!("expected control frame, got {:?}", other),
    }
    wait_for(&coordinator, |c| c.directory().is_empty() && c.session_count() == 1).await;
}

#[tokio::test]
async fn test_malformed_frames_keep_the_connection() {
    let (url, _coordinator) = start_server().await;
    let mut ws = connect(&url).await;

    ws.send(WsMessage::text("not json")).await.unwrap();
    ws.send(WsMessage::binary(vec![0xc1u8])).await.unwrap();
    send_control(
        &mut ws,
        json!([
            {"method": "nonsense", "params": {}},
            {"method": "publish", "params": {"name": "/still/here", "pubuid": 1, "type": "string"}}
        ]),
    )
    .await;

    let announced = expect_announce(recv(&mut ws).await);
    assert_eq!(announced.name, "/still/here");
}

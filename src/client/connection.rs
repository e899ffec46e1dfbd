//! `NtClient`: the caller-facing handle of the client role.
//!
//! Caller operations are synchronous and mutate the shared reconciler under
//! a lock; a background task owns the WebSocket, reconnects when it drops,
//! flushes the reconciler's outbox and feeds inbound frames back into it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::protocol::Message as WsMessage;

use crate::client::clock::ClockSync;
use crate::client::listener::{self, Callback, ListenerId, ListenerOptions, ListenerRegistry};
use crate::client::reconciler::{ClientFrame, Reconciler, TopicEvent, TopicInfo};
use crate::codec::nt4::{self, Properties, SUBPROTOCOL_V40, SUBPROTOCOL_V41, SubscribeOptions};
use crate::codec::{Value, ValueType};
use crate::config::ClientSettings;
use crate::utils::NtError;
use crate::utils::time::now_micros;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

#[derive(Debug, Default)]
struct Shared {
    reconciler: Reconciler,
    listeners: ListenerRegistry,
    clock: ClockSync,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f` under the lock, then fire the listeners for whatever it changed
/// once the lock is released.
fn apply<T>(shared: &SharedState, f: impl FnOnce(&mut Shared) -> T) -> T {
    let (result, routed) = {
        let mut guard = lock(shared);
        let result = f(&mut *guard);
        let events = guard.reconciler.take_events();
        (result, guard.listeners.route(events))
    };
    listener::fire(routed);
    result
}

pub struct NtClient {
    shared: SharedState,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl NtClient {
    /// Start connecting in the background. Must be called inside a Tokio
    /// runtime.
    pub fn start(settings: ClientSettings) -> Self {
        let shared = SharedState::default();
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run(shared.clone(), wake.clone(), settings));
        Self { shared, wake, task }
    }

    pub fn get_topic(&self, name: &str) -> Option<TopicInfo> {
        lock(&self.shared).reconciler.get_topic(name)
    }

    pub fn get_value(&self, name: &str) -> Option<Value> {
        lock(&self.shared).reconciler.get_value(name)
    }

    pub fn publish(
        &self,
        name: &str,
        value_type: ValueType,
        properties: Properties,
    ) -> Result<i64, NtError> {
        let pubuid = apply(&self.shared, |s| s.reconciler.publish(name, value_type, properties))?;
        self.wake.notify_one();
        Ok(pubuid)
    }

    pub fn unpublish(&self, name: &str) -> Result<(), NtError> {
        apply(&self.shared, |s| s.reconciler.unpublish(name))?;
        self.wake.notify_one();
        Ok(())
    }

    pub fn subscribe(&self, patterns: Vec<String>, options: SubscribeOptions) -> i64 {
        let subuid = apply(&self.shared, |s| s.reconciler.subscribe(patterns, options));
        self.wake.notify_one();
        subuid
    }

    pub fn unsubscribe(&self, subuid: i64) -> bool {
        let removed = apply(&self.shared, |s| s.reconciler.unsubscribe(subuid));
        self.wake.notify_one();
        removed
    }

    /// Write a value stamped with the estimated server time.
    pub fn set_value(&self, name: &str, value: Value) -> Result<(), NtError> {
        apply(&self.shared, |s| {
            let timestamp = s.clock.server_time(now_micros());
            s.reconciler.set_value(name, value, timestamp)
        })?;
        self.wake.notify_one();
        Ok(())
    }

    pub fn set_properties(&self, name: &str, update: Properties) -> Result<(), NtError> {
        apply(&self.shared, |s| s.reconciler.set_properties(name, update))?;
        self.wake.notify_one();
        Ok(())
    }

    pub fn add_listener<F>(&self, callback: F, options: ListenerOptions, pattern: Option<&str>) -> ListenerId
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let (id, routed) = {
            let mut guard = lock(&self.shared);
            let id = guard
                .listeners
                .add(callback, &options, pattern.map(str::to_string));
            let routed = if options.immediate {
                let snapshot = guard.reconciler.snapshot_events();
                guard.listeners.route_to(id, snapshot)
            } else {
                Vec::new()
            };
            (id, routed)
        };
        listener::fire(routed);
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.shared).listeners.remove(id)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).reconciler.is_connected()
    }

    /// Estimated server time in microseconds.
    pub fn get_server_time(&self) -> u64 {
        lock(&self.shared).clock.server_time(now_micros())
    }

    /// Half the last measured round trip, in microseconds.
    pub fn get_network_latency(&self) -> Option<u64> {
        lock(&self.shared).clock.latency_micros()
    }
}

impl Drop for NtClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn connect(url: &str) -> Result<WsStream, NtError> {
    let mut request = url.into_client_request()?;
    let offer = format!("{}, {}", SUBPROTOCOL_V41, SUBPROTOCOL_V40);
    let offer = HeaderValue::from_str(&offer)
        .map_err(|e| NtError::ProtocolNegotiation(e.to_string()))?;
    request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, offer);
    let (ws, response) = connect_async(request).await?;
    let chosen = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");
    info!("connected to {} ({})", url, chosen);
    Ok(ws)
}

/// Connect, serve, and reconnect forever.
async fn run(shared: SharedState, wake: Arc<Notify>, settings: ClientSettings) {
    loop {
        match connect(&settings.url).await {
            Ok(ws) => {
                if let Err(e) = serve(ws, &shared, &wake, &settings).await {
                    warn!("connection to {} lost: {}", settings.url, e);
                } else {
                    info!("connection to {} closed", settings.url);
                }
                apply(&shared, |s| s.reconciler.on_disconnected());
            }
            Err(e) => debug!("connect to {} failed: {}", settings.url, e),
        }
        tokio::time::sleep(settings.reconnect_interval()).await;
    }
}

async fn serve(
    ws: WsStream,
    shared: &SharedState,
    wake: &Notify,
    settings: &ClientSettings,
) -> Result<(), NtError> {
    let (mut sink, mut stream) = ws.split();
    apply(shared, |s| s.reconciler.on_connected());
    let mut timesync = tokio::time::interval(settings.timesync_interval());

    loop {
        flush(&mut sink, shared).await?;
        tokio::select! {
            _ = wake.notified() => {}
            _ = timesync.tick() => {
                let probe = nt4::encode_values(&[ClockSync::probe(now_micros())])?;
                sink.send(WsMessage::binary(probe)).await?;
            }
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => handle_text(shared, &text),
                Some(Ok(WsMessage::Binary(bytes))) => handle_binary(shared, &bytes),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

/// Send the outbox: control messages as one text frame, then values as one
/// binary frame.
async fn flush(sink: &mut WsSink, shared: &SharedState) -> Result<(), NtError> {
    let frames = lock(shared).reconciler.take_outbox();
    if frames.is_empty() {
        return Ok(());
    }
    let mut controls = Vec::new();
    let mut values = Vec::new();
    for frame in frames {
        match frame {
            ClientFrame::Control(msg) => controls.push(msg),
            ClientFrame::Value(frame) => values.push(frame),
        }
    }
    if !controls.is_empty() {
        sink.send(WsMessage::text(nt4::encode_control(&controls)?)).await?;
    }
    if !values.is_empty() {
        sink.send(WsMessage::binary(nt4::encode_values(&values)?)).await?;
    }
    Ok(())
}

fn handle_text(shared: &SharedState, text: &str) {
    let batch = match nt4::decode_control(text) {
        Ok(batch) => batch,
        Err(e) => {
            warn!("control frame dropped: {}", e);
            return;
        }
    };
    for rejected in &batch.rejected {
        warn!("control message dropped: {}", rejected);
    }
    apply(shared, |s| {
        for msg in batch.messages {
            s.reconciler.handle_control(msg);
        }
    });
}

fn handle_binary(shared: &SharedState, bytes: &[u8]) {
    let frames = match nt4::decode_values(bytes) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("binary frame dropped: {}", e);
            return;
        }
    };
    apply(shared, |s| {
        for frame in frames {
            if !frame.is_timesync() {
                s.reconciler.handle_value(frame);
                continue;
            }
            match frame.value {
                Value::Int(sent) => s.clock.record(sent, frame.timestamp, now_micros()),
                other => debug!("time-sync reply with {} payload", other.value_type()),
            }
        }
    });
}

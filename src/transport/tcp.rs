//! NT3 TCP transport
//!
//! Drives the NT3 handshake and then bridges NT3 entry messages to the
//! coordinator. The wire has no outer framing, so the reader keeps a byte
//! buffer and asks the codec for one message at a time.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::broker::engine::{SharedCoordinator, lock};
use crate::broker::message::Outgoing;
use crate::broker::session::{Generation, Session, SessionId};
use crate::broker::topic::TopicFlags;
use crate::codec::nt3::{self, CLEAR_ALL_MAGIC, Nt3Message, PROTOCOL_VERSION};
use crate::codec::{Codec, FrameFormatError};
use crate::config::Settings;
use crate::utils::NtError;

const READ_CHUNK: usize = 4096;

pub async fn start_nt3_server(
    addr: &str,
    coordinator: SharedCoordinator,
    settings: Settings,
) -> Result<(), NtError> {
    let listener = TcpListener::bind(addr).await?;
    info!("NT3 server listening on {}", listener.local_addr()?);
    serve_nt3(listener, coordinator, settings).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_nt3(
    listener: TcpListener,
    coordinator: SharedCoordinator,
    settings: Settings,
) -> Result<(), NtError> {
    while let Ok((stream, peer)) = listener.accept().await {
        let coordinator = coordinator.clone();
        let settings = settings.clone();

        spawn(async move {
            if let Err(e) = handle_connection(stream, coordinator, settings).await {
                warn!("NT3 connection from {} ended: {}", peer, e);
            }
        });
    }
    Ok(())
}

/// Buffered message reader over the read half of an NT3 socket.
struct FrameReader {
    half: OwnedReadHalf,
    buf: Vec<u8>,
}

impl FrameReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            buf: Vec::new(),
        }
    }

    /// Next complete message, or `None` at end of stream. Undecodable bytes
    /// are logged and discarded; a message larger than the size limit is an
    /// error.
    async fn next(&mut self) -> Result<Option<Nt3Message>, NtError> {
        loop {
            match nt3::decode(&self.buf) {
                Ok(Some((msg, used))) => {
                    self.buf.drain(..used);
                    return Ok(Some(msg));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{} ({} buffered bytes discarded)", e, self.buf.len());
                    self.buf.clear();
                }
            }
            if self.buf.len() > nt3::MAX_MESSAGE_SIZE {
                return Err(FrameFormatError::new(
                    Codec::Nt3,
                    format!("message exceeds {} bytes", nt3::MAX_MESSAGE_SIZE),
                )
                .into());
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.half.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn write_message(half: &mut OwnedWriteHalf, msg: &Nt3Message) -> Result<(), NtError> {
    half.write_all(&msg.to_bytes()).await?;
    Ok(())
}

/// Per-connection bookkeeping for entries this peer created.
struct Nt3Peer {
    session: SessionId,
    /// NT3 has no publish ids; one is synthesized per entry name.
    pubuids: HashMap<String, i64>,
    next_pubuid: i64,
}

impl Nt3Peer {
    fn new(session: SessionId) -> Self {
        Self {
            session,
            pubuids: HashMap::new(),
            next_pubuid: 0,
        }
    }

    fn pubuid_for(&mut self, name: &str) -> i64 {
        if let Some(&pubuid) = self.pubuids.get(name) {
            return pubuid;
        }
        let pubuid = self.next_pubuid;
        self.next_pubuid += 1;
        self.pubuids.insert(name.to_string(), pubuid);
        pubuid
    }

    fn apply(&mut self, coordinator: &SharedCoordinator, msg: Nt3Message) {
        let session = &self.session;
        match msg {
            Nt3Message::KeepAlive => {}
            Nt3Message::EntryAssignment {
                name, flags, value, ..
            } => {
                let pubuid = self.pubuid_for(&name);
                lock(coordinator).assign_entry(
                    &self.session,
                    &name,
                    TopicFlags::from_bits(flags),
                    value,
                    pubuid,
                );
            }
            Nt3Message::EntryUpdate { id, value, .. } => {
                lock(coordinator).set_value(session, i64::from(id), 0, value);
            }
            Nt3Message::FlagsUpdate { id, flags } => {
                lock(coordinator).set_flags(session, u32::from(id), TopicFlags::from_bits(flags));
            }
            Nt3Message::EntryDelete { id } => {
                lock(coordinator).delete_entry(session, u32::from(id));
            }
            Nt3Message::ClearEntries { magic } if magic == CLEAR_ALL_MAGIC => {
                lock(coordinator).clear_entries(session);
            }
            Nt3Message::ClearEntries { magic } => {
                warn!("[{}] clear-all with bad magic {:#010x} ignored", session, magic);
            }
            Nt3Message::RpcDefinition { id, .. } | Nt3Message::RpcExecution { id, .. } => {
                debug!("[{}] RPC message for entry {} ignored", session, id);
            }
            other => warn!(
                "[{}] unexpected {:?} after handshake",
                session,
                other.message_type()
            ),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    coordinator: SharedCoordinator,
    settings: Settings,
) -> Result<(), NtError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let deadline = Instant::now() + settings.session.handshake_timeout();

    // ClientHello; keep-alives are accepted in every state.
    let identity = loop {
        let msg = timeout_at(deadline, reader.next())
            .await
            .map_err(|_| NtError::HandshakeTimeout)??;
        match msg {
            None => return Ok(()),
            Some(Nt3Message::KeepAlive) => continue,
            Some(Nt3Message::ClientHello { version, identity }) if version == PROTOCOL_VERSION => {
                break identity;
            }
            Some(Nt3Message::ClientHello { version, .. }) => {
                let reply = Nt3Message::ProtoUnsupported {
                    version: PROTOCOL_VERSION,
                };
                write_message(&mut write_half, &reply).await?;
                return Err(NtError::ProtocolNegotiation(format!(
                    "NT3 client speaks version {:#06x}",
                    version
                )));
            }
            Some(other) => {
                return Err(NtError::ProtocolNegotiation(format!(
                    "expected ClientHello, got {:?}",
                    other.message_type()
                )));
            }
        }
    };

    let (tx, rx) = mpsc::channel::<Outgoing>(settings.session.outbound_queue_capacity);
    let session = Session::new(Generation::Nt3, None, tx);
    let session_id = lock(&coordinator).begin_nt3_handshake(session);
    info!("[{}] NT3 client '{}' connected", session_id, identity);

    let mut writer = spawn(write_loop(
        session_id.clone(),
        write_half,
        rx,
        settings.session.nt3_keepalive(),
    ));

    let mut peer = Nt3Peer::new(session_id.clone());
    let result = tokio::select! {
        result = read_loop(&mut reader, &mut peer, &coordinator, deadline) => result,
        _ = &mut writer => Ok(()),
    };
    writer.abort();

    lock(&coordinator).detach(&session_id);
    info!("[{}] NT3 client '{}' disconnected", session_id, identity);
    result
}

/// Apply the client's own assignments until `ClientHelloComplete`, then
/// everything else until the stream ends.
async fn read_loop(
    reader: &mut FrameReader,
    peer: &mut Nt3Peer,
    coordinator: &SharedCoordinator,
    deadline: Instant,
) -> Result<(), NtError> {
    loop {
        let msg = timeout_at(deadline, reader.next())
            .await
            .map_err(|_| NtError::HandshakeTimeout)??;
        match msg {
            None => return Ok(()),
            Some(Nt3Message::ClientHelloComplete) => break,
            Some(msg) => peer.apply(coordinator, msg),
        }
    }
    lock(coordinator).complete_nt3_handshake(&peer.session);

    while let Some(msg) = reader.next().await? {
        peer.apply(coordinator, msg);
    }
    Ok(())
}

async fn write_loop(
    session_id: SessionId,
    mut half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outgoing>,
    keepalive: Duration,
) {
    loop {
        let bytes = match timeout(keepalive, rx.recv()).await {
            Ok(Some(event)) => match event.encode_nt3() {
                Some(bytes) => bytes,
                None => continue,
            },
            Ok(None) => break,
            Err(_) => Nt3Message::KeepAlive.to_bytes(),
        };
        if let Err(e) = half.write_all(&bytes).await {
            debug!("[{}] send failed: {}", session_id, e);
            break;
        }
    }
    let _ = half.shutdown().await;
    debug!("[{}] send loop closed", session_id);
}

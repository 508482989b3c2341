//! One multiplexed wisp session over a WebSocket.
//!
//! # Data Flow
//! ```text
//! WebSocket rx ──decode──→ session loop ──┬─ CONNECT  → spawn stream task
//!                                         ├─ DATA     → stream inbound queue
//!                                         └─ CLOSE    → abort stream task
//!
//! stream tasks ──Packet──→ outbound queue ──encode──→ writer task ──→ WebSocket tx
//! ```
//!
//! # Design Decisions
//! - Per-stream inbound queues hold `buffer_size` packets; a client that
//!   overruns its CONTINUE credit is closed with `Throttled`
//! - Finished stream tasks report their id so the map never holds dead streams
//! - Closing the WebSocket aborts every stream of the session

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::net::{DestinationPolicy, SessionGuard};
use crate::observability::metrics;
use crate::wisp::packet::{CloseReason, Packet, StreamType};

const OUTBOUND_QUEUE: usize = 256;
const READ_BUFFER: usize = 16 * 1024;
const MAX_DATAGRAM: usize = 64 * 1024;

/// Per-session limits shared by every stream.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub buffer_size: u32,
    /// Bounds the hostname lookup and the connect.
    pub connect_timeout: Duration,
    pub allow_udp: bool,
    pub policy: DestinationPolicy,
}

impl SessionSettings {
    fn allows_stream_type(&self, stream_type: StreamType) -> bool {
        stream_type == StreamType::Tcp || self.allow_udp
    }
}

struct StreamHandle {
    inbound: mpsc::Sender<Bytes>,
    stream_type: StreamType,
    task: JoinHandle<()>,
}

pub async fn run_session(socket: WebSocket, settings: SessionSettings, session: SessionGuard) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Packet>(OUTBOUND_QUEUE);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u32>();

    let writer = tokio::spawn(async move {
        while let Some(packet) = out_rx.recv().await {
            if ws_tx.send(Message::Binary(packet.encode())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut streams: HashMap<u32, StreamHandle> = HashMap::new();
    let initial = Packet::Continue {
        stream_id: 0,
        buffer_remaining: settings.buffer_size,
    };
    if out_tx.send(initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            message = ws_rx.next() => {
                let frame = match message {
                    Some(Ok(Message::Binary(frame))) => frame,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session.id(), error = %e, "Wisp socket error");
                        break;
                    }
                };
                let packet = match Packet::decode(frame) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::debug!(session_id = %session.id(), error = %e, "Ignoring malformed wisp packet");
                        continue;
                    }
                };
                handle_packet(packet, &settings, &mut streams, &out_tx, &done_tx, &session).await;
            }
            Some(stream_id) = done_rx.recv() => {
                streams.remove(&stream_id);
            }
        }
    }

    for (_, stream) in streams.drain() {
        stream.task.abort();
    }
    drop(out_tx);
    let _ = writer.await;
    tracing::debug!(session_id = %session.id(), "Wisp session finished");
}

async fn handle_packet(
    packet: Packet,
    settings: &SessionSettings,
    streams: &mut HashMap<u32, StreamHandle>,
    out: &mpsc::Sender<Packet>,
    done: &mpsc::UnboundedSender<u32>,
    session: &SessionGuard,
) {
    match packet {
        Packet::Connect {
            stream_id,
            stream_type,
            port,
            hostname,
        } => {
            if streams.contains_key(&stream_id) {
                tracing::debug!(session_id = %session.id(), stream_id, "Ignoring CONNECT for an open stream");
                return;
            }
            if !settings.allows_stream_type(stream_type) {
                close_stream(out, stream_id, CloseReason::InvalidInfo).await;
                return;
            }
            metrics::record_stream_opened(stream_type.as_str());
            tracing::debug!(session_id = %session.id(), stream_id, host = %hostname, port, kind = stream_type.as_str(), "Opening stream");

            let capacity = settings.buffer_size.max(1) as usize;
            let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
            let task = tokio::spawn(run_stream(
                stream_id,
                stream_type,
                hostname,
                port,
                settings.clone(),
                inbound_rx,
                out.clone(),
                done.clone(),
            ));
            streams.insert(
                stream_id,
                StreamHandle {
                    inbound: inbound_tx,
                    stream_type,
                    task,
                },
            );
        }
        Packet::Data { stream_id, payload } => {
            let Some(stream) = streams.get(&stream_id) else {
                tracing::debug!(session_id = %session.id(), stream_id, "DATA for unknown stream");
                return;
            };
            let stream_type = stream.stream_type;
            match stream.inbound.try_send(payload) {
                Ok(()) => {}
                // Datagrams may be dropped; streams must respect their credit.
                Err(mpsc::error::TrySendError::Full(_)) if stream_type == StreamType::Udp => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if let Some(stream) = streams.remove(&stream_id) {
                        stream.task.abort();
                    }
                    close_stream(out, stream_id, CloseReason::Throttled).await;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    streams.remove(&stream_id);
                }
            }
        }
        Packet::Close { stream_id, reason } => {
            if let Some(stream) = streams.remove(&stream_id) {
                tracing::debug!(session_id = %session.id(), stream_id, reason = reason.as_str(), "Client closed stream");
                stream.task.abort();
                metrics::record_stream_closed(reason.as_str());
            }
        }
        Packet::Continue { stream_id, .. } => {
            tracing::debug!(session_id = %session.id(), stream_id, "Ignoring CONTINUE from client");
        }
    }
}

async fn close_stream(out: &mpsc::Sender<Packet>, stream_id: u32, reason: CloseReason) {
    metrics::record_stream_closed(reason.as_str());
    let _ = out.send(Packet::Close { stream_id, reason }).await;
}

#[allow(clippy::too_many_arguments)]
async fn run_stream(
    stream_id: u32,
    stream_type: StreamType,
    hostname: String,
    port: u16,
    settings: SessionSettings,
    inbound: mpsc::Receiver<Bytes>,
    out: mpsc::Sender<Packet>,
    done: mpsc::UnboundedSender<u32>,
) {
    let reason = match settings.policy.resolve(&hostname, port).await {
        Err(refused) => Some(CloseReason::from(refused)),
        Ok(addrs) => match stream_type {
            StreamType::Tcp => run_tcp(stream_id, &addrs, &settings, inbound, &out).await,
            StreamType::Udp => run_udp(stream_id, &addrs, inbound, &out).await,
        },
    };
    if let Some(reason) = reason {
        tracing::debug!(stream_id, host = %hostname, reason = reason.as_str(), "Stream closed");
        close_stream(&out, stream_id, reason).await;
    }
    let _ = done.send(stream_id);
}

/// Returns the reason to report, or `None` when the client side went away.
async fn run_tcp(
    stream_id: u32,
    addrs: &[SocketAddr],
    settings: &SessionSettings,
    mut inbound: mpsc::Receiver<Bytes>,
    out: &mpsc::Sender<Packet>,
) -> Option<CloseReason> {
    let stream = match tokio::time::timeout(settings.connect_timeout, TcpStream::connect(addrs)).await {
        Err(_) => return Some(CloseReason::Timeout),
        Ok(Err(e)) => return Some(connect_error_reason(&e)),
        Ok(Ok(stream)) => stream,
    };
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    let mut written: u32 = 0;

    loop {
        tokio::select! {
            data = inbound.recv() => {
                let data = data?;
                if writer.write_all(&data).await.is_err() {
                    return Some(CloseReason::NetworkError);
                }
                written += 1;
                if written >= settings.buffer_size {
                    written = 0;
                    let credit = Packet::Continue {
                        stream_id,
                        buffer_remaining: settings.buffer_size,
                    };
                    if out.send(credit).await.is_err() {
                        return None;
                    }
                }
            }
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => return Some(CloseReason::Voluntary),
                Ok(_) => {
                    let payload = buf.split().freeze();
                    if out.send(Packet::Data { stream_id, payload }).await.is_err() {
                        return None;
                    }
                    buf.reserve(READ_BUFFER);
                }
                Err(_) => return Some(CloseReason::NetworkError),
            },
        }
    }
}

async fn run_udp(
    stream_id: u32,
    addrs: &[SocketAddr],
    mut inbound: mpsc::Receiver<Bytes>,
    out: &mpsc::Sender<Packet>,
) -> Option<CloseReason> {
    let target = addrs[0];
    let bind: SocketAddr = if target.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = match UdpSocket::bind(bind).await {
        Ok(socket) => socket,
        Err(_) => return Some(CloseReason::NetworkError),
    };
    if let Err(e) = socket.connect(target).await {
        return Some(connect_error_reason(&e));
    }
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            data = inbound.recv() => {
                let data = data?;
                if socket.send(&data).await.is_err() {
                    return Some(CloseReason::NetworkError);
                }
            }
            received = socket.recv(&mut buf) => match received {
                Ok(n) => {
                    let payload = Bytes::copy_from_slice(&buf[..n]);
                    if out.send(Packet::Data { stream_id, payload }).await.is_err() {
                        return None;
                    }
                }
                Err(_) => return Some(CloseReason::NetworkError),
            },
        }
    }
}

fn connect_error_reason(e: &std::io::Error) -> CloseReason {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => CloseReason::Refused,
        std::io::ErrorKind::TimedOut => CloseReason::Timeout,
        _ => CloseReason::Unreachable,
    }
}

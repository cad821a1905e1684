//! External-source agent (C9): accepts annotation/perfetto client sockets
//! and multiplexes their byte streams onto the single IPC stream to the
//! shell.
//!
//! Socket references collapse to boxed `AsyncRead`/`AsyncWrite` trait
//! objects rather than a hand-rolled enum-with-visitor (§9): both the UDS
//! and TCP listener kinds expose the same tokio traits, so dynamic
//! dispatch over the trait is the idiomatic Rust reading of "operations
//! go through a visitor" and avoids a manual poll-delegation impl for a
//! two-variant enum.

use std::collections::{HashMap, VecDeque};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr as StdUnixSocketAddr, UnixListener as StdUnixListener};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::ipc::{ConnId, IpcSink, Message};

use super::{Agent, AgentError};

/// Bytes read per chunk (§4.6).
const RECV_CHUNK: usize = 4096;

/// Handshake tag the GPU-timeline variant prepends to every chunk it
/// forwards to the shell, followed by a little-endian u32 length (§4.6).
const ESTATE_TAG: &[u8] = b"ESTATE";

const ANNOTATION_DATA_NAME: &[u8] = b"streamline-annotate";
const ANNOTATION_PARENT_NAME: &[u8] = b"streamline-annotate-parent";
const GATORD_NAMESPACE: &[u8] = b"gatord_namespace";
const DATA_PORT: u16 = 8083;
const PARENT_PORT: u16 = 8082;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExternalVariant {
    /// Legacy annotation client protocol.
    Annotation,
    /// GPU-timeline (originally "perfetto") client protocol.
    Gpu,
}

impl ExternalVariant {
    fn new_conn(self, id: ConnId) -> Message {
        match self {
            ExternalVariant::Annotation => Message::AnnotationNewConn(id),
            ExternalVariant::Gpu => Message::PerfettoNewConn(id),
        }
    }

    fn recv_bytes(self, id: ConnId, payload: Vec<u8>) -> Message {
        match self {
            ExternalVariant::Annotation => Message::AnnotationRecvBytes(id, payload),
            ExternalVariant::Gpu => Message::PerfettoRecvBytes(id, payload),
        }
    }

    fn close_conn(self, id: ConnId) -> Message {
        match self {
            ExternalVariant::Annotation => Message::AnnotationCloseConn(id),
            ExternalVariant::Gpu => Message::PerfettoCloseConn(id),
        }
    }

    /// Frames one chunk read from the client socket before it's forwarded
    /// over IPC: a no-op for the annotation protocol, tag+length-prefixed
    /// for the GPU-timeline one.
    fn frame_chunk(self, chunk: &[u8]) -> Vec<u8> {
        match self {
            ExternalVariant::Annotation => chunk.to_vec(),
            ExternalVariant::Gpu => {
                let mut out = Vec::with_capacity(ESTATE_TAG.len() + 4 + chunk.len());
                out.extend_from_slice(ESTATE_TAG);
                out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
                out.extend_from_slice(chunk);
                out
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Parent,
    Data,
}

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

enum AnyListener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl AnyListener {
    async fn accept(&self) -> std::io::Result<(BoxedRead, BoxedWrite)> {
        match self {
            AnyListener::Unix(l) => {
                let (stream, _addr) = l.accept().await?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
            AnyListener::Tcp(l) => {
                let (stream, _addr) = l.accept().await?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
        }
    }
}

fn bind_abstract_uds(name: &[u8]) -> std::io::Result<UnixListener> {
    let addr = StdUnixSocketAddr::from_abstract_name(name)?;
    let std_listener = StdUnixListener::bind_addr(&addr)?;
    std_listener.set_nonblocking(true)?;
    UnixListener::from_std(std_listener)
}

async fn bind_tcp_loopback(port: u16) -> Vec<TcpListener> {
    let mut listeners = Vec::new();
    for addr in [format!("127.0.0.1:{port}"), format!("[::1]:{port}")] {
        match TcpListener::bind(&addr).await {
            Ok(l) => listeners.push(l),
            Err(e) => warn!(addr, error = %e, "failed to bind external-source TCP listener"),
        }
    }
    listeners
}

/// Binds every listener for `variant`: one abstract UDS per role plus
/// loopback IPv4/IPv6 TCP per role. Individual bind failures are logged
/// and skipped rather than fatal, since a sandboxed or already-bound
/// environment shouldn't take down the whole agent.
async fn bind_all(variant: ExternalVariant) -> Vec<(Role, AnyListener)> {
    let (data_name, parent_name): (&[u8], &[u8]) = match variant {
        ExternalVariant::Annotation => (ANNOTATION_DATA_NAME, ANNOTATION_PARENT_NAME),
        ExternalVariant::Gpu => (GATORD_NAMESPACE, ANNOTATION_PARENT_NAME),
    };

    let mut out = Vec::new();
    match bind_abstract_uds(data_name) {
        Ok(l) => out.push((Role::Data, AnyListener::Unix(l))),
        Err(e) => warn!(error = %e, "failed to bind abstract UDS data socket"),
    }
    match bind_abstract_uds(parent_name) {
        Ok(l) => out.push((Role::Parent, AnyListener::Unix(l))),
        Err(e) => warn!(error = %e, "failed to bind abstract UDS parent socket"),
    }
    for l in bind_tcp_loopback(DATA_PORT).await {
        out.push((Role::Data, AnyListener::Tcp(l)));
    }
    for l in bind_tcp_loopback(PARENT_PORT).await {
        out.push((Role::Parent, AnyListener::Tcp(l)));
    }
    out
}

enum WorkerCmd {
    Send(Vec<u8>),
    Close,
}

/// Sends `message` and reports whether the write actually completed; a
/// dropped oneshot or an I/O error both mean the channel is gone.
async fn send_or_note_closed(sink: &IpcSink, message: Message) -> bool {
    matches!(sink.send(&message).await, Ok(Ok(())))
}

/// Drives one accepted data connection until it closes, forwarding bytes
/// in both directions over IPC (§4.6).
async fn run_worker(
    id: ConnId,
    mut read_half: BoxedRead,
    write_half: BoxedWrite,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCmd>,
    peer_write: Option<Arc<Mutex<BoxedWrite>>>,
    sink: IpcSink,
    variant: ExternalVariant,
) {
    let write_half = Arc::new(Mutex::new(write_half));
    // Scratch buffer reused across reads so steady-state traffic doesn't
    // reallocate per chunk; only the owned copy handed to the IPC message
    // is a fresh allocation, since the message type takes ownership.
    let mut buf = vec![0u8; RECV_CHUNK];

    let close_reason = loop {
        tokio::select! {
            read_result = read_half.read(&mut buf) => {
                match read_result {
                    Ok(0) => break "eof",
                    Ok(n) => {
                        let payload = variant.frame_chunk(&buf[..n]);
                        if !send_or_note_closed(&sink, variant.recv_bytes(id, payload)).await {
                            break "ipc channel closed";
                        }
                    }
                    Err(e) => {
                        debug!(id, error = %e, "external-source read failed");
                        break "read error";
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WorkerCmd::Send(bytes)) => {
                        let mut w = write_half.lock().await;
                        if w.write_all(&bytes).await.is_err() {
                            break "short write";
                        }
                    }
                    Some(WorkerCmd::Close) | None => break "close requested",
                }
            }
        }
    };

    debug!(id, reason = close_reason, "external-source worker closing");
    if let Some(peer) = peer_write {
        let mut w = peer.lock().await;
        let _ = w.write_all(&[0u8]).await;
    }
    let _ = send_or_note_closed(&sink, variant.close_conn(id)).await;
}

struct Registry {
    workers: HashMap<ConnId, mpsc::UnboundedSender<WorkerCmd>>,
    pending_parents: VecDeque<Arc<Mutex<BoxedWrite>>>,
}

pub struct ExternalAgent {
    variant: ExternalVariant,
    next_id: Arc<AtomicU32>,
    registry: Arc<Mutex<Registry>>,
}

impl ExternalAgent {
    pub fn new(variant: ExternalVariant) -> Self {
        ExternalAgent {
            variant,
            next_id: Arc::new(AtomicU32::new(1)),
            registry: Arc::new(Mutex::new(Registry {
                workers: HashMap::new(),
                pending_parents: VecDeque::new(),
            })),
        }
    }

    async fn accept_connection(
        &self,
        role: Role,
        read_half: BoxedRead,
        write_half: BoxedWrite,
        sink: IpcSink,
    ) {
        let mut registry = self.registry.lock().await;
        match role {
            Role::Parent => {
                registry.pending_parents.push_back(Arc::new(Mutex::new(write_half)));
                drop(read_half); // parent sockets are signal-only; nothing is ever read from them.
            }
            Role::Data => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let peer = registry.pending_parents.pop_front();
                let (tx, rx) = mpsc::unbounded_channel();
                registry.workers.insert(id, tx);
                drop(registry);

                if !send_or_note_closed(&sink, self.variant.new_conn(id)).await {
                    return;
                }

                let registry = Arc::clone(&self.registry);
                let variant = self.variant;
                tokio::spawn(async move {
                    run_worker(id, read_half, write_half, rx, peer, sink, variant).await;
                    registry.lock().await.workers.remove(&id);
                });
            }
        }
    }
}

impl Agent for ExternalAgent {
    fn name(&self) -> &'static str {
        match self.variant {
            ExternalVariant::Annotation => "external-annotation",
            ExternalVariant::Gpu => "external-gpu",
        }
    }

    async fn on_start(&mut self, ipc: &IpcSink) -> Result<(), AgentError> {
        let listeners = bind_all(self.variant).await;
        let next_id = Arc::clone(&self.next_id);
        let registry = Arc::clone(&self.registry);
        let variant = self.variant;
        let sink = ipc.clone();

        for (role, listener) in listeners {
            let sink = sink.clone();
            let agent = ExternalAgent { variant, next_id: Arc::clone(&next_id), registry: Arc::clone(&registry) };
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((r, w)) => agent.accept_connection(role, r, w, sink.clone()).await,
                        Err(e) => {
                            warn!(error = %e, "external-source accept failed, listener stopping");
                            break;
                        }
                    }
                }
            });
        }

        Ok(())
    }

    async fn on_message(&mut self, message: Message, _ipc: &IpcSink) -> Result<(), AgentError> {
        match message {
            Message::AnnotationSendBytes(id, bytes) | Message::PerfettoSendBytes(id, bytes) => {
                let registry = self.registry.lock().await;
                if let Some(tx) = registry.workers.get(&id) {
                    let _ = tx.send(WorkerCmd::Send(bytes));
                }
                Ok(())
            }
            Message::AnnotationCloseConn(id) | Message::PerfettoCloseConn(id) => {
                let registry = self.registry.lock().await;
                if let Some(tx) = registry.workers.get(&id) {
                    let _ = tx.send(WorkerCmd::Close);
                }
                Ok(())
            }
            other => {
                warn!(agent = self.name(), ?other, "unexpected message in external-source agent");
                Ok(())
            }
        }
    }

    fn shutdown(&mut self) {
        if let Ok(mut registry) = self.registry.try_lock() {
            for (_, tx) in registry.workers.drain() {
                let _ = tx.send(WorkerCmd::Close);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gpu_variant_prepends_estate_tag_and_length() {
        let framed = ExternalVariant::Gpu.frame_chunk(b"hello");
        assert_eq!(&framed[..6], ESTATE_TAG);
        assert_eq!(u32::from_le_bytes(framed[6..10].try_into().unwrap()), 5);
        assert_eq!(&framed[10..], b"hello");
    }

    #[test]
    fn annotation_variant_passes_bytes_through() {
        assert_eq!(ExternalVariant::Annotation.frame_chunk(b"raw"), b"raw".to_vec());
    }

    #[tokio::test]
    async fn echo_round_trip_over_uds() {
        let (mut parent, child) = tokio::net::UnixStream::pair().unwrap();
        let (read_half, write_half) = child.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (ipc_read, ipc_write) = tokio::net::UnixStream::pair().unwrap();
        let sink = IpcSink::spawn(ipc_write);
        let source = crate::ipc::IpcSource::new(ipc_read);

        tokio::spawn(run_worker(
            7,
            Box::new(read_half),
            Box::new(write_half),
            rx,
            None,
            sink,
            ExternalVariant::Annotation,
        ));

        parent.write_all(b"ping").await.unwrap();

        let msg = source.recv().await.unwrap();
        assert_eq!(msg, Message::AnnotationRecvBytes(7, b"ping".to_vec()));

        tx.send(WorkerCmd::Close).unwrap();
        let close = source.recv().await.unwrap();
        assert_eq!(close, Message::AnnotationCloseConn(7));
    }
}

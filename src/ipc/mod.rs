//! Typed IPC channel (C3): length-delimited message framing over a
//! pipe/socket pair.
//!
//! Wire form per message is `[key][header?][length?][suffix?]` (§4.8).
//! The length field (when a suffix is present) is an 8-byte
//! little-endian size — this crate's resolution of the §9 open question
//! about host-order `size_t` vs. a frozen little-endian 32-bit field:
//! every target is a little-endian Linux host, so freezing the width at
//! 8 bytes keeps the original layout's range without depending on
//! native-endian reinterpretation. See `DESIGN.md`.

pub mod key;
pub mod message;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use key::MessageKey;
pub use message::{CaptureFailedReason, ClockAnchor, ConnId, CpuStateChange, Message};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("unknown IPC message key")]
    UnknownKey,
    #[error("short read on IPC channel")]
    ShortRead,
    #[error("a receive is already in progress on this channel")]
    OperationInProgress,
    #[error("IPC channel closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<message::DecodeError> for IpcError {
    fn from(e: message::DecodeError) -> Self {
        match e {
            message::DecodeError::UnknownKey => IpcError::UnknownKey,
            message::DecodeError::ShortRead => IpcError::ShortRead,
        }
    }
}

/// Fixed header size in bytes for each key, used by the streaming reader
/// to know how much to read before it can see a suffix length. Must stay
/// in lockstep with `message::encode`/`message::decode`.
fn header_len(key: MessageKey) -> usize {
    use MessageKey::*;
    match key {
        Start => 16,
        AnnotationNewConn | AnnotationCloseConn | PerfettoNewConn | PerfettoCloseConn => 4,
        AnnotationRecvBytes | AnnotationSendBytes | PerfettoRecvBytes | PerfettoSendBytes => 4,
        ApcFrameData => 4,
        CpuStateChange => 5,
        CaptureFailed => 1,
        Ready | Shutdown | MonitoredPids | PerfCaptureConfiguration | CaptureReady
        | ExecTargetApp | CaptureStarted => 0,
    }
}

/// A queued outbound message plus a completion handler invoked with the
/// write result, so the enqueuing caller is unblocked immediately (§4.8
/// "Sink").
struct QueueItem {
    bytes: Vec<u8>,
    completion: oneshot::Sender<std::io::Result<()>>,
}

/// Per-channel serialized send queue: messages are enqueued from any
/// task, drained in FIFO order by a single writer task and written as
/// one scatter-gather write so two messages never interleave.
#[derive(Clone)]
pub struct IpcSink {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl IpcSink {
    /// Spawns the writer task over `writer` and returns a handle to
    /// enqueue messages onto it.
    pub fn spawn<W>(mut writer: W) -> Self
    where
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem>();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let result = writer.write_all(&item.bytes).await;
                let _ = item.completion.send(result);
            }
        });
        IpcSink { tx }
    }

    /// Enqueues `message`, returning a future that resolves once the
    /// write completes (or the channel is torn down).
    pub fn send(&self, message: &Message) -> oneshot::Receiver<std::io::Result<()>> {
        let mut bytes = Vec::new();
        message.encode(&mut bytes);
        let (completion, rx) = oneshot::channel();
        // An error here means the writer task died; the caller observes
        // it as a dropped receiver, equivalent to EOF.
        let _ = self.tx.send(QueueItem { bytes, completion });
        rx
    }
}

/// Single-reader state machine: reads key, then header, then length,
/// then suffix, then hands back the decoded message. Concurrent
/// `recv` calls are rejected with `OperationInProgress` (§4.8 "Source").
pub struct IpcSource<R> {
    reader: Mutex<R>,
    busy: Arc<AtomicBool>,
}

impl<R> IpcSource<R>
where
    R: tokio::io::AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        IpcSource { reader: Mutex::new(reader), busy: Arc::new(AtomicBool::new(false)) }
    }

    /// Reads and decodes the next message. Unknown keys and short reads
    /// are fatal protocol errors (§7): the caller must close the channel
    /// and trigger agent shutdown.
    pub async fn recv(&self) -> Result<Message, IpcError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(IpcError::OperationInProgress);
        }
        let result = self.recv_inner().await;
        self.busy.store(false, Ordering::Release);
        result
    }

    async fn recv_inner(&self) -> Result<Message, IpcError> {
        let mut reader = self.reader.lock().await;

        let mut key_byte = [0u8; 1];
        reader.read_exact(&mut key_byte).await.map_err(map_eof)?;
        let key = MessageKey::from_byte(key_byte[0]).ok_or(IpcError::UnknownKey)?;

        let mut buf = vec![key_byte[0]];

        let hlen = header_len(key);
        if hlen > 0 {
            let mut header = vec![0u8; hlen];
            reader.read_exact(&mut header).await.map_err(map_eof)?;
            buf.extend_from_slice(&header);
        }

        let schema = key::schema_for(key);
        if schema.suffix != key::SuffixKind::None {
            let mut len_bytes = [0u8; 8];
            reader.read_exact(&mut len_bytes).await.map_err(map_eof)?;
            let len = u64::from_le_bytes(len_bytes) as usize;
            buf.extend_from_slice(&len_bytes);
            let mut suffix = vec![0u8; len];
            reader.read_exact(&mut suffix).await.map_err(map_eof)?;
            buf.extend_from_slice(&suffix);
        }

        let (message, consumed) = message::decode(&buf)?;
        debug_assert_eq!(consumed, buf.len());
        Ok(message)
    }
}

fn map_eof(e: std::io::Error) -> IpcError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        IpcError::Closed
    } else {
        IpcError::Io(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn socketpair_round_trip() {
        let (left, right) = tokio::net::UnixStream::pair().unwrap();
        let (left_read, left_write) = left.into_split();
        let (right_read, right_write) = right.into_split();

        let sink = IpcSink::spawn(left_write);
        let source = IpcSource::new(right_read);
        let _reply_sink = IpcSink::spawn(right_write);
        let _reply_source = IpcSource::new(left_read);

        let msg = Message::ApcFrameData { core: 2, bytes: vec![1, 2, 3, 4, 5] };
        let completion = sink.send(&msg);
        completion.await.unwrap().unwrap();

        let received = source.recv().await.unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn concurrent_recv_rejects_second_caller() {
        let (left, right) = tokio::net::UnixStream::pair().unwrap();
        let (_left_read, left_write) = left.into_split();
        let (right_read, _right_write) = right.into_split();

        let sink = IpcSink::spawn(left_write);
        let source = Arc::new(IpcSource::new(right_read));

        // No data in flight yet: both recvs race, one must observe "busy".
        let s1 = Arc::clone(&source);
        let s2 = Arc::clone(&source);
        let first = tokio::spawn(async move { s1.recv().await });
        // Give the first call a chance to set the busy flag before the
        // second one starts.
        tokio::task::yield_now().await;
        let second = s2.recv().await;
        assert!(matches!(second, Err(IpcError::OperationInProgress)));

        sink.send(&Message::Ready).await.unwrap().unwrap();
        let result = first.await.unwrap();
        assert_eq!(result.unwrap(), Message::Ready);
    }
}

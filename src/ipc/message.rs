//! Typed message variants (§3 "IPC message", §6 key set) and their wire
//! encode/decode.
//!
//! Each variant is a tagged sum over the closed key set; per-key layout
//! (header fields, suffix kind) is the static table in [`super::key`].
//! This is the "tagged variant plus static function table" translation
//! of the original's per-message C++ classes (§9).

use super::key::{schema_for, MessageKey, SuffixKind};

/// Why a capture failed before its first sample, reported by
/// `capture_failed` (§7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureFailedReason {
    CommandExecFailed = 0,
    WaitForCoresReadyFailed = 1,
}

impl CaptureFailedReason {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::CommandExecFailed),
            1 => Some(Self::WaitForCoresReadyFailed),
            _ => None,
        }
    }
}

/// One CPU hot-plug transition, reported by `cpu_state_change`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuStateChange {
    pub core: u32,
    pub online: bool,
}

/// The host's clock anchor pair, carried by `start` so the perf agent
/// can translate kernel sample timestamps to host wall-clock time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockAnchor {
    pub monotonic_ns: u64,
    pub monotonic_raw_ns: u64,
}

/// A connection-scoped message's id (annotation/perfetto worker id,
/// monotonically increasing per §4.6).
pub type ConnId = u32;

/// One fully-typed IPC message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Ready,
    Shutdown,
    Start(ClockAnchor),
    MonitoredPids(Vec<i32>),
    AnnotationNewConn(ConnId),
    AnnotationRecvBytes(ConnId, Vec<u8>),
    AnnotationSendBytes(ConnId, Vec<u8>),
    AnnotationCloseConn(ConnId),
    PerfettoNewConn(ConnId),
    PerfettoRecvBytes(ConnId, Vec<u8>),
    PerfettoSendBytes(ConnId, Vec<u8>),
    PerfettoCloseConn(ConnId),
    /// Suffix is an already-encoded `CaptureConfiguration` protobuf.
    PerfCaptureConfiguration(Vec<u8>),
    /// Suffix is the varint-packed list of monitored pids.
    CaptureReady(Vec<i32>),
    ApcFrameData { core: u32, bytes: Vec<u8> },
    ExecTargetApp,
    CpuStateChange(CpuStateChange),
    CaptureFailed(CaptureFailedReason),
    CaptureStarted,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        use Message::*;
        match self {
            Ready => MessageKey::Ready,
            Shutdown => MessageKey::Shutdown,
            Start(_) => MessageKey::Start,
            MonitoredPids(_) => MessageKey::MonitoredPids,
            AnnotationNewConn(_) => MessageKey::AnnotationNewConn,
            AnnotationRecvBytes(..) => MessageKey::AnnotationRecvBytes,
            AnnotationSendBytes(..) => MessageKey::AnnotationSendBytes,
            AnnotationCloseConn(_) => MessageKey::AnnotationCloseConn,
            PerfettoNewConn(_) => MessageKey::PerfettoNewConn,
            PerfettoRecvBytes(..) => MessageKey::PerfettoRecvBytes,
            PerfettoSendBytes(..) => MessageKey::PerfettoSendBytes,
            PerfettoCloseConn(_) => MessageKey::PerfettoCloseConn,
            PerfCaptureConfiguration(_) => MessageKey::PerfCaptureConfiguration,
            CaptureReady(_) => MessageKey::CaptureReady,
            ApcFrameData { .. } => MessageKey::ApcFrameData,
            ExecTargetApp => MessageKey::ExecTargetApp,
            CpuStateChange(_) => MessageKey::CpuStateChange,
            CaptureFailed(_) => MessageKey::CaptureFailed,
            CaptureStarted => MessageKey::CaptureStarted,
        }
    }

    /// Encodes `key, header?, length?, suffix?` into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let key = self.key();
        out.push(key as u8);

        let mut suffix: Option<Vec<u8>> = None;
        match self {
            Message::Ready
            | Message::Shutdown
            | Message::ExecTargetApp
            | Message::CaptureStarted => {}
            Message::Start(anchor) => {
                out.extend_from_slice(&anchor.monotonic_ns.to_le_bytes());
                out.extend_from_slice(&anchor.monotonic_raw_ns.to_le_bytes());
            }
            Message::MonitoredPids(pids) => suffix = Some(encode_pids(pids)),
            Message::AnnotationNewConn(id) | Message::PerfettoNewConn(id) => {
                out.extend_from_slice(&id.to_le_bytes());
            }
            Message::AnnotationCloseConn(id) | Message::PerfettoCloseConn(id) => {
                out.extend_from_slice(&id.to_le_bytes());
            }
            Message::AnnotationRecvBytes(id, bytes)
            | Message::AnnotationSendBytes(id, bytes)
            | Message::PerfettoRecvBytes(id, bytes)
            | Message::PerfettoSendBytes(id, bytes) => {
                out.extend_from_slice(&id.to_le_bytes());
                suffix = Some(bytes.clone());
            }
            Message::PerfCaptureConfiguration(proto) => suffix = Some(proto.clone()),
            Message::CaptureReady(pids) => suffix = Some(encode_pids(pids)),
            Message::ApcFrameData { core, bytes } => {
                out.extend_from_slice(&core.to_le_bytes());
                suffix = Some(bytes.clone());
            }
            Message::CpuStateChange(change) => {
                out.extend_from_slice(&change.core.to_le_bytes());
                out.push(change.online as u8);
            }
            Message::CaptureFailed(reason) => out.push(*reason as u8),
        }

        if let Some(suffix) = suffix {
            out.extend_from_slice(&(suffix.len() as u64).to_le_bytes());
            out.extend_from_slice(&suffix);
        }
    }
}

fn encode_pids(pids: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + pids.len() * 4);
    out.extend_from_slice(&(pids.len() as u32).to_le_bytes());
    for p in pids {
        out.extend_from_slice(&p.to_le_bytes());
    }
    out
}

fn decode_pids(buf: &[u8]) -> Result<Vec<i32>, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::ShortRead);
    }
    let n = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut pids = Vec::with_capacity(n);
    let mut i = 4;
    for _ in 0..n {
        if buf.len() < i + 4 {
            return Err(DecodeError::ShortRead);
        }
        pids.push(i32::from_le_bytes(buf[i..i + 4].try_into().unwrap()));
        i += 4;
    }
    Ok(pids)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown IPC message key")]
    UnknownKey,
    #[error("short read while decoding an IPC message")]
    ShortRead,
}

/// Decodes one message from a fully-buffered `key + header + length? +
/// suffix?` byte slice. Returns the message and the number of bytes
/// consumed.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::ShortRead);
    }
    let key = MessageKey::from_byte(buf[0]).ok_or(DecodeError::UnknownKey)?;
    let schema = schema_for(key);
    let mut i = 1;

    macro_rules! take {
        ($n:expr) => {{
            if buf.len() < i + $n {
                return Err(DecodeError::ShortRead);
            }
            let slice = &buf[i..i + $n];
            i += $n;
            slice
        }};
    }
    macro_rules! take_u32 {
        () => {
            u32::from_le_bytes(take!(4).try_into().unwrap())
        };
    }
    macro_rules! take_u64 {
        () => {
            u64::from_le_bytes(take!(8).try_into().unwrap())
        };
    }

    use MessageKey::*;
    let header_id = if schema.has_header
        && matches!(
            key,
            AnnotationNewConn
                | AnnotationRecvBytes
                | AnnotationSendBytes
                | AnnotationCloseConn
                | PerfettoNewConn
                | PerfettoRecvBytes
                | PerfettoSendBytes
                | PerfettoCloseConn
                | ApcFrameData
        ) {
        Some(take_u32!())
    } else {
        None
    };

    let start_anchor = if key == Start {
        Some(ClockAnchor { monotonic_ns: take_u64!(), monotonic_raw_ns: take_u64!() })
    } else {
        None
    };

    let cpu_state = if key == CpuStateChange {
        let core = take_u32!();
        let online = take!(1)[0] != 0;
        Some(CpuStateChange { core, online })
    } else {
        None
    };

    let capture_failed_reason = if key == CaptureFailed {
        let b = take!(1)[0];
        Some(CaptureFailedReason::from_byte(b).ok_or(DecodeError::UnknownKey)?)
    } else {
        None
    };

    let suffix: Option<&[u8]> = match schema.suffix {
        SuffixKind::None => None,
        SuffixKind::Bytes | SuffixKind::Protobuf => {
            let len = take_u64!() as usize;
            Some(take!(len))
        }
    };

    let message = match key {
        Ready => Message::Ready,
        Shutdown => Message::Shutdown,
        Start => Message::Start(start_anchor.unwrap()),
        MonitoredPids => Message::MonitoredPids(decode_pids(suffix.unwrap())?),
        AnnotationNewConn => Message::AnnotationNewConn(header_id.unwrap()),
        AnnotationRecvBytes => {
            Message::AnnotationRecvBytes(header_id.unwrap(), suffix.unwrap().to_vec())
        }
        AnnotationSendBytes => {
            Message::AnnotationSendBytes(header_id.unwrap(), suffix.unwrap().to_vec())
        }
        AnnotationCloseConn => Message::AnnotationCloseConn(header_id.unwrap()),
        PerfettoNewConn => Message::PerfettoNewConn(header_id.unwrap()),
        PerfettoRecvBytes => {
            Message::PerfettoRecvBytes(header_id.unwrap(), suffix.unwrap().to_vec())
        }
        PerfettoSendBytes => {
            Message::PerfettoSendBytes(header_id.unwrap(), suffix.unwrap().to_vec())
        }
        PerfettoCloseConn => Message::PerfettoCloseConn(header_id.unwrap()),
        PerfCaptureConfiguration => Message::PerfCaptureConfiguration(suffix.unwrap().to_vec()),
        CaptureReady => Message::CaptureReady(decode_pids(suffix.unwrap())?),
        ApcFrameData => {
            Message::ApcFrameData { core: header_id.unwrap(), bytes: suffix.unwrap().to_vec() }
        }
        ExecTargetApp => Message::ExecTargetApp,
        CpuStateChange => Message::CpuStateChange(cpu_state.unwrap()),
        CaptureFailed => Message::CaptureFailed(capture_failed_reason.unwrap()),
        CaptureStarted => Message::CaptureStarted,
    };

    Ok((message, i))
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(m: Message) {
        let mut bytes = vec![];
        m.encode(&mut bytes);
        let (decoded, consumed) = decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, m);
    }

    #[test]
    fn every_variant_round_trips() {
        round_trip(Message::Ready);
        round_trip(Message::Shutdown);
        round_trip(Message::Start(ClockAnchor { monotonic_ns: 1, monotonic_raw_ns: 2 }));
        round_trip(Message::MonitoredPids(vec![1, 2, 3]));
        round_trip(Message::MonitoredPids(vec![]));
        round_trip(Message::AnnotationNewConn(7));
        round_trip(Message::AnnotationRecvBytes(7, vec![1, 2, 3]));
        round_trip(Message::AnnotationSendBytes(7, vec![]));
        round_trip(Message::AnnotationCloseConn(7));
        round_trip(Message::PerfettoNewConn(1));
        round_trip(Message::PerfettoRecvBytes(1, b"ESTATE".to_vec()));
        round_trip(Message::PerfettoSendBytes(1, vec![9; 500]));
        round_trip(Message::PerfettoCloseConn(1));
        round_trip(Message::PerfCaptureConfiguration(vec![1, 2, 3, 4]));
        round_trip(Message::CaptureReady(vec![100, 200]));
        round_trip(Message::ApcFrameData { core: 3, bytes: vec![5; 64] });
        round_trip(Message::ExecTargetApp);
        round_trip(Message::CpuStateChange(CpuStateChange { core: 2, online: true }));
        round_trip(Message::CpuStateChange(CpuStateChange { core: 2, online: false }));
        round_trip(Message::CaptureFailed(CaptureFailedReason::CommandExecFailed));
        round_trip(Message::CaptureStarted);
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert_eq!(decode(&[0xFF]), Err(DecodeError::UnknownKey));
    }

    #[test]
    fn short_read_is_rejected() {
        assert_eq!(decode(&[MessageKey::Start as u8, 1, 2, 3]), Err(DecodeError::ShortRead));
    }
}

//! The closed set of IPC message keys (§6) and their static header/suffix
//! schema.

/// One byte identifying a message's shape on the wire. The discriminant
/// values are this crate's own numbering; they don't need to match any
/// external protocol since both ends of the channel are always built
/// from this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKey {
    Ready = 0,
    Shutdown = 1,
    Start = 2,
    MonitoredPids = 3,
    AnnotationNewConn = 4,
    AnnotationRecvBytes = 5,
    AnnotationSendBytes = 6,
    AnnotationCloseConn = 7,
    PerfettoNewConn = 8,
    PerfettoRecvBytes = 9,
    PerfettoSendBytes = 10,
    PerfettoCloseConn = 11,
    PerfCaptureConfiguration = 12,
    CaptureReady = 13,
    ApcFrameData = 14,
    ExecTargetApp = 15,
    CpuStateChange = 16,
    CaptureFailed = 17,
    CaptureStarted = 18,
}

impl MessageKey {
    pub const ALL: [MessageKey; 19] = [
        MessageKey::Ready,
        MessageKey::Shutdown,
        MessageKey::Start,
        MessageKey::MonitoredPids,
        MessageKey::AnnotationNewConn,
        MessageKey::AnnotationRecvBytes,
        MessageKey::AnnotationSendBytes,
        MessageKey::AnnotationCloseConn,
        MessageKey::PerfettoNewConn,
        MessageKey::PerfettoRecvBytes,
        MessageKey::PerfettoSendBytes,
        MessageKey::PerfettoCloseConn,
        MessageKey::PerfCaptureConfiguration,
        MessageKey::CaptureReady,
        MessageKey::ApcFrameData,
        MessageKey::ExecTargetApp,
        MessageKey::CpuStateChange,
        MessageKey::CaptureFailed,
        MessageKey::CaptureStarted,
    ];

    pub fn from_byte(b: u8) -> Option<MessageKey> {
        Self::ALL.into_iter().find(|k| *k as u8 == b)
    }
}

/// Static per-key wire shape: whether the key carries a fixed header,
/// and what kind of variable-length suffix (if any) follows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuffixKind {
    None,
    Bytes,
    Protobuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schema {
    pub has_header: bool,
    pub suffix: SuffixKind,
}

pub fn schema_for(key: MessageKey) -> Schema {
    use MessageKey::*;
    use SuffixKind::*;
    match key {
        Ready => Schema { has_header: false, suffix: None },
        Shutdown => Schema { has_header: false, suffix: None },
        Start => Schema { has_header: true, suffix: SuffixKind::None },
        MonitoredPids => Schema { has_header: false, suffix: Bytes },
        AnnotationNewConn => Schema { has_header: true, suffix: SuffixKind::None },
        AnnotationRecvBytes => Schema { has_header: true, suffix: Bytes },
        AnnotationSendBytes => Schema { has_header: true, suffix: Bytes },
        AnnotationCloseConn => Schema { has_header: true, suffix: SuffixKind::None },
        PerfettoNewConn => Schema { has_header: true, suffix: SuffixKind::None },
        PerfettoRecvBytes => Schema { has_header: true, suffix: Bytes },
        PerfettoSendBytes => Schema { has_header: true, suffix: Bytes },
        PerfettoCloseConn => Schema { has_header: true, suffix: SuffixKind::None },
        PerfCaptureConfiguration => Schema { has_header: false, suffix: Protobuf },
        CaptureReady => Schema { has_header: false, suffix: Bytes },
        ApcFrameData => Schema { has_header: true, suffix: Bytes },
        ExecTargetApp => Schema { has_header: false, suffix: SuffixKind::None },
        CpuStateChange => Schema { has_header: true, suffix: SuffixKind::None },
        CaptureFailed => Schema { has_header: true, suffix: SuffixKind::None },
        CaptureStarted => Schema { has_header: false, suffix: SuffixKind::None },
    }
}

/// Frame types that can be produced into a ring buffer.
///
/// Mirrors the closed set of APC frame kinds; `Unknown` also doubles as
/// the "untyped" marker for a buffer that does not pin a single frame
/// type (the caller manages frame boundaries by hand in that case).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Unknown = 0,
    Summary = 1,
    BlockCounter = 2,
    PerfAttrs = 3,
    Perf = 4,
    Name = 5,
    SchedTrace = 6,
    ActivityTrace = 7,
    Counter = 8,
}

impl FrameType {
    /// True iff frames of this type carry a per-core varint header.
    pub fn sends_cpu(self) -> bool {
        matches!(
            self,
            FrameType::BlockCounter
                | FrameType::PerfAttrs
                | FrameType::Perf
                | FrameType::Name
                | FrameType::SchedTrace
        )
    }
}

/// Size, in bytes, below which a commit is considered to carry no
/// messages (just the frame type byte and, for per-core frames, the
/// core-index varint) and can be silently elided.
pub const FRAME_HEADER_SIZE: usize = 3;

/// Size of the length field written ahead of every frame's payload.
pub const FRAME_LENGTH_FIELD_SIZE: usize = 4;

//! Single-producer/single-consumer frame ring buffer (C1) and its varint
//! payload codec (C2).
//!
//! A ring owns a power-of-two byte array. The producer reserves a frame
//! header (a 4-byte length placeholder plus, for typed/per-core frames,
//! the frame-type byte and a varint core index), appends zero or more
//! messages, then commits: the placeholder is back-filled with the
//! payload length and the commit index is advanced. The consumer only
//! ever sees committed bytes.

pub mod frame;
pub mod pack;

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub use frame::FrameType;
use frame::{FRAME_HEADER_SIZE, FRAME_LENGTH_FIELD_SIZE};

/// Bytes of slack kept free while the buffer is reporting "available".
const AVAILABLE_PAD: usize = 200;
/// Bytes of slack required to flip back from "overflow" to "available"
/// (hysteresis, prevents repeated overflow signalling).
const OVERFLOW_PAD: usize = 2000;

struct Shared {
    data: Box<[UnsafeCell<u8>]>,
    mask: usize,
    read: AtomicUsize,
    write: AtomicUsize,
    commit: AtomicUsize,
    done: AtomicBool,
    buf_type: FrameType,
}

// SAFETY: `data` is split at any instant into a producer-owned region
// `[commit, write)` and a consumer-owned region `[read, commit)`
// (mod capacity); the two never overlap because of the invariants
// documented on `RingProducer`/`RingConsumer`.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

impl Shared {
    #[inline]
    fn at(&self, pos: usize) -> *mut u8 {
        self.data[pos & self.mask].get()
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// A token returned by `reserve_frame`, used to commit or abort the frame
/// that was just opened.
pub struct FrameToken {
    /// Write position before the frame header was reserved; rewound to on abort.
    start: usize,
    ty: FrameType,
    core: u32,
}

/// Sink the consumer hands committed bytes to. `response_type` is `None`
/// in local-capture mode.
pub trait FrameSink {
    fn send(&mut self, bytes: &[u8], response_type: Option<u8>);
}

/// Creates a ring buffer of the given power-of-two `capacity`, returning
/// split producer/consumer handles. Equivalent to
/// [`channel_for_core`] with core 0 — for buffers whose frame type
/// doesn't send a per-core header (or where the core value genuinely
/// doesn't matter), there's no reason to prefer one over the other.
///
/// `buf_type` pins the frame type of every frame produced into this
/// buffer; pass `FrameType::Unknown` for an untyped buffer whose frames
/// the caller opens and closes explicitly.
pub fn channel(capacity: usize, buf_type: FrameType) -> (RingProducer, RingConsumer) {
    channel_for_core(capacity, buf_type, 0)
}

/// As [`channel`], but pins the per-core header of the buffer's
/// auto-opened frames to `core` for the buffer's whole lifetime. Every
/// ring buffer in this crate is dedicated to a single core (one per
/// entry in a `HashMap<u32, _>` keyed by core), so the typed buffer's
/// self-managed frame-reopen-on-commit (§4.1) always carries the right
/// header without the producer ever needing to call `reserve_frame`
/// itself — that call is for callers of an *untyped* buffer, which has
/// no auto-reopen and must open every frame explicitly.
pub fn channel_for_core(capacity: usize, buf_type: FrameType, core: u32) -> (RingProducer, RingConsumer) {
    assert!(capacity.is_power_of_two(), "ring capacity must be power of two");

    let data = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();
    let shared = Arc::new(Shared {
        data,
        mask: capacity - 1,
        read: AtomicUsize::new(0),
        write: AtomicUsize::new(0),
        commit: AtomicUsize::new(0),
        done: AtomicBool::new(false),
        buf_type,
    });

    let mut producer = RingProducer {
        shared: Arc::clone(&shared),
        write_pos: 0,
        available: true,
        last_frame: None,
        live_rate: None,
        next_commit_time: 0,
    };

    // A typed buffer always has a frame open, even before the first
    // explicit `reserve_frame` call.
    if buf_type != FrameType::Unknown {
        producer.open_frame(buf_type, core);
    }

    (producer, RingConsumer { shared })
}

pub struct RingProducer {
    shared: Arc<Shared>,
    /// Producer-owned write cursor; mirrored into `shared.write` on every
    /// append so the consumer can observe progress, but only the
    /// producer ever advances it.
    write_pos: usize,
    available: bool,
    last_frame: Option<(FrameType, u32)>,
    live_rate: Option<u64>,
    next_commit_time: u64,
}

pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Configures the live-rate commit deadline (see `check`). `rate` is
    /// in the same time unit as the `time` argument to `check`/`commit`.
    pub fn set_live_rate(&mut self, rate: Option<u64>) {
        self.next_commit_time = rate.unwrap_or(0);
        self.live_rate = rate;
    }

    fn commit_pos(&self) -> usize {
        self.shared.commit.load(Ordering::Acquire)
    }

    fn read_pos(&self) -> usize {
        self.shared.read.load(Ordering::Acquire)
    }

    fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Relaxed)
    }

    /// `N - filled`, not yet adjusted for hysteresis padding.
    fn filled(&self) -> usize {
        self.write_pos.wrapping_sub(self.read_pos()) & self.shared.mask
    }

    /// Free space, minus the 200/2000-byte hysteresis pad.
    pub fn bytes_available(&self) -> isize {
        let cap = self.shared.capacity() as isize;
        let remaining = cap - self.filled() as isize;
        let pad = if self.available { AVAILABLE_PAD } else { OVERFLOW_PAD } as isize;
        remaining - pad
    }

    /// Predicate: is there room for `n` more bytes? Updates the
    /// available/overflow hysteresis flag as a side effect.
    pub fn check_space(&mut self, n: usize) -> bool {
        self.available = self.bytes_available() >= n as isize;
        self.available
    }

    #[inline]
    fn push_byte(&mut self, b: u8) {
        unsafe { *self.shared.at(self.write_pos) = b };
        self.write_pos = self.write_pos.wrapping_add(1);
    }

    fn open_frame(&mut self, ty: FrameType, core: u32) {
        // Reserve the 4-byte length placeholder.
        for _ in 0..FRAME_LENGTH_FIELD_SIZE {
            self.push_byte(0);
        }
        self.push_byte(ty as u8);
        if ty.sends_cpu() {
            pack::encode_i32(core as i32, |b| self.push_byte(b));
        }
        self.last_frame = Some((ty, core));
        self.shared.write.store(self.write_pos, Ordering::Release);
    }

    /// Reserves a frame header. Returns `None` (and reserves nothing) if
    /// the buffer is typed and `ty` does not match its pinned type.
    pub fn reserve_frame(&mut self, ty: FrameType, core: u32) -> Option<FrameToken> {
        if self.shared.buf_type != FrameType::Unknown && self.shared.buf_type != ty {
            return None;
        }
        let start = self.write_pos;
        self.open_frame(ty, core);
        Some(FrameToken { start, ty, core })
    }

    pub fn pack_i32(&mut self, x: i32) {
        pack::encode_i32(x, |b| self.push_byte(b));
        self.shared.write.store(self.write_pos, Ordering::Release);
    }

    pub fn pack_i64(&mut self, x: i64) {
        pack::encode_i64(x, |b| self.push_byte(b));
        self.shared.write.store(self.write_pos, Ordering::Release);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push_byte(b);
        }
        self.shared.write.store(self.write_pos, Ordering::Release);
    }

    pub fn write_string(&mut self, s: &str) {
        self.pack_i32(s.len() as i32);
        self.write_bytes(s.as_bytes());
    }

    /// Backfills the pending frame's length and advances the commit
    /// index, reopening the next frame if the buffer is typed. A no-op
    /// if the pending payload is empty (frame header only) and
    /// `force` is false and the buffer isn't done.
    pub fn commit(&mut self, time: u64, force: bool) {
        let commit_pos = self.commit_pos();
        let raw_len = self.write_pos.wrapping_sub(commit_pos) & self.shared.mask;
        let payload_len = raw_len.saturating_sub(FRAME_LENGTH_FIELD_SIZE);

        if !force && !self.is_done() && payload_len <= FRAME_HEADER_SIZE {
            return;
        }

        let len_bytes = (payload_len as u32).to_le_bytes();
        for (i, b) in len_bytes.iter().enumerate() {
            unsafe { *self.shared.at(commit_pos.wrapping_add(i)) = *b };
        }

        self.shared.commit.store(self.write_pos, Ordering::Release);

        if let Some(rate) = self.live_rate {
            if rate > 0 {
                while time > self.next_commit_time {
                    self.next_commit_time += rate;
                }
            }
        }

        if !self.is_done() {
            if let Some((ty, core)) = self.last_frame {
                if ty != FrameType::Unknown {
                    self.open_frame(ty, core);
                }
            }
        }
    }

    /// Commits if either at least 3/4 of capacity is pending, or the
    /// live-rate tick deadline has been reached.
    pub fn check(&mut self, time: u64) {
        let filled = self.write_pos.wrapping_sub(self.commit_pos()) & self.shared.mask;
        let due = self.live_rate.map(|r| r > 0 && time >= self.next_commit_time).unwrap_or(false);
        if filled >= (self.shared.capacity() * 3) / 4 || due {
            self.commit(time, false);
        }
    }

    /// Commits (typed buffers) or checks (untyped buffers) the frame
    /// opened by `token`, or rewinds the write cursor if `abort`.
    pub fn end_frame(&mut self, time: u64, abort: bool, token: FrameToken) {
        if abort {
            self.write_pos = token.start;
            self.shared.write.store(self.write_pos, Ordering::Release);
            return;
        }
        if token.ty != FrameType::Unknown {
            self.commit(time, false);
        } else {
            self.check(time);
        }
    }

    /// Marks the buffer done: no further frames are opened after the
    /// next commit, and the consumer can observe end-of-stream once it
    /// has drained everything.
    pub fn set_done(&mut self) {
        self.shared.done.store(true, Ordering::Release);
    }
}

impl RingConsumer {
    /// True once the producer is done and every byte has been drained.
    pub fn is_done(&self) -> bool {
        let r = self.shared.read.load(Ordering::Acquire);
        let c = self.shared.commit.load(Ordering::Acquire);
        let w = self.shared.write.load(Ordering::Acquire);
        self.shared.done.load(Ordering::Acquire) && r == c && c == w
    }

    /// Emits every committed byte to `sink` as one or two contiguous
    /// slices (the second only if the committed region wraps), then
    /// advances the read cursor.
    pub fn write_to_sink(&mut self, sink: &mut impl FrameSink, response_type: Option<u8>) {
        let commit_pos = self.shared.commit.load(Ordering::Acquire);
        let read_pos = self.shared.read.load(Ordering::Relaxed);
        if commit_pos == read_pos {
            return;
        }

        let mask = self.shared.mask;
        let cap = self.shared.capacity();
        let r = read_pos & mask;
        let c = commit_pos & mask;

        if c > r {
            let slice = unsafe { std::slice::from_raw_parts(self.shared.at(r), c - r) };
            sink.send(slice, response_type);
        } else {
            let len1 = cap - r;
            let slice1 = unsafe { std::slice::from_raw_parts(self.shared.at(r), len1) };
            sink.send(slice1, response_type);
            if c > 0 {
                let slice2 = unsafe { std::slice::from_raw_parts(self.shared.at(0), c) };
                sink.send(slice2, response_type);
            }
        }

        self.shared.read.store(commit_pos, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct VecSink(Vec<u8>);
    impl FrameSink for VecSink {
        fn send(&mut self, bytes: &[u8], _response_type: Option<u8>) {
            self.0.extend_from_slice(bytes);
        }
    }

    #[test]
    fn string_round_trip_across_commits() {
        let (mut p, mut c) = channel(1024, FrameType::Name);
        let strs = ["hello", "", "world-of-perf-counters", "x"];
        for s in strs {
            p.write_string(s);
            p.commit(0, false);
        }
        let mut out = VecSink(vec![]);
        while !c.is_done() {
            c.write_to_sink(&mut out, None);
            break;
        }
        // Decode each committed frame: 4-byte len, 1-byte type, core varint
        // (Name sends the core header), then a varint-prefixed string.
        let mut decoded = vec![];
        let mut i = 0;
        let buf = &out.0;
        while i < buf.len() {
            let len = u32::from_le_bytes(buf[i..i + 4].try_into().unwrap()) as usize;
            i += 4;
            let frame_end = i + len;
            let _ty = buf[i];
            let mut cursor = i + 1;
            let mut read_byte = || {
                let b = buf[cursor];
                cursor += 1;
                b
            };
            let _core = pack::decode_i32(&mut read_byte);
            let slen = pack::decode_i32(&mut read_byte) as usize;
            decoded.push(String::from_utf8(buf[cursor..cursor + slen].to_vec()).unwrap());
            i = frame_end;
        }
        assert_eq!(decoded, strs.to_vec());
    }

    #[test]
    fn empty_commit_is_elided() {
        let (mut p, c) = channel(1024, FrameType::Perf);
        let before = (p.read_pos(), p.commit_pos(), p.write_pos);
        p.commit(100, false);
        let after = (p.read_pos(), p.commit_pos(), p.write_pos);
        assert_eq!(before, after);
        assert!(!c.is_done());
    }

    #[test]
    fn positions_stay_ordered() {
        let (mut p, c) = channel(256, FrameType::Counter);
        for i in 0..20 {
            p.pack_i32(i);
            p.check(0);
        }
        p.commit(0, true);
        let r = p.read_pos();
        let w = p.write_pos;
        let filled = w.wrapping_sub(r) & p.shared.mask;
        assert!(filled <= p.shared.capacity());
        drop(c);
    }

    #[test]
    fn overflow_hysteresis() {
        let (mut p, _c) = channel(4096, FrameType::Unknown);
        let cap = p.shared.capacity();

        // Drive the buffer to exactly the point where check_space first
        // reports false: free (raw) space of 200 bytes leaves
        // bytesAvailable() == 0 once the 200-byte "available" pad is
        // subtracted.
        p.write_pos = cap - 200;
        p.shared.write.store(p.write_pos, Ordering::Release);
        assert!(!p.check_space(1), "free=200 minus the 200 pad leaves no room");

        // Once unavailable, the pad grows to 2000: draining 400 bytes
        // (free goes 200 -> 600) isn't enough to clear it.
        p.shared.read.store(400, Ordering::Release);
        assert!(!p.check_space(1), "free=600 is still short of the 2000-byte reopen threshold");

        // Draining another 1600 bytes (free goes 600 -> 2200) clears it.
        p.shared.read.store(2000, Ordering::Release);
        assert!(p.check_space(1), "free=2200 clears the hysteresis pad");
    }
}

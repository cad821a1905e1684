//! Perf activator (C5): the only place in the crate that issues the
//! kernel counter syscall.
//!
//! Builds on the teacher's [`crate::ffi::syscall`] wrappers and
//! [`crate::config::attr`] builder, generalized from a single [`Opts`]
//! to the per-binding [`crate::capture_config::PerfEventDefinition`]
//! plan entry. Kernel-capability flags are carried in from the capture
//! configuration rather than probed here.

use std::fs::File;
use std::io::{Error, ErrorKind};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nix::fcntl::{fcntl, FdFlag, F_SETFD};
use tracing::warn;

use crate::capture_config::{KernelCapabilities, PerfEventDefinition};
use crate::config::attr::from as build_attr;
use crate::config::{Clock, ExtraRecord, Opts, Priv, SampleOn};
use crate::event::EventConfig;
use crate::ffi::syscall::{ioctl, ioctl_arg, ioctl_argp, mmap, munmap, perf_event_open, read};
use crate::ffi::{bindings as b, Attr};

/// Whether a newly-created event should start disabled, armed to enable
/// itself at the target's next `execve`, or enabled immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnableState {
    Disabled,
    EnableOnExec,
    Enabled,
}

/// Outcome of a syscall issued by the activator, mapped from errno per
/// §4.2: `ENODEV` -> offline, `ESRCH` -> invalid_pid, `ENOENT` ->
/// invalid_device, anything else -> fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivatorStatus {
    Success,
    Offline,
    InvalidPid,
    InvalidDevice,
    Fatal,
}

fn map_errno(err: &Error) -> ActivatorStatus {
    match err.raw_os_error() {
        Some(e) if e == libc::ENODEV => ActivatorStatus::Offline,
        Some(e) if e == libc::ESRCH => ActivatorStatus::InvalidPid,
        Some(e) if e == libc::ENOENT => ActivatorStatus::InvalidDevice,
        _ => ActivatorStatus::Fatal,
    }
}

/// Result of [`create_event`].
pub struct CreateResult {
    pub status: ActivatorStatus,
    pub fd: Option<File>,
    /// Only populated when the kernel supports `PERF_EVENT_IOC_ID`;
    /// otherwise the caller must follow up with [`read_legacy_ids`].
    pub perf_id: Option<u64>,
}

/// Builds the kernel `perf_event_attr` for one plan entry, folding in
/// the capability-gated fields the original probes once at startup.
fn build_event_attr(
    def: &PerfEventDefinition,
    caps: &KernelCapabilities,
    enable_state: EnableState,
    sample_period: u64,
    exclude_kernel: bool,
    is_system_wide: bool,
) -> std::io::Result<Attr> {
    let event_cfg = EventConfig {
        ty: def.event_type,
        config: def.config,
        config1: def.config1,
        config2: def.config2,
        config3: 0,
        bp_type: 0,
    };

    let mut opts = Opts {
        exclude: Priv { kernel: exclude_kernel, ..Default::default() },
        enable: matches!(enable_state, EnableState::Enabled),
        sample_on: if def.sample_period > 0 || sample_period > 0 {
            SampleOn::Count(if def.sample_period > 0 { def.sample_period } else { sample_period })
        } else {
            SampleOn::Count(0)
        },
        extra_record: ExtraRecord {
            comm: caps.has_attr_comm_exec,
            ctx_switch: caps.has_attr_context_switch,
            ..Default::default()
        },
        on_execve: matches!(enable_state, EnableState::EnableOnExec)
            .then_some(crate::config::OnExecve::Enable),
        timer: caps.has_attr_clockid_support.then_some(Clock::Monotonic),
        ..Default::default()
    };
    // A system-wide header/dummy event has no natural "enable on exec"
    // target; fall back to disabled and let the manager enable it by hand.
    if is_system_wide && matches!(enable_state, EnableState::EnableOnExec) {
        opts.on_execve = None;
        opts.enable = false;
    }

    let mut attr = build_attr(event_cfg, &opts)?;
    if caps.has_attr_mmap2 {
        attr.set_mmap2(1);
    }
    Ok(attr)
}

/// Opens one kernel counter. `group_fd` is `-1` for a solitary event or
/// group leader, or the leader's fd for a follower.
pub fn create_event(
    def: &PerfEventDefinition,
    caps: &KernelCapabilities,
    enable_state: EnableState,
    core: i32,
    pid: i32,
    group_fd: i32,
    sample_period: u64,
    exclude_kernel: bool,
    is_system_wide: bool,
) -> CreateResult {
    let attr = match build_event_attr(
        def,
        caps,
        enable_state,
        sample_period,
        exclude_kernel,
        is_system_wide,
    ) {
        Ok(attr) => attr,
        Err(_) => {
            return CreateResult { status: ActivatorStatus::Fatal, fd: None, perf_id: None };
        }
    };

    // `has_fd_cloexec` records whether the kernel accepts PERF_FLAG_FD_CLOEXEC
    // at open time, but cloexec is applied via `fcntl` post-open either way,
    // matching the original's `FileDescriptor`/`PerfEventGroup` handling.
    let fd = match perf_event_open(&attr, pid, core, group_fd, 0) {
        Ok(fd) => fd,
        Err(e) => {
            return CreateResult { status: map_errno(&e), fd: None, perf_id: None };
        }
    };

    let _ = fcntl(fd.as_raw_fd(), F_SETFD(FdFlag::FD_CLOEXEC));

    let perf_id = if caps.has_ioctl_read_id {
        let mut id: u64 = 0;
        match ioctl_argp(&fd, b::PERF_IOC_OP_ID as _, &mut id) {
            Ok(_) => Some(id),
            Err(_) => None,
        }
    } else {
        None
    };

    CreateResult { status: ActivatorStatus::Success, fd: Some(fd), perf_id }
}

/// Result of [`read_legacy_ids`].
pub struct LegacyIdsResult {
    pub status: ActivatorStatus,
    pub ids: Vec<u64>,
}

/// Reads event ids off a group leader via `read(2)` on kernels without
/// `PERF_EVENT_IOC_ID`. `read_format` must include `PERF_FORMAT_ID` and
/// (when reading a group of more than one event) `PERF_FORMAT_GROUP`.
pub fn read_legacy_ids(read_format: u64, leader_fd: &File, n: usize) -> LegacyIdsResult {
    let grouped = read_format & b::PERF_FORMAT_GROUP as u64 != 0;
    // Layout: [nr?] value id [value id ...], each field 8 bytes; `nr` is
    // present only in grouped reads and is itself 8 bytes.
    let header_words = if grouped { 1 } else { 0 };
    let words_per_entry = 2; // value, id
    let total_words = header_words + words_per_entry * n;
    let mut buf = vec![0u8; total_words * 8];

    match read(leader_fd, &mut buf) {
        Ok(_) => {
            let words: Vec<u64> = buf
                .chunks_exact(8)
                .map(|c| u64::from_ne_bytes(c.try_into().unwrap()))
                .collect();
            let start = header_words;
            let ids = (0..n).map(|i| words[start + i * words_per_entry + 1]).collect();
            LegacyIdsResult { status: ActivatorStatus::Success, ids }
        }
        Err(e) => LegacyIdsResult { status: map_errno(&e), ids: vec![] },
    }
}

/// A reference-counted mmap region; shared by the producer (the per-core
/// consumer thread draining kernel records) and anything else holding a
/// clone (e.g. a redirected child event).
#[derive(Clone)]
pub struct MmapHandle(Arc<MmapRegion>);

struct MmapRegion {
    ptr: *mut (),
    len: usize,
}

// SAFETY: the region is read through atomics (`data_head`/`data_tail`)
// and raw byte copies only; no interior `Cell`/`RefCell` aliasing.
unsafe impl Send for MmapRegion {}
unsafe impl Sync for MmapRegion {}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr, self.len);
        }
    }
}

impl MmapHandle {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.0.ptr as *const u8, self.0.len) }
    }

    pub fn len(&self) -> usize {
        self.0.len
    }

    fn header(&self) -> *mut b::perf_event_mmap_page {
        self.0.ptr as *mut b::perf_event_mmap_page
    }

    /// The two ring-tracking atomics inside the kernel's
    /// `struct perf_event_mmap_page` header page, which precedes the
    /// data ring proper (the consumer reads `data_head`, advances
    /// `data_tail`).
    pub fn data_head(&self) -> &AtomicU64 {
        unsafe { AtomicU64::from_ptr(&mut (*self.header()).data_head as *mut u64) }
    }

    pub fn data_tail(&self) -> &AtomicU64 {
        unsafe { AtomicU64::from_ptr(&mut (*self.header()).data_tail as *mut u64) }
    }
}

/// Maps the data ring for `fd`. `page_size` and `data_pages` come from
/// the capture configuration's ring-buffer sizing; the mapping is
/// `1 + data_pages` pages long (one header page plus the data ring).
pub fn mmap_data(fd: &File, page_size: usize, data_pages: usize) -> std::io::Result<MmapHandle> {
    let len = (1 + data_pages) * page_size;
    let ptr = unsafe {
        mmap::<()>(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    match ptr {
        Ok(ptr) => Ok(MmapHandle(Arc::new(MmapRegion { ptr, len }))),
        Err(e) => {
            if matches!(e.raw_os_error(), Some(libc::ENOMEM) | Some(libc::EPERM)) {
                warn!(
                    error = %e,
                    "perf mmap failed; check /proc/sys/kernel/perf_event_mlock_kb \
                     and reduce --mmap-pages, or run as root"
                );
            }
            Err(e)
        }
    }
}

/// Maps the AUX ring for an SPE (aux-carrying) event, following the
/// data mmap's header page to describe the desired aux offset/size.
pub fn mmap_aux(
    data: &MmapHandle,
    fd: &File,
    page_size: usize,
    aux_pages: usize,
) -> std::io::Result<MmapHandle> {
    let aux_len = aux_pages * page_size;
    let header = data.0.ptr as *mut b::perf_event_mmap_page;
    unsafe {
        (*header).aux_offset = data.len() as u64;
        (*header).aux_size = aux_len as u64;
    }
    let ptr = unsafe {
        mmap::<()>(
            std::ptr::null_mut(),
            aux_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            data.len() as i64,
        )
    };
    ptr.map(|ptr| MmapHandle(Arc::new(MmapRegion { ptr, len: aux_len })))
}

/// Redirects `fd`'s mmap output onto `target_fd`'s ring, so a single
/// consumer carries the whole group's sideband and sample records.
pub fn set_output(fd: &File, target_fd: &File) -> std::io::Result<()> {
    ioctl_arg(fd, b::PERF_IOC_OP_SET_OUTPUT as _, target_fd.as_raw_fd() as u64)?;
    Ok(())
}

pub fn start(fd: &File) -> std::io::Result<()> {
    ioctl_arg(fd, b::PERF_IOC_OP_ENABLE as _, 0)?;
    Ok(())
}

pub fn stop(fd: &File) -> std::io::Result<()> {
    ioctl_arg(fd, b::PERF_IOC_OP_DISABLE as _, 0)?;
    Ok(())
}

/// Re-enables an event after an explicit `stop` that retained its fd.
pub fn re_enable(fd: &File) -> std::io::Result<()> {
    let _ = ioctl(fd, b::PERF_IOC_OP_ENABLE as _);
    start(fd)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn errno_mapping_matches_spec() {
        assert_eq!(map_errno(&Error::from_raw_os_error(libc::ENODEV)), ActivatorStatus::Offline);
        assert_eq!(map_errno(&Error::from_raw_os_error(libc::ESRCH)), ActivatorStatus::InvalidPid);
        assert_eq!(
            map_errno(&Error::from_raw_os_error(libc::ENOENT)),
            ActivatorStatus::InvalidDevice
        );
        assert_eq!(map_errno(&Error::from_raw_os_error(libc::EMFILE)), ActivatorStatus::Fatal);
        assert_eq!(map_errno(&Error::new(ErrorKind::Other, "x")), ActivatorStatus::Fatal);
    }
}

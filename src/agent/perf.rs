//! Perf capture agent (C8): owns C5–C7, drives the capture state machine
//! of §4.5, and forwards ring-buffer bytes and state-change notifications
//! to the shell over C3.
//!
//! The agent harness (C4) only ever dispatches on inbound IPC, but this
//! agent also needs to react to the passage of time — CPU hot-plug
//! polling and mmap draining (§4.5 step 3) happen whether or not a
//! message just arrived. It spawns one background task in `on_start`
//! that owns the binding manager behind a `tokio::sync::Mutex` (the
//! async equivalent of the teacher's single-threaded strand: the task
//! and `on_message` never run the manager concurrently, only
//! interleaved) and ticks a poll/drain loop; `on_message` forwards
//! inbound IPC into the same lock.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use prost::Message as _;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{info, warn};

use crate::binding::manager::{EventBindingManager, ManagerConfig, PrepareOutcome};
use crate::binding::syscalls::RealSyscalls;
use crate::capture::{self, CaptureEvents};
use crate::capture_config::CaptureConfiguration;
use crate::ipc::{CaptureFailedReason, CpuStateChange, IpcSink, Message};
use crate::ring::{self, FrameType};

use super::{Agent, AgentError};

/// Interval between `/sys/devices/system/cpu/cpu*/online` polls and mmap
/// drains while running (§4.5 step 3).
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bytes drained from a core's mmap ring per tick before yielding, so one
/// noisy core can't starve the others sharing this task.
const MAX_RECORDS_PER_TICK: usize = 4096;

fn read_online_cores() -> Vec<u32> {
    let mut cores = Vec::new();
    let Ok(entries) = fs::read_dir("/sys/devices/system/cpu") else {
        return cores;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix("cpu") else { continue };
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(no) = rest.parse::<u32>() else { continue };
        let online_path = entry.path().join("online");
        let online = match fs::read_to_string(&online_path) {
            Ok(s) => s.trim() == "1",
            // cpu0 commonly has no `online` file and is always present.
            Err(_) => no == 0,
        };
        if online {
            cores.push(no);
        }
    }
    cores.sort_unstable();
    cores
}

/// State shared between `on_message` and the background poll/drain task,
/// serialized by the enclosing `tokio::sync::Mutex` (one lock == one
/// strand: the two sides are never actually concurrent).
struct Inner {
    manager: EventBindingManager<RealSyscalls>,
    events: CaptureEvents,
    cluster_of: HashMap<u32, u32>,
    rings: HashMap<u32, (ring::RingProducer, ring::RingConsumer)>,
    last_known_cores: Vec<u32>,
    running: bool,
}

impl Inner {
    /// Opens the per-core `PERF` ring buffer (C1) if one doesn't exist
    /// yet. Kept persistent across ticks (rather than one-shot per drain)
    /// so the bounded-capacity/hysteresis behaviour of §3 actually
    /// applies to continuous capture.
    fn ring_for(&mut self, core: u32) -> &mut (ring::RingProducer, ring::RingConsumer) {
        self.rings.entry(core).or_insert_with(|| ring::channel_for_core(1 << 20, FrameType::Perf, core))
    }

    /// Packs the manager's freshly-opened id→key mapping into a `NAME`
    /// frame for `core` and hands it to `sink` as `apc_frame_data` (§4.3
    /// "happy-path ordering": this must reach the host before `start`).
    ///
    /// One mapping per committed frame, the same pattern as packing any
    /// other sequence of records into a typed buffer: pack the fields,
    /// then commit — the buffer already has a frame open (from
    /// construction, then re-opened after every commit) with the right
    /// per-core header, so there's nothing to reserve explicitly.
    async fn emit_mappings(&mut self, core: u32, mappings: &[(u64, crate::binding::manager::EventKey)], sink: &IpcSink) {
        if mappings.is_empty() {
            return;
        }
        let (mut producer, mut consumer) = ring::channel_for_core(4096, FrameType::Name, core);
        for (id, key) in mappings {
            producer.pack_i64(*id as i64);
            producer.pack_i32(key.group_index as i32);
            producer.pack_i32(key.event_index as i32);
            producer.pack_i32(key.pid);
            producer.commit(0, false);
        }
        producer.set_done();

        struct VecSink(Vec<u8>);
        impl ring::FrameSink for VecSink {
            fn send(&mut self, bytes: &[u8], _response_type: Option<u8>) {
                self.0.extend_from_slice(bytes);
            }
        }
        let mut out = VecSink(Vec::new());
        while !consumer.is_done() {
            consumer.write_to_sink(&mut out, None);
        }
        if !out.0.is_empty() {
            let _ = sink.send(&Message::ApcFrameData { core, bytes: out.0 }).await;
        }
    }

    /// Walks a core's mmap ring, copying raw `perf_event_header`-framed
    /// records into the core's `PERF` ring buffer and committing. Stream
    /// decoding is explicitly out of scope (§1 Non-goals) — only the
    /// header's `size` field is interpreted, to find record boundaries.
    fn drain_core(&mut self, core: u32) -> Option<Vec<u8>> {
        let mmap = self.manager.core_mmap(core)?.clone();
        let data = mmap.as_slice();
        let page_size = 4096usize.min(data.len());
        if data.len() <= page_size {
            return None;
        }
        let ring_bytes = &data[page_size..];
        let mask = (ring_bytes.len() - 1) as u64;

        let tail = mmap.data_tail().load(std::sync::atomic::Ordering::Relaxed);
        let head = mmap.data_head().load(std::sync::atomic::Ordering::Acquire);
        if head == tail {
            return None;
        }

        let (producer, consumer) = self.ring_for(core);

        let mut pos = tail;
        let mut records = 0;
        while pos < head && records < MAX_RECORDS_PER_TICK {
            let off = (pos & mask) as usize;
            if off + 8 > ring_bytes.len() {
                break;
            }
            let size = u16::from_ne_bytes([ring_bytes[off + 6], ring_bytes[off + 7]]) as u64;
            if size < 8 {
                break;
            }
            for i in 0..size {
                producer.write_bytes(&[ring_bytes[((pos + i) & mask) as usize]]);
            }
            pos += size;
            records += 1;
        }
        // Batches every record copied this tick into the one frame the
        // buffer already has open; elided as a no-op commit if nothing
        // was actually copied (`head == tail` already short-circuits
        // the common case, this covers a malformed-header early break).
        producer.commit(0, false);
        mmap.data_tail().store(pos, std::sync::atomic::Ordering::Release);

        struct VecSink(Vec<u8>);
        impl ring::FrameSink for VecSink {
            fn send(&mut self, bytes: &[u8], _response_type: Option<u8>) {
                self.0.extend_from_slice(bytes);
            }
        }
        let mut out = VecSink(Vec::new());
        consumer.write_to_sink(&mut out, None);
        if out.0.is_empty() { None } else { Some(out.0) }
    }

    /// One hot-plug reconciliation + drain tick (§4.5 step 3).
    async fn tick(&mut self, sink: &IpcSink) {
        if !self.running {
            return;
        }

        let now_online = read_online_cores();
        let previously: std::collections::HashSet<u32> = self.last_known_cores.iter().copied().collect();
        let currently: std::collections::HashSet<u32> = now_online.iter().copied().collect();

        for &core in currently.difference(&previously) {
            let cluster = *self.cluster_of.get(&core).unwrap_or(&0);
            let prep = self.manager.core_online_prepare(core, cluster, &[]);
            self.emit_mappings(core, &prep.id_to_key, sink).await;
            let _ = sink.send(&Message::CpuStateChange(CpuStateChange { core, online: true })).await;
            self.manager.core_online_start(core);
        }
        for &core in previously.difference(&currently) {
            self.manager.core_offline(core);
            let _ = sink.send(&Message::CpuStateChange(CpuStateChange { core, online: false })).await;
            self.rings.remove(&core);
        }
        self.last_known_cores = now_online;

        for core in self.manager.online_cores() {
            if let Some(bytes) = self.drain_core(core) {
                let _ = sink.send(&Message::ApcFrameData { core, bytes }).await;
            }
        }

        let monitored = self.manager.monitored_pids();
        if monitored.iter().copied().collect::<std::collections::HashSet<_>>()
            != self.events.tracked().into_iter().collect()
        {
            let _ = sink.send(&Message::MonitoredPids(monitored)).await;
        }
    }
}

/// Launches the `--app` target: forks, drops to the configured uid/gid,
/// chdirs, execs argv[0] with argv (§4.5 "Launching the target process").
fn spawn_launch(launch: &crate::capture_config::LaunchConfig) -> std::io::Result<std::process::Child> {
    let Some((bin, args)) = launch.argv.split_first() else {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"));
    };
    let mut cmd = Command::new(bin);
    cmd.args(args);
    if !launch.cwd.is_empty() {
        cmd.current_dir(&launch.cwd);
    }
    if launch.uid != 0 {
        cmd.uid(launch.uid);
    }
    if launch.gid != 0 {
        cmd.gid(launch.gid);
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    cmd.spawn()
}

pub struct PerfAgent {
    inner: Option<Arc<Mutex<Inner>>>,
}

impl PerfAgent {
    pub fn new() -> Self {
        PerfAgent { inner: None }
    }

    async fn handle_configuration(&mut self, proto: Vec<u8>, ipc: &IpcSink) -> Result<(), AgentError> {
        let config = CaptureConfiguration::decode(proto.as_slice())
            .map_err(|e| AgentError::Fatal(format!("malformed capture configuration: {e}")))?;

        let caps = config.capabilities.clone().unwrap_or_default();
        let cluster_of: HashMap<u32, u32> =
            config.cores.iter().map(|c| (c.core_no, c.cluster_index)).collect();

        let is_system_wide = config.wait_for_process.is_none()
            && config.android_package.is_none()
            && config.initial_pids.is_empty()
            && config.launch.is_none();

        let exclude_kernel = config.session.as_ref().map(|s| s.exclude_kernel).unwrap_or(false);
        let stop_on_exit = config.session.as_ref().map(|s| s.stop_on_exit).unwrap_or(false);

        let cfg = ManagerConfig {
            sample_period: config.session.as_ref().map(|s| s.sample_rate_hz as u64).unwrap_or(0),
            exclude_kernel,
            is_system_wide,
            page_size: 4096,
            data_pages: (config.data_buffer_size as usize / 4096).max(1),
            aux_pages: (config.aux_buffer_size as usize / 4096),
        };

        let uncore_owner: HashMap<String, u32> =
            config.uncore_pmus.iter().map(|u| (u.name.clone(), u.owning_core)).collect();

        let mut events = CaptureEvents::new(&config.initial_pids, false, stop_on_exit);

        // Enable-on-exec is only programmed into the attrs when the kernel
        // supports clockid + comm-exec; otherwise the launched target is
        // opened disabled and enabled manually once `start` runs (§4.5).
        let exec_attrs_supported = caps.has_attr_clockid_support && caps.has_attr_comm_exec;
        let mut launched_pid = None;

        if let Some(launch) = &config.launch {
            match spawn_launch(launch) {
                Ok(child) => {
                    let pid = child.id() as i32;
                    events.set_app_pid(pid);
                    if config.enable_on_exec && exec_attrs_supported {
                        launched_pid = Some(pid);
                    } else {
                        // `Command::spawn` already performed fork+exec by
                        // the time it returns, so this is the best-effort
                        // equivalent of the target raising its exec hook.
                        let _ = ipc.send(&Message::ExecTargetApp).await;
                    }
                }
                Err(_) => {
                    let _ = ipc
                        .send(&Message::CaptureFailed(CaptureFailedReason::CommandExecFailed))
                        .await;
                    return Err(AgentError::Fatal("command exec failed".into()));
                }
            }
        }

        let mut manager = EventBindingManager::new(
            config.event_groups.clone(),
            caps,
            cfg,
            uncore_owner,
            RealSyscalls,
        );

        if let Some(pid) = launched_pid {
            manager.mark_enable_on_exec(pid);
        }

        if config.stop_pids {
            let roots = events.tracked();
            if !roots.is_empty() {
                let exclude: HashSet<i32> = capture::self_tids().unwrap_or_default().into_iter().collect();
                let (merged, _resume) = capture::stop_and_enumerate(&roots, &exclude);
                for tid in merged {
                    events.track(tid);
                }
            }
        }

        let mut all_mappings = Vec::new();
        let mut any_failed = false;
        for core in read_online_cores() {
            let cluster = *cluster_of.get(&core).unwrap_or(&0);
            let prep = manager.core_online_prepare(core, cluster, &[]);
            if prep.outcome == PrepareOutcome::Failed {
                any_failed = true;
            }
            all_mappings.push((core, prep.id_to_key));
        }

        let inner = Arc::new(Mutex::new(Inner {
            manager,
            events,
            cluster_of,
            rings: HashMap::new(),
            last_known_cores: vec![],
            running: false,
        }));

        {
            let mut guard = inner.lock().await;
            for (core, mappings) in all_mappings {
                guard.emit_mappings(core, &mappings, ipc).await;
            }
            guard.last_known_cores = guard.manager.online_cores();
        }

        if any_failed {
            let _ = ipc
                .send(&Message::CaptureFailed(CaptureFailedReason::WaitForCoresReadyFailed))
                .await;
            return Err(AgentError::Fatal("one or more cores failed to prepare".into()));
        }

        self.inner = Some(Arc::clone(&inner));

        let pids = {
            let guard = inner.lock().await;
            guard.events.tracked()
        };
        ipc.send(&Message::CaptureReady(pids))
            .await
            .map_err(|_| AgentError::Fatal("writer task died".into()))?
            .map_err(AgentError::Io)?;

        Ok(())
    }

    async fn handle_start(&mut self, ipc: &IpcSink) -> Result<(), AgentError> {
        let Some(inner) = self.inner.clone() else {
            return Err(AgentError::Fatal("start received before configuration".into()));
        };

        {
            let mut guard = inner.lock().await;
            for core in guard.manager.online_cores() {
                guard.manager.core_online_start(core);
            }
            guard.running = true;
        }

        let sink = ipc.clone();
        tokio::spawn(async move {
            let mut ticker = interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let mut guard = inner.lock().await;
                if !guard.running {
                    break;
                }
                guard.tick(&sink).await;
                if guard.events.should_terminate() {
                    break;
                }
            }
        });

        Ok(())
    }
}

impl Default for PerfAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for PerfAgent {
    fn name(&self) -> &'static str {
        "perf"
    }

    async fn on_message(&mut self, message: Message, ipc: &IpcSink) -> Result<(), AgentError> {
        match message {
            Message::PerfCaptureConfiguration(proto) => self.handle_configuration(proto, ipc).await,
            Message::Start(_anchor) => self.handle_start(ipc).await,
            other => {
                warn!(agent = "perf", ?other, "unexpected message in perf capture agent");
                Ok(())
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(inner) = &self.inner {
            if let Ok(mut guard) = inner.try_lock() {
                guard.running = false;
                info!(agent = "perf", "shutting down, disabling remaining binding sets");
                for core in guard.manager.online_cores() {
                    guard.manager.core_offline(core);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_online_cores_includes_cpu0_even_without_online_file() {
        // cpu0 on most kernels has no `online` sysfs entry and is always
        // reported present; this just asserts the fallback doesn't panic
        // on whatever the test host actually has.
        let cores = read_online_cores();
        if !cores.is_empty() {
            assert!(cores.windows(2).all(|w| w[0] < w[1]), "cores must be sorted and deduplicated");
        }
    }
}

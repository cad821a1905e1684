//! Event binding manager (C6): reconciles the declarative perf-group
//! plan with the dynamic set of online cores x tracked pids.

use std::collections::{HashMap, HashSet};
use std::fs::File;

use tracing::warn;

use crate::activator::{ActivatorStatus, EnableState, MmapHandle};
use crate::capture_config::{EventGroupScope, KernelCapabilities, PerfEventGroup};

use super::group::{EventBinding, EventBindingGroup};
use super::set::{EventBindingSet, SetAggregate};
use super::state::BindingState;
use super::syscalls::Syscalls;

/// Identifies one opened event uniquely enough for the shell to label
/// incoming samples: which plan group (by index into the plan) and
/// which event within that group's definition list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub core: u32,
    pub pid: i32,
    pub group_index: usize,
    pub event_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareOutcome {
    Usable,
    Terminated,
    Offline,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Usable,
    Terminated,
    Offline,
    Failed,
}

pub struct PrepareResult {
    pub outcome: PrepareOutcome,
    pub id_to_key: Vec<(u64, EventKey)>,
    pub terminated_pids: Vec<i32>,
}

pub struct StartResult {
    pub outcome: StartOutcome,
    pub terminated_pids: Vec<i32>,
}

/// Session-wide knobs the manager needs but that aren't per-event (live
/// in `CaptureConfiguration::session`/`ring_buffer_pages` etc.).
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub sample_period: u64,
    pub exclude_kernel: bool,
    pub is_system_wide: bool,
    pub page_size: usize,
    pub data_pages: usize,
    pub aux_pages: usize,
}

struct CoreState {
    cluster: u32,
    header_fd: Option<File>,
    header_mmap: Option<MmapHandle>,
    pids: HashMap<i32, EventBindingSet>,
    active_uncore: HashSet<String>,
}

pub struct EventBindingManager<S: Syscalls> {
    plan: Vec<PerfEventGroup>,
    caps: KernelCapabilities,
    cfg: ManagerConfig,
    cores: HashMap<u32, CoreState>,
    tracked_pids: HashSet<i32>,
    uncore_owner: HashMap<String, u32>,
    syscalls: S,
    /// Pids whose binding sets should be opened `EnableOnExec` rather than
    /// disabled — the just-launched target, when the kernel supports it.
    enable_on_exec_pids: HashSet<i32>,
}

impl<S: Syscalls> EventBindingManager<S> {
    pub fn new(
        plan: Vec<PerfEventGroup>,
        caps: KernelCapabilities,
        cfg: ManagerConfig,
        uncore_owner: HashMap<String, u32>,
        syscalls: S,
    ) -> Self {
        EventBindingManager {
            plan,
            caps,
            cfg,
            cores: HashMap::new(),
            tracked_pids: HashSet::new(),
            uncore_owner,
            syscalls,
            enable_on_exec_pids: HashSet::new(),
        }
    }

    /// Marks `pid` so its bindings are opened with `EnableState::EnableOnExec`
    /// instead of disabled (§4.5: enable-on-exec is only programmed into the
    /// attrs when the kernel supports clockid + comm-exec).
    pub fn mark_enable_on_exec(&mut self, pid: i32) {
        self.enable_on_exec_pids.insert(pid);
    }

    fn enable_state_for(&self, pid: i32) -> EnableState {
        if self.enable_on_exec_pids.contains(&pid) {
            EnableState::EnableOnExec
        } else {
            EnableState::Disabled
        }
    }

    fn self_target_pid(&self) -> i32 {
        if self.cfg.is_system_wide {
            -1
        } else {
            0
        }
    }

    fn groups_for(&self, core: u32, cluster: u32) -> Vec<usize> {
        self.plan
            .iter()
            .enumerate()
            .filter(|(_, g)| match &g.scope {
                Some(EventGroupScope::Global(enabled)) => *enabled,
                Some(EventGroupScope::Spe(enabled)) => *enabled,
                Some(EventGroupScope::Cluster(c)) => *c == cluster,
                Some(EventGroupScope::SpecificCpu(c)) => *c == core,
                Some(EventGroupScope::Uncore(name)) => {
                    self.uncore_owner.get(name).copied() == Some(core)
                }
                None => false,
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Opens one binding set (one group per matching plan entry) for
    /// `(core, pid)`. The set's own aggregate is returned alongside the
    /// id->key mappings for every successfully-opened event.
    fn open_binding_set(
        &mut self,
        core: u32,
        pid: i32,
        group_indices: &[usize],
        header_fd: &File,
        header_mmap: Option<&MmapHandle>,
        enable_state: EnableState,
    ) -> (EventBindingSet, Vec<(u64, EventKey)>) {
        let mut groups = Vec::new();
        let mut mappings = Vec::new();

        for &gi in group_indices {
            let is_spe_group = matches!(self.plan[gi].scope, Some(EventGroupScope::Spe(_)));
            let def_list = &self.plan[gi].events;
            let mut members = Vec::new();
            let mut leader_fd: Option<File> = None;

            for (ei, def) in def_list.iter().enumerate() {
                let group_fd = leader_fd.as_ref().map(|f| {
                    use std::os::fd::AsRawFd;
                    f.as_raw_fd()
                }).unwrap_or(-1);

                let result = self.syscalls.create_event(
                    def,
                    &self.caps,
                    enable_state,
                    core as i32,
                    pid,
                    group_fd,
                    self.cfg.sample_period,
                    self.cfg.exclude_kernel,
                    self.cfg.is_system_wide,
                );

                let state = match result.status {
                    ActivatorStatus::Success => BindingState::Ready,
                    ActivatorStatus::Offline => BindingState::Offline,
                    ActivatorStatus::InvalidPid => BindingState::Terminated,
                    ActivatorStatus::InvalidDevice => BindingState::NotSupported,
                    ActivatorStatus::Fatal => BindingState::Failed,
                };

                let mut aux_mmap = None;
                if let Some(fd) = &result.fd {
                    if let Err(e) = self.syscalls.set_output(fd, header_fd) {
                        warn!(core, pid, error = %e, "failed to redirect event mmap output");
                    }
                    if let Some(id) = result.perf_id {
                        mappings.push((
                            id,
                            EventKey { core, pid, group_index: gi, event_index: ei },
                        ));
                    }

                    if is_spe_group && self.caps.has_aux_support {
                        match header_mmap {
                            Some(data) => match self.syscalls.mmap_aux(
                                data,
                                fd,
                                self.cfg.page_size,
                                self.cfg.aux_pages,
                            ) {
                                Ok(m) => aux_mmap = Some(m),
                                Err(e) => warn!(core, pid, error = %e, "aux mmap failed"),
                            },
                            None => warn!(core, pid, "no header mmap to anchor aux ring"),
                        }
                    }
                }

                if ei == 0 {
                    leader_fd = result.fd.as_ref().and_then(|f| f.try_clone().ok());
                }

                members.push(EventBinding {
                    state,
                    fd: result.fd,
                    perf_id: result.perf_id,
                    is_single_pmu_leader: ei == 0 && def_list.len() == 1,
                    aux_mmap,
                });
            }

            groups.push(EventBindingGroup::new(members));
        }

        (EventBindingSet::new(core, pid, groups), mappings)
    }

    /// §4.3 `core_online_prepare`.
    pub fn core_online_prepare(
        &mut self,
        core: u32,
        cluster: u32,
        additional_tids: &[i32],
    ) -> PrepareResult {
        debug_assert!(
            !(self.cfg.is_system_wide && !additional_tids.is_empty()),
            "additional tids must be empty in system-wide mode"
        );
        for &tid in additional_tids {
            self.tracked_pids.insert(tid);
        }

        let dummy = crate::capture_config::PerfEventDefinition {
            event_type: libc::PERF_TYPE_SOFTWARE as u32,
            config: if self.caps.has_count_sw_dummy {
                9 /* PERF_COUNT_SW_DUMMY */
            } else {
                0 /* PERF_COUNT_SW_CPU_CLOCK */
            },
            config1: 0,
            config2: 0,
            sample_period: 0,
            is_group_leader: true,
        };
        let header_result = self.syscalls.create_event(
            &dummy,
            &self.caps,
            EnableState::Disabled,
            core as i32,
            self.self_target_pid(),
            -1,
            0,
            self.cfg.exclude_kernel,
            self.cfg.is_system_wide,
        );

        let header_fd = match header_result.fd {
            Some(fd) => fd,
            None => {
                let outcome = match header_result.status {
                    ActivatorStatus::Offline => PrepareOutcome::Offline,
                    _ => PrepareOutcome::Failed,
                };
                return PrepareResult { outcome, id_to_key: vec![], terminated_pids: vec![] };
            }
        };

        let header_mmap = match self.syscalls.mmap_data(
            &header_fd,
            self.cfg.page_size,
            self.cfg.data_pages,
        ) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(core, error = %e, "header mmap failed");
                None
            }
        };

        let group_indices = self.groups_for(core, cluster);
        let pids: Vec<i32> = if self.cfg.is_system_wide {
            vec![-1]
        } else {
            self.tracked_pids.iter().copied().collect()
        };

        let mut all_mappings = Vec::new();
        let mut terminated_pids = Vec::new();
        let mut pid_sets = HashMap::new();
        let mut any_usable = false;

        for pid in pids {
            let enable_state = self.enable_state_for(pid);
            let (set, mappings) = self.open_binding_set(
                core,
                pid,
                &group_indices,
                &header_fd,
                header_mmap.as_ref(),
                enable_state,
            );
            all_mappings.extend(mappings);
            match set.aggregate() {
                SetAggregate::Usable => any_usable = true,
                SetAggregate::Terminated => terminated_pids.push(pid),
                _ => {}
            }
            pid_sets.insert(pid, set);
        }

        self.cores.insert(
            core,
            CoreState { cluster, header_fd: Some(header_fd), header_mmap, pids: pid_sets, active_uncore: HashSet::new() },
        );
        if let Some(state) = self.cores.get_mut(&core) {
            for gi in &group_indices {
                if let Some(EventGroupScope::Uncore(name)) = &self.plan[*gi].scope {
                    state.active_uncore.insert(name.clone());
                }
            }
        }

        let outcome = if any_usable || !self.cfg.is_system_wide && pid_sets_is_empty(&self.cores, core) {
            PrepareOutcome::Usable
        } else if !terminated_pids.is_empty() && terminated_pids.len() == self.cores[&core].pids.len() {
            PrepareOutcome::Terminated
        } else {
            PrepareOutcome::Usable
        };

        PrepareResult { outcome, id_to_key: all_mappings, terminated_pids }
    }

    /// §4.3 `core_online_start`: enable every ready binding set for the
    /// core; remove any that reports terminated.
    pub fn core_online_start(&mut self, core: u32) -> StartResult {
        let Some(state) = self.cores.get_mut(&core) else {
            return StartResult { outcome: StartOutcome::Failed, terminated_pids: vec![] };
        };

        if let Some(fd) = &state.header_fd {
            let _ = self.syscalls.start(fd);
        }

        let mut terminated_pids = Vec::new();
        let mut any_usable = false;
        for (pid, set) in state.pids.iter_mut() {
            for group in set.groups.iter() {
                for member in &group.members {
                    if member.state == BindingState::Ready {
                        if let Some(fd) = &member.fd {
                            let _ = self.syscalls.start(fd);
                        }
                    }
                }
            }
            match set.aggregate() {
                SetAggregate::Usable => any_usable = true,
                SetAggregate::Terminated => terminated_pids.push(*pid),
                _ => {}
            }
        }
        for pid in &terminated_pids {
            state.pids.remove(pid);
        }

        let outcome = if any_usable || state.pids.is_empty() {
            StartOutcome::Usable
        } else {
            StartOutcome::Failed
        };

        StartResult { outcome, terminated_pids }
    }

    /// §4.3 `pid_track_prepare`: adds a binding set for `pid` on every
    /// online core.
    pub fn pid_track_prepare(&mut self, pid: i32) -> HashMap<u32, PrepareOutcome> {
        self.tracked_pids.insert(pid);
        let cores: Vec<(u32, u32)> = self.cores.iter().map(|(c, s)| (*c, s.cluster)).collect();
        let mut out = HashMap::new();

        for (core, cluster) in cores {
            let group_indices = self.groups_for(core, cluster);
            let header_fd = self.cores[&core].header_fd.as_ref().unwrap().try_clone().unwrap();
            let header_mmap = self.cores[&core].header_mmap.clone();
            let enable_state = self.enable_state_for(pid);
            let (set, _mappings) = self.open_binding_set(
                core,
                pid,
                &group_indices,
                &header_fd,
                header_mmap.as_ref(),
                enable_state,
            );
            let outcome = match set.aggregate() {
                SetAggregate::Usable => PrepareOutcome::Usable,
                SetAggregate::Terminated => PrepareOutcome::Terminated,
                SetAggregate::Offline => PrepareOutcome::Offline,
                SetAggregate::Failed => PrepareOutcome::Failed,
            };
            self.cores.get_mut(&core).unwrap().pids.insert(pid, set);
            out.insert(core, outcome);
        }
        out
    }

    /// §4.3 `pid_track_start`.
    pub fn pid_track_start(&mut self, pid: i32) -> HashMap<u32, StartOutcome> {
        let cores: Vec<u32> = self.cores.keys().copied().collect();
        let mut out = HashMap::new();
        for core in cores {
            let state = self.cores.get_mut(&core).unwrap();
            if let Some(set) = state.pids.get(&pid) {
                for group in &set.groups {
                    for member in &group.members {
                        if member.state == BindingState::Ready {
                            if let Some(fd) = &member.fd {
                                let _ = self.syscalls.start(fd);
                            }
                        }
                    }
                }
                let outcome = match set.aggregate() {
                    SetAggregate::Usable => StartOutcome::Usable,
                    SetAggregate::Terminated => {
                        state.pids.remove(&pid);
                        StartOutcome::Terminated
                    }
                    SetAggregate::Offline => StartOutcome::Offline,
                    SetAggregate::Failed => StartOutcome::Failed,
                };
                out.insert(core, outcome);
            }
        }
        out
    }

    /// §4.3 `core_offline`: disables and closes every binding set on
    /// the core, releases uncore ownership, closes the header fd.
    pub fn core_offline(&mut self, core: u32) {
        if let Some(mut state) = self.cores.remove(&core) {
            for (_, set) in state.pids.drain() {
                for group in &set.groups {
                    for member in &group.members {
                        if let Some(fd) = &member.fd {
                            let _ = self.syscalls.stop(fd);
                        }
                    }
                }
            }
            for name in state.active_uncore.drain() {
                self.uncore_owner.remove(&name);
            }
            if let Some(fd) = state.header_fd.take() {
                let _ = self.syscalls.stop(&fd);
            }
        }
    }

    /// §4.3 `pid_untrack`: disables and closes every binding set for
    /// the pid across all cores.
    pub fn pid_untrack(&mut self, pid: i32) {
        self.tracked_pids.remove(&pid);
        for state in self.cores.values_mut() {
            if let Some(set) = state.pids.remove(&pid) {
                for group in &set.groups {
                    for member in &group.members {
                        if let Some(fd) = &member.fd {
                            let _ = self.syscalls.stop(fd);
                        }
                    }
                }
            }
        }
    }

    pub fn online_cores(&self) -> Vec<u32> {
        self.cores.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// The header event's mmap for `core`, the single consumer ring every
    /// event on that core redirects its output to (§4.3 step 3/5).
    pub fn core_mmap(&self, core: u32) -> Option<&MmapHandle> {
        self.cores.get(&core).and_then(|s| s.header_mmap.as_ref())
    }

    /// Every tracked pid currently carried by at least one binding set on
    /// any online core, for `monitored-pids` reporting.
    pub fn monitored_pids(&self) -> Vec<i32> {
        let mut pids: HashSet<i32> = HashSet::new();
        for state in self.cores.values() {
            pids.extend(state.pids.keys().copied());
        }
        pids.into_iter().collect()
    }
}

fn pid_sets_is_empty(cores: &HashMap<u32, CoreState>, core: u32) -> bool {
    cores.get(&core).map(|s| s.pids.is_empty()).unwrap_or(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::activator::CreateResult;
    use crate::capture_config::PerfEventDefinition;
    use std::fs::File;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A scripted activator: every core/pid gets `Success` unless
    /// explicitly overridden, so tests can drive specific scenarios
    /// (offline core, terminated pid) without a real kernel.
    struct FakeSyscalls {
        next_id: AtomicU64,
        overrides: Mutex<HashMap<(i32, i32), ActivatorStatus>>,
        aux_calls: AtomicU64,
    }

    impl FakeSyscalls {
        fn new() -> Self {
            FakeSyscalls {
                next_id: AtomicU64::new(1),
                overrides: Mutex::new(HashMap::new()),
                aux_calls: AtomicU64::new(0),
            }
        }

        fn set_status(&self, core: i32, pid: i32, status: ActivatorStatus) {
            self.overrides.lock().unwrap().insert((core, pid), status);
        }

        fn dummy_file() -> File {
            File::open("/dev/null").unwrap()
        }

        /// `/dev/zero` gives a writable MAP_SHARED-able fd, standing in for
        /// a real perf fd so the real `activator::mmap_data`/`mmap_aux`
        /// logic can be exercised without a kernel counter.
        fn mmap_backing_file() -> File {
            std::fs::OpenOptions::new().read(true).write(true).open("/dev/zero").unwrap()
        }
    }

    impl Syscalls for FakeSyscalls {
        fn create_event(
            &self,
            _def: &PerfEventDefinition,
            _caps: &KernelCapabilities,
            _enable_state: EnableState,
            core: i32,
            pid: i32,
            _group_fd: i32,
            _sample_period: u64,
            _exclude_kernel: bool,
            _is_system_wide: bool,
        ) -> CreateResult {
            let status =
                self.overrides.lock().unwrap().get(&(core, pid)).copied().unwrap_or(ActivatorStatus::Success);
            match status {
                ActivatorStatus::Success => CreateResult {
                    status,
                    fd: Some(Self::dummy_file()),
                    perf_id: Some(self.next_id.fetch_add(1, Ordering::SeqCst)),
                },
                _ => CreateResult { status, fd: None, perf_id: None },
            }
        }

        fn mmap_data(&self, _fd: &File, page_size: usize, data_pages: usize) -> std::io::Result<MmapHandle> {
            crate::activator::mmap_data(&Self::mmap_backing_file(), page_size, data_pages)
        }

        fn mmap_aux(
            &self,
            data: &MmapHandle,
            _fd: &File,
            page_size: usize,
            aux_pages: usize,
        ) -> std::io::Result<MmapHandle> {
            self.aux_calls.fetch_add(1, Ordering::SeqCst);
            crate::activator::mmap_aux(data, &Self::mmap_backing_file(), page_size, aux_pages)
        }

        fn set_output(&self, _fd: &File, _target: &File) -> std::io::Result<()> {
            Ok(())
        }

        fn start(&self, _fd: &File) -> std::io::Result<()> {
            Ok(())
        }

        fn stop(&self, _fd: &File) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn cluster_wide_plan() -> Vec<PerfEventGroup> {
        vec![PerfEventGroup {
            scope: Some(EventGroupScope::Cluster(0)),
            events: vec![PerfEventDefinition {
                event_type: 4,
                config: 0x08,
                config1: 0,
                config2: 0,
                sample_period: 0,
                is_group_leader: true,
            }],
        }]
    }

    fn spe_plan() -> Vec<PerfEventGroup> {
        vec![PerfEventGroup {
            scope: Some(EventGroupScope::Spe(true)),
            events: vec![PerfEventDefinition {
                event_type: 4,
                config: 0x08,
                config1: 0,
                config2: 0,
                sample_period: 0,
                is_group_leader: true,
            }],
        }]
    }

    fn default_cfg() -> ManagerConfig {
        ManagerConfig {
            sample_period: 1000,
            exclude_kernel: false,
            is_system_wide: true,
            page_size: 4096,
            data_pages: 8,
            aux_pages: 0,
        }
    }

    #[test]
    fn cpu_hotplug_round_trip_reopens_distinct_fd() {
        let syscalls = FakeSyscalls::new();
        let mut mgr = EventBindingManager::new(
            cluster_wide_plan(),
            KernelCapabilities::default(),
            default_cfg(),
            HashMap::new(),
            syscalls,
        );

        for core in 0..4u32 {
            let prep = mgr.core_online_prepare(core, 0, &[]);
            assert_eq!(prep.outcome, PrepareOutcome::Usable);
            mgr.core_online_start(core);
        }

        mgr.core_offline(2);
        assert!(!mgr.online_cores().contains(&2));

        let prep = mgr.core_online_prepare(2, 0, &[]);
        assert_eq!(prep.outcome, PrepareOutcome::Usable);
        // Exactly one mapping for the cluster-wide event on core 2.
        let mappings_for_core_2: Vec<_> =
            prep.id_to_key.iter().filter(|(_, k)| k.core == 2).collect();
        assert_eq!(mappings_for_core_2.len(), 1);

        let start = mgr.core_online_start(2);
        assert_eq!(start.outcome, StartOutcome::Usable);
    }

    #[test]
    fn pid_terminates_during_prepare() {
        let syscalls = FakeSyscalls::new();
        let mut cfg = default_cfg();
        cfg.is_system_wide = false;
        let mut mgr =
            EventBindingManager::new(cluster_wide_plan(), KernelCapabilities::default(), cfg, HashMap::new(), syscalls);

        mgr.core_online_prepare(0, 0, &[42]);
        mgr.core_online_start(0);

        // Pid 42 exits before `pid_track_start` is called for a second
        // core coming online; simulate by marking create_event as
        // invalid_pid for subsequent calls on that pid.
        mgr.syscalls.set_status(1, 42, ActivatorStatus::InvalidPid);
        let prep = mgr.core_online_prepare(1, 0, &[]);
        assert_eq!(prep.outcome, PrepareOutcome::Terminated);
        assert_eq!(prep.terminated_pids, vec![42]);

        let start = mgr.core_online_start(1);
        assert_eq!(start.terminated_pids, vec![42]);
        assert!(!mgr.cores[&1].pids.contains_key(&42));
    }

    #[test]
    fn spe_group_maps_aux_ring() {
        let syscalls = FakeSyscalls::new();
        let mut cfg = default_cfg();
        cfg.aux_pages = 4;
        let caps = KernelCapabilities { has_aux_support: true, ..Default::default() };
        let mut mgr = EventBindingManager::new(spe_plan(), caps, cfg, HashMap::new(), syscalls);

        let prep = mgr.core_online_prepare(0, 0, &[]);
        assert_eq!(prep.outcome, PrepareOutcome::Usable);

        let binding = &mgr.cores[&0].pids.get(&-1).expect("system-wide pid set").groups[0].members[0];
        assert!(binding.aux_mmap.is_some());
        assert_eq!(mgr.syscalls.aux_calls.load(Ordering::SeqCst), 1);
    }
}

//! Capture configuration (§3): the wire struct the shell sends to the perf
//! capture agent via `ipc::Message::PerfCaptureConfiguration`.
//!
//! Hand-written `prost::Message` impls rather than `.proto`-generated code:
//! there is no external client that needs the `.proto` source, only the two
//! ends of this crate's own IPC channel, so the schema lives here as plain
//! Rust.

use std::collections::HashMap;

/// Top-level capture configuration, built by the shell from session XML and
/// sent once to the perf capture agent (C8) before `start`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CaptureConfiguration {
    #[prost(message, optional, tag = "1")]
    pub session: Option<SessionParameters>,
    #[prost(message, optional, tag = "2")]
    pub capabilities: Option<KernelCapabilities>,
    #[prost(message, repeated, tag = "3")]
    pub clusters: Vec<Cluster>,
    #[prost(message, repeated, tag = "4")]
    pub cores: Vec<CoreProperties>,
    #[prost(message, repeated, tag = "5")]
    pub uncore_pmus: Vec<UncorePmu>,
    /// cpuid -> friendly name (e.g. `0x410fd0c0` -> `"Cortex-A55"`).
    #[prost(map = "uint32, string", tag = "6")]
    pub cpuid_names: HashMap<u32, String>,
    #[prost(message, repeated, tag = "7")]
    pub event_groups: Vec<PerfEventGroup>,
    #[prost(uint32, tag = "8")]
    pub ring_buffer_pages: u32,
    #[prost(uint32, tag = "9")]
    pub data_buffer_size: u32,
    #[prost(uint32, tag = "10")]
    pub aux_buffer_size: u32,
    #[prost(message, optional, tag = "11")]
    pub launch: Option<LaunchConfig>,
    #[prost(string, optional, tag = "12")]
    pub wait_for_process: Option<String>,
    #[prost(string, optional, tag = "13")]
    pub android_package: Option<String>,
    #[prost(int32, repeated, tag = "14")]
    pub initial_pids: Vec<i32>,
    #[prost(bool, tag = "15")]
    pub enable_on_exec: bool,
    #[prost(bool, tag = "16")]
    pub stop_pids: bool,
}

/// The `--app`/`--wait-for-app` launch target (§3 "Capture configuration"
/// — argv, cwd, uid, gid), forked and exec'd by the perf capture agent
/// after the initial pid set is resolved (§4.5).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LaunchConfig {
    #[prost(string, repeated, tag = "1")]
    pub argv: Vec<String>,
    #[prost(string, tag = "2")]
    pub cwd: String,
    #[prost(uint32, tag = "3")]
    pub uid: u32,
    #[prost(uint32, tag = "4")]
    pub gid: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionParameters {
    #[prost(uint32, tag = "1")]
    pub sample_rate_hz: u32,
    #[prost(bool, tag = "2")]
    pub one_shot: bool,
    #[prost(uint64, tag = "3")]
    pub duration_ms: u64,
    #[prost(bool, tag = "4")]
    pub call_stack_unwinding: bool,
    /// Live-mode streaming rate in samples/sec; 0 means no live streaming.
    #[prost(uint32, tag = "5")]
    pub live_rate: u32,
    /// Stop the whole capture once the launched/tracked app exits.
    #[prost(bool, tag = "6")]
    pub stop_on_exit: bool,
    /// Programmed into every event's `exclude_kernel` attr bit.
    #[prost(bool, tag = "7")]
    pub exclude_kernel: bool,
}

/// The 13 boolean kernel-capability probes the original `PerfConfig` carries,
/// set once at startup and threaded down to attr-building and binding.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KernelCapabilities {
    #[prost(bool, tag = "1")]
    pub has_ioctl_read_id: bool,
    #[prost(bool, tag = "2")]
    pub has_attr_clockid_support: bool,
    #[prost(bool, tag = "3")]
    pub has_attr_context_switch: bool,
    #[prost(bool, tag = "4")]
    pub has_attr_comm_exec: bool,
    #[prost(bool, tag = "5")]
    pub has_attr_mmap2: bool,
    #[prost(bool, tag = "6")]
    pub has_sample_identifier: bool,
    #[prost(bool, tag = "7")]
    pub has_count_sw_dummy: bool,
    #[prost(bool, tag = "8")]
    pub has_aux_support: bool,
    #[prost(bool, tag = "9")]
    pub has_fd_cloexec: bool,
    #[prost(bool, tag = "10")]
    pub has_armv7_pmu_driver: bool,
    #[prost(bool, tag = "11")]
    pub use_64bit_register_set: bool,
    #[prost(bool, tag = "12")]
    pub exclude_kernel: bool,
    #[prost(bool, tag = "13")]
    pub is_system_wide: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cluster {
    #[prost(uint32, tag = "1")]
    pub cluster_index: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub cpuid: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CoreProperties {
    #[prost(uint32, tag = "1")]
    pub core_no: u32,
    #[prost(uint32, tag = "2")]
    pub cluster_index: u32,
    #[prost(uint32, tag = "3")]
    pub cpuid: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UncorePmu {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub pmu_type: u32,
    /// Core this PMU is exclusively bound to for the duration of the capture.
    #[prost(uint32, tag = "3")]
    pub owning_core: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PerfEventGroup {
    #[prost(oneof = "EventGroupScope", tags = "1, 2, 3, 4, 5")]
    pub scope: Option<EventGroupScope>,
    #[prost(message, repeated, tag = "6")]
    pub events: Vec<PerfEventDefinition>,
}

/// Which (core, pid) pairs a `PerfEventGroup` should be bound to.
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum EventGroupScope {
    #[prost(bool, tag = "1")]
    Global(bool),
    #[prost(bool, tag = "2")]
    Spe(bool),
    #[prost(uint32, tag = "3")]
    Cluster(u32),
    #[prost(string, tag = "4")]
    Uncore(String),
    #[prost(uint32, tag = "5")]
    SpecificCpu(u32),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PerfEventDefinition {
    #[prost(uint32, tag = "1")]
    pub event_type: u32,
    #[prost(uint64, tag = "2")]
    pub config: u64,
    #[prost(uint64, tag = "3")]
    pub config1: u64,
    #[prost(uint64, tag = "4")]
    pub config2: u64,
    #[prost(uint64, tag = "5")]
    pub sample_period: u64,
    #[prost(bool, tag = "6")]
    pub is_group_leader: bool,
}

#[cfg(test)]
mod test {
    use super::*;
    use prost::Message;

    #[test]
    fn round_trips_through_protobuf_bytes() {
        let cfg = CaptureConfiguration {
            session: Some(SessionParameters {
                sample_rate_hz: 1000,
                one_shot: false,
                duration_ms: 5000,
                call_stack_unwinding: true,
                live_rate: 0,
                stop_on_exit: true,
                exclude_kernel: false,
            }),
            capabilities: Some(KernelCapabilities {
                has_aux_support: true,
                ..Default::default()
            }),
            clusters: vec![Cluster { cluster_index: 0, name: "little".into(), cpuid: 0x410fd0c0 }],
            cores: vec![CoreProperties { core_no: 0, cluster_index: 0, cpuid: 0x410fd0c0 }],
            uncore_pmus: vec![],
            cpuid_names: HashMap::from([(0x410fd0c0, "Cortex-A55".to_string())]),
            event_groups: vec![PerfEventGroup {
                scope: Some(EventGroupScope::Global(true)),
                events: vec![PerfEventDefinition {
                    event_type: 0,
                    config: 0x08,
                    config1: 0,
                    config2: 0,
                    sample_period: 0,
                    is_group_leader: true,
                }],
            }],
            ring_buffer_pages: 128,
            data_buffer_size: 1 << 20,
            aux_buffer_size: 0,
            launch: Some(LaunchConfig {
                argv: vec!["/bin/true".into()],
                cwd: "/".into(),
                uid: 2000,
                gid: 2000,
            }),
            wait_for_process: None,
            android_package: None,
            initial_pids: vec![1234],
            enable_on_exec: false,
            stop_pids: true,
        };

        let mut bytes = Vec::new();
        cfg.encode(&mut bytes).unwrap();
        let decoded = CaptureConfiguration::decode(bytes.as_slice()).unwrap();
        assert_eq!(cfg, decoded);
    }
}

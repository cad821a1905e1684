//! Core engine of a Linux performance-data capture daemon: perf-event
//! ring buffers, a per-core mmap binding manager, a typed IPC fabric, and
//! the agent processes that sit on top of them (perf capture, external
//! annotation/GPU-timeline fan-in).
//!
//! ## Layout
//!
//! - [`ffi`] / [`config`] / [`count`] / [`event`] / [`sample`]: the
//!   low-level `perf_event_open` wrapper this crate is built on.
//! - [`activator`] (C5): opens and mmaps one `perf_event_open` fd per
//!   (core, event), translating the syscall's error surface into a typed
//!   [`activator::ActivatorStatus`].
//! - [`binding`] (C6): reconciles the declarative event-group plan
//!   against the live set of online cores and tracked pids.
//! - [`topology`] (C11): cluster/cpuid grouping of cores.
//! - [`ring`] (C1/C2): the lock-free single-producer/single-consumer
//!   frame ring buffer and its varint pack codec.
//! - [`ipc`] (C3): the typed, length-delimited message channel every
//!   agent process uses to talk to the shell.
//! - [`agent`] (C4, plus [`agent::perf`]/C8 and [`agent::external`]/C9):
//!   the harness every child process runs and the two concrete agents
//!   hosted in it.
//! - [`capture`] (C7) / [`capture_config`] (§3 wire schema): pid tracking
//!   and the protobuf-shaped configuration sent to the perf agent.
//! - [`shell`] (C10): the supervisor process — spawns every agent,
//!   demultiplexes their IPC traffic onto the single outbound stream,
//!   and routes host commands back to the owning agent.
//! - [`logging`]: the process-wide `tracing` sink, with an explicit
//!   initialise/teardown pair tied to process entry rather than a
//!   lazily-initialised global.
//!
//! ## Kernel compatibility
//!
//! Any Linux kernel since 4.0 is supported. Use the Linux version
//! features to ensure your binary is compatible with the target host
//! kernel; these are backwards compatible, e.g. `linux-6.11` works with
//! Linux 6.12 but may not work with Linux 6.10. The `legacy` feature
//! targets the oldest LTS kernel still in maintenance; `latest` drops
//! compatibility concerns entirely.

pub mod activator;
pub mod agent;
pub mod binding;
pub mod capture;
pub mod capture_config;
pub mod config;
pub mod count;
pub mod event;
mod ffi;
pub mod ipc;
pub mod logging;
pub mod ring;
pub mod sample;
pub mod shell;
pub mod topology;

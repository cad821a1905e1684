//! Seam between the binding manager (C6) and the perf activator (C5),
//! so the manager's reconciliation logic can be exercised in tests
//! without a real kernel counter fd.

use std::fs::File;
use std::io::Result as IoResult;

use crate::activator::{self, ActivatorStatus, CreateResult, EnableState, MmapHandle};
use crate::capture_config::{KernelCapabilities, PerfEventDefinition};

pub trait Syscalls: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn create_event(
        &self,
        def: &PerfEventDefinition,
        caps: &KernelCapabilities,
        enable_state: EnableState,
        core: i32,
        pid: i32,
        group_fd: i32,
        sample_period: u64,
        exclude_kernel: bool,
        is_system_wide: bool,
    ) -> CreateResult;

    fn mmap_data(&self, fd: &File, page_size: usize, data_pages: usize) -> IoResult<MmapHandle>;
    fn mmap_aux(
        &self,
        data: &MmapHandle,
        fd: &File,
        page_size: usize,
        aux_pages: usize,
    ) -> IoResult<MmapHandle>;
    fn set_output(&self, fd: &File, target: &File) -> IoResult<()>;
    fn start(&self, fd: &File) -> IoResult<()>;
    fn stop(&self, fd: &File) -> IoResult<()>;
}

/// Forwards to the real `perf_event_open`-based activator.
pub struct RealSyscalls;

impl Syscalls for RealSyscalls {
    fn create_event(
        &self,
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
        activator::create_event(
            def,
            caps,
            enable_state,
            core,
            pid,
            group_fd,
            sample_period,
            exclude_kernel,
            is_system_wide,
        )
    }

    fn mmap_data(&self, fd: &File, page_size: usize, data_pages: usize) -> IoResult<MmapHandle> {
        activator::mmap_data(fd, page_size, data_pages)
    }

    fn mmap_aux(
        &self,
        data: &MmapHandle,
        fd: &File,
        page_size: usize,
        aux_pages: usize,
    ) -> IoResult<MmapHandle> {
        activator::mmap_aux(data, fd, page_size, aux_pages)
    }

    fn set_output(&self, fd: &File, target: &File) -> IoResult<()> {
        activator::set_output(fd, target)
    }

    fn start(&self, fd: &File) -> IoResult<()> {
        activator::start(fd)
    }

    fn stop(&self, fd: &File) -> IoResult<()> {
        activator::stop(fd)
    }
}

#[allow(unused)]
pub(crate) fn status_from(result: &CreateResult) -> ActivatorStatus {
    result.status
}

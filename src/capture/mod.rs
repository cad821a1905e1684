//! Capture events helper (C7): a thin facade over [`crate::binding`]
//! that resolves which threads to attach to, freezing them with
//! `SIGSTOP` when the capture agent is waiting on a not-yet-running
//! Android app.

use std::collections::HashSet;
use std::fs;
use std::io;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::warn;

/// Lists the thread ids of `pid` by reading `/proc/<pid>/task`.
fn list_tasks(pid: i32) -> io::Result<Vec<i32>> {
    let mut tids = Vec::new();
    for entry in fs::read_dir(format!("/proc/{pid}/task"))? {
        let entry = entry?;
        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
            tids.push(tid);
        }
    }
    Ok(tids)
}

/// Lists the child pids of `tid` (inside `pid`'s task group) by reading
/// `/proc/<pid>/task/<tid>/children`.
fn list_children(pid: i32, tid: i32) -> io::Result<Vec<i32>> {
    let raw = fs::read_to_string(format!("/proc/{pid}/task/{tid}/children"))?;
    Ok(raw.split_whitespace().filter_map(|s| s.parse::<i32>().ok()).collect())
}

/// Walks `/proc/<pid>/task` and `children` recursively from every root
/// pid, returning every thread/process id reachable. Pids that have
/// already exited are silently skipped (race with the kernel is
/// expected and not an error here).
pub fn enumerate_tracked(roots: &[i32]) -> Vec<i32> {
    let mut seen = HashSet::new();
    let mut stack: Vec<i32> = roots.to_vec();

    while let Some(pid) = stack.pop() {
        if !seen.insert(pid) {
            continue;
        }
        let tids = match list_tasks(pid) {
            Ok(tids) => tids,
            Err(_) => continue,
        };
        for &tid in &tids {
            seen.insert(tid);
            if let Ok(children) = list_children(pid, tid) {
                for child in children {
                    if !seen.contains(&child) {
                        stack.push(child);
                    }
                }
            }
        }
    }

    seen.into_iter().collect()
}

/// Sends `SIGSTOP` to every pid in `tids`, excluding `exclude` (the
/// gatord process family, which must keep running to observe the
/// capture). Returns only the pids that were actually signalled, so the
/// matching `ResumeGuard` only resumes what it froze.
fn stop_all(tids: &[i32], exclude: &HashSet<i32>) -> Vec<i32> {
    let mut stopped = Vec::with_capacity(tids.len());
    for &tid in tids {
        if exclude.contains(&tid) {
            continue;
        }
        match kill(Pid::from_raw(tid), Signal::SIGSTOP) {
            Ok(()) => stopped.push(tid),
            Err(nix::errno::Errno::ESRCH) => {} // exited between enumerate and stop
            Err(e) => warn!(tid, error = %e, "SIGSTOP failed"),
        }
    }
    stopped
}

/// Resumes every pid it was given when dropped. Held by the caller for
/// the duration of the "stop pids" enumeration window.
pub struct ResumeGuard {
    stopped: Vec<i32>,
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        for &tid in &self.stopped {
            if let Err(e) = kill(Pid::from_raw(tid), Signal::SIGCONT) {
                warn!(tid, error = %e, "SIGCONT failed on resume");
            }
        }
    }
}

/// Freezes every currently-reachable thread under `roots` (excluding
/// `exclude`), re-enumerates to catch anything that appeared during the
/// stop window, and returns the merged set plus a guard that resumes
/// everything it stopped when dropped.
pub fn stop_and_enumerate(roots: &[i32], exclude: &HashSet<i32>) -> (Vec<i32>, ResumeGuard) {
    let before = enumerate_tracked(roots);
    let stopped = stop_all(&before, exclude);
    let after = enumerate_tracked(roots);

    let mut merged: HashSet<i32> = before.into_iter().collect();
    merged.extend(after);

    (merged.into_iter().collect(), ResumeGuard { stopped })
}

/// Reads the current process's own tids (`/proc/self/task`), used when
/// self-profiling is enabled so the capture agent's own threads show up
/// in the stream.
pub fn self_tids() -> io::Result<Vec<i32>> {
    list_tasks(std::process::id() as i32)
}

/// Resolves and tracks the pid set for one capture session: the thin
/// facade C7 wraps around C6's `pid_track_prepare`/`pid_track_start`.
pub struct CaptureEvents {
    tracked: HashSet<i32>,
    app_pid: Option<i32>,
    stop_on_exit: bool,
}

impl CaptureEvents {
    /// `initial_pids` may contain the sentinel `0` (meaning
    /// "self-profile"), which is stripped here; when present and
    /// `self_profile` is true, the agent's own tids are tracked instead.
    pub fn new(initial_pids: &[i32], self_profile: bool, stop_on_exit: bool) -> Self {
        let mut tracked: HashSet<i32> = initial_pids.iter().copied().filter(|&p| p != 0).collect();
        let had_self_sentinel = initial_pids.contains(&0);

        if self_profile && had_self_sentinel {
            match self_tids() {
                Ok(tids) => tracked.extend(tids),
                Err(e) => warn!(error = %e, "failed to enumerate self tids for self-profiling"),
            }
        }

        CaptureEvents { tracked, app_pid: None, stop_on_exit }
    }

    pub fn set_app_pid(&mut self, pid: i32) {
        self.app_pid = Some(pid);
        self.tracked.insert(pid);
    }

    /// Drops the `--app` pid from the tracked set once it has been
    /// recorded in the capture-ready message; the forked child's own
    /// exit is then handled exactly like any other tracked pid exiting.
    pub fn remove_app_pid(&mut self) {
        if let Some(pid) = self.app_pid.take() {
            self.tracked.remove(&pid);
        }
    }

    pub fn track(&mut self, pid: i32) {
        if pid != 0 {
            self.tracked.insert(pid);
        }
    }

    pub fn untrack(&mut self, pid: i32) {
        self.tracked.remove(&pid);
    }

    pub fn tracked(&self) -> Vec<i32> {
        self.tracked.iter().copied().collect()
    }

    /// True once every tracked pid has exited and the session was
    /// configured to stop when that happens.
    pub fn should_terminate(&self) -> bool {
        self.stop_on_exit && self.tracked.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_strips_self_profile_sentinel() {
        let events = CaptureEvents::new(&[0, 42], false, false);
        assert_eq!(events.tracked(), vec![42]);
    }

    #[test]
    fn app_pid_removed_after_fork_exec() {
        let mut events = CaptureEvents::new(&[], false, true);
        events.set_app_pid(99);
        assert!(events.tracked().contains(&99));
        events.remove_app_pid();
        assert!(events.tracked().is_empty());
    }

    #[test]
    fn should_terminate_only_when_stop_on_exit_and_empty() {
        let mut events = CaptureEvents::new(&[42], false, true);
        assert!(!events.should_terminate());
        events.untrack(42);
        assert!(events.should_terminate());

        let events = CaptureEvents::new(&[], false, false);
        assert!(!events.should_terminate());
    }

    #[test]
    fn enumerate_tracked_handles_missing_pid_gracefully() {
        // A pid this unlikely to exist must not panic, just be skipped.
        let result = enumerate_tracked(&[i32::MAX - 1]);
        assert!(result.is_empty() || result == vec![i32::MAX - 1]);
    }
}

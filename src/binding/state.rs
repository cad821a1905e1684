//! Event binding state machine (§3 "Event binding").

/// The state of one leaf event binding (one `perf_event_attr` tied to a
/// (core, pid, group-leader-fd) triple).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingState {
    Offline,
    Ready,
    Online,
    Failed,
    Terminated,
    NotSupported,
}

/// A transition trigger, named after the event that caused it (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    CreateSucceeded,
    CoreWasOffline,
    PidAlreadyExited,
    FatalErrno,
    DeviceNotSupported,
    EnableSucceeded,
    ExplicitStop,
    FullTeardown,
    SyscallError,
}

impl BindingState {
    /// The next state for `trigger` fired from `self`, or `None` if the
    /// transition isn't one of the ones named in §3 (the caller should
    /// treat that as a bookkeeping invariant violation per §7).
    pub fn apply(self, trigger: Trigger) -> Option<BindingState> {
        use BindingState::*;
        use Trigger::*;
        match (self, trigger) {
            (Offline, CreateSucceeded) => Some(Ready),
            (Offline, CoreWasOffline) => Some(Offline),
            (Offline, PidAlreadyExited) => Some(Terminated),
            (Offline, FatalErrno) => Some(Failed),
            (Offline, DeviceNotSupported) => Some(NotSupported),
            (Ready, EnableSucceeded) => Some(Online),
            (Ready, ExplicitStop) => Some(Offline),
            (Online, ExplicitStop) => Some(Ready),
            (Ready, FullTeardown) | (Online, FullTeardown) => Some(Offline),
            (_, SyscallError) => Some(Failed),
            _ => None,
        }
    }

    /// True for states from which the binding can still be driven
    /// forward (as opposed to a terminal outcome).
    pub fn is_live(self) -> bool {
        matches!(self, BindingState::Ready | BindingState::Online)
    }

    pub fn is_usable(self) -> bool {
        matches!(self, BindingState::Ready | BindingState::Online | BindingState::NotSupported)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn happy_path_offline_to_online_and_back() {
        let s = BindingState::Offline;
        let s = s.apply(Trigger::CreateSucceeded).unwrap();
        assert_eq!(s, BindingState::Ready);
        let s = s.apply(Trigger::EnableSucceeded).unwrap();
        assert_eq!(s, BindingState::Online);
        let s = s.apply(Trigger::ExplicitStop).unwrap();
        assert_eq!(s, BindingState::Ready);
        let s = s.apply(Trigger::FullTeardown).unwrap();
        assert_eq!(s, BindingState::Offline);
    }

    #[test]
    fn failed_never_reenters_ready_without_offline() {
        let s = BindingState::Offline.apply(Trigger::FatalErrno).unwrap();
        assert_eq!(s, BindingState::Failed);
        // There is no transition out of Failed in the table at all:
        // every trigger either stays unmapped or would itself have to
        // originate from a state the binding has already left.
        assert_eq!(s.apply(Trigger::EnableSucceeded), None);
        assert_eq!(s.apply(Trigger::CreateSucceeded), None);
    }

    #[test]
    fn errno_mapping_matches_section_3() {
        let base = BindingState::Offline;
        assert_eq!(base.apply(Trigger::CoreWasOffline), Some(BindingState::Offline));
        assert_eq!(base.apply(Trigger::PidAlreadyExited), Some(BindingState::Terminated));
        assert_eq!(base.apply(Trigger::DeviceNotSupported), Some(BindingState::NotSupported));
    }
}

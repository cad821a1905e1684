//! Event binding group (§3): a pinned leader plus its followers, or a
//! solitary stand-alone event.

use std::fs::File;

use crate::activator::MmapHandle;

use super::state::BindingState;

/// One leaf binding inside a group: the kernel fd (once opened) plus its
/// state-machine state.
pub struct EventBinding {
    pub state: BindingState,
    pub fd: Option<File>,
    pub perf_id: Option<u64>,
    /// True for a leader that is the sole member and targets one
    /// specific PMU type (the "single PMU event" case in the group
    /// usable-skipped policy).
    pub is_single_pmu_leader: bool,
    /// The AUX ring, mapped only for aux-carrying (SPE) events when the
    /// kernel reports `has_aux_support`.
    pub aux_mmap: Option<MmapHandle>,
}

impl EventBinding {
    pub fn new(is_single_pmu_leader: bool) -> Self {
        EventBinding {
            state: BindingState::Offline,
            fd: None,
            perf_id: None,
            is_single_pmu_leader,
            aux_mmap: None,
        }
    }
}

/// Outcome of evaluating a group's member states against the policy in
/// §3 "Event binding group".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupAggregate {
    /// At least one event is live (or the leader was skipped per
    /// policy and there's nothing left to report).
    Usable,
    /// The leader is a single-PMU event that came back not-supported;
    /// the group counts as usable with zero events (no fds held).
    UsableSkipped,
    Terminated,
    Offline,
    Failed,
}

/// An ordered list of bindings sharing one core and pid. `members[0]` is
/// the leader (pinned) or the sole solitary event.
pub struct EventBindingGroup {
    pub members: Vec<EventBinding>,
}

impl EventBindingGroup {
    pub fn new(members: Vec<EventBinding>) -> Self {
        EventBindingGroup { members }
    }

    /// Evaluates the group's aggregate state per the teardown/skip
    /// policy: a not-supported follower is silently ignored (legacy
    /// big.LITTLE compatibility); a terminated/offline/failed follower
    /// tears down the whole group; a not-supported single-PMU leader
    /// with no followers makes the group usable-skipped.
    pub fn aggregate(&self) -> GroupAggregate {
        if self.members.is_empty() {
            return GroupAggregate::Usable;
        }

        let leader = &self.members[0];
        let followers = &self.members[1..];

        if followers.is_empty()
            && leader.is_single_pmu_leader
            && leader.state == BindingState::NotSupported
        {
            return GroupAggregate::UsableSkipped;
        }

        for f in followers {
            match f.state {
                BindingState::Terminated => return GroupAggregate::Terminated,
                BindingState::Offline => return GroupAggregate::Offline,
                BindingState::Failed => return GroupAggregate::Failed,
                BindingState::NotSupported => continue, // silently ignored
                BindingState::Ready | BindingState::Online => continue,
            }
        }

        match leader.state {
            BindingState::Terminated => GroupAggregate::Terminated,
            BindingState::Offline => GroupAggregate::Offline,
            BindingState::Failed => GroupAggregate::Failed,
            _ => GroupAggregate::Usable,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn binding(state: BindingState) -> EventBinding {
        EventBinding { state, fd: None, perf_id: None, is_single_pmu_leader: false, aux_mmap: None }
    }

    #[test]
    fn not_supported_single_pmu_leader_is_usable_skipped() {
        let mut leader = binding(BindingState::NotSupported);
        leader.is_single_pmu_leader = true;
        let group = EventBindingGroup::new(vec![leader]);
        assert_eq!(group.aggregate(), GroupAggregate::UsableSkipped);
    }

    #[test]
    fn not_supported_follower_is_ignored() {
        let leader = binding(BindingState::Ready);
        let follower = binding(BindingState::NotSupported);
        let group = EventBindingGroup::new(vec![leader, follower]);
        assert_eq!(group.aggregate(), GroupAggregate::Usable);
    }

    #[test]
    fn terminated_follower_tears_down_whole_group() {
        let leader = binding(BindingState::Online);
        let follower = binding(BindingState::Terminated);
        let group = EventBindingGroup::new(vec![leader, follower]);
        assert_eq!(group.aggregate(), GroupAggregate::Terminated);
    }

    #[test]
    fn failed_leader_with_no_followers_is_failed() {
        let group = EventBindingGroup::new(vec![binding(BindingState::Failed)]);
        assert_eq!(group.aggregate(), GroupAggregate::Failed);
    }
}

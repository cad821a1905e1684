//! Event binding set (§3): all event binding groups for a single
//! (core, pid) pair.

use super::group::{EventBindingGroup, GroupAggregate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetAggregate {
    Usable,
    Terminated,
    Offline,
    Failed,
}

pub struct EventBindingSet {
    pub core: u32,
    pub pid: i32,
    pub groups: Vec<EventBindingGroup>,
}

impl EventBindingSet {
    pub fn new(core: u32, pid: i32, groups: Vec<EventBindingGroup>) -> Self {
        EventBindingSet { core, pid, groups }
    }

    /// Derives the set's aggregate state from its groups: usable if any
    /// group is usable (including usable-skipped); else terminated if
    /// every group terminated; else offline if any group is offline;
    /// else failed.
    pub fn aggregate(&self) -> SetAggregate {
        if self.groups.is_empty() {
            return SetAggregate::Usable;
        }

        let aggregates: Vec<GroupAggregate> = self.groups.iter().map(|g| g.aggregate()).collect();

        if aggregates
            .iter()
            .any(|a| matches!(a, GroupAggregate::Usable | GroupAggregate::UsableSkipped))
        {
            return SetAggregate::Usable;
        }
        if aggregates.iter().all(|a| *a == GroupAggregate::Terminated) {
            return SetAggregate::Terminated;
        }
        if aggregates.iter().any(|a| *a == GroupAggregate::Offline) {
            return SetAggregate::Offline;
        }
        SetAggregate::Failed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::binding::group::EventBinding;
    use crate::binding::state::BindingState;

    fn group_with(state: BindingState) -> EventBindingGroup {
        EventBindingGroup::new(vec![EventBinding {
            state,
            fd: None,
            perf_id: None,
            is_single_pmu_leader: false,
            aux_mmap: None,
        }])
    }

    #[test]
    fn any_usable_group_makes_set_usable() {
        let set = EventBindingSet::new(
            0,
            -1,
            vec![group_with(BindingState::Failed), group_with(BindingState::Online)],
        );
        assert_eq!(set.aggregate(), SetAggregate::Usable);
    }

    #[test]
    fn all_terminated_is_terminated() {
        let set = EventBindingSet::new(
            0,
            123,
            vec![group_with(BindingState::Terminated), group_with(BindingState::Terminated)],
        );
        assert_eq!(set.aggregate(), SetAggregate::Terminated);
    }

    #[test]
    fn mixed_offline_and_failed_prefers_offline() {
        let set = EventBindingSet::new(
            0,
            123,
            vec![group_with(BindingState::Offline), group_with(BindingState::Failed)],
        );
        assert_eq!(set.aggregate(), SetAggregate::Offline);
    }
}

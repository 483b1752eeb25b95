//! Readiness of requested callbacks and the cycle-breaking heuristic.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::callback::{CallbackInstance, CallbackKey};
use crate::graph::CallbackId;
use crate::id::PropId;

/// Properties still to be written by outstanding callbacks, with the
/// instances that will write them.
#[derive(Clone, Debug, Default)]
pub struct PendingSet {
    props: HashMap<PropId, SmallVec<[CallbackKey; 2]>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prop: PropId, contributor: &CallbackKey) {
        let contributors = self.props.entry(prop).or_default();
        if !contributors.contains(contributor) {
            contributors.push(contributor.clone());
        }
    }

    pub fn add_all(&mut self, props: impl IntoIterator<Item = PropId>, contributor: &CallbackKey) {
        for prop in props {
            self.add(prop, contributor);
        }
    }

    /// Outputs of each instance, contributed under its own key.
    pub fn from_outputs<'a>(instances: impl IntoIterator<Item = &'a CallbackInstance>) -> Self {
        let mut pending = Self::new();
        for instance in instances {
            pending.add_all(instance.output_ids(), &instance.key);
        }
        pending
    }

    pub fn contains(&self, prop: &PropId) -> bool {
        self.props.contains_key(prop)
    }

    /// Pending because of some instance other than `candidate`.
    pub fn blocks(&self, prop: &PropId, candidate: &CallbackKey) -> bool {
        self.props
            .get(prop)
            .is_some_and(|contributors| contributors.iter().any(|key| key != candidate))
    }

    pub fn props(&self) -> impl Iterator<Item = &PropId> {
        self.props.keys()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

/// No input or state of the instance is pending. Its own outputs never block
/// it (a callback may read what it writes).
pub fn is_ready(instance: &CallbackInstance, pending: &PendingSet) -> bool {
    let own_outputs: HashSet<PropId> = instance.output_ids().into_iter().collect();
    instance
        .input_props()
        .chain(instance.state_props())
        .map(|prop| prop.prop_id())
        .filter(|prop| !own_outputs.contains(prop))
        .all(|prop| !pending.blocks(&prop, &instance.key))
}

pub fn get_ready_callbacks<'c>(
    candidates: impl IntoIterator<Item = &'c CallbackInstance>,
    pending: &PendingSet,
) -> Vec<&'c CallbackInstance> {
    candidates
        .into_iter()
        .filter(|candidate| is_ready(candidate, pending))
        .collect()
}

/// Result of breaking a pure cycle: indices into the candidate list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadyPlan {
    pub ready: Vec<usize>,
    /// Candidates blocked by an assumption, with the declaration assumed
    /// ready, to be appended to their predecessors.
    pub assumed: Vec<(usize, CallbackId)>,
}

/// Heuristic for a requested set that only waits on itself: assume the first
/// candidate is ready, keep whatever is not blocked by the assumptions so far,
/// and repeat. Not proven correct when several independent cycles are
/// requested at once.
pub fn break_cycles(candidates: &[&CallbackInstance]) -> ReadyPlan {
    let mut plan = ReadyPlan::default();
    let mut pending = PendingSet::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while let Some((&first, rest)) = remaining.split_first() {
        let assumed = candidates[first];
        plan.ready.push(first);
        pending.add_all(assumed.output_ids(), &assumed.key);

        let (unblocked, blocked): (Vec<usize>, Vec<usize>) =
            rest.iter().copied().partition(|&index| is_ready(candidates[index], &pending));
        for index in blocked {
            if !candidates[index].predecessors.contains(&assumed.callback.id) {
                plan.assumed.push((index, assumed.callback.id.clone()));
            }
        }
        remaining = unblocked;
    }
    plan
}

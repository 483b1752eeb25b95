//! `requested → prioritized`: dedup, prune, readiness and group relevance.

use std::collections::HashSet;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::ObserverContext;
use crate::arena::SlotId;
use crate::callback::{CallbackInstance, CallbackKey};
use crate::id::PropId;
use crate::queue::{Batch, Queue, QueueState, QueuedCallback};
use crate::readiness::{PendingSet, break_cycles, is_ready};

/// Queues whose outputs keep a property pending for `requested`.
const IN_FLIGHT: [Queue; 5] = [
    Queue::Prioritized,
    Queue::Blocked,
    Queue::Executing,
    Queue::Watched,
    Queue::Executed,
];

/// One deduplicated requested instance and the entries it replaces.
struct Work {
    origins: SmallVec<[SlotId; 2]>,
    instance: CallbackInstance,
    changed: bool,
}

impl Work {
    fn retire(&self, batch: &mut Batch) {
        for origin in &self.origins {
            batch.remove(Queue::Requested, *origin);
        }
    }
}

pub fn run(state: &QueueState, cx: &ObserverContext<'_>) -> Batch {
    let mut batch = Batch::new();
    let mut live = Vec::new();
    for (slot, entry) in state.entries(Queue::Requested) {
        if entry.instance.is_circular() {
            log::debug!("dropping circular {}", entry.key());
            batch.remove(Queue::Requested, slot);
        } else {
            live.push((slot, &entry.instance));
        }
    }
    if live.is_empty() {
        return batch;
    }

    let resolver = cx.resolver();
    let mut work = dedup(live);
    work.retain_mut(|item| match resolver.refresh(&item.instance) {
        Some(refreshed) => {
            if refreshed != item.instance {
                item.instance = refreshed;
                item.changed = true;
            }
            true
        }
        None => {
            log::debug!("pruning {}: a dependency is no longer mounted", item.instance.key);
            item.retire(&mut batch);
            false
        }
    });

    let in_flight: Vec<&CallbackInstance> = IN_FLIGHT.iter().flat_map(|queue| state.instances(*queue)).collect();
    let mut pending = PendingSet::from_outputs(work.iter().map(|item| &item.instance).chain(in_flight.iter().copied()));
    if cx.config.follow_subsequent_outputs {
        for instance in work.iter().map(|item| &item.instance).chain(in_flight.iter().copied()) {
            pending.add_all(resolver.subsequent_outputs(instance), &instance.key);
        }
    }

    let mut ready: Vec<bool> = work.iter().map(|item| is_ready(&item.instance, &pending)).collect();
    if !work.is_empty() && !ready.contains(&true) && in_flight.is_empty() {
        let candidates: Vec<&CallbackInstance> = work.iter().map(|item| &item.instance).collect();
        let plan = break_cycles(&candidates);
        log::warn!(
            "requested callbacks only wait on each other; assuming {} ready",
            candidates[plan.ready[0]].key
        );
        for index in plan.ready {
            ready[index] = true;
        }
        for (index, assumed) in plan.assumed {
            work[index].instance.predecessors.push(assumed);
            work[index].changed = true;
        }
    }

    let stored: Vec<&QueuedCallback> = state.entries(Queue::Stored).map(|(_, entry)| entry).collect();
    for (item, ready) in work.into_iter().zip(ready) {
        if ready && is_irrelevant(&item.instance, &stored) {
            log::debug!("dropping {}: nothing it reads was updated by its group", item.instance.key);
            item.retire(&mut batch);
        } else if ready {
            item.retire(&mut batch);
            batch.add_instance(Queue::Prioritized, item.instance);
        } else if item.changed {
            item.retire(&mut batch);
            batch.add_instance(Queue::Requested, item.instance);
        }
    }
    batch
}

/// Merge entries sharing a key. The survivor takes the newest resolution,
/// the per-prop maximum of changed versions and every execution group; an
/// initial call loses to an explicitly triggered duplicate.
fn dedup(entries: Vec<(SlotId, &CallbackInstance)>) -> Vec<Work> {
    let mut by_key: IndexMap<CallbackKey, Vec<(SlotId, &CallbackInstance)>> = IndexMap::new();
    for (slot, instance) in entries {
        by_key.entry(instance.key.clone()).or_default().push((slot, instance));
    }

    by_key
        .into_values()
        .filter_map(|members| {
            let explicit = members.iter().any(|(_, instance)| !instance.initial_call);
            let (_, base) = members
                .iter()
                .rev()
                .find(|(_, instance)| !explicit || !instance.initial_call)?;
            let mut merged = (*base).clone();
            if members.len() > 1 {
                for (_, other) in &members {
                    for (prop, version) in &other.changed_props {
                        merged.mark_changed(prop.clone(), *version);
                    }
                    for group in &other.execution_groups {
                        merged = merged.with_group(*group);
                    }
                }
                merged.initial_call = !explicit;
            }
            Some(Work {
                changed: members.len() > 1,
                origins: members.iter().map(|(slot, _)| *slot).collect(),
                instance: merged,
            })
        })
        .collect()
}

/// Completed members of the instance's execution groups could have written
/// all of its inputs but wrote none of them. Multi-valued inputs are always
/// kept.
fn is_irrelevant(instance: &CallbackInstance, stored: &[&QueuedCallback]) -> bool {
    if instance.has_multi_valued_input() {
        return false;
    }
    let metas: Vec<_> = stored
        .iter()
        .filter(|entry| entry.instance.execution_groups.iter().any(|group| instance.in_group(group)))
        .filter_map(|entry| entry.meta.as_ref())
        .collect();
    if metas.is_empty() {
        return false;
    }
    let all_props: HashSet<&PropId> = metas.iter().flat_map(|meta| &meta.all_props).collect();
    let updated: HashSet<&PropId> = metas.iter().flat_map(|meta| &meta.updated_props).collect();
    let inputs = instance.input_ids();
    let touched = inputs.iter().any(|input| updated.contains(input));
    let covered = inputs.iter().all(|input| all_props.contains(input));
    !touched && covered
}

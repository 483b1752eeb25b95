//! `prioritized → executing | blocked`, within the concurrency budget.

use super::{Effects, Gated, Started};
use crate::arena::SlotId;
use crate::config::SchedulerConfig;
use crate::queue::{Batch, Execution, Queue, QueueState, QueuedCallback};

/// Slots to promote this tick: highest priority first, ties in queue order.
/// The budget covers `executing` and `watched`; instances sent to `blocked`
/// in this pass share it with the ones started.
pub fn select(state: &QueueState, config: &SchedulerConfig) -> Vec<SlotId> {
    let busy = state.len(Queue::Executing) + state.len(Queue::Watched);
    let budget = config.max_concurrent.saturating_sub(busy);
    if budget == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<_> = state.entries(Queue::Prioritized).collect();
    candidates.sort_by(|(_, a), (_, b)| b.instance.priority.cmp(&a.instance.priority));
    candidates.into_iter().take(budget).map(|(slot, _)| slot).collect()
}

/// Start every selected instance, or park it in `blocked` when the app is
/// not ready for it.
pub fn run(state: &QueueState, config: &SchedulerConfig, effects: &mut dyn Effects) -> Batch {
    let mut batch = Batch::new();
    for slot in select(state, config) {
        let Some(entry) = state.get(slot) else {
            continue;
        };
        let mut next = QueuedCallback::new(entry.instance.clone());
        match effects.gate(&entry.instance) {
            Gated::Blocked(ticket) => {
                next.ticket = Some(ticket);
                batch.transfer(Queue::Prioritized, slot, Queue::Blocked, next);
            }
            Gated::Ready => {
                start(&mut next, effects);
                batch.transfer(Queue::Prioritized, slot, Queue::Executing, next);
            }
        }
    }
    batch
}

pub(super) fn start(next: &mut QueuedCallback, effects: &mut dyn Effects) {
    match effects.start(&next.instance) {
        Started::Finished(outcome) => next.execution = Some(Execution::Finished(outcome)),
        Started::Pending(ticket) => {
            next.ticket = Some(ticket);
            next.execution = Some(Execution::Pending);
        }
    }
}

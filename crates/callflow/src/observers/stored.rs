//! `stored → []` once no member of an entry's execution groups is pending.

use crate::callback::ExecutionGroup;
use crate::queue::{Batch, Queue, QueueState};

pub fn run(state: &QueueState) -> Batch {
    let live: Vec<ExecutionGroup> = state
        .pending_instances()
        .flat_map(|instance| instance.execution_groups.iter().copied())
        .collect();
    let mut batch = Batch::new();
    for (slot, entry) in state.entries(Queue::Stored) {
        if !entry.instance.execution_groups.iter().any(|group| live.contains(group)) {
            batch.remove(Queue::Stored, slot);
        }
    }
    batch
}

//! `watched → executed` when a running callback answers.

use crate::queue::{Batch, Execution, Queue, QueueState, Ticket};
use crate::runner::CallbackOutcome;

/// Attach the outcome to the instance still waiting under `ticket`. Outcomes
/// of instances that were pruned or superseded meanwhile are discarded.
pub fn resume(state: &QueueState, ticket: Ticket, outcome: CallbackOutcome) -> Batch {
    let mut batch = Batch::new();
    let Some(slot) = state.find_ticket(Queue::Watched, ticket) else {
        log::debug!("discarding the result of {ticket:?}: no longer watched");
        return batch;
    };
    if let Some(entry) = state.get(slot) {
        let mut done = entry.clone();
        done.execution = Some(Execution::Finished(outcome));
        batch.transfer(Queue::Watched, slot, Queue::Executed, done);
    }
    batch
}

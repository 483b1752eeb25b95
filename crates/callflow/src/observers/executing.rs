//! `executing → watched | executed`.

use crate::queue::{Batch, Execution, Queue, QueueState};

pub fn run(state: &QueueState) -> Batch {
    let mut batch = Batch::new();
    for (slot, entry) in state.entries(Queue::Executing) {
        let target = match entry.execution {
            Some(Execution::Finished(_)) => Queue::Executed,
            Some(Execution::Pending) => Queue::Watched,
            None => continue,
        };
        batch.transfer(Queue::Executing, slot, target, entry.clone());
    }
    batch
}

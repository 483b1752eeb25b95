//! `blocked → executing` once the app-readiness gate resolves.

use super::Effects;
use super::prioritized::start;
use crate::queue::{Batch, Queue, QueueState, QueuedCallback, Ticket};

/// Start the instance parked under `ticket`, if it is still in `blocked`.
pub fn resume(state: &QueueState, ticket: Ticket, effects: &mut dyn Effects) -> Batch {
    let mut batch = Batch::new();
    let Some(slot) = state.find_ticket(Queue::Blocked, ticket) else {
        log::debug!("gate {ticket:?} resolved for an instance that left `blocked`");
        return batch;
    };
    let Some(entry) = state.get(slot) else {
        return batch;
    };
    let mut next = QueuedCallback::new(entry.instance.clone());
    start(&mut next, effects);
    batch.transfer(Queue::Blocked, slot, Queue::Executing, next);
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackInstance;
    use crate::observers::{Gated, Started};
    use crate::test_harness::{Fixture, components};
    use serde_json::json;

    struct Pending;

    impl Effects for Pending {
        fn gate(&mut self, _instance: &CallbackInstance) -> Gated {
            Gated::Ready
        }

        fn start(&mut self, _instance: &CallbackInstance) -> Started {
            Started::Pending(Ticket(9))
        }
    }

    #[test]
    fn resumed_instances_start_and_stale_tickets_are_ignored() {
        let fixture = Fixture::new(
            json!([{"output": "b.value", "inputs": [{"id": "a", "property": "value"}]}]),
            components(&["a", "b"]),
        );
        let mut parked = QueuedCallback::new(fixture.by_input("a", "value", 1).remove(0));
        parked.ticket = Some(Ticket(3));
        let mut state = QueueState::new();
        let mut batch = Batch::new();
        batch.add(Queue::Blocked, parked);
        state.apply(batch);

        assert!(resume(&state, Ticket(4), &mut Pending).is_empty());
        state.apply(resume(&state, Ticket(3), &mut Pending));
        assert_eq!(state.len(Queue::Blocked), 0);
        let (_, running) = state.entries(Queue::Executing).next().unwrap();
        assert_eq!(running.ticket, Some(Ticket(9)));
    }
}

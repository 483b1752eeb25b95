//! One transition routine per queue.
//!
//! Each observer reads a consistent `QueueState` and returns a `Batch`; the
//! scheduler applies it before the next observer runs. Observers that start
//! work (`prioritized`, `blocked`) reach the outside world only through
//! `Effects`.

pub mod blocked;
pub mod executed;
pub mod executing;
pub mod prioritized;
pub mod requested;
pub mod stored;
pub mod watched;

use crate::callback::CallbackInstance;
use crate::config::SchedulerConfig;
use crate::graph::DependencyGraph;
use crate::paths::PathIndex;
use crate::queue::Ticket;
use crate::resolve::Resolver;
use crate::runner::CallbackOutcome;

/// Read-only inputs shared by the pure observers.
#[derive(Clone, Copy)]
pub struct ObserverContext<'a> {
    pub graph: &'a DependencyGraph,
    pub paths: &'a PathIndex,
    pub config: &'a SchedulerConfig,
}

impl<'a> ObserverContext<'a> {
    pub fn resolver(&self) -> Resolver<'a> {
        Resolver::new(self.graph, self.paths)
    }
}

/// Answer of the app-readiness gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gated {
    Ready,
    /// Suspended until the ticket is resumed.
    Blocked(Ticket),
}

#[derive(Debug)]
pub enum Started {
    Finished(CallbackOutcome),
    /// Running; the outcome arrives with this ticket.
    Pending(Ticket),
}

/// Side effects of starting callbacks.
pub trait Effects {
    fn gate(&mut self, instance: &CallbackInstance) -> Gated;
    /// Invoke the callback. Called exactly once per execution attempt.
    fn start(&mut self, instance: &CallbackInstance) -> Started;
}

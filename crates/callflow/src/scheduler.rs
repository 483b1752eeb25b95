//! The scheduler context: owns the layout, the path index and the queues,
//! and drives the observers until nothing is left to do.
//!
//! Concurrency is cooperative. Suspended work (`blocked` and `watched`
//! entries) is tracked as futures keyed by ticket; resuming one is a queue
//! transition, never a continuation.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_channel::mpsc;
use futures_util::future::LocalBoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use pin_project::pin_project;
use serde_json::Value;

use crate::callback::{CallbackInstance, ExecutionGroup};
use crate::config::SchedulerConfig;
use crate::error::{DispatchError, ErrorReporter, LogReporter, SchedulerError};
use crate::gate::{AlwaysReady, AppReadiness, Readiness};
use crate::graph::DependencyGraph;
use crate::id::ComponentId;
use crate::layout::Layout;
use crate::ledger::{Ledger, LedgerKind};
use crate::loading::LoadingMap;
use crate::merger::{ChangeSource, MergeContext};
use crate::observers::{self, Effects, Gated, ObserverContext, Started};
use crate::paths::PathIndex;
use crate::persistence::{NoPersistence, Persistence};
use crate::queue::{Batch, QueueState, Ticket};
use crate::reconcile::{Reconciler, StandardReconciler};
use crate::resolve::{LayoutScan, Resolver};
use crate::runner::{Backend, CallbackOutcome, ClientsideRegistry, Invocation, NoBackend, execute_callback};
use crate::snapshot::QueueSnapshot;

/// A property change entering the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChange {
    pub id: ComponentId,
    pub property: String,
    pub value: Value,
    pub source: ChangeSource,
}

impl PropertyChange {
    pub fn new(id: impl Into<ComponentId>, property: impl Into<String>, value: Value, source: ChangeSource) -> Self {
        Self {
            id: id.into(),
            property: property.into(),
            value,
            source,
        }
    }

    pub fn user(id: impl Into<ComponentId>, property: impl Into<String>, value: Value) -> Self {
        Self::new(id, property, value, ChangeSource::User)
    }
}

/// Cloneable handle for sending changes to a scheduler.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<PropertyChange>,
}

impl Dispatcher {
    pub fn dispatch(&self, change: PropertyChange) -> Result<(), DispatchError> {
        self.sender.unbounded_send(change).map_err(|_| DispatchError::Closed)
    }
}

/// The scheduler's external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Rc<dyn Backend>,
    pub clientside: ClientsideRegistry,
    pub readiness: Rc<dyn AppReadiness>,
    pub persistence: Rc<dyn Persistence>,
    pub reconciler: Rc<dyn Reconciler>,
    pub errors: Rc<dyn ErrorReporter>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            backend: Rc::new(NoBackend),
            clientside: ClientsideRegistry::new(),
            readiness: Rc::new(AlwaysReady),
            persistence: Rc::new(NoPersistence),
            reconciler: Rc::new(StandardReconciler),
            errors: Rc::new(LogReporter),
        }
    }
}

impl Collaborators {
    pub fn with_backend(mut self, backend: Rc<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_clientside(mut self, clientside: ClientsideRegistry) -> Self {
        self.clientside = clientside;
        self
    }

    pub fn with_readiness(mut self, readiness: Rc<dyn AppReadiness>) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_persistence(mut self, persistence: Rc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_reconciler(mut self, reconciler: Rc<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_errors(mut self, errors: Rc<dyn ErrorReporter>) -> Self {
        self.errors = errors;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SuspendPoint {
    Watched(Ticket),
    Blocked(Ticket),
}

enum Resumption {
    AppReady,
    Finished(CallbackOutcome),
}

/// A suspended continuation: resolves to its point and what resumed it.
#[pin_project]
struct Suspended<F> {
    point: SuspendPoint,
    #[pin]
    future: F,
}

impl<F: Future<Output = Resumption>> Future for Suspended<F> {
    type Output = (SuspendPoint, Resumption);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let point = *this.point;
        this.future.poll(cx).map(|resumption| (point, resumption))
    }
}

type SuspendedSet = FuturesUnordered<Suspended<LocalBoxFuture<'static, Resumption>>>;

/// Yields to the executor once.
struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Starts callbacks for the `prioritized` and `blocked` observers.
struct Launcher<'s> {
    layout: &'s Layout,
    paths: &'s PathIndex,
    collaborators: &'s Collaborators,
    suspended: &'s mut SuspendedSet,
    next_ticket: &'s mut u64,
}

impl Launcher<'_> {
    fn suspend(&mut self, point: impl FnOnce(Ticket) -> SuspendPoint, future: LocalBoxFuture<'static, Resumption>) -> Ticket {
        *self.next_ticket += 1;
        let ticket = Ticket(*self.next_ticket);
        self.suspended.push(Suspended {
            point: point(ticket),
            future,
        });
        ticket
    }
}

impl Effects for Launcher<'_> {
    fn gate(&mut self, instance: &CallbackInstance) -> Gated {
        match self
            .collaborators
            .readiness
            .is_ready(self.layout, self.paths, &instance.component_ids())
        {
            Readiness::Ready => Gated::Ready,
            Readiness::Waiting(future) => {
                let ticket = self.suspend(SuspendPoint::Blocked, future.map(|()| Resumption::AppReady).boxed_local());
                log::debug!("{} waits for the app ({ticket:?})", instance.key);
                Gated::Blocked(ticket)
            }
        }
    }

    fn start(&mut self, instance: &CallbackInstance) -> Started {
        let backend = &*self.collaborators.backend;
        match execute_callback(instance, self.layout, backend, &self.collaborators.clientside) {
            Invocation::Finished(outcome) => Started::Finished(outcome),
            Invocation::Pending(future) => {
                let ticket = self.suspend(SuspendPoint::Watched, future.map(Resumption::Finished).boxed_local());
                log::debug!("{} is running ({ticket:?})", instance.key);
                Started::Pending(ticket)
            }
        }
    }
}

/// Apply a batch, record it and report whether anything changed.
fn commit(queues: &mut QueueState, ledger: &mut Ledger, tick: u64, observer: &'static str, batch: Batch) -> bool {
    if batch.is_empty() {
        return false;
    }
    let applied = queues.apply(batch);
    log::debug!("{observer}: {} transitions, sizes {:?}", applied.len(), queues.sizes());
    let changed = !applied.is_empty();
    ledger.record_applied(tick, observer, applied);
    if cfg!(debug_assertions) {
        let duplicates = queues.check_disjoint();
        if !duplicates.is_empty() {
            log::warn!("callbacks in more than one queue after `{observer}`: {duplicates:?}");
        }
    }
    changed
}

pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    layout: Layout,
    paths: PathIndex,
    queues: QueueState,
    config: SchedulerConfig,
    collaborators: Collaborators,
    sender: mpsc::UnboundedSender<PropertyChange>,
    events: mpsc::UnboundedReceiver<PropertyChange>,
    suspended: SuspendedSet,
    ledger: Ledger,
    tick: u64,
    version: u64,
    next_ticket: u64,
}

impl Scheduler {
    pub fn new(graph: Arc<DependencyGraph>, layout: Layout, config: SchedulerConfig, collaborators: Collaborators) -> Self {
        let (sender, events) = mpsc::unbounded();
        let mut ledger = Ledger::new();
        if config.record_ledger {
            ledger.enable();
        }
        let paths = PathIndex::build(&layout);
        Self {
            graph,
            layout,
            paths,
            queues: QueueState::new(),
            config,
            collaborators,
            sender,
            events,
            suspended: FuturesUnordered::new(),
            ledger,
            tick: 0,
            version: 0,
            next_ticket: 0,
        }
    }

    /// Restore persisted edits and request the initial callbacks of the
    /// layout, all in one execution group.
    pub fn start(&mut self) {
        let root = std::mem::replace(&mut self.layout, Layout::new(Value::Null)).into_value();
        self.layout = Layout::new(self.collaborators.persistence.apply(root));
        self.paths = PathIndex::build(&self.layout);

        let group = ExecutionGroup::new();
        let initial = Resolver::new(&self.graph, &self.paths).layout_callbacks(
            self.layout.root(),
            LayoutScan {
                outputs_only: true,
                ..LayoutScan::default()
            },
        );
        log::debug!("layout requests {} initial callbacks", initial.len());
        let mut batch = Batch::new();
        batch.request(&self.queues, initial.into_iter().map(|instance| instance.with_group(group)));
        commit(&mut self.queues, &mut self.ledger, self.tick, "start", batch);
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            sender: self.sender.clone(),
        }
    }

    pub fn dispatch(&self, change: PropertyChange) -> Result<(), DispatchError> {
        self.dispatcher().dispatch(change)
    }

    /// Apply queued changes, resume finished suspensions and run the
    /// observers until they settle. Returns the number of observer passes
    /// that changed something.
    pub fn tick(&mut self) -> Result<usize, SchedulerError> {
        self.tick += 1;
        while let Some(Some(change)) = self.events.next().now_or_never() {
            self.apply_change(change);
        }

        let mut passes = 0;
        loop {
            let mut progressed = false;
            while let Some(Some((point, resumption))) = self.suspended.next().now_or_never() {
                progressed |= self.resume(point, resumption);
            }
            progressed |= self.step()?;
            if !progressed {
                return Ok(passes);
            }
            passes += 1;
            if passes >= self.config.max_steps_per_tick {
                log::warn!(
                    "tick {} did not settle after {passes} passes; {} callbacks still pending",
                    self.tick,
                    self.queues.pending_instances().count()
                );
                return Ok(passes);
            }
        }
    }

    /// Tick, then wait for suspended work, until nothing more can happen.
    pub async fn run_until_idle(&mut self) -> Result<(), SchedulerError> {
        loop {
            YieldNow(false).await;
            let passes = self.tick()?;
            if self.suspended.is_empty() {
                if passes < self.config.max_steps_per_tick || self.queues.is_idle() {
                    if !self.queues.is_idle() {
                        log::warn!("scheduler stalled with {} pending callbacks", self.queues.pending_instances().count());
                    }
                    return Ok(());
                }
                continue;
            }
            if let Some((point, resumption)) = self.suspended.next().await {
                self.resume(point, resumption);
            }
        }
    }

    fn apply_change(&mut self, change: PropertyChange) {
        self.version += 1;
        let prop = format!("{}.{}", change.id, change.property);
        log::debug!("{prop} changed ({:?})", change.source);
        self.ledger.record(
            self.tick,
            LedgerKind::Dispatched {
                prop,
                source: change.source,
            },
        );
        let mut merge = MergeContext {
            graph: &self.graph,
            layout: &mut self.layout,
            paths: &mut self.paths,
            persistence: &*self.collaborators.persistence,
            reconciler: &*self.collaborators.reconciler,
        };
        let merged = merge.apply_props(&change.id, vec![(change.property, change.value)], self.version, change.source);
        let group = ExecutionGroup::new();
        let mut batch = Batch::new();
        batch.request(&self.queues, merged.requested.into_iter().map(|instance| instance.with_group(group)));
        commit(&mut self.queues, &mut self.ledger, self.tick, "dispatch", batch);
    }

    fn resume(&mut self, point: SuspendPoint, resumption: Resumption) -> bool {
        let batch = match (point, resumption) {
            (SuspendPoint::Watched(ticket), Resumption::Finished(outcome)) => {
                observers::watched::resume(&self.queues, ticket, outcome)
            }
            (SuspendPoint::Blocked(ticket), _) => {
                let mut launcher = Launcher {
                    layout: &self.layout,
                    paths: &self.paths,
                    collaborators: &self.collaborators,
                    suspended: &mut self.suspended,
                    next_ticket: &mut self.next_ticket,
                };
                observers::blocked::resume(&self.queues, ticket, &mut launcher)
            }
            (SuspendPoint::Watched(ticket), Resumption::AppReady) => {
                log::warn!("{ticket:?} resumed without an outcome");
                Batch::new()
            }
        };
        commit(&mut self.queues, &mut self.ledger, self.tick, "resume", batch)
    }

    /// One pass of every observer, each against the state left by the previous one.
    fn step(&mut self) -> Result<bool, SchedulerError> {
        let tick = self.tick;
        let mut progressed = false;

        let cx = ObserverContext {
            graph: &self.graph,
            paths: &self.paths,
            config: &self.config,
        };
        let batch = observers::requested::run(&self.queues, &cx);
        progressed |= commit(&mut self.queues, &mut self.ledger, tick, "requested", batch);

        let mut launcher = Launcher {
            layout: &self.layout,
            paths: &self.paths,
            collaborators: &self.collaborators,
            suspended: &mut self.suspended,
            next_ticket: &mut self.next_ticket,
        };
        let batch = observers::prioritized::run(&self.queues, &self.config, &mut launcher);
        progressed |= commit(&mut self.queues, &mut self.ledger, tick, "prioritized", batch);

        let batch = observers::executing::run(&self.queues);
        progressed |= commit(&mut self.queues, &mut self.ledger, tick, "executing", batch);

        let mut merge = MergeContext {
            graph: &self.graph,
            layout: &mut self.layout,
            paths: &mut self.paths,
            persistence: &*self.collaborators.persistence,
            reconciler: &*self.collaborators.reconciler,
        };
        let completion = observers::executed::run(&self.queues, &mut merge, &*self.collaborators.errors, &mut self.version);
        progressed |= commit(&mut self.queues, &mut self.ledger, tick, "executed", completion.batch);
        if let Some(error) = completion.error {
            return Err(error.into());
        }

        let batch = observers::stored::run(&self.queues);
        progressed |= commit(&mut self.queues, &mut self.ledger, tick, "stored", batch);
        Ok(progressed)
    }

    /// Instances that have not completed, for loading indicators.
    pub fn pending_callbacks(&self) -> Vec<&CallbackInstance> {
        self.queues.pending_instances().collect()
    }

    pub fn is_loading(&self) -> bool {
        self.queues.pending_instances().next().is_some()
    }

    pub fn loading_map(&self) -> LoadingMap {
        LoadingMap::build(self.queues.pending_instances())
    }

    pub fn is_idle(&self) -> bool {
        self.queues.is_idle() && self.suspended.is_empty()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Current value of a mounted component's prop.
    pub fn prop(&self, id: &ComponentId, property: &str) -> Option<&Value> {
        self.layout.prop(self.paths.get(id)?, property)
    }

    pub fn paths(&self) -> &PathIndex {
        &self.paths
    }

    pub fn queues(&self) -> &QueueState {
        &self.queues
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::capture(&self.queues, self.tick)
    }

    pub fn completed(&self) -> u64 {
        self.queues.completed()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }
}

//! Test harness for running the scheduler without a renderer or server.
//! Provides layout builders, scripted collaborators and assertions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use futures_channel::oneshot;
use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde_json::{Value, json};

use crate::callback::CallbackInstance;
use crate::config::SchedulerConfig;
use crate::error::{CallbackError, ErrorReport, ErrorReporter, SchedulerError};
use crate::gate::{AppReadiness, Readiness};
use crate::graph::DependencyGraph;
use crate::id::ComponentId;
use crate::layout::Layout;
use crate::observers::ObserverContext;
use crate::paths::PathIndex;
use crate::resolve::Resolver;
use crate::runner::{Backend, CallbackOutcome, CallbackRequest};
use crate::scheduler::{Collaborators, PropertyChange, Scheduler};

/// A core `Input` component with `id` merged into `props`.
pub fn component(id: Value, props: Value) -> Value {
    let mut props = if props.is_object() { props } else { json!({}) };
    props["id"] = id;
    json!({"type": "Input", "namespace": "core", "props": props})
}

/// Empty components with string ids.
pub fn components(ids: &[&str]) -> Vec<Value> {
    ids.iter().map(|id| component(json!(id), json!({}))).collect()
}

/// A `Div` root holding `children`.
pub fn root(children: Vec<Value>) -> Layout {
    Layout::new(json!({"type": "Div", "namespace": "html", "props": {"id": "root", "children": children}}))
}

/// Graph, layout and path index for observer-level tests.
pub struct Fixture {
    pub graph: DependencyGraph,
    pub layout: Layout,
    pub paths: PathIndex,
    pub config: SchedulerConfig,
}

impl Fixture {
    pub fn new(callbacks: Value, children: Vec<Value>) -> Self {
        let graph = match DependencyGraph::from_json(&callbacks.to_string()) {
            Ok(graph) => graph,
            Err(errors) => panic!("invalid callbacks: {errors:?}"),
        };
        let layout = root(children);
        let paths = PathIndex::build(&layout);
        Self {
            graph,
            layout,
            paths,
            config: SchedulerConfig::default(),
        }
    }

    pub fn context(&self) -> ObserverContext<'_> {
        ObserverContext {
            graph: &self.graph,
            paths: &self.paths,
            config: &self.config,
        }
    }

    /// Instances triggered by a change of `id.property`.
    pub fn by_input(&self, id: &str, property: &str, version: u64) -> Vec<CallbackInstance> {
        Resolver::new(&self.graph, &self.paths).callbacks_by_input(&id.into(), property, version)
    }
}

/// Keeps every reported execution error.
#[derive(Clone, Default)]
pub struct CollectingReporter {
    reports: Rc<RefCell<Vec<ErrorReport>>>,
}

impl CollectingReporter {
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.borrow().clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: ErrorReport) {
        self.reports.borrow_mut().push(report);
    }
}

type Script = Rc<dyn Fn(&CallbackRequest) -> CallbackOutcome>;

/// Server backend answering from closures registered per callback id.
/// Answers are ready immediately but still arrive through `watched`.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Rc<RefCell<HashMap<String, Script>>>,
    calls: Rc<RefCell<Vec<CallbackRequest>>>,
}

impl ScriptedBackend {
    pub fn script(&self, callback: &str, script: impl Fn(&CallbackRequest) -> CallbackOutcome + 'static) {
        self.scripts.borrow_mut().insert(callback.to_owned(), Rc::new(script));
    }

    pub fn calls(&self) -> Vec<CallbackRequest> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, callback: &str) -> usize {
        self.calls.borrow().iter().filter(|call| call.callback == callback).count()
    }
}

impl Backend for ScriptedBackend {
    fn invoke(&self, request: CallbackRequest) -> LocalBoxFuture<'static, CallbackOutcome> {
        self.calls.borrow_mut().push(request.clone());
        let script = self.scripts.borrow().get(&request.callback).cloned();
        let outcome = match script {
            Some(script) => script(&request),
            None => Err(CallbackError::MissingFunction(request.callback)),
        };
        futures_util::future::ready(outcome).boxed_local()
    }
}

/// Server backend whose answers are sent by hand.
#[derive(Clone, Default)]
pub struct DeferredBackend {
    requests: Rc<RefCell<Vec<(CallbackRequest, Option<oneshot::Sender<CallbackOutcome>>)>>>,
}

impl DeferredBackend {
    pub fn requests(&self) -> Vec<CallbackRequest> {
        self.requests.borrow().iter().map(|(request, _)| request.clone()).collect()
    }

    /// Requests still waiting for an answer.
    pub fn in_flight(&self) -> usize {
        self.requests.borrow().iter().filter(|(_, sender)| sender.is_some()).count()
    }

    /// Answer the request at `index`. False if it was already answered.
    pub fn complete(&self, index: usize, outcome: CallbackOutcome) -> bool {
        let sender = self
            .requests
            .borrow_mut()
            .get_mut(index)
            .and_then(|(_, sender)| sender.take());
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl Backend for DeferredBackend {
    fn invoke(&self, request: CallbackRequest) -> LocalBoxFuture<'static, CallbackOutcome> {
        let (sender, receiver) = oneshot::channel();
        self.requests.borrow_mut().push((request, Some(sender)));
        receiver
            .map(|answer| answer.unwrap_or(Err(CallbackError::Cancelled)))
            .boxed_local()
    }
}

/// App readiness that holds every callback until released.
#[derive(Clone)]
pub struct HeldReadiness {
    waiters: Rc<RefCell<Option<Vec<oneshot::Sender<()>>>>>,
}

impl HeldReadiness {
    pub fn held() -> Self {
        Self {
            waiters: Rc::new(RefCell::new(Some(Vec::new()))),
        }
    }

    pub fn release(&self) {
        if let Some(waiters) = self.waiters.borrow_mut().take() {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }
}

impl AppReadiness for HeldReadiness {
    fn is_ready(&self, _layout: &Layout, _paths: &PathIndex, _components: &[ComponentId]) -> Readiness {
        match self.waiters.borrow_mut().as_mut() {
            Some(waiters) => {
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                Readiness::Waiting(receiver.map(|_| ()).boxed_local())
            }
            None => Readiness::Ready,
        }
    }
}

/// A started scheduler wired to a `ScriptedBackend` and a
/// `CollectingReporter`.
pub struct TestApp {
    pub scheduler: Scheduler,
    pub backend: ScriptedBackend,
    pub errors: CollectingReporter,
}

impl TestApp {
    pub fn new(callbacks: Value, children: Vec<Value>) -> Self {
        Self::configured(callbacks, children, SchedulerConfig::default(), Collaborators::default())
    }

    /// Backend and error reporter of `collaborators` are replaced by the
    /// harness's own.
    pub fn configured(callbacks: Value, children: Vec<Value>, config: SchedulerConfig, collaborators: Collaborators) -> Self {
        let graph = match DependencyGraph::from_json(&callbacks.to_string()) {
            Ok(graph) => graph,
            Err(errors) => panic!("invalid callbacks: {errors:?}"),
        };
        let backend = ScriptedBackend::default();
        let errors = CollectingReporter::default();
        let collaborators = collaborators
            .with_backend(Rc::new(backend.clone()))
            .with_errors(Rc::new(errors.clone()));
        let scheduler = Scheduler::new(Arc::new(graph), root(children), config, collaborators);
        Self {
            scheduler,
            backend,
            errors,
        }
    }

    pub fn start(&mut self) {
        self.scheduler.start();
        self.settle();
    }

    /// Tick until nothing moves, panicking on a scheduler error.
    pub fn settle(&mut self) -> usize {
        match self.try_settle() {
            Ok(passes) => passes,
            Err(error) => panic!("scheduler error: {error}"),
        }
    }

    pub fn try_settle(&mut self) -> Result<usize, SchedulerError> {
        let mut total = 0;
        for _ in 0..64 {
            let passes = self.scheduler.tick()?;
            total += passes;
            if passes == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// Dispatch a user edit and settle.
    pub fn set(&mut self, id: impl Into<ComponentId>, property: &str, value: Value) {
        self.dispatch(PropertyChange::user(id, property, value));
        self.settle();
    }

    pub fn dispatch(&mut self, change: PropertyChange) {
        if let Err(error) = self.scheduler.dispatch(change) {
            panic!("dispatch failed: {error}");
        }
    }

    /// Current value of a prop, `Null` when unset or unmounted.
    pub fn prop(&self, id: impl Into<ComponentId>, property: &str) -> Value {
        self.scheduler.prop(&id.into(), property).cloned().unwrap_or(Value::Null)
    }

    pub fn assert_prop(&self, id: &str, property: &str, expected: Value) {
        let actual = self.prop(id, property);
        assert_eq!(actual, expected, "`{id}.{property}` expected {expected} but got {actual}");
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.errors.reports()
    }
}

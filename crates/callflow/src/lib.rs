//! Reactive callback scheduler for declarative component trees.
//!
//! A `DependencyGraph` of callback declarations is matched against a
//! `Layout` of components. When a property changes, the `Scheduler` finds
//! the affected callbacks, orders them by their dependencies, invokes them
//! and merges their results back into the layout, one queue transition at a
//! time.

pub mod arena;
pub mod callback;
pub mod config;
pub mod error;
pub mod gate;
pub mod graph;
pub mod id;
pub mod layout;
pub mod ledger;
pub mod loading;
pub mod merger;
pub mod observers;
pub mod parser;
pub mod paths;
pub mod persistence;
pub mod queue;
pub mod readiness;
pub mod reconcile;
pub mod resolve;
pub mod runner;
pub mod scheduler;
pub mod snapshot;
pub mod test_harness;

pub use callback::{CallbackInstance, CallbackKey, ExecutionGroup, Priority, PropRef, Resolved};
pub use config::SchedulerConfig;
pub use error::{
    CallbackError, ConfigError, DispatchError, ErrorReport, ErrorReporter, GraphError, IdError, LogReporter,
    MutationError, SchedulerError,
};
pub use gate::{AlwaysReady, AppReadiness, Readiness};
pub use graph::{CallbackDeclaration, CallbackId, CallbackSpec, DependencyGraph};
pub use id::{ComponentId, Dependency, IdPattern, IdValue, PropId, Wildcard};
pub use layout::{Layout, LayoutPath};
pub use ledger::{Ledger, LedgerEntry, LedgerKind};
pub use loading::LoadingMap;
pub use merger::ChangeSource;
pub use paths::PathIndex;
pub use persistence::{MemoryPersistence, NoPersistence, Persistence};
pub use queue::{Queue, QueueState};
pub use reconcile::{Reconciler, StandardReconciler};
pub use runner::{
    Backend, CallbackOutcome, CallbackRequest, CallbackResponse, ClientsideRegistry, NoBackend, OutputValue,
};
pub use scheduler::{Collaborators, Dispatcher, PropertyChange, Scheduler};
pub use snapshot::QueueSnapshot;

//! The app-readiness predicate consulted before a callback starts.

use futures_util::future::LocalBoxFuture;

use crate::id::ComponentId;
use crate::layout::Layout;
use crate::paths::PathIndex;

pub enum Readiness {
    Ready,
    /// Resolves once the components can be used; the instance waits in `blocked`.
    Waiting(LocalBoxFuture<'static, ()>),
}

impl std::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Ready => f.write_str("Ready"),
            Readiness::Waiting(_) => f.write_str("Waiting"),
        }
    }
}

pub trait AppReadiness {
    fn is_ready(&self, layout: &Layout, paths: &PathIndex, ids: &[ComponentId]) -> Readiness;
}

#[derive(Default)]
pub struct AlwaysReady;

impl AppReadiness for AlwaysReady {
    fn is_ready(&self, _layout: &Layout, _paths: &PathIndex, _ids: &[ComponentId]) -> Readiness {
        Readiness::Ready
    }
}

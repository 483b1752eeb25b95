//! Error types and the execution-error reporting collaborator.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use serde::Serialize;

/// Malformed component id or id pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum IdError {
    Empty,
    InvalidJson(String),
    /// Object pattern value that is neither a scalar nor a wildcard.
    InvalidKeyValue(String),
    UnknownWildcard(String),
    NotAnObject,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdError::Empty => write!(f, "empty component id"),
            IdError::InvalidJson(message) => write!(f, "invalid object id: {message}"),
            IdError::InvalidKeyValue(key) => {
                write!(f, "id key `{key}` must be a string, number, boolean or wildcard")
            }
            IdError::UnknownWildcard(name) => write!(f, "unknown wildcard `{name}`"),
            IdError::NotAnObject => write!(f, "component id must be a string or an object"),
        }
    }
}

impl std::error::Error for IdError {}

/// One diagnostic produced while parsing an output specification.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanMessage {
    pub span: Range<usize>,
    pub message: String,
}

/// Invalid callback declaration, detected when the graph is built.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    Json(String),
    OutputSyntax {
        callback: usize,
        source: String,
        errors: Vec<SpanMessage>,
    },
    InvalidId {
        callback: usize,
        dependency: String,
        error: IdError,
    },
    DuplicateOutput {
        output: String,
        first: usize,
        second: usize,
    },
    AllSmallerInOutput {
        callback: usize,
        output: String,
    },
    /// `MATCH` or `ALLSMALLER` in an input or state without a `MATCH` on the
    /// same key in every output.
    UnmatchedWildcard {
        callback: usize,
        dependency: String,
    },
    NoInputs {
        callback: usize,
    },
    UnknownMutationTarget {
        callback: usize,
        target: String,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Json(message) => write!(f, "invalid callback declarations: {message}"),
            GraphError::OutputSyntax { callback, source, errors } => {
                write!(f, "callback #{callback}: cannot parse output `{source}`")?;
                for error in errors {
                    write!(f, "; {} at {}..{}", error.message, error.span.start, error.span.end)?;
                }
                Ok(())
            }
            GraphError::InvalidId { callback, dependency, error } => {
                write!(f, "callback #{callback}: invalid id in `{dependency}`: {error}")
            }
            GraphError::DuplicateOutput { output, first, second } => write!(
                f,
                "output `{output}` is set by callbacks #{first} and #{second}; mark it with `@` to allow duplicates"
            ),
            GraphError::AllSmallerInOutput { callback, output } => {
                write!(f, "callback #{callback}: ALLSMALLER cannot be used in output `{output}`")
            }
            GraphError::UnmatchedWildcard { callback, dependency } => write!(
                f,
                "callback #{callback}: wildcard in `{dependency}` has no matching MATCH in every output"
            ),
            GraphError::NoInputs { callback } => write!(f, "callback #{callback} has no inputs"),
            GraphError::UnknownMutationTarget { callback, target } => {
                write!(f, "callback #{callback}: mutation target `{target}` is not an output")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Declaration error raised while merging a callback response. Fatal for the tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationError {
    /// A mutation envelope was returned for an output that does not allow mutations.
    NotMutable { callback: String, output: String },
    /// The envelope's `mutation` field is missing or not a string.
    InvalidOperation { callback: String, output: String },
    /// The reconciler could not combine the operation with the current value.
    Unsupported {
        output: String,
        operation: String,
        message: String,
    },
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationError::NotMutable { callback, output } => write!(
                f,
                "callback `{callback}` returned a mutation for `{output}`, which is not declared as mutable"
            ),
            MutationError::InvalidOperation { callback, output } => write!(
                f,
                "callback `{callback}` returned a mutation for `{output}` without a string operation"
            ),
            MutationError::Unsupported { output, operation, message } => {
                write!(f, "cannot apply `{operation}` to `{output}`: {message}")
            }
        }
    }
}

impl std::error::Error for MutationError {}

/// Failure of one callback invocation. Captured, reported, never propagated.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackError {
    /// The function chose not to update anything.
    PreventUpdate,
    MissingFunction(String),
    Failed(String),
    /// The backend dropped the request before answering.
    Cancelled,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackError::PreventUpdate => write!(f, "update prevented"),
            CallbackError::MissingFunction(name) => write!(f, "no function registered as `{name}`"),
            CallbackError::Failed(message) => write!(f, "{message}"),
            CallbackError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for CallbackError {}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            ConfigError::Parse { path, message } => write!(f, "invalid {}: {message}", path.display()),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { .. } => None,
        }
    }
}

/// Returned by `Dispatcher::dispatch()` when the scheduler is gone.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    Closed,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Closed => write!(f, "scheduler closed"),
        }
    }
}

impl std::error::Error for DispatchError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    Mutation(MutationError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Mutation(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Mutation(error) => Some(error),
        }
    }
}

impl From<MutationError> for SchedulerError {
    fn from(error: MutationError) -> Self {
        SchedulerError::Mutation(error)
    }
}

/// Context attached to a failed callback execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub callback: String,
    pub outputs: Vec<String>,
    /// Client-side function name, `None` for server callbacks.
    pub function: Option<String>,
    pub message: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(
                f,
                "callback error updating {} (function `{function}`): {}",
                self.outputs.join(", "),
                self.message
            ),
            None => write!(f, "callback error updating {}: {}", self.outputs.join(", "), self.message),
        }
    }
}

/// Receives execution errors (the surrounding app's error UI).
pub trait ErrorReporter {
    fn report(&self, report: ErrorReport);
}

/// Default reporter: logs through the `log` facade.
#[derive(Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, report: ErrorReport) {
        log::error!("{report}");
    }
}

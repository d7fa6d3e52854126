//! Error types for the dossier pipeline.
//!
//! Library crates use [`DossierError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::StageId;

/// Top-level error type for all dossier operations.
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed workflow topology. Fatal at startup.
    #[error("graph construction error: {0}")]
    Graph(#[from] GraphError),

    /// A capability unit failed mid-run (completion service or tool).
    /// Aborts the in-flight run only.
    #[error("stage `{stage}` failed: {message}")]
    StageInvocation { stage: StageId, message: String },

    /// Network/HTTP error talking to the search or completion service.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad tool arguments, unexpected payload shape, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Reasons a workflow graph is rejected by the builder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("cycle detected among stages: {}", join(.stages))]
    Cycle { stages: Vec<StageId> },

    #[error("edge {from} -> {to} references unregistered stage `{missing}`")]
    DanglingEdge {
        from: StageId,
        to: StageId,
        missing: StageId,
    },

    #[error("no entry stage: every stage has an incoming edge")]
    NoEntryNode,

    #[error("multiple entry stages: {}", join(.entries))]
    MultipleEntryNodes { entries: Vec<StageId> },

    #[error("stage `{0}` registered twice")]
    DuplicateNode(StageId),

    #[error("no capability unit bound to stage `{0}`")]
    UnboundStage(StageId),
}

fn join(stages: &[StageId]) -> String {
    stages
        .iter()
        .map(StageId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DossierError>;

impl DossierError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Attribute a failure to the stage that was running.
    pub fn stage(stage: &StageId, msg: impl Into<String>) -> Self {
        Self::StageInvocation {
            stage: stage.clone(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

//! Error types for augur.
//!
//! Library crates use [`AugurError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// A single violated field found at the contract boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted wire path of the offending field (e.g. `context.birthData.date`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found while validating one payload.
///
/// Never empty when returned from a validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(&self.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    /// Field paths of every violation, in discovery order.
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    /// Whether `field` is among the violated fields.
    pub fn names(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn render(violations: &[Violation]) -> String {
    let mut out = format!("{} violation(s)", violations.len());
    for v in violations {
        out.push_str(&format!("; {v}"));
    }
    out
}

/// Top-level error type for all augur operations.
#[derive(Debug, thiserror::Error)]
pub enum AugurError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed request or response at the contract boundary.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A request or stage names an agent that is not registered.
    #[error("unknown framework '{name}'")]
    UnknownFramework { name: String },

    /// The stage graph has no topological order.
    #[error("pipeline contains a cycle through stages: {}", stages.join(" -> "))]
    Cycle { stages: Vec<String> },

    /// A stage depends on a stage that is not part of the pipeline.
    #[error("stage '{stage}' depends on unknown stage '{reference}'")]
    UnknownStageReference { stage: String, reference: String },

    /// Two stages share a name.
    #[error("stage '{stage}' is declared more than once")]
    DuplicateStage { stage: String },

    /// An agent's own computation failed.
    #[error("stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    /// A stage exceeded its allotted time.
    #[error("stage '{stage}' timed out after {after_ms}ms")]
    Timeout { stage: String, after_ms: u64 },

    /// A stage never ran because a prerequisite failed.
    #[error("stage '{stage}' aborted: dependency '{dependency}' failed")]
    DependencyAborted { stage: String, dependency: String },

    /// The run was cancelled before this stage produced a result.
    #[error("stage '{stage}' cancelled")]
    Cancelled { stage: String },

    /// A run ended without a single final answer (several sinks, no synthesis).
    #[error("run produced no single final response; results are in merged context: {}", stages.join(", "))]
    NoFinalResponse { stages: Vec<String> },

    /// Cache or database layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Text-generation collaborator error.
    #[error("generation error: {0}")]
    Generation(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AugurError>;

impl AugurError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a stage execution error.
    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Create a storage error from any displayable message.
    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Planning defects are programming errors and must fail before execution.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. }
                | Self::UnknownStageReference { .. }
                | Self::DuplicateStage { .. }
                | Self::UnknownFramework { .. }
        )
    }
}

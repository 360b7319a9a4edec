//! Error types for the flow-graph engine

use thiserror::Error;

/// Structured engine error, surfaced by graph construction, inference,
/// and the control plane. Every variant carries a human-readable message
/// and a stable kind tag (see [`FlowError::kind`]).
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("cycle through blocks [{}]", .0.join(", "))]
    Cyclic(Vec<String>),

    #[error("input port '{port}' on block '{block}' is not connected")]
    Disconnected { block: String, port: String },

    #[error("port error on block '{block}': {reason}")]
    PortMismatch { block: String, reason: String },

    #[error("block '{0}' already exists in the graph")]
    DuplicateBlock(String),

    #[error("sample type '{0}' is already registered")]
    DuplicateType(String),

    #[error(
        "no type signature on block '{block}' accepts [{}] (expected one of: {})",
        .got.join(", "),
        .expected.join("; ")
    )]
    TypeMismatch {
        block: String,
        got: Vec<String>,
        expected: Vec<String>,
    },

    #[error("block '{block}' failed to start: {cause}")]
    Startup { block: String, cause: String },

    #[error("block '{block}' failed while processing: {cause}")]
    Runtime { block: String, cause: String },

    #[error("pipe {op} failed on block '{block}': {cause}")]
    Io {
        block: String,
        op: String,
        cause: String,
    },

    #[error("stop deadline exceeded; blocks still running: [{}]", .0.join(", "))]
    StopTimeout(Vec<String>),

    #[error("{op} is not allowed in state {state}")]
    InvalidState { op: String, state: String },
}

impl FlowError {
    /// Stable machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Cyclic(_) => "cyclic",
            FlowError::Disconnected { .. } => "disconnected",
            FlowError::PortMismatch { .. } => "port-mismatch",
            FlowError::DuplicateBlock(_) => "duplicate-block",
            FlowError::DuplicateType(_) => "duplicate-type",
            FlowError::TypeMismatch { .. } => "type-mismatch",
            FlowError::Startup { .. } => "startup",
            FlowError::Runtime { .. } => "runtime",
            FlowError::Io { .. } => "io",
            FlowError::StopTimeout(_) => "stop-timeout",
            FlowError::InvalidState { .. } => "invalid-state",
        }
    }
}

/// Error type for block work inside a worker.
///
/// `Shutdown` is the in-band end-of-stream sentinel: sources return it to
/// finish their stream, and pipe reads/writes return it when the peer side
/// has closed. It is a normal loop exit, not a failure.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("end of stream")]
    Shutdown,

    #[error("pipe error: {0}")]
    Pipe(String),

    #[error("{0}")]
    Block(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for block lifecycle and worker operations.
pub type WorkResult<T = ()> = Result<T, WorkError>;

//! Engine error types
//!
//! Only structural failures are reported through [`EngineError`]. A read,
//! write or flush that fails at the device is not an `Err`: the translated
//! errno and the residue are attached to the [`IoRequest`](super::IoRequest)
//! and surface through the normal submit/harvest path.

use thiserror::Error;

/// Structural engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Standard IO error (opening or closing a target)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource exhaustion while building engine or target state
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// The target cannot be served by this engine (pipes, standard streams)
    #[error("Unsupported target {path}: {reason}")]
    UnsupportedTarget { path: String, reason: &'static str },

    /// The completion listener thread could not be spawned
    #[error("Failed to spawn completion listener: {0}")]
    ThreadCreate(#[source] std::io::Error),

    /// The caller broke the engine's usage contract
    #[error("Contract violation: {0}")]
    ContractViolation(&'static str),

    /// Buffer alignment error
    #[error("Buffer not aligned to {expected} bytes (got offset {actual})")]
    Alignment { expected: usize, actual: usize },

    /// Transfer length does not fit the request buffer
    #[error("Transfer of {size} bytes exceeds buffer capacity {capacity}")]
    BufferSize { size: usize, capacity: usize },
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

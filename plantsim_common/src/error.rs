//! Error taxonomy shared across the simulation core.
//!
//! Kinds follow the propagation policy: user-facing API calls return
//! `SimError`; scan-cycle and outer-loop errors are caught by their
//! drivers and never unwind across a task boundary.

use thiserror::Error;

/// Unified error type for clock, store, controller, and scheduler operations.
#[derive(Debug, Clone, Error)]
pub enum SimError {
    /// Argument violates a documented range or shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not permitted in the current mode.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// Operation requires a prior `initialise()`.
    #[error("not initialised: {0}")]
    NotInitialised(String),

    /// Registry already contains an entry under this name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Registry has no entry under this name.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Configuration entry is malformed or incomplete.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Recoverable failure in a collaborator call. Never surfaced from pure logic.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Invariant violation; fatal for the failing subsystem.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience result alias used across the workspace.
pub type SimResult<T> = Result<T, SimError>;

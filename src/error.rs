//! Error taxonomy for the core (spec §7).
//!
//! Every fallible operation in the crate returns [`CoreError`]. The variants
//! map onto the exit-code contract of §6: configuration and runtime errors
//! exit 1, topology initialization failures exit 2, catastrophic
//! pre-collective memory failures exit 3, and collective errors propagate
//! whatever code the offending worker reported.

use thiserror::Error;

/// Rank of a worker, used to attribute collective failures to their origin.
pub type Rank = usize;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("worker {rank} reported an error: {message}")]
    Collective { rank: Rank, message: String, code: i32 },

    #[error("postprocess script exited with status {code}: {message}")]
    Postprocess { code: i32, message: String },

    #[error("topology initialization failed: {0}")]
    TopologyInit(String),
}

impl CoreError {
    /// Process exit code per spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::TopologyInit(_) => 2,
            CoreError::Collective { code, .. } => *code,
            CoreError::Postprocess { code, .. } => *code,
            CoreError::Configuration(_)
            | CoreError::Resource(_)
            | CoreError::Numerical(_) => 1,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

//! Error types shared by every orchestration component

use crate::cancel::INTERRUPTED_EXIT_CODE;
use std::io;
use thiserror::Error;

/// Exit code reported when no child exit status is available.
pub const GENERIC_FAILURE_CODE: i32 = 1;

/// Errors produced while locating tools, running pipelines or supervising children
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A required external tool could not be resolved
    #[error("{tool} not found (set {env_var} or add it to PATH)")]
    ToolNotFound {
        /// Tool name as searched on PATH
        tool: String,
        /// Environment variable that overrides the lookup
        env_var: String,
    },

    /// A pipeline step exited with an unexpected status
    #[error("Step {index} ({program}) failed with exit code {exit_code}")]
    StepFailed {
        /// 1-based position of the step in its pipeline
        index: usize,
        /// Program that was executed
        program: String,
        /// Exit code reported by the program
        exit_code: i32,
    },

    /// The program could not be started at all
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The operator interrupted the run; nothing further was started
    #[error("Interrupted before {next}")]
    Interrupted {
        /// Step or stage that was skipped
        next: String,
    },

    /// A step or supervised process was given an empty argument vector
    #[error("Empty command line")]
    EmptyCommand,

    /// The supervisor state machine received an event it has no transition for
    #[error("Invalid supervisor transition: {0}")]
    InvalidTransition(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Signal delivery error
    #[error("Signal error: {0}")]
    Signal(#[from] nix::Error),
}

impl ProcessError {
    /// Exit code the driver should terminate with for this error.
    ///
    /// Step failures propagate the failing tool's own status; everything else
    /// maps to a generic failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProcessError::StepFailed { exit_code, .. } if *exit_code != 0 => *exit_code,
            ProcessError::Interrupted { .. } => INTERRUPTED_EXIT_CODE,
            _ => GENERIC_FAILURE_CODE,
        }
    }
}

/// Result alias for orchestration operations
pub type ProcessResult<T> = Result<T, ProcessError>;

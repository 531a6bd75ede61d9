//! Error types for the coplan domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all coplan operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Policy errors ---
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    // --- Replay errors ---
    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Filesystem ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
pub enum PolicyError {
    #[error("Unknown policy: {0}")]
    Unknown(String),

    #[error("Policy '{0}' finished without choosing actions")]
    NoActions(String),
}

#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    #[error("Replay log holds {found} subgoal trees but the run has {expected} agents")]
    AgentCountMismatch { expected: usize, found: usize },

    #[error("Replay log has no subgoal_tree entry")]
    MissingTrees,
}

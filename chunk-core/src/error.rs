//! Error types for the assistant core.

use thiserror::Error;

/// Hard failures of core operations.
///
/// Expected outcomes (rate-limit denial, empty extraction, invalid game
/// moves) are plain result values and never appear here.
#[derive(Error, Debug)]
pub enum ChunkError {
    /// The persistence backend failed to store or load a profile.
    #[error("Persistence failure for user {user}: {reason}")]
    Persistence {
        /// Whose profile was affected.
        user: String,
        /// What went wrong.
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkError {
    /// Whether this error means a profile change was not saved.
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Persistence { .. } | Self::Database(_) | Self::Io(_) | Self::Serialization(_)
        )
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ChunkError>;

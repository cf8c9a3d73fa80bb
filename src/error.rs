//! Error types for the outpost library.

use thiserror::Error;

/// Errors that can occur during queue, cache and sync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The durable queue store could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// The offline queue has reached its configured capacity.
    ///
    /// The action was NOT queued; callers must surface this to the user.
    #[error("offline queue is full ({capacity} actions)")]
    QueueFull {
        /// Configured maximum number of queued actions.
        capacity: usize,
    },

    /// A persisted file could not be parsed.
    #[error("corrupt stored data at {path}: {reason}")]
    Corrupt {
        /// Path of the unreadable file.
        path: String,
        /// Parse failure detail.
        reason: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A stored request could not be reconstructed (bad method, URL or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server answered with a non-success status where one was required.
    #[error("server rejected request: HTTP {0}")]
    Rejected(u16),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

/// A specialized `Result` type for outpost operations.
pub type Result<T> = std::result::Result<T, Error>;

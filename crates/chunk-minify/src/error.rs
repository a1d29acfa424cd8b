//! Error types for chunk minification.

use std::path::PathBuf;

/// Errors that can occur while minifying a chunk.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The minifier rejected the chunk (syntax error and the like).
    #[error("minification failed: {0}")]
    Minify(String),

    /// A failure while minifying a specific chunk.
    #[error("failed to minify chunk {file_name}: {source}")]
    Chunk {
        file_name: String,
        #[source]
        source: Box<Error>,
    },

    /// The worker executable could not be located.
    #[error("minify worker `{binary}` not found (searched: {searched})")]
    WorkerNotFound { binary: String, searched: String },

    /// Failed to launch a worker process.
    #[error("failed to spawn minify worker {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A worker went away while it owned a task.
    #[error("minify worker {index} crashed: {reason}")]
    WorkerCrashed { index: usize, reason: String },

    /// A worker sent something that is not a valid reply.
    #[error("minify worker protocol error: {0}")]
    Protocol(String),

    /// The pool no longer accepts tasks.
    #[error("minify worker pool is shut down")]
    PoolClosed,

    /// An in-process minify task panicked.
    #[error("minify task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Reading or writing the name cache file failed.
    #[error("name cache: {0}")]
    NameCache(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for chunk minification.
pub type Result<T> = std::result::Result<T, Error>;

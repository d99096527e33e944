//! Network error types.

/// Errors that can occur in the mesh_network crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A transport-level error (connect/send/receive).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The listener could not be bound at startup.
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A connection's send queue is full; the envelope was not queued.
    #[error("Send queue to {0} is full")]
    QueueFull(String),

    /// The node is not running.
    #[error("Node not running")]
    NotRunning,

    /// The node was stopped and cannot be started again.
    #[error("Node already stopped")]
    Stopped,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

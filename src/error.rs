use thiserror::Error;

/// Errors surfaced to callers of the RPC client.
///
/// Listener-side failures (malformed payloads, unknown correlation ids)
/// are deliberately absent: they are logged and counted inside the
/// listener and never reach a caller.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Publish or subscription-attach failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request args could not be encoded, or a typed response could not
    /// be decoded. Never retried automatically.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No matching result arrived within the caller-supplied deadline.
    /// Distinct from other failures so callers can choose to retry.
    #[error("timed out waiting for response")]
    Timeout,

    /// The client was stopped while this wait was pending.
    #[error("client stopped while waiting for response")]
    Stopped,

    /// Operation issued after shutdown began.
    #[error("client is closed")]
    Closed,

    /// Transport factory misconfiguration (e.g. missing broker URI).
    #[error("missing configuration: {0}")]
    MissingConfig(String),
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

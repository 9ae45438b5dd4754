//! Error types for the screenlock daemon.

use screenlock_rpc::protocol::{self, RpcError};

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] screenlock_rpc::transport::CodecError),

    /// Connection has not registered in a namespace yet
    #[error("Client not registered")]
    NotRegistered,

    /// Connection already registered
    #[error("Client already registered")]
    AlreadyRegistered,

    /// No namespace with that name is configured
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Configuration file could not be used
    #[error("Config error: {0}")]
    Config(String),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

impl From<DaemonError> for RpcError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::NotRegistered => RpcError::not_registered(),
            DaemonError::AlreadyRegistered => RpcError::already_registered(),
            DaemonError::NamespaceNotFound(name) => RpcError::namespace_not_found(&name),
            DaemonError::InvalidParams(msg) => RpcError::invalid_params(msg),
            DaemonError::MethodNotFound(name) => RpcError::method_not_found(&name),
            DaemonError::Io(_)
            | DaemonError::Json(_)
            | DaemonError::Codec(_)
            | DaemonError::Config(_)
            | DaemonError::Watcher(_) => RpcError::internal_error(err.to_string()),
        }
    }
}

impl From<RpcError> for DaemonError {
    fn from(err: RpcError) -> Self {
        match err.code {
            protocol::NOT_REGISTERED => DaemonError::NotRegistered,
            protocol::ALREADY_REGISTERED => DaemonError::AlreadyRegistered,
            protocol::INVALID_PARAMS => DaemonError::InvalidParams(err.message),
            protocol::METHOD_NOT_FOUND => DaemonError::MethodNotFound(err.message),
            protocol::NAMESPACE_NOT_FOUND => DaemonError::NamespaceNotFound(err.message),
            _ => DaemonError::Io(std::io::Error::other(err.message)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

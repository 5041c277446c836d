//! Caller-visible error type.

use thiserror::Error;
use zkpool_proto::{ErrorCode, ProtoError};

/// Broad class of a [`ZkError`], matching how the client reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket or timeout failure. The session may still be alive and the
    /// client reconnects on its own; only the affected operation failed.
    Connectivity,
    /// Outcome reported by the ensemble for this operation. Never retried.
    Application,
    /// The session is gone. The client cannot recover and must be recreated.
    Session,
    /// The caller supplied an unusable configuration value.
    Configuration,
}

/// Every failure an operation on [`Client`](crate::Client) can resolve with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZkError {
    /// The node does not exist (or a parent is missing on create).
    #[error("no_node")]
    NoNode,

    /// A node already exists at the path.
    #[error("node_exists")]
    NodeExists,

    /// The expected version did not match the node's version.
    #[error("bad_version")]
    BadVersion,

    /// The node has children and cannot be erased.
    #[error("not_empty")]
    NotEmpty,

    /// Ephemeral nodes cannot have children.
    #[error("no_children_for_ephemerals")]
    NoChildrenForEphemerals,

    /// The ACL list is empty or malformed.
    #[error("invalid_acl")]
    InvalidAcl,

    /// Arguments were rejected before or by the ensemble.
    #[error("invalid_arguments: {0}")]
    InvalidArguments(String),

    /// A multi-op batch failed; nothing was applied.
    #[error("transaction failed at operation {index}: {code}")]
    Transaction {
        /// Zero-based index of the first failing sub-operation.
        index: usize,
        /// Why it failed.
        code: ErrorCode,
    },

    /// Any other code reported by the ensemble.
    #[error("server error: {0}")]
    Server(ErrorCode),

    /// The connection carrying the operation was lost, or there was none.
    #[error("connection_loss")]
    ConnectionLoss,

    /// The session expired.
    #[error("session_expired")]
    SessionExpired,

    /// The client was closed.
    #[error("closed")]
    Closed,

    /// Invalid configuration (connection string, create mode, timeouts).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ZkError {
    /// Map an ensemble result code onto the caller-visible error.
    pub fn from_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NoNode => ZkError::NoNode,
            ErrorCode::NodeExists => ZkError::NodeExists,
            ErrorCode::BadVersion => ZkError::BadVersion,
            ErrorCode::NotEmpty => ZkError::NotEmpty,
            ErrorCode::NoChildrenForEphemerals => ZkError::NoChildrenForEphemerals,
            ErrorCode::InvalidAcl => ZkError::InvalidAcl,
            ErrorCode::BadArguments => {
                ZkError::InvalidArguments("rejected by the ensemble".to_string())
            }
            ErrorCode::ConnectionLoss | ErrorCode::OperationTimeout => ZkError::ConnectionLoss,
            ErrorCode::SessionExpired => ZkError::SessionExpired,
            other => ZkError::Server(other),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ZkError::ConnectionLoss => ErrorCategory::Connectivity,
            ZkError::SessionExpired | ZkError::Closed => ErrorCategory::Session,
            ZkError::InvalidConfig(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::Application,
        }
    }
}

impl From<ProtoError> for ZkError {
    fn from(error: ProtoError) -> Self {
        match error {
            ProtoError::DataTooLarge { .. } => ZkError::InvalidArguments(error.to_string()),
            ProtoError::InvalidCreateMode { .. } => ZkError::InvalidConfig(error.to_string()),
            // Malformed wire data only ever reaches callers as a lost connection.
            _ => ZkError::ConnectionLoss,
        }
    }
}

/// Result type for client operations.
pub type ZkResult<T> = Result<T, ZkError>;

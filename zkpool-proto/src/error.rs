//! Codec errors and the ensemble's numeric result codes.

use std::fmt;

/// Errors raised while encoding or decoding wire data.
///
/// Every variant except [`ProtoError::DataTooLarge`] is a protocol error:
/// the bytes on the wire do not form a valid frame. The connection layer
/// treats those as fatal to the socket that produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// Not enough data to decode the next value.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Bytes required to decode the value.
        needed: usize,
        /// Bytes remaining in the buffer.
        have: usize,
    },

    /// A length prefix is negative (other than the null marker) or otherwise
    /// impossible.
    #[error("invalid length prefix: {length}")]
    InvalidLength {
        /// The offending length value.
        length: i32,
    },

    /// An inbound frame exceeds the configured cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A node payload exceeds [`MAX_DATA_SIZE`](crate::MAX_DATA_SIZE).
    #[error("data too large: {size} bytes (max {max})", max = crate::MAX_DATA_SIZE)]
    DataTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A reply carries a negative xid that is not a reserved marker.
    #[error("unknown reserved xid: {0}")]
    UnknownXid(i32),

    /// Unknown request type code.
    #[error("unknown op code: {0}")]
    UnknownOpCode(i32),

    /// Unknown watcher event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(i32),

    /// Unknown keeper state.
    #[error("unknown keeper state: {0}")]
    UnknownKeeperState(i32),

    /// Create-mode flags that are unknown or invalid together.
    #[error("invalid create mode flags: {flags:#06b}")]
    InvalidCreateMode {
        /// The rejected flag bits.
        flags: u32,
    },

    /// An operation type that is not allowed inside a multi-op batch.
    #[error("op code {0} is not valid inside a multi-op batch")]
    InvalidMultiOp(i32),

    /// Bytes left over after decoding a complete body.
    #[error("{count} trailing bytes after body")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        count: usize,
    },
}

/// Result codes reported by the ensemble in reply headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Success.
    Ok,
    /// Generic server-side failure.
    SystemError,
    /// A multi-op sub-operation was rolled back because another one failed.
    RuntimeInconsistency,
    /// Server data inconsistency.
    DataInconsistency,
    /// Connection to the server was lost.
    ConnectionLoss,
    /// Error while marshalling or unmarshalling data.
    MarshallingError,
    /// Operation is not implemented.
    Unimplemented,
    /// Operation timed out.
    OperationTimeout,
    /// Invalid arguments.
    BadArguments,
    /// Session id unknown to the ensemble.
    UnknownSession,
    /// Generic API error.
    ApiError,
    /// Node does not exist.
    NoNode,
    /// Not authenticated for the operation.
    NoAuth,
    /// Version check failed.
    BadVersion,
    /// Ephemeral nodes may not have children.
    NoChildrenForEphemerals,
    /// Node already exists.
    NodeExists,
    /// Node has children.
    NotEmpty,
    /// Session has expired.
    SessionExpired,
    /// Invalid callback.
    InvalidCallback,
    /// Invalid ACL.
    InvalidAcl,
    /// Authentication failed.
    AuthFailed,
    /// Session moved to another server.
    SessionMoved,
    /// State-changing request sent to a read-only server.
    NotReadOnly,
    /// Any code this client does not know.
    Other(i32),
}

impl ErrorCode {
    /// Map a wire value to an error code.
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => ErrorCode::Ok,
            -1 => ErrorCode::SystemError,
            -2 => ErrorCode::RuntimeInconsistency,
            -3 => ErrorCode::DataInconsistency,
            -4 => ErrorCode::ConnectionLoss,
            -5 => ErrorCode::MarshallingError,
            -6 => ErrorCode::Unimplemented,
            -7 => ErrorCode::OperationTimeout,
            -8 => ErrorCode::BadArguments,
            -12 => ErrorCode::UnknownSession,
            -100 => ErrorCode::ApiError,
            -101 => ErrorCode::NoNode,
            -102 => ErrorCode::NoAuth,
            -103 => ErrorCode::BadVersion,
            -108 => ErrorCode::NoChildrenForEphemerals,
            -110 => ErrorCode::NodeExists,
            -111 => ErrorCode::NotEmpty,
            -112 => ErrorCode::SessionExpired,
            -113 => ErrorCode::InvalidCallback,
            -114 => ErrorCode::InvalidAcl,
            -115 => ErrorCode::AuthFailed,
            -118 => ErrorCode::SessionMoved,
            -119 => ErrorCode::NotReadOnly,
            other => ErrorCode::Other(other),
        }
    }

    /// The wire value of this code.
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::SystemError => -1,
            ErrorCode::RuntimeInconsistency => -2,
            ErrorCode::DataInconsistency => -3,
            ErrorCode::ConnectionLoss => -4,
            ErrorCode::MarshallingError => -5,
            ErrorCode::Unimplemented => -6,
            ErrorCode::OperationTimeout => -7,
            ErrorCode::BadArguments => -8,
            ErrorCode::UnknownSession => -12,
            ErrorCode::ApiError => -100,
            ErrorCode::NoNode => -101,
            ErrorCode::NoAuth => -102,
            ErrorCode::BadVersion => -103,
            ErrorCode::NoChildrenForEphemerals => -108,
            ErrorCode::NodeExists => -110,
            ErrorCode::NotEmpty => -111,
            ErrorCode::SessionExpired => -112,
            ErrorCode::InvalidCallback => -113,
            ErrorCode::InvalidAcl => -114,
            ErrorCode::AuthFailed => -115,
            ErrorCode::SessionMoved => -118,
            ErrorCode::NotReadOnly => -119,
            ErrorCode::Other(code) => code,
        }
    }

    /// Whether this is the success code.
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Ok => "ok",
            ErrorCode::SystemError => "system_error",
            ErrorCode::RuntimeInconsistency => "runtime_inconsistency",
            ErrorCode::DataInconsistency => "data_inconsistency",
            ErrorCode::ConnectionLoss => "connection_loss",
            ErrorCode::MarshallingError => "marshalling_error",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::OperationTimeout => "operation_timeout",
            ErrorCode::BadArguments => "invalid_arguments",
            ErrorCode::UnknownSession => "unknown_session",
            ErrorCode::ApiError => "api_error",
            ErrorCode::NoNode => "no_node",
            ErrorCode::NoAuth => "no_auth",
            ErrorCode::BadVersion => "bad_version",
            ErrorCode::NoChildrenForEphemerals => "no_children_for_ephemerals",
            ErrorCode::NodeExists => "node_exists",
            ErrorCode::NotEmpty => "not_empty",
            ErrorCode::SessionExpired => "session_expired",
            ErrorCode::InvalidCallback => "invalid_callback",
            ErrorCode::InvalidAcl => "invalid_acl",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::SessionMoved => "session_moved",
            ErrorCode::NotReadOnly => "not_read_only",
            ErrorCode::Other(code) => return write!(f, "error({})", code),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_map_both_ways() {
        for code in [0, -1, -2, -4, -8, -101, -103, -108, -110, -111, -112, -114] {
            assert_eq!(ErrorCode::from_i32(code).as_i32(), code);
        }
        assert_eq!(ErrorCode::from_i32(-103), ErrorCode::BadVersion);
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        assert_eq!(ErrorCode::from_i32(-999), ErrorCode::Other(-999));
        assert_eq!(ErrorCode::Other(-999).to_string(), "error(-999)");
    }
}

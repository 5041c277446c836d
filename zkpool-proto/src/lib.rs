//! # zkpool-proto
//!
//! Wire format for talking to a ZooKeeper-compatible coordination ensemble.
//!
//! This crate provides:
//! - **Codec**: big-endian primitives, buffers, strings and vectors
//! - **Frames**: length-prefixed frames with request/reply headers and the
//!   reserved xids for pings, watch events and watch replay
//! - **Records**: stat, ACL, create modes, the session handshake, every
//!   request and response body, and multi-op batches
//!
//! Everything here is pure data transformation. No I/O happens in this crate,
//! which lets the client engine and the in-process test ensemble share one
//! implementation of the protocol.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Primitive encoder and decoder.
pub mod codec;

/// Codec errors and ensemble result codes.
pub mod error;

/// Watch notifications.
pub mod event;

/// Frame boundaries and headers.
pub mod frame;

/// Multi-op batches.
pub mod multi;

/// Op codes and request bodies.
pub mod request;

/// Reply bodies.
pub mod response;

/// Stat, ACL, create mode and version records.
pub mod types;

/// Largest node payload the ensemble accepts (1 MiB).
pub const MAX_DATA_SIZE: usize = 1024 * 1024;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use codec::{Decode, Decoder, Encode, Encoder};
pub use error::{ErrorCode, ProtoError};
pub use event::{EventType, KeeperState, WatcherEvent};
pub use frame::{
    encode_frame, encode_request_frame, try_decode_frame, FrameKind, ReplyHeader, RequestHeader,
    LENGTH_PREFIX_SIZE, PING_XID, SET_WATCHES_XID, WATCH_EVENT_XID,
};
pub use multi::{MultiHeader, MultiOp, MultiResponse, Op, OpResult};
pub use request::{ConnectRequest, OpCode, Request, SetWatches};
pub use response::{ConnectResponse, Response};
pub use types::{Acl, CreateMode, Id, Permission, Stat, Version};

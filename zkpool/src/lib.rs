//! # zkpool
//!
//! Asynchronous client for a ZooKeeper-style coordination ensemble.
//!
//! This crate provides:
//! - **Client**: node reads and writes, one-shot watches, atomic multi-op
//!   commits and load fences, safe to share across tasks
//! - **Session engine**: handshake, liveness pings, transparent failover
//!   between ensemble members with session resumption and watch replay
//! - **Request correlation**: xid-based matching of replies to callers, with
//!   every in-flight operation of a lost connection failed, never retried
//!
//! ## Failure model
//!
//! | Condition            | Scope            | Caller sees                 |
//! |----------------------|------------------|-----------------------------|
//! | malformed frame      | one connection   | `ConnectionLoss`            |
//! | socket error/timeout | one connection   | `ConnectionLoss`            |
//! | ensemble outcome     | one operation    | `NoNode`, `BadVersion`, ... |
//! | session expiry       | the whole client | `SessionExpired`            |
//!
//! Wire encoding lives in `zkpool-proto`; the runtime seams (network, time,
//! tasks, randomness) live in `zkpool-core`.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export the wire records callers handle directly
pub use zkpool_proto::{
    Acl, CreateMode, ErrorCode, EventType, Id, KeeperState, MultiOp, Op, OpResult, Permission,
    Stat, Version, MAX_DATA_SIZE,
};

// Re-export providers for custom runtimes
pub use zkpool_core::{
    NetworkProvider, Providers, RandomProvider, SeededRandomProvider, TaskProvider, TimeProvider,
    TokioProviders,
};

// =============================================================================
// Modules
// =============================================================================

mod client;
mod config;
mod connection;
mod correlator;
mod engine;
mod ensemble;
mod error;
mod path;
mod session;
mod watch;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::Client;
pub use config::ClientConfig;
pub use ensemble::{ConnectionString, EnsembleMember, Reachability, DEFAULT_PORT};
pub use error::{ErrorCategory, ZkError, ZkResult};
pub use path::{validate_path, Chroot};
pub use session::SessionState;
pub use watch::{Watch, WatchKind, WatchResult, WatchedEvent};

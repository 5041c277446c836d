//! # zkpool-core
//!
//! Provider abstractions for the zkpool client.
//!
//! The connection engine never touches Tokio's networking, clock, spawner or
//! RNG directly. It goes through four small provider traits so the same engine
//! code runs against real sockets in production and against test doubles
//! (refusing networks, seeded randomness, paused clocks) in tests:
//!
//! - [`NetworkProvider`]: TCP connect and listen
//! - [`TimeProvider`]: sleep, timeout and monotonic time
//! - [`TaskProvider`]: named background task spawning
//! - [`RandomProvider`]: randomness for ensemble ordering
//!
//! The [`Providers`] trait bundles all four behind one type parameter.
//!
//! Unlike a single-threaded simulation runtime, every provider here is
//! `Send + Sync`: a client is shared by arbitrary caller tasks on a
//! multi-threaded runtime.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod network;
mod providers;
mod random;
mod task;
mod time;

pub use network::{NetworkProvider, TcpListenerTrait, TokioNetworkProvider, TokioTcpListener};
pub use providers::{Providers, TokioProviders};
pub use random::{RandomProvider, SeededRandomProvider, TokioRandomProvider};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};

//! Session state machine and the session record.
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Connected
//!                     ^             |  |           |
//!                     +-------------+  |           v
//!                                      |     Reconnecting <-+
//!                                      |        |    |      |
//!                                      |        |    +-> Handshaking
//!                                      v        v
//!                                    Expired (terminal) <-- Connected
//! ```
//!
//! `Connected -> Expired` is taken when the live connection itself reports
//! the session gone. Every non-terminal state can also move to `Closed`.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use zkpool_proto::{ConnectRequest, ConnectResponse};

use crate::{ZkError, ZkResult};

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing attempted yet.
    Disconnected,
    /// Opening a socket for the first session.
    Connecting,
    /// Handshake in flight on a fresh socket.
    Handshaking,
    /// Session live; operations flow.
    Connected,
    /// Socket lost; trying to resume the session elsewhere.
    Reconnecting,
    /// The session is gone. Terminal.
    Expired,
    /// The caller closed the client. Terminal.
    Closed,
}

impl SessionState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Closed) => true,
            (Disconnected, Connecting)
            | (Connecting, Handshaking)
            | (Handshaking, Connected | Connecting | Reconnecting | Expired)
            | (Connected, Reconnecting | Expired)
            | (Reconnecting, Handshaking | Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Expired => "expired",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct SessionRecord {
    id: i64,
    password: Vec<u8>,
    negotiated_timeout: Option<Duration>,
    last_received_at: Option<Duration>,
    handshake_in_flight: bool,
}

/// Owns the session id, password, negotiated timeout and last seen zxid.
///
/// One instance per client. The zxid is kept outside the lock so the
/// reader can advance it on every reply without contending with callers.
pub(crate) struct SessionManager {
    record: Mutex<SessionRecord>,
    last_zxid: AtomicI64,
    requested_timeout: Duration,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    pub(crate) fn new(requested_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            record: Mutex::new(SessionRecord::default()),
            last_zxid: AtomicI64::new(0),
            requested_timeout,
            state_tx,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Apply a transition. Illegal transitions are ignored and reported as `false`.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut from = SessionState::Disconnected;
        let applied = self.state_tx.send_if_modified(|state| {
            from = *state;
            if *state == next || !state.can_transition_to(next) {
                return false;
            }
            *state = next;
            true
        });
        if applied {
            tracing::debug!(%from, to = %next, "session state transition");
        } else if from != next {
            tracing::debug!(%from, to = %next, "session state transition rejected");
        }
        applied
    }

    /// Advance the last seen zxid. Never moves backwards.
    pub(crate) fn observe_zxid(&self, zxid: i64) {
        self.last_zxid.fetch_max(zxid, Ordering::AcqRel);
    }

    pub(crate) fn last_zxid(&self) -> i64 {
        self.last_zxid.load(Ordering::Acquire)
    }

    pub(crate) fn session_id(&self) -> Option<i64> {
        let record = self.record.lock();
        (record.id != 0).then_some(record.id)
    }

    pub(crate) fn negotiated_timeout(&self) -> Option<Duration> {
        self.record.lock().negotiated_timeout
    }

    /// Note that a frame arrived; feeds the expiry deadline.
    pub(crate) fn record_receive(&self, now: Duration) {
        self.record.lock().last_received_at = Some(now);
    }

    /// When the ensemble will have expired the session if nothing reaches it.
    ///
    /// `None` until a session exists.
    pub(crate) fn expiry_deadline(&self) -> Option<Duration> {
        let record = self.record.lock();
        match (record.last_received_at, record.negotiated_timeout) {
            (Some(last), Some(timeout)) if record.id != 0 => Some(last + timeout),
            _ => None,
        }
    }

    /// Start a handshake and build its request: a resume when a session
    /// exists, a fresh request otherwise.
    ///
    /// Fails if another handshake is still in flight.
    pub(crate) fn begin_handshake(&self) -> ZkResult<ConnectRequest> {
        let mut record = self.record.lock();
        if record.handshake_in_flight {
            return Err(ZkError::ConnectionLoss);
        }
        record.handshake_in_flight = true;
        let timeout_ms = self.requested_timeout.as_millis().min(i32::MAX as u128) as i32;
        Ok(if record.id == 0 {
            ConnectRequest::fresh(timeout_ms)
        } else {
            ConnectRequest::resume(record.id, record.password.clone(), self.last_zxid(), timeout_ms)
        })
    }

    /// Abandon the in-flight handshake (socket failure before a reply).
    pub(crate) fn abort_handshake(&self) {
        self.record.lock().handshake_in_flight = false;
    }

    /// Record the handshake reply.
    ///
    /// Returns whether an existing session was resumed. An expired reply,
    /// or a resume answered with some other session id, yields
    /// `SessionExpired`.
    pub(crate) fn complete_handshake(
        &self,
        response: &ConnectResponse,
        now: Duration,
    ) -> ZkResult<bool> {
        let mut record = self.record.lock();
        record.handshake_in_flight = false;
        if response.is_expired() {
            return Err(ZkError::SessionExpired);
        }
        if record.id != 0 && record.id != response.session_id {
            tracing::warn!(
                session_id = record.id,
                offered = response.session_id,
                "resume answered with a different session"
            );
            return Err(ZkError::SessionExpired);
        }
        let resumed = record.id != 0;
        record.id = response.session_id;
        record.password = response.password.clone();
        record.negotiated_timeout = Some(Duration::from_millis(response.timeout_ms as u64));
        record.last_received_at = Some(now);
        Ok(resumed)
    }
}

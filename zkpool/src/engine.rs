//! Shared engine state and the failover driver.
//!
//! The driver is the only place that opens sockets. It walks the candidate
//! list with backoff, performs the fresh or resume handshake, opens a
//! socket generation on the correlator, replays watches after a resume,
//! runs the generation and tears it down when it ends. It stops when the
//! session expires or the client shuts down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zkpool_core::{NetworkProvider, Providers, TimeProvider};
use zkpool_proto::{encode_request_frame, OpCode, Request, SET_WATCHES_XID};

use crate::config::ClientConfig;
use crate::connection::{handshake, run_generation, ConnectionError, FrameReader, Stream};
use crate::correlator::{Correlator, FrameSender, ReplyFuture};
use crate::ensemble::{Backoff, ConnectionString, EnsembleMember, EnsembleSelector};
use crate::path::Chroot;
use crate::session::{SessionManager, SessionState};
use crate::watch::{WatchDispatcher, WatchRegistration};
use crate::{ZkError, ZkResult};

/// A socket that completed its handshake.
struct Established<P: Providers> {
    reader: FrameReader<tokio::io::ReadHalf<Stream<P>>>,
    writer: tokio::io::WriteHalf<Stream<P>>,
    resumed: bool,
    negotiated: Duration,
}

/// Everything one client instance owns, shared by the facade and the driver.
pub(crate) struct Engine<P: Providers> {
    pub(crate) providers: P,
    pub(crate) config: ClientConfig,
    pub(crate) chroot: Chroot,
    pub(crate) session: SessionManager,
    pub(crate) correlator: Correlator,
    pub(crate) watches: WatchDispatcher,
    pub(crate) shutdown: CancellationToken,
    selector: Mutex<EnsembleSelector>,
    closing: AtomicBool,
}

impl<P: Providers> Engine<P> {
    pub(crate) fn new(providers: P, config: ClientConfig, connection: ConnectionString) -> Arc<Self> {
        let selector = EnsembleSelector::new(connection.members().to_vec(), providers.random());
        Arc::new(Self {
            session: SessionManager::new(config.session_timeout),
            correlator: Correlator::new(),
            watches: WatchDispatcher::new(connection.chroot().clone()),
            chroot: connection.chroot().clone(),
            shutdown: CancellationToken::new(),
            selector: Mutex::new(selector),
            closing: AtomicBool::new(false),
            providers,
            config,
        })
    }

    /// Queue a request on the live generation.
    pub(crate) fn submit(
        &self,
        request: &Request,
        watch: Option<WatchRegistration>,
    ) -> ZkResult<ReplyFuture> {
        self.correlator
            .submit(request, watch, self.providers.time().now())
    }

    /// Snapshot of the member list with liveness bookkeeping.
    pub(crate) fn members(&self) -> Vec<EnsembleMember> {
        self.selector.lock().members().to_vec()
    }

    /// Stop reconnecting once the current generation ends.
    pub(crate) fn begin_close(&self) {
        self.closing.store(true, Ordering::Release);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.shutdown.is_cancelled()
    }

    /// Close without a round trip: fail everything with `Closed` and stop.
    pub(crate) fn close_local(&self) {
        self.begin_close();
        if self.session.transition(SessionState::Closed) {
            tracing::info!(session_id = ?self.session.session_id(), "client closed");
        }
        self.correlator.shutdown(ZkError::Closed);
        self.watches.fail_all(ZkError::Closed);
        self.shutdown.cancel();
    }

    /// Terminal expiry: fail everything with `SessionExpired` and stop.
    pub(crate) fn expire(&self) {
        if self.is_closing() {
            return;
        }
        if self.session.transition(SessionState::Expired) {
            tracing::error!(session_id = ?self.session.session_id(), "session expired");
        }
        self.correlator.shutdown(ZkError::SessionExpired);
        self.watches.fail_all(ZkError::SessionExpired);
        self.shutdown.cancel();
    }

    fn deadline_passed(&self) -> bool {
        self.session
            .expiry_deadline()
            .is_some_and(|deadline| self.providers.time().now() >= deadline)
    }

    /// Failover loop. Runs until expiry or shutdown.
    pub(crate) async fn run(self: Arc<Self>) {
        let time = self.providers.time().clone();
        let mut backoff = Backoff::new(
            self.config.initial_reconnect_delay,
            self.config.max_reconnect_delay,
        );
        let mut generation: u64 = 0;
        self.session.transition(SessionState::Connecting);

        while !self.is_closing() {
            if self.deadline_passed() {
                self.expire();
                break;
            }

            let delay = backoff.delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = time.sleep(delay) => {}
                }
            }

            let (index, address) = self.selector.lock().next_candidate();
            tracing::debug!(%address, attempt_delay = ?delay, "connecting to ensemble member");
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                attempt = self.establish(&address) => attempt,
            };

            let established = match attempt {
                Ok(established) => established,
                Err(ConnectionError::Session(ZkError::SessionExpired)) => {
                    tracing::warn!(%address, "ensemble reports the session as expired");
                    self.expire();
                    break;
                }
                Err(error) => {
                    tracing::warn!(%address, %error, "connection attempt failed");
                    self.selector.lock().mark_unreachable(index);
                    backoff.failure();
                    let retry_state = if self.session.session_id().is_some() {
                        SessionState::Reconnecting
                    } else {
                        SessionState::Connecting
                    };
                    self.session.transition(retry_state);
                    continue;
                }
            };

            self.selector.lock().mark_reachable(index);
            backoff.reset();
            generation += 1;

            let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
            if established.resumed {
                self.replay_watches(&outgoing_tx);
            }
            self.correlator.open_generation(generation, outgoing_tx);
            if !self.session.transition(SessionState::Connected) {
                // Closed while the handshake was in flight.
                self.correlator.teardown(generation, ZkError::ConnectionLoss);
                break;
            }
            tracing::info!(
                %address,
                generation,
                session_id = ?self.session.session_id(),
                negotiated_timeout = ?established.negotiated,
                resumed = established.resumed,
                "session established"
            );

            run_generation(
                &self,
                generation,
                established.reader,
                established.writer,
                outgoing_rx,
                established.negotiated,
            )
            .await;

            self.correlator.teardown(generation, ZkError::ConnectionLoss);
            if self.is_closing() {
                break;
            }
            tracing::info!(%address, generation, "connection lost, reconnecting");
            self.session.transition(SessionState::Reconnecting);
        }
        tracing::debug!("session driver stopped");
    }

    /// Connect and handshake with one candidate, bounded by `connect_timeout` each.
    async fn establish(&self, address: &str) -> Result<Established<P>, ConnectionError> {
        let time = self.providers.time();
        let timeout = self.config.connect_timeout;
        let stream = time
            .timeout(timeout, self.providers.network().connect(address))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout)??;

        self.session.transition(SessionState::Handshaking);
        let request = self.session.begin_handshake()?;
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half, self.config.max_frame_size);

        let reply = time
            .timeout(timeout, handshake(&mut reader, &mut writer, &request))
            .await;
        let response = match reply {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                self.session.abort_handshake();
                return Err(error);
            }
            Err(_) => {
                self.session.abort_handshake();
                return Err(ConnectionError::ConnectTimeout);
            }
        };

        let resumed = self.session.complete_handshake(&response, time.now())?;
        let negotiated = self
            .session
            .negotiated_timeout()
            .unwrap_or(self.config.session_timeout);
        Ok(Established {
            reader,
            writer,
            resumed,
            negotiated,
        })
    }

    /// Queue a set-watches frame for every watch still registered.
    fn replay_watches(&self, outgoing: &FrameSender) {
        let watches = self.watches.snapshot(self.session.last_zxid());
        if watches.is_empty() {
            return;
        }
        let count = watches.data.len() + watches.exist.len() + watches.child.len();
        match Request::SetWatches(watches).encode_body() {
            Ok(body) => {
                tracing::debug!(count, "replaying watches after resume");
                let _ = outgoing.send(encode_request_frame(SET_WATCHES_XID, OpCode::SetWatches, &body));
            }
            Err(error) => tracing::warn!(%error, "could not encode watch replay"),
        }
    }
}

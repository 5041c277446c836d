//! Request correlation: xid assignment, the pending table and its teardown.
//!
//! # Lifecycle of a request
//!
//! ```text
//!   submit   -> xid allocated, frame queued to the writer, entry stored
//!   take     -> reader removes the entry for an inbound xid (unknown = protocol error)
//!   complete -> caller's ReplyFuture resolves, exactly once
//!   teardown -> every entry of the dead generation fails with ConnectionLoss
//! ```
//!
//! The frame is pushed onto the writer queue while the table lock is held,
//! so wire order equals acceptance order within a generation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use zkpool_proto::{encode_request_frame, OpCode, Request, Response};

use crate::watch::WatchRegistration;
use crate::{ZkError, ZkResult};

/// Queue feeding one generation's writer.
pub(crate) type FrameSender = mpsc::UnboundedSender<Vec<u8>>;

type Responder = oneshot::Sender<ZkResult<Response>>;

/// One request awaiting its reply.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) xid: i32,
    pub(crate) op: OpCode,
    pub(crate) generation: u64,
    pub(crate) issued_at: Duration,
    pub(crate) watch: Option<WatchRegistration>,
    responder: Responder,
}

impl PendingRequest {
    /// Resolve the caller's handle. Consumes the entry so it happens once.
    pub(crate) fn complete(self, result: ZkResult<Response>) {
        // The caller may have stopped waiting.
        let _ = self.responder.send(result);
    }
}

/// Caller-side handle for a submitted request.
#[derive(Debug)]
pub(crate) struct ReplyFuture {
    receiver: oneshot::Receiver<ZkResult<Response>>,
}

impl Future for ReplyFuture {
    type Output = ZkResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ZkError::ConnectionLoss)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug)]
struct ActiveGeneration {
    id: u64,
    next_xid: i32,
    outgoing: FrameSender,
}

#[derive(Debug, Default)]
struct CorrelatorState {
    generation: Option<ActiveGeneration>,
    pending: HashMap<i32, PendingRequest>,
    terminal: Option<ZkError>,
}

/// The pending-request table.
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    state: Mutex<CorrelatorState>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start accepting requests for a new socket generation. Xids restart at 1.
    pub(crate) fn open_generation(&self, id: u64, outgoing: FrameSender) {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return;
        }
        state.generation = Some(ActiveGeneration {
            id,
            next_xid: 1,
            outgoing,
        });
    }

    /// Queue a request on the live generation.
    ///
    /// Fails immediately with `ConnectionLoss` when no generation is live, or
    /// with the terminal error once the client has expired or closed. An
    /// oversized payload fails with `InvalidArguments` before anything is queued.
    pub(crate) fn submit(
        &self,
        request: &Request,
        watch: Option<WatchRegistration>,
        now: Duration,
    ) -> ZkResult<ReplyFuture> {
        let op = request.op_code();
        let body = request.encode_body()?;

        let (responder, receiver) = oneshot::channel();
        let mut state = self.state.lock();
        if let Some(error) = &state.terminal {
            return Err(error.clone());
        }
        let generation = state.generation.as_mut().ok_or(ZkError::ConnectionLoss)?;
        let xid = generation.next_xid;
        let frame = encode_request_frame(xid, op, &body);
        if generation.outgoing.send(frame).is_err() {
            return Err(ZkError::ConnectionLoss);
        }
        generation.next_xid = generation.next_xid.wrapping_add(1).max(1);
        let generation = generation.id;
        state.pending.insert(
            xid,
            PendingRequest {
                xid,
                op,
                generation,
                issued_at: now,
                watch,
                responder,
            },
        );
        tracing::debug!(xid, ?op, generation, "request submitted");
        Ok(ReplyFuture { receiver })
    }

    /// Remove the entry for an inbound xid.
    ///
    /// `None` means the ensemble answered something we never asked, which
    /// is a protocol error for the generation.
    pub(crate) fn take(&self, generation: u64, xid: i32) -> Option<PendingRequest> {
        let mut state = self.state.lock();
        match state.pending.get(&xid) {
            Some(pending) if pending.generation == generation => state.pending.remove(&xid),
            _ => None,
        }
    }

    /// End a generation: stop accepting requests for it and fail its entries.
    pub(crate) fn teardown(&self, generation: u64, error: ZkError) {
        let failed: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            if state
                .generation
                .as_ref()
                .is_some_and(|active| active.id == generation)
            {
                state.generation = None;
            }
            let xids: Vec<i32> = state
                .pending
                .values()
                .filter(|pending| pending.generation == generation)
                .map(|pending| pending.xid)
                .collect();
            xids.iter()
                .filter_map(|xid| state.pending.remove(xid))
                .collect()
        };
        if !failed.is_empty() {
            tracing::debug!(generation, count = failed.len(), %error, "failing in-flight requests");
        }
        for pending in failed {
            pending.complete(Err(error.clone()));
        }
    }

    /// Fail everything and refuse all further submissions with `error`.
    pub(crate) fn shutdown(&self, error: ZkError) {
        let failed: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            if state.terminal.is_none() {
                state.terminal = Some(error.clone());
            }
            state.generation = None;
            state.pending.drain().map(|(_, pending)| pending).collect()
        };
        for pending in failed {
            pending.complete(Err(error.clone()));
        }
    }

    /// Age of the oldest outstanding request.
    pub(crate) fn oldest_pending(&self, now: Duration) -> Option<Duration> {
        let state = self.state.lock();
        state
            .pending
            .values()
            .map(|pending| now.saturating_sub(pending.issued_at))
            .max()
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkpool_proto::{Decode, Decoder, RequestHeader, MAX_DATA_SIZE};

    fn get(path: &str) -> Request {
        Request::GetData {
            path: path.to_string(),
            watch: false,
        }
    }

    fn header(frame: &[u8]) -> RequestHeader {
        RequestHeader::decode(&mut Decoder::new(&frame[4..])).expect("header")
    }

    #[test]
    fn test_submit_without_generation_is_connection_loss() {
        let correlator = Correlator::new();
        assert_eq!(
            correlator.submit(&get("/a"), None, Duration::ZERO).err(),
            Some(ZkError::ConnectionLoss)
        );
    }

    #[test]
    fn test_xids_increase_and_frames_stay_in_order() {
        let correlator = Correlator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.open_generation(1, tx);
        let _a = correlator.submit(&get("/a"), None, Duration::ZERO).expect("a");
        let _b = correlator.submit(&get("/b"), None, Duration::ZERO).expect("b");

        let first = rx.try_recv().expect("first frame");
        let second = rx.try_recv().expect("second frame");
        assert_eq!(header(&first).xid, 1);
        assert_eq!(header(&second).xid, 2);
        assert_eq!(header(&first).op, OpCode::GetData);
        assert_eq!(correlator.pending_count(), 2);
    }

    #[test]
    fn test_xids_restart_each_generation() {
        let correlator = Correlator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.open_generation(1, tx);
        let _a = correlator.submit(&get("/a"), None, Duration::ZERO).expect("a");
        correlator.teardown(1, ZkError::ConnectionLoss);

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        correlator.open_generation(2, tx2);
        let _b = correlator.submit(&get("/b"), None, Duration::ZERO).expect("b");
        assert_eq!(header(&rx.try_recv().expect("gen 1")).xid, 1);
        assert_eq!(header(&rx2.try_recv().expect("gen 2")).xid, 1);
    }

    #[tokio::test]
    async fn test_resolve_completes_exactly_once() {
        let correlator = Correlator::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        correlator.open_generation(1, tx);
        let reply = correlator.submit(&get("/a"), None, Duration::ZERO).expect("submit");

        correlator
            .take(1, 1)
            .expect("pending")
            .complete(Ok(Response::Empty));
        assert!(correlator.take(1, 1).is_none());
        assert_eq!(reply.await, Ok(Response::Empty));
    }

    #[test]
    fn test_unknown_xid_is_not_taken() {
        let correlator = Correlator::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        correlator.open_generation(1, tx);
        let _a = correlator.submit(&get("/a"), None, Duration::ZERO).expect("a");
        assert!(correlator.take(1, 99).is_none());
        assert!(correlator.take(2, 1).is_none(), "xid belongs to generation 1");
    }

    #[tokio::test]
    async fn test_teardown_fails_every_pending_request() {
        let correlator = Correlator::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        correlator.open_generation(3, tx);
        let replies: Vec<_> = (0..5)
            .map(|_| correlator.submit(&get("/a"), None, Duration::ZERO).expect("submit"))
            .collect();

        correlator.teardown(3, ZkError::ConnectionLoss);
        for reply in replies {
            assert_eq!(reply.await, Err(ZkError::ConnectionLoss));
        }
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(
            correlator.submit(&get("/a"), None, Duration::ZERO).err(),
            Some(ZkError::ConnectionLoss)
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_sticky() {
        let correlator = Correlator::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        correlator.open_generation(1, tx);
        let reply = correlator.submit(&get("/a"), None, Duration::ZERO).expect("submit");
        correlator.shutdown(ZkError::SessionExpired);
        assert_eq!(reply.await, Err(ZkError::SessionExpired));

        let (tx, _rx) = mpsc::unbounded_channel();
        correlator.open_generation(2, tx);
        assert_eq!(
            correlator.submit(&get("/a"), None, Duration::ZERO).err(),
            Some(ZkError::SessionExpired)
        );
    }

    #[test]
    fn test_oversized_payload_never_queued() {
        let correlator = Correlator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator.open_generation(1, tx);
        let request = Request::SetData {
            path: "/a".to_string(),
            data: vec![0; MAX_DATA_SIZE + 1],
            version: zkpool_proto::Version::Any,
        };
        assert!(matches!(
            correlator.submit(&request, None, Duration::ZERO),
            Err(ZkError::InvalidArguments(_))
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_oldest_pending_age() {
        let correlator = Correlator::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        correlator.open_generation(1, tx);
        let _a = correlator
            .submit(&get("/a"), None, Duration::from_millis(100))
            .expect("a");
        let _b = correlator
            .submit(&get("/b"), None, Duration::from_millis(300))
            .expect("b");
        assert_eq!(
            correlator.oldest_pending(Duration::from_millis(400)),
            Some(Duration::from_millis(300))
        );
    }
}

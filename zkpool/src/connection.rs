//! Connection multiplexer: one socket generation's reader and writer.
//!
//! A generation starts after a successful handshake and ends the first time
//! either activity stops, for any reason: socket error, end of stream, read
//! silence, protocol error or client shutdown. Both activities share a
//! cancellation token, so one ending stops the other.
//!
//! ```text
//!   callers --submit--> Correlator --frame--> [queue] --> writer --> socket
//!                                                 ping --^
//!   socket --> reader --+-- ping ack    --> (liveness only)
//!                       +-- watch event --> WatchDispatcher
//!                       +-- response    --> Correlator --> caller
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zkpool_core::{NetworkProvider, Providers, TaskProvider, TimeProvider};
use zkpool_proto::{
    encode_frame, encode_request_frame, try_decode_frame, ConnectRequest, ConnectResponse, Decode,
    Decoder, Encode, Encoder, ErrorCode, FrameKind, KeeperState, MultiResponse, OpCode, ProtoError,
    ReplyHeader, Response, WatcherEvent, PING_XID,
};

use crate::correlator::PendingRequest;
use crate::engine::Engine;
use crate::watch::WatchKind;
use crate::{ZkError, ZkResult};

/// Socket stream type of a provider bundle.
pub(crate) type Stream<P> = <<P as Providers>::Network as NetworkProvider>::TcpStream;

/// Why a connection attempt or generation ended.
#[derive(Error, Debug)]
pub(crate) enum ConnectionError {
    /// The peer closed the socket.
    #[error("connection closed by peer")]
    Eof,

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bytes on the wire did not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// A reply arrived for an xid nobody is waiting on.
    #[error("reply for unknown xid {0}")]
    UnknownXid(i32),

    /// Nothing arrived within the read-silence threshold.
    #[error("no frame received within {0:?}")]
    ReadTimeout(Duration),

    /// A request went unanswered past the read-silence threshold.
    #[error("oldest request unanswered for {0:?}")]
    ReplyTimeout(Duration),

    /// Connect or handshake did not finish in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The handshake was answered with a session-level outcome.
    #[error("session: {0}")]
    Session(#[from] ZkError),
}

/// Buffered reader that splits length-prefixed frames off a byte stream.
pub(crate) struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Read until one complete frame body is available.
    pub(crate) async fn next_frame(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((body, consumed)) = try_decode_frame(&self.buffer, self.max_frame_size)? {
                self.buffer.drain(..consumed);
                return Ok(body);
            }
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Err(ConnectionError::Eof);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Send the handshake request and wait for its reply.
pub(crate) async fn handshake<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut W,
    request: &ConnectRequest,
) -> Result<ConnectResponse, ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut enc = Encoder::new();
    request.encode(&mut enc);
    writer.write_all(&encode_frame(&enc.into_bytes())).await?;
    writer.flush().await?;

    let body = reader.next_frame().await?;
    let mut dec = Decoder::new(&body);
    Ok(ConnectResponse::decode(&mut dec)?)
}

/// Run one generation to completion.
///
/// Spawns the writer and reader activities and returns once both stopped.
pub(crate) async fn run_generation<P: Providers>(
    engine: &Arc<Engine<P>>,
    generation: u64,
    reader: FrameReader<tokio::io::ReadHalf<Stream<P>>>,
    writer: tokio::io::WriteHalf<Stream<P>>,
    outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    negotiated: Duration,
) {
    let token = engine.shutdown.child_token();
    let ping_interval = engine.config.ping_interval(negotiated);
    let read_timeout = engine.config.read_timeout(negotiated);
    let task = engine.providers.task();

    let writer_handle = task.spawn_task(
        "zk_writer",
        writer_loop(
            engine.providers.time().clone(),
            writer,
            outgoing,
            ping_interval,
            token.clone(),
        ),
    );
    let reader_handle = task.spawn_task(
        "zk_reader",
        reader_loop(engine.clone(), generation, reader, read_timeout, token.clone()),
    );

    token.cancelled().await;
    let _ = writer_handle.await;
    let _ = reader_handle.await;
}

/// Drain the outgoing queue onto the socket; ping when idle.
async fn writer_loop<T, W>(
    time: T,
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    ping_interval: Duration,
    token: CancellationToken,
) where
    T: TimeProvider,
    W: AsyncWrite + Unpin + Send,
{
    let ping = encode_request_frame(PING_XID, OpCode::Ping, &[]);
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = outgoing.recv() => match frame {
                Some(frame) => frame,
                None => {
                    tracing::debug!("writer: outgoing queue closed");
                    break;
                }
            },
            // Restarted by every loop iteration, so it only fires when idle.
            _ = time.sleep(ping_interval) => {
                tracing::debug!("writer: idle, sending ping");
                ping.clone()
            }
        };
        if let Err(error) = write_frame(&mut writer, &frame).await {
            tracing::warn!(%error, "writer: write failed, ending generation");
            break;
        }
    }
    let _ = writer.shutdown().await;
    token.cancel();
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Read frames and route them until the generation ends.
///
/// Two deadlines end the generation: no frame at all for `read_timeout`,
/// or a request still unanswered after `read_timeout`. The second catches a
/// member that keeps acknowledging pings but never replies.
async fn reader_loop<P, R>(
    engine: Arc<Engine<P>>,
    generation: u64,
    mut reader: FrameReader<R>,
    read_timeout: Duration,
    token: CancellationToken,
) where
    P: Providers,
    R: AsyncRead + Unpin + Send,
{
    let time = engine.providers.time().clone();
    // Requests submitted while the reader waits are noticed on the next tick.
    let tick = read_timeout / 4;
    let mut last_frame_at = time.now();
    let outcome: Result<(), ConnectionError> = async {
        loop {
            let now = time.now();
            let silence = now.saturating_sub(last_frame_at);
            if silence >= read_timeout {
                return Err(ConnectionError::ReadTimeout(read_timeout));
            }
            let oldest = engine.correlator.oldest_pending(now).unwrap_or_default();
            if oldest >= read_timeout {
                return Err(ConnectionError::ReplyTimeout(oldest));
            }
            let wait = read_timeout.saturating_sub(silence.max(oldest)).min(tick);

            let body = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                frame = time.timeout(wait, reader.next_frame()) => match frame {
                    Ok(frame) => frame?,
                    Err(_) => continue,
                },
            };
            last_frame_at = time.now();
            engine.session.record_receive(last_frame_at);
            route_frame(&engine, generation, &body)?;
        }
    }
    .await;

    match outcome {
        Ok(()) => tracing::debug!(generation, "reader: stopped"),
        Err(ConnectionError::Eof) => tracing::info!(generation, "reader: connection closed by peer"),
        Err(ConnectionError::Session(ZkError::SessionExpired)) => {
            tracing::warn!(generation, "reader: ensemble reports the session as expired");
            engine.expire();
        }
        Err(error) => tracing::warn!(
            generation,
            %error,
            oldest_pending = ?engine.correlator.oldest_pending(time.now()),
            "reader: tearing down connection"
        ),
    }
    token.cancel();
}

/// Classify one inbound frame by xid and hand it to its consumer.
fn route_frame<P: Providers>(
    engine: &Engine<P>,
    generation: u64,
    body: &[u8],
) -> Result<(), ConnectionError> {
    let mut dec = Decoder::new(body);
    let header = ReplyHeader::decode(&mut dec)?;
    if header.zxid > 0 {
        engine.session.observe_zxid(header.zxid);
    }

    match FrameKind::classify(header.xid)? {
        FrameKind::PingAck => tracing::debug!(generation, "ping acknowledged"),
        FrameKind::WatchEvent => {
            let event = WatcherEvent::decode(&mut dec)?;
            dec.finish()?;
            if event.state == KeeperState::Expired {
                return Err(ZkError::SessionExpired.into());
            }
            engine.watches.dispatch(&event);
        }
        FrameKind::SetWatchesAck => {
            if !header.err.is_ok() {
                tracing::warn!(generation, err = %header.err, "watch replay rejected");
            }
        }
        FrameKind::Response(xid) => {
            let pending = engine
                .correlator
                .take(generation, xid)
                .ok_or(ConnectionError::UnknownXid(xid))?;
            match decode_result(pending.op, header.err, &mut dec) {
                Ok(result) => {
                    deliver(engine, pending, result);
                    if header.err == ErrorCode::SessionExpired {
                        return Err(ZkError::SessionExpired.into());
                    }
                }
                Err(error) => {
                    pending.complete(Err(ZkError::ConnectionLoss));
                    return Err(error.into());
                }
            }
        }
    }
    Ok(())
}

/// Turn a reply header's code plus body into the caller's result.
fn decode_result(
    op: OpCode,
    err: ErrorCode,
    dec: &mut Decoder<'_>,
) -> Result<ZkResult<Response>, ProtoError> {
    if op == OpCode::Multi && !dec.is_empty() {
        let multi = MultiResponse::decode(dec)?;
        dec.finish()?;
        return Ok(match multi.first_failure() {
            Some((index, code)) => Err(ZkError::Transaction { index, code }),
            None if err.is_ok() => Ok(Response::Multi(multi)),
            None => Err(ZkError::from_code(err)),
        });
    }
    if !err.is_ok() {
        return Ok(Err(ZkError::from_code(err)));
    }
    Ok(Ok(Response::decode(op, dec)?))
}

/// Register the request's watch if its read qualified, then resolve it.
fn deliver<P: Providers>(engine: &Engine<P>, mut pending: PendingRequest, result: ZkResult<Response>) {
    if let Some(registration) = pending.watch.take() {
        let qualifies = match &result {
            Ok(_) => true,
            Err(ZkError::NoNode) => registration.kind() == WatchKind::Exists,
            Err(_) => false,
        };
        if qualifies {
            engine.watches.register(registration);
        }
    }
    pending.complete(result);
}

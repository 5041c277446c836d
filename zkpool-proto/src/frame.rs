//! Length-prefixed frames and the request/reply headers inside them.
//!
//! Frame format: `[length:4][body:length]`
//!
//! - **length**: body size in bytes (big-endian i32)
//! - **body**: a handshake record, or a header followed by an op body
//!
//! Request bodies start with `[xid:4][type:4]`, reply bodies with
//! `[xid:4][zxid:8][err:4]`. A handful of xids are reserved for frames that
//! do not correlate with a caller's request.

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::{ErrorCode, OpCode, ProtoError};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Reserved xid for ping requests and their acknowledgements.
pub const PING_XID: i32 = -1;

/// Reserved xid for watch-event notifications pushed by the ensemble.
pub const WATCH_EVENT_XID: i32 = -2;

/// Reserved xid for the set-watches replay sent after a session resume.
pub const SET_WATCHES_XID: i32 = -8;

/// Classification of an inbound reply by its xid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Acknowledgement of a ping.
    PingAck,
    /// Watch-event notification.
    WatchEvent,
    /// Acknowledgement of a set-watches replay.
    SetWatchesAck,
    /// Response to the caller request with this xid.
    Response(i32),
}

impl FrameKind {
    /// Classify a reply xid. Unknown negative xids are a protocol error.
    pub fn classify(xid: i32) -> Result<Self, ProtoError> {
        match xid {
            PING_XID => Ok(FrameKind::PingAck),
            WATCH_EVENT_XID => Ok(FrameKind::WatchEvent),
            SET_WATCHES_XID => Ok(FrameKind::SetWatchesAck),
            xid if xid >= 0 => Ok(FrameKind::Response(xid)),
            other => Err(ProtoError::UnknownXid(other)),
        }
    }
}

/// Header of every post-handshake request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Correlation id.
    pub xid: i32,
    /// Operation type.
    pub op: OpCode,
}

impl Encode for RequestHeader {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i32(self.xid);
        enc.write_i32(self.op.as_i32());
    }
}

impl Decode for RequestHeader {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let xid = dec.read_i32()?;
        let op = OpCode::from_i32(dec.read_i32()?)?;
        Ok(Self { xid, op })
    }
}

/// Header of every post-handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Correlation id (or a reserved marker).
    pub xid: i32,
    /// Last transaction id applied by the server when it replied.
    pub zxid: i64,
    /// Result code.
    pub err: ErrorCode,
}

impl Encode for ReplyHeader {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i32(self.xid);
        enc.write_i64(self.zxid);
        enc.write_i32(self.err.as_i32());
    }
}

impl Decode for ReplyHeader {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            xid: dec.read_i32()?,
            zxid: dec.read_i64()?,
            err: ErrorCode::from_i32(dec.read_i32()?),
        })
    }
}

/// Wrap a body in a length prefix.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as i32).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Build a complete request frame from an xid, an op code and an encoded body.
pub fn encode_request_frame(xid: i32, op: OpCode, body: &[u8]) -> Vec<u8> {
    let mut enc = Encoder::with_capacity(8 + body.len());
    RequestHeader { xid, op }.encode(&mut enc);
    let mut frame_body = enc.into_bytes();
    frame_body.extend_from_slice(body);
    encode_frame(&frame_body)
}

/// Try to split one frame off the front of a buffer that may hold partial data.
///
/// # Returns
///
/// - `Ok(Some((body, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if the length prefix is negative or above `max_frame_size`
///
/// # Examples
///
/// ```
/// use zkpool_proto::{encode_frame, try_decode_frame};
///
/// let frame = encode_frame(b"body");
/// assert!(try_decode_frame(&frame[..3], 1024).expect("partial").is_none());
///
/// let (body, consumed) = try_decode_frame(&frame, 1024).expect("ok").expect("complete");
/// assert_eq!(body, b"body");
/// assert_eq!(consumed, frame.len());
/// ```
pub fn try_decode_frame(
    data: &[u8],
    max_frame_size: usize,
) -> Result<Option<(Vec<u8>, usize)>, ProtoError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let length = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if length < 0 {
        return Err(ProtoError::InvalidLength { length });
    }
    let length = length as usize;
    if length > max_frame_size {
        return Err(ProtoError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }
    let total = LENGTH_PREFIX_SIZE + length;
    if data.len() < total {
        return Ok(None);
    }
    Ok(Some((data[LENGTH_PREFIX_SIZE..total].to_vec(), total)))
}

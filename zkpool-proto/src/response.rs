//! Response bodies, decoded according to the op code of the request they answer.

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::{MultiResponse, OpCode, ProtoError, Stat};

/// Handshake reply, the first frame the ensemble sends on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    /// Protocol version.
    pub protocol_version: i32,
    /// Negotiated session timeout in milliseconds; `<= 0` means the
    /// requested session has expired.
    pub timeout_ms: i32,
    /// Session id assigned (or confirmed) by the ensemble.
    pub session_id: i64,
    /// Session password.
    pub password: Vec<u8>,
    /// Whether the member only serves reads.
    pub read_only: bool,
}

impl ConnectResponse {
    /// Reply that rejects a resume because the session is gone.
    pub fn expired() -> Self {
        Self {
            protocol_version: 0,
            timeout_ms: 0,
            session_id: 0,
            password: vec![0; 16],
            read_only: false,
        }
    }

    /// Whether this reply reports an expired session.
    pub fn is_expired(&self) -> bool {
        self.timeout_ms <= 0
    }
}

impl Encode for ConnectResponse {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i32(self.protocol_version);
        enc.write_i32(self.timeout_ms);
        enc.write_i64(self.session_id);
        enc.write_buffer(&self.password);
        enc.write_bool(self.read_only);
    }
}

impl Decode for ConnectResponse {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let protocol_version = dec.read_i32()?;
        let timeout_ms = dec.read_i32()?;
        let session_id = dec.read_i64()?;
        let password = dec.read_buffer()?;
        let read_only = if dec.is_empty() { false } else { dec.read_bool()? };
        Ok(Self {
            protocol_version,
            timeout_ms,
            session_id,
            password,
            read_only,
        })
    }
}

/// A decoded reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Node created.
    Create {
        /// Actual path (with any sequence suffix).
        path: String,
        /// Stat of the new node, absent for the legacy create layout.
        stat: Option<Stat>,
    },
    /// Node stat.
    Exists {
        /// Current stat.
        stat: Stat,
    },
    /// Node data and stat.
    GetData {
        /// Payload.
        data: Vec<u8>,
        /// Stat at read time.
        stat: Stat,
    },
    /// Stat after a write.
    SetData {
        /// Stat after the write.
        stat: Stat,
    },
    /// Child names and stat of the parent.
    GetChildren {
        /// Child names, unordered.
        children: Vec<String>,
        /// Stat of the parent.
        stat: Stat,
    },
    /// Sync completed.
    Sync {
        /// Path that was synced.
        path: String,
    },
    /// Batch results.
    Multi(MultiResponse),
    /// Reply with no body (delete, check, close, set-watches, ping).
    Empty,
}

impl Response {
    /// Decode a reply body for a request of type `op`.
    ///
    /// Only call this when the reply header reports success, except for
    /// [`OpCode::Multi`] which carries per-operation results either way.
    pub fn decode(op: OpCode, dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let response = match op {
            OpCode::Create => Response::Create {
                path: dec.read_string()?,
                stat: None,
            },
            OpCode::Create2 | OpCode::CreateContainer => Response::Create {
                path: dec.read_string()?,
                stat: Some(Stat::decode(dec)?),
            },
            OpCode::Exists => Response::Exists {
                stat: Stat::decode(dec)?,
            },
            OpCode::GetData => Response::GetData {
                data: dec.read_buffer()?,
                stat: Stat::decode(dec)?,
            },
            OpCode::SetData => Response::SetData {
                stat: Stat::decode(dec)?,
            },
            OpCode::GetChildren2 => Response::GetChildren {
                children: dec.read_strings()?,
                stat: Stat::decode(dec)?,
            },
            OpCode::Sync => Response::Sync {
                path: dec.read_string()?,
            },
            OpCode::Multi => Response::Multi(MultiResponse::decode(dec)?),
            OpCode::Delete
            | OpCode::Check
            | OpCode::Ping
            | OpCode::SetWatches
            | OpCode::CloseSession => Response::Empty,
        };
        dec.finish()?;
        Ok(response)
    }
}

impl Encode for Response {
    fn encode(&self, enc: &mut Encoder) {
        match self {
            Response::Create { path, stat } => {
                enc.write_string(path);
                if let Some(stat) = stat {
                    stat.encode(enc);
                }
            }
            Response::Exists { stat } | Response::SetData { stat } => stat.encode(enc),
            Response::GetData { data, stat } => {
                enc.write_buffer(data);
                stat.encode(enc);
            }
            Response::GetChildren { children, stat } => {
                enc.write_strings(children);
                stat.encode(enc);
            }
            Response::Sync { path } => enc.write_string(path),
            Response::Multi(multi) => multi.encode(enc),
            Response::Empty => {}
        }
    }
}

//! Operation codes and request bodies.

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::{Acl, CreateMode, MultiOp, ProtoError, Version, MAX_DATA_SIZE};

/// Operation type carried in every request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Create a node (legacy reply without stat).
    Create,
    /// Delete a node.
    Delete,
    /// Stat a node.
    Exists,
    /// Read data and stat.
    GetData,
    /// Replace data.
    SetData,
    /// Flush the leader channel.
    Sync,
    /// Keepalive.
    Ping,
    /// List children with stat.
    GetChildren2,
    /// Version check (multi only).
    Check,
    /// Atomic batch.
    Multi,
    /// Create a node, reply includes stat.
    Create2,
    /// Create a container node.
    CreateContainer,
    /// Re-register watches after a session resume.
    SetWatches,
    /// End the session.
    CloseSession,
}

impl OpCode {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        match self {
            OpCode::Create => 1,
            OpCode::Delete => 2,
            OpCode::Exists => 3,
            OpCode::GetData => 4,
            OpCode::SetData => 5,
            OpCode::Sync => 9,
            OpCode::Ping => 11,
            OpCode::GetChildren2 => 12,
            OpCode::Check => 13,
            OpCode::Multi => 14,
            OpCode::Create2 => 15,
            OpCode::CreateContainer => 19,
            OpCode::SetWatches => 101,
            OpCode::CloseSession => -11,
        }
    }

    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Result<Self, ProtoError> {
        Ok(match value {
            1 => OpCode::Create,
            2 => OpCode::Delete,
            3 => OpCode::Exists,
            4 => OpCode::GetData,
            5 => OpCode::SetData,
            9 => OpCode::Sync,
            11 => OpCode::Ping,
            12 => OpCode::GetChildren2,
            13 => OpCode::Check,
            14 => OpCode::Multi,
            15 => OpCode::Create2,
            19 => OpCode::CreateContainer,
            101 => OpCode::SetWatches,
            -11 => OpCode::CloseSession,
            other => return Err(ProtoError::UnknownOpCode(other)),
        })
    }
}

/// Session handshake sent as the first frame on a fresh socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Protocol version, always 0.
    pub protocol_version: i32,
    /// Highest zxid this client has observed.
    pub last_zxid_seen: i64,
    /// Requested session timeout in milliseconds.
    pub timeout_ms: i32,
    /// Session to resume, or 0 for a fresh session.
    pub session_id: i64,
    /// Session password (16 zero bytes for a fresh session).
    pub password: Vec<u8>,
    /// Whether a read-only session is acceptable.
    pub read_only: bool,
}

impl ConnectRequest {
    /// Request a brand-new session.
    pub fn fresh(timeout_ms: i32) -> Self {
        Self {
            protocol_version: 0,
            last_zxid_seen: 0,
            timeout_ms,
            session_id: 0,
            password: vec![0; 16],
            read_only: false,
        }
    }

    /// Request resumption of an existing session.
    pub fn resume(session_id: i64, password: Vec<u8>, last_zxid_seen: i64, timeout_ms: i32) -> Self {
        Self {
            protocol_version: 0,
            last_zxid_seen,
            timeout_ms,
            session_id,
            password,
            read_only: false,
        }
    }
}

impl Encode for ConnectRequest {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i32(self.protocol_version);
        enc.write_i64(self.last_zxid_seen);
        enc.write_i32(self.timeout_ms);
        enc.write_i64(self.session_id);
        enc.write_buffer(&self.password);
        enc.write_bool(self.read_only);
    }
}

impl Decode for ConnectRequest {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let protocol_version = dec.read_i32()?;
        let last_zxid_seen = dec.read_i64()?;
        let timeout_ms = dec.read_i32()?;
        let session_id = dec.read_i64()?;
        let password = dec.read_buffer()?;
        // Older clients omit the trailing flag.
        let read_only = if dec.is_empty() { false } else { dec.read_bool()? };
        Ok(Self {
            protocol_version,
            last_zxid_seen,
            timeout_ms,
            session_id,
            password,
            read_only,
        })
    }
}

/// Watches to re-register after a session resume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetWatches {
    /// Last zxid the client saw; the ensemble fires anything newer.
    pub relative_zxid: i64,
    /// Paths with data watches.
    pub data: Vec<String>,
    /// Paths with exists watches.
    pub exist: Vec<String>,
    /// Paths with child watches.
    pub child: Vec<String>,
}

impl SetWatches {
    /// Whether there is nothing to replay.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.exist.is_empty() && self.child.is_empty()
    }
}

impl Encode for SetWatches {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i64(self.relative_zxid);
        enc.write_strings(&self.data);
        enc.write_strings(&self.exist);
        enc.write_strings(&self.child);
    }
}

impl Decode for SetWatches {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            relative_zxid: dec.read_i64()?,
            data: dec.read_strings()?,
            exist: dec.read_strings()?,
            child: dec.read_strings()?,
        })
    }
}

/// A post-handshake request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Create a node.
    Create {
        /// Path (or sequential prefix).
        path: String,
        /// Initial data.
        data: Vec<u8>,
        /// Initial ACL.
        acl: Vec<Acl>,
        /// Creation flags.
        mode: CreateMode,
    },
    /// Delete a node.
    Delete {
        /// Node path.
        path: String,
        /// Expected version.
        version: Version,
    },
    /// Stat a node.
    Exists {
        /// Node path.
        path: String,
        /// Leave an exists watch behind.
        watch: bool,
    },
    /// Read a node.
    GetData {
        /// Node path.
        path: String,
        /// Leave a data watch behind.
        watch: bool,
    },
    /// Replace a node's data.
    SetData {
        /// Node path.
        path: String,
        /// New data.
        data: Vec<u8>,
        /// Expected version.
        version: Version,
    },
    /// List a node's children.
    GetChildren {
        /// Node path.
        path: String,
        /// Leave a child watch behind.
        watch: bool,
    },
    /// Flush the channel between the member and the leader.
    Sync {
        /// Path to sync.
        path: String,
    },
    /// Stand-alone version check.
    Check {
        /// Node path.
        path: String,
        /// Expected version.
        version: Version,
    },
    /// Atomic batch.
    Multi(MultiOp),
    /// Keepalive.
    Ping,
    /// Watch replay after resume.
    SetWatches(SetWatches),
    /// End the session.
    CloseSession,
}

impl Request {
    /// Op code for the request header.
    pub fn op_code(&self) -> OpCode {
        match self {
            Request::Create { mode, .. } if mode.is_container() => OpCode::CreateContainer,
            Request::Create { .. } => OpCode::Create2,
            Request::Delete { .. } => OpCode::Delete,
            Request::Exists { .. } => OpCode::Exists,
            Request::GetData { .. } => OpCode::GetData,
            Request::SetData { .. } => OpCode::SetData,
            Request::GetChildren { .. } => OpCode::GetChildren2,
            Request::Sync { .. } => OpCode::Sync,
            Request::Check { .. } => OpCode::Check,
            Request::Multi(_) => OpCode::Multi,
            Request::Ping => OpCode::Ping,
            Request::SetWatches(_) => OpCode::SetWatches,
            Request::CloseSession => OpCode::CloseSession,
        }
    }

    /// Encode the body (everything after the request header).
    ///
    /// Fails only when a payload exceeds [`MAX_DATA_SIZE`].
    pub fn encode_body(&self) -> Result<Vec<u8>, ProtoError> {
        let mut enc = Encoder::new();
        match self {
            Request::Create {
                path,
                data,
                acl,
                mode,
            } => {
                check_size(data)?;
                enc.write_string(path);
                enc.write_buffer(data);
                enc.write_vec(acl);
                enc.write_i32(mode.flags() as i32);
            }
            Request::Delete { path, version } | Request::Check { path, version } => {
                enc.write_string(path);
                enc.write_i32(version.as_i32());
            }
            Request::Exists { path, watch }
            | Request::GetData { path, watch }
            | Request::GetChildren { path, watch } => {
                enc.write_string(path);
                enc.write_bool(*watch);
            }
            Request::SetData {
                path,
                data,
                version,
            } => {
                check_size(data)?;
                enc.write_string(path);
                enc.write_buffer(data);
                enc.write_i32(version.as_i32());
            }
            Request::Sync { path } => enc.write_string(path),
            Request::Multi(txn) => {
                txn.validate()?;
                txn.encode(&mut enc);
            }
            Request::SetWatches(watches) => watches.encode(&mut enc),
            Request::Ping | Request::CloseSession => {}
        }
        Ok(enc.into_bytes())
    }

    /// Decode a body given the op code from its header.
    pub fn decode_body(op: OpCode, dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let request = match op {
            OpCode::Create | OpCode::Create2 | OpCode::CreateContainer => Request::Create {
                path: dec.read_string()?,
                data: dec.read_buffer()?,
                acl: dec.read_vec()?,
                mode: CreateMode::from_flags(dec.read_i32()? as u32)?,
            },
            OpCode::Delete => Request::Delete {
                path: dec.read_string()?,
                version: Version::from_i32(dec.read_i32()?),
            },
            OpCode::Check => Request::Check {
                path: dec.read_string()?,
                version: Version::from_i32(dec.read_i32()?),
            },
            OpCode::Exists => Request::Exists {
                path: dec.read_string()?,
                watch: dec.read_bool()?,
            },
            OpCode::GetData => Request::GetData {
                path: dec.read_string()?,
                watch: dec.read_bool()?,
            },
            OpCode::GetChildren2 => Request::GetChildren {
                path: dec.read_string()?,
                watch: dec.read_bool()?,
            },
            OpCode::SetData => Request::SetData {
                path: dec.read_string()?,
                data: dec.read_buffer()?,
                version: Version::from_i32(dec.read_i32()?),
            },
            OpCode::Sync => Request::Sync {
                path: dec.read_string()?,
            },
            OpCode::Multi => Request::Multi(MultiOp::decode(dec)?),
            OpCode::SetWatches => Request::SetWatches(SetWatches::decode(dec)?),
            OpCode::Ping => Request::Ping,
            OpCode::CloseSession => Request::CloseSession,
        };
        dec.finish()?;
        Ok(request)
    }
}

fn check_size(data: &[u8]) -> Result<(), ProtoError> {
    if data.len() > MAX_DATA_SIZE {
        return Err(ProtoError::DataTooLarge { size: data.len() });
    }
    Ok(())
}

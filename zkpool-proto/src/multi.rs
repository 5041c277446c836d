//! Multi-op batches: several heterogeneous operations applied atomically.
//!
//! Request layout: repeated `[MultiHeader][op body]`, terminated by the
//! header `{type: -1, done: true, err: -1}`. The response repeats
//! `[MultiHeader][result]` with the same terminator. When the batch fails,
//! every result is an error record: the operations before the culprit
//! report `ok`, the culprit its real code, and the rest
//! `runtime_inconsistency`.

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::{Acl, CreateMode, ErrorCode, OpCode, ProtoError, Stat, Version, MAX_DATA_SIZE};

/// Header preceding each sub-operation and each sub-result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiHeader {
    /// Op code of the following record, or `-1` for an error/terminator.
    pub op_type: i32,
    /// Set on the terminator.
    pub done: bool,
    /// Error code carried by the header.
    pub err: i32,
}

impl MultiHeader {
    const TERMINATOR: MultiHeader = MultiHeader {
        op_type: -1,
        done: true,
        err: -1,
    };

    fn record(op_type: i32) -> Self {
        Self {
            op_type,
            done: false,
            err: -1,
        }
    }
}

impl Encode for MultiHeader {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i32(self.op_type);
        enc.write_bool(self.done);
        enc.write_i32(self.err);
    }
}

impl Decode for MultiHeader {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            op_type: dec.read_i32()?,
            done: dec.read_bool()?,
            err: dec.read_i32()?,
        })
    }
}

/// One sub-operation of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
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
    /// Replace a node's data.
    SetData {
        /// Node path.
        path: String,
        /// New data.
        data: Vec<u8>,
        /// Expected version.
        version: Version,
    },
    /// Delete a node.
    Delete {
        /// Node path.
        path: String,
        /// Expected version.
        version: Version,
    },
    /// Assert a node exists at a version without changing it.
    Check {
        /// Node path.
        path: String,
        /// Expected version.
        version: Version,
    },
}

impl Op {
    /// Op code used for this sub-operation.
    pub fn op_code(&self) -> OpCode {
        match self {
            Op::Create { mode, .. } if mode.is_container() => OpCode::CreateContainer,
            Op::Create { .. } => OpCode::Create,
            Op::SetData { .. } => OpCode::SetData,
            Op::Delete { .. } => OpCode::Delete,
            Op::Check { .. } => OpCode::Check,
        }
    }

    /// The path this sub-operation targets.
    pub fn path(&self) -> &str {
        match self {
            Op::Create { path, .. }
            | Op::SetData { path, .. }
            | Op::Delete { path, .. }
            | Op::Check { path, .. } => path,
        }
    }

    /// Mutable access to the target path (used to apply a path prefix).
    pub fn path_mut(&mut self) -> &mut String {
        match self {
            Op::Create { path, .. }
            | Op::SetData { path, .. }
            | Op::Delete { path, .. }
            | Op::Check { path, .. } => path,
        }
    }

    fn data_len(&self) -> usize {
        match self {
            Op::Create { data, .. } | Op::SetData { data, .. } => data.len(),
            _ => 0,
        }
    }

    fn encode_body(&self, enc: &mut Encoder) {
        match self {
            Op::Create {
                path,
                data,
                acl,
                mode,
            } => {
                enc.write_string(path);
                enc.write_buffer(data);
                enc.write_vec(acl);
                enc.write_i32(mode.flags() as i32);
            }
            Op::SetData {
                path,
                data,
                version,
            } => {
                enc.write_string(path);
                enc.write_buffer(data);
                enc.write_i32(version.as_i32());
            }
            Op::Delete { path, version } | Op::Check { path, version } => {
                enc.write_string(path);
                enc.write_i32(version.as_i32());
            }
        }
    }

    fn decode_body(op: OpCode, dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        match op {
            OpCode::Create | OpCode::Create2 | OpCode::CreateContainer => {
                let path = dec.read_string()?;
                let data = dec.read_buffer()?;
                let acl = dec.read_vec()?;
                let mode = CreateMode::from_flags(dec.read_i32()? as u32)?;
                Ok(Op::Create {
                    path,
                    data,
                    acl,
                    mode,
                })
            }
            OpCode::SetData => Ok(Op::SetData {
                path: dec.read_string()?,
                data: dec.read_buffer()?,
                version: Version::from_i32(dec.read_i32()?),
            }),
            OpCode::Delete => Ok(Op::Delete {
                path: dec.read_string()?,
                version: Version::from_i32(dec.read_i32()?),
            }),
            OpCode::Check => Ok(Op::Check {
                path: dec.read_string()?,
                version: Version::from_i32(dec.read_i32()?),
            }),
            other => Err(ProtoError::InvalidMultiOp(other.as_i32())),
        }
    }
}

/// An ordered batch of sub-operations, committed all-or-nothing.
///
/// ```
/// use zkpool_proto::{Acl, CreateMode, MultiOp, Version};
///
/// let txn = MultiOp::new()
///     .create("/app/a", b"1".to_vec(), Acl::open_unsafe(), CreateMode::NORMAL)
///     .set("/app/config", b"v2".to_vec(), Version::Exact(4))
///     .erase("/app/old", Version::Any)
///     .check("/app", Version::Exact(0));
/// assert_eq!(txn.len(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiOp {
    ops: Vec<Op>,
}

impl MultiOp {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a create.
    pub fn create(
        mut self,
        path: impl Into<String>,
        data: impl Into<Vec<u8>>,
        acl: Vec<Acl>,
        mode: CreateMode,
    ) -> Self {
        self.ops.push(Op::Create {
            path: path.into(),
            data: data.into(),
            acl,
            mode,
        });
        self
    }

    /// Append a set-data.
    pub fn set(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>, version: Version) -> Self {
        self.ops.push(Op::SetData {
            path: path.into(),
            data: data.into(),
            version,
        });
        self
    }

    /// Append a delete.
    pub fn erase(mut self, path: impl Into<String>, version: Version) -> Self {
        self.ops.push(Op::Delete {
            path: path.into(),
            version,
        });
        self
    }

    /// Append a version check.
    pub fn check(mut self, path: impl Into<String>, version: Version) -> Self {
        self.ops.push(Op::Check {
            path: path.into(),
            version,
        });
        self
    }

    /// Append an already-built sub-operation.
    pub fn push(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Sub-operations in order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Mutable sub-operations in order.
    pub fn ops_mut(&mut self) -> &mut [Op] {
        &mut self.ops
    }

    /// Number of sub-operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Reject any sub-operation whose payload exceeds the data cap.
    pub fn validate(&self) -> Result<(), ProtoError> {
        match self.ops.iter().map(Op::data_len).find(|len| *len > MAX_DATA_SIZE) {
            Some(size) => Err(ProtoError::DataTooLarge { size }),
            None => Ok(()),
        }
    }
}

impl Encode for MultiOp {
    fn encode(&self, enc: &mut Encoder) {
        for op in &self.ops {
            MultiHeader::record(op.op_code().as_i32()).encode(enc);
            op.encode_body(enc);
        }
        MultiHeader::TERMINATOR.encode(enc);
    }
}

impl Decode for MultiOp {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let mut ops = Vec::new();
        loop {
            let header = MultiHeader::decode(dec)?;
            if header.done {
                return Ok(Self { ops });
            }
            let op = OpCode::from_i32(header.op_type)?;
            ops.push(Op::decode_body(op, dec)?);
        }
    }
}

/// Per-operation outcome inside a multi response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// Created node; `stat` is present when the server used the create2 layout.
    Create {
        /// Actual path (with any sequence suffix).
        path: String,
        /// Stat of the new node, if reported.
        stat: Option<Stat>,
    },
    /// Data was replaced.
    SetData {
        /// Stat after the write.
        stat: Stat,
    },
    /// Node was deleted.
    Delete,
    /// Check passed.
    Check,
    /// Error record (the whole batch failed).
    Error {
        /// Code for this sub-operation.
        code: ErrorCode,
    },
}

/// Decoded multi response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiResponse {
    /// Results in sub-operation order.
    pub results: Vec<OpResult>,
}

impl MultiResponse {
    /// First failing sub-operation: its index and reason.
    ///
    /// Sub-operations rolled back only because another one failed report
    /// `ok` or `runtime_inconsistency`; those are skipped.
    pub fn first_failure(&self) -> Option<(usize, ErrorCode)> {
        self.results
            .iter()
            .enumerate()
            .find_map(|(index, result)| match result {
                OpResult::Error { code }
                    if !code.is_ok() && *code != ErrorCode::RuntimeInconsistency =>
                {
                    Some((index, *code))
                }
                _ => None,
            })
    }
}

impl Encode for MultiResponse {
    fn encode(&self, enc: &mut Encoder) {
        for result in &self.results {
            match result {
                OpResult::Create { path, stat } => {
                    let op = if stat.is_some() {
                        OpCode::Create2
                    } else {
                        OpCode::Create
                    };
                    MultiHeader {
                        op_type: op.as_i32(),
                        done: false,
                        err: 0,
                    }
                    .encode(enc);
                    enc.write_string(path);
                    if let Some(stat) = stat {
                        stat.encode(enc);
                    }
                }
                OpResult::SetData { stat } => {
                    MultiHeader {
                        op_type: OpCode::SetData.as_i32(),
                        done: false,
                        err: 0,
                    }
                    .encode(enc);
                    stat.encode(enc);
                }
                OpResult::Delete | OpResult::Check => {
                    let op = if matches!(result, OpResult::Delete) {
                        OpCode::Delete
                    } else {
                        OpCode::Check
                    };
                    MultiHeader {
                        op_type: op.as_i32(),
                        done: false,
                        err: 0,
                    }
                    .encode(enc);
                }
                OpResult::Error { code } => {
                    MultiHeader {
                        op_type: -1,
                        done: false,
                        err: code.as_i32(),
                    }
                    .encode(enc);
                    enc.write_i32(code.as_i32());
                }
            }
        }
        MultiHeader::TERMINATOR.encode(enc);
    }
}

impl Decode for MultiResponse {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let mut results = Vec::new();
        loop {
            let header = MultiHeader::decode(dec)?;
            if header.done {
                return Ok(Self { results });
            }
            let result = match header.op_type {
                -1 => OpResult::Error {
                    code: ErrorCode::from_i32(dec.read_i32()?),
                },
                op => match OpCode::from_i32(op)? {
                    OpCode::Create => OpResult::Create {
                        path: dec.read_string()?,
                        stat: None,
                    },
                    OpCode::Create2 | OpCode::CreateContainer => OpResult::Create {
                        path: dec.read_string()?,
                        stat: Some(Stat::decode(dec)?),
                    },
                    OpCode::SetData => OpResult::SetData {
                        stat: Stat::decode(dec)?,
                    },
                    OpCode::Delete => OpResult::Delete,
                    OpCode::Check => OpResult::Check,
                    other => return Err(ProtoError::InvalidMultiOp(other.as_i32())),
                },
            };
            results.push(result);
        }
    }
}

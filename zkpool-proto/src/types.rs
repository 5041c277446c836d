//! Structured values carried inside requests and responses.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::ProtoError;

/// Statistics about a node, similar to the UNIX `stat` structure.
///
/// A `Stat` is an immutable snapshot returned with every read and write.
///
/// - `czxid` / `mzxid` / `pzxid`: the transaction ids that created the node,
///   last modified its data, and last modified its child list.
/// - `version` / `cversion` / `aversion`: the number of changes to the data,
///   the child list and the ACL. Version checks compare against `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stat {
    /// The transaction id that created the node.
    pub czxid: i64,
    /// The last transaction that modified the node's data.
    pub mzxid: i64,
    /// Milliseconds since epoch when the node was created.
    pub ctime: i64,
    /// Milliseconds since epoch when the node was last modified.
    pub mtime: i64,
    /// The number of changes to the data of the node.
    pub version: i32,
    /// The number of changes to the children of the node.
    pub cversion: i32,
    /// The number of changes to the ACL of the node.
    pub aversion: i32,
    /// Session id of the owner if the node is ephemeral, zero otherwise.
    pub ephemeral_owner: i64,
    /// The length of the data field of the node.
    pub data_length: i32,
    /// The number of children this node has.
    pub num_children: i32,
    /// The transaction id that last modified the children of the node.
    pub pzxid: i64,
}

impl Stat {
    /// Whether the node is ephemeral.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

impl Encode for Stat {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i64(self.czxid);
        enc.write_i64(self.mzxid);
        enc.write_i64(self.ctime);
        enc.write_i64(self.mtime);
        enc.write_i32(self.version);
        enc.write_i32(self.cversion);
        enc.write_i32(self.aversion);
        enc.write_i64(self.ephemeral_owner);
        enc.write_i32(self.data_length);
        enc.write_i32(self.num_children);
        enc.write_i64(self.pzxid);
    }
}

impl Decode for Stat {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            czxid: dec.read_i64()?,
            mzxid: dec.read_i64()?,
            ctime: dec.read_i64()?,
            mtime: dec.read_i64()?,
            version: dec.read_i32()?,
            cversion: dec.read_i32()?,
            aversion: dec.read_i32()?,
            ephemeral_owner: dec.read_i64()?,
            data_length: dec.read_i32()?,
            num_children: dec.read_i32()?,
            pzxid: dec.read_i64()?,
        })
    }
}

/// Permission bitmask of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission(u32);

impl Permission {
    /// No permissions.
    pub const NONE: Permission = Permission(0);
    /// Read data and list children.
    pub const READ: Permission = Permission(1);
    /// Set data.
    pub const WRITE: Permission = Permission(1 << 1);
    /// Create children.
    pub const CREATE: Permission = Permission(1 << 2);
    /// Delete children.
    pub const DELETE: Permission = Permission(1 << 3);
    /// Set permissions.
    pub const ADMIN: Permission = Permission(1 << 4);
    /// Every permission.
    pub const ALL: Permission = Permission(0b11111);

    /// Build from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Permission(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

/// An authentication identity: a scheme and an id within that scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id {
    /// Authentication scheme (`world`, `auth`, `digest`, `ip`, ...).
    pub scheme: String,
    /// Identity within the scheme.
    pub id: String,
}

impl Id {
    /// Create an identity.
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }
}

/// A single ACL entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    /// Permissions granted.
    pub perms: Permission,
    /// Identity the permissions are granted to.
    pub id: Id,
}

impl Acl {
    /// Create an ACL entry.
    pub fn new(perms: Permission, id: Id) -> Self {
        Self { perms, id }
    }

    /// All permissions for anyone. Completely open.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::new(Permission::ALL, Id::new("world", "anyone"))]
    }

    /// Read permission for anyone.
    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl::new(Permission::READ, Id::new("world", "anyone"))]
    }

    /// All permissions for the identities the creating session authenticated as.
    pub fn creator_all() -> Vec<Acl> {
        vec![Acl::new(Permission::ALL, Id::new("auth", ""))]
    }
}

impl Encode for Acl {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i32(self.perms.bits() as i32);
        enc.write_string(&self.id.scheme);
        enc.write_string(&self.id.id);
    }
}

impl Decode for Acl {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        let perms = Permission::from_bits(dec.read_i32()? as u32);
        let scheme = dec.read_string()?;
        let id = dec.read_string()?;
        Ok(Acl::new(perms, Id { scheme, id }))
    }
}

/// How a node is created.
///
/// Flags combine with [`CreateMode::with`], which rejects combinations the
/// ensemble cannot honor (a container is never ephemeral nor sequential).
///
/// ```
/// use zkpool_proto::CreateMode;
///
/// let mode = CreateMode::EPHEMERAL.with(CreateMode::SEQUENTIAL).expect("valid");
/// assert!(mode.is_set(CreateMode::SEQUENTIAL));
/// assert!(CreateMode::CONTAINER.with(CreateMode::EPHEMERAL).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CreateMode(u32);

impl CreateMode {
    /// A regular, persistent node.
    pub const NORMAL: CreateMode = CreateMode(0);
    /// Deleted when the creating session ends.
    pub const EPHEMERAL: CreateMode = CreateMode(0b0001);
    /// Name gets a 10-digit, zero-padded, monotonically increasing suffix.
    pub const SEQUENTIAL: CreateMode = CreateMode(0b0010);
    /// Ephemeral and sequential.
    pub const EPHEMERAL_SEQUENTIAL: CreateMode = CreateMode(0b0011);
    /// Candidate for deletion by the ensemble once its last child is gone.
    pub const CONTAINER: CreateMode = CreateMode(0b0100);

    const KNOWN: u32 = 0b0111;

    /// Validate raw flag bits.
    pub fn from_flags(flags: u32) -> Result<Self, ProtoError> {
        let container = flags & Self::CONTAINER.0 != 0;
        let others = flags & (Self::EPHEMERAL.0 | Self::SEQUENTIAL.0) != 0;
        if flags & !Self::KNOWN != 0 || (container && others) {
            return Err(ProtoError::InvalidCreateMode { flags });
        }
        Ok(CreateMode(flags))
    }

    /// Union with `other`, validating the result.
    pub fn with(self, other: CreateMode) -> Result<Self, ProtoError> {
        Self::from_flags(self.0 | other.0)
    }

    /// Raw flag bits.
    pub const fn flags(self) -> u32 {
        self.0
    }

    /// Whether every flag of `flags` is set.
    pub const fn is_set(self, flags: CreateMode) -> bool {
        self.0 & flags.0 == flags.0
    }

    /// Whether the node is removed when its session ends.
    pub const fn is_ephemeral(self) -> bool {
        self.is_set(Self::EPHEMERAL)
    }

    /// Whether the name gets a sequence suffix.
    pub const fn is_sequential(self) -> bool {
        self.is_set(Self::SEQUENTIAL)
    }

    /// Whether this is a container node.
    pub const fn is_container(self) -> bool {
        self.is_set(Self::CONTAINER)
    }
}

impl TryFrom<u32> for CreateMode {
    type Error = ProtoError;

    fn try_from(flags: u32) -> Result<Self, Self::Error> {
        Self::from_flags(flags)
    }
}

impl From<CreateMode> for u32 {
    fn from(mode: CreateMode) -> u32 {
        mode.0
    }
}

impl fmt::Display for CreateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("normal");
        }
        let names = [
            (Self::EPHEMERAL, "ephemeral"),
            (Self::SEQUENTIAL, "sequential"),
            (Self::CONTAINER, "container"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.is_set(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Expected node version for conditional writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    /// Skip the version comparison.
    #[default]
    Any,
    /// Require the node's current version to equal this value.
    Exact(i32),
}

impl Version {
    /// Wire representation (`-1` for [`Version::Any`]).
    pub fn as_i32(self) -> i32 {
        match self {
            Version::Any => -1,
            Version::Exact(version) => version,
        }
    }

    /// Parse the wire representation.
    pub fn from_i32(value: i32) -> Self {
        if value == -1 {
            Version::Any
        } else {
            Version::Exact(value)
        }
    }

    /// Whether a node currently at `current` passes this check.
    pub fn matches(self, current: i32) -> bool {
        match self {
            Version::Any => true,
            Version::Exact(expected) => expected == current,
        }
    }
}

impl From<i32> for Version {
    fn from(value: i32) -> Self {
        Version::from_i32(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_is_68_bytes_on_the_wire() {
        let mut enc = Encoder::new();
        Stat::default().encode(&mut enc);
        assert_eq!(enc.len(), 68);
    }

    #[test]
    fn test_create_mode_rejects_container_combinations() {
        assert!(CreateMode::CONTAINER.with(CreateMode::EPHEMERAL).is_err());
        assert!(CreateMode::CONTAINER.with(CreateMode::SEQUENTIAL).is_err());
        assert!(CreateMode::from_flags(0b1000).is_err());
        assert_eq!(
            CreateMode::EPHEMERAL.with(CreateMode::SEQUENTIAL),
            Ok(CreateMode::EPHEMERAL_SEQUENTIAL)
        );
    }

    #[test]
    fn test_create_mode_deserialize_validates_flags() {
        assert!(serde_json::from_str::<CreateMode>("5").is_err());
        assert!(serde_json::from_str::<CreateMode>("6").is_err());
        assert!(serde_json::from_str::<CreateMode>("8").is_err());
        assert_eq!(
            serde_json::from_str::<CreateMode>("3").expect("ephemeral sequential"),
            CreateMode::EPHEMERAL_SEQUENTIAL
        );
        assert_eq!(
            serde_json::to_string(&CreateMode::CONTAINER).expect("serialize"),
            "4"
        );
    }

    #[test]
    fn test_create_mode_display() {
        assert_eq!(CreateMode::NORMAL.to_string(), "normal");
        assert_eq!(
            CreateMode::EPHEMERAL_SEQUENTIAL.to_string(),
            "ephemeral|sequential"
        );
        assert_eq!(CreateMode::CONTAINER.to_string(), "container");
    }

    #[test]
    fn test_permission_all_contains_each_bit() {
        for perm in [
            Permission::READ,
            Permission::WRITE,
            Permission::CREATE,
            Permission::DELETE,
            Permission::ADMIN,
        ] {
            assert!(Permission::ALL.contains(perm));
        }
        assert_eq!(Permission::READ | Permission::WRITE, Permission::from_bits(3));
    }

    #[test]
    fn test_version_any_matches_everything() {
        assert!(Version::Any.matches(17));
        assert!(Version::Exact(3).matches(3));
        assert!(!Version::Exact(2).matches(3));
        assert_eq!(Version::from_i32(-1), Version::Any);
    }
}

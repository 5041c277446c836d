//! Watch-event notifications pushed by the ensemble.

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::ProtoError;

/// What happened to the watched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A session state change with no node involved.
    None,
    /// The node was created.
    NodeCreated,
    /// The node was deleted.
    NodeDeleted,
    /// The node's data changed.
    NodeDataChanged,
    /// The node's child list changed.
    NodeChildrenChanged,
}

impl EventType {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        match self {
            EventType::None => -1,
            EventType::NodeCreated => 1,
            EventType::NodeDeleted => 2,
            EventType::NodeDataChanged => 3,
            EventType::NodeChildrenChanged => 4,
        }
    }

    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Result<Self, ProtoError> {
        match value {
            -1 => Ok(EventType::None),
            1 => Ok(EventType::NodeCreated),
            2 => Ok(EventType::NodeDeleted),
            3 => Ok(EventType::NodeDataChanged),
            4 => Ok(EventType::NodeChildrenChanged),
            other => Err(ProtoError::UnknownEventType(other)),
        }
    }
}

/// Session state reported alongside an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperState {
    /// Client is disconnected from the ensemble.
    Disconnected,
    /// Client is connected.
    SyncConnected,
    /// Authentication failed.
    AuthFailed,
    /// Connected to a read-only member.
    ConnectedReadOnly,
    /// SASL authentication succeeded.
    SaslAuthenticated,
    /// Client closed its session.
    Closed,
    /// The session expired.
    Expired,
}

impl KeeperState {
    /// Wire value.
    pub fn as_i32(self) -> i32 {
        match self {
            KeeperState::Disconnected => 0,
            KeeperState::SyncConnected => 3,
            KeeperState::AuthFailed => 4,
            KeeperState::ConnectedReadOnly => 5,
            KeeperState::SaslAuthenticated => 6,
            KeeperState::Closed => 7,
            KeeperState::Expired => -112,
        }
    }

    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Result<Self, ProtoError> {
        match value {
            0 => Ok(KeeperState::Disconnected),
            3 => Ok(KeeperState::SyncConnected),
            4 => Ok(KeeperState::AuthFailed),
            5 => Ok(KeeperState::ConnectedReadOnly),
            6 => Ok(KeeperState::SaslAuthenticated),
            7 => Ok(KeeperState::Closed),
            -112 => Ok(KeeperState::Expired),
            other => Err(ProtoError::UnknownKeeperState(other)),
        }
    }
}

/// Body of a watch-event notification frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    /// Event type.
    pub event_type: EventType,
    /// Session state at the time of the event.
    pub state: KeeperState,
    /// Server-side path of the affected node.
    pub path: String,
}

impl Encode for WatcherEvent {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_i32(self.event_type.as_i32());
        enc.write_i32(self.state.as_i32());
        enc.write_string(&self.path);
    }
}

impl Decode for WatcherEvent {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            event_type: EventType::from_i32(dec.read_i32()?)?,
            state: KeeperState::from_i32(dec.read_i32()?)?,
            path: dec.read_string()?,
        })
    }
}

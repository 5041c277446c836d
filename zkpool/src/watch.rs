//! One-shot watch registrations and their delivery.
//!
//! Registrations are keyed by ensemble path (chroot applied) and kind. A
//! matching event removes the whole entry under the lock and only then
//! sends, so each registration is delivered exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use zkpool_proto::{EventType, KeeperState, SetWatches, WatcherEvent};

use crate::path::Chroot;
use crate::{ZkError, ZkResult};

/// What change a watch is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Data change or deletion of an existing node (left by `get`).
    Data,
    /// Creation, data change or deletion (left by `exists`).
    Exists,
    /// Child list change or deletion (left by `get_children`).
    Children,
}

impl WatchKind {
    /// Kinds fired by an event of `event_type`.
    fn fired_by(event_type: EventType) -> &'static [WatchKind] {
        match event_type {
            EventType::NodeCreated | EventType::NodeDataChanged => {
                &[WatchKind::Data, WatchKind::Exists]
            }
            EventType::NodeChildrenChanged => &[WatchKind::Children],
            EventType::NodeDeleted => &[WatchKind::Data, WatchKind::Exists, WatchKind::Children],
            EventType::None => &[],
        }
    }
}

/// A delivered watch notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// What happened.
    pub event_type: EventType,
    /// Session state reported alongside the event.
    pub state: KeeperState,
    /// Affected path, as the caller sees it (chroot stripped).
    pub path: String,
}

type WatchSender = oneshot::Sender<ZkResult<WatchedEvent>>;

/// A watch waiting for its read to succeed before it is registered.
#[derive(Debug)]
pub(crate) struct WatchRegistration {
    path: String,
    kind: WatchKind,
    sender: WatchSender,
}

impl WatchRegistration {
    /// Create a registration for the ensemble path `path` and its caller-side future.
    pub(crate) fn new(path: String, kind: WatchKind) -> (Self, Watch) {
        let (sender, receiver) = oneshot::channel();
        (Self { path, kind, sender }, Watch { receiver })
    }

    pub(crate) fn kind(&self) -> WatchKind {
        self.kind
    }
}

/// Future resolving when a watch fires, or when the session ends first.
#[derive(Debug)]
pub struct Watch {
    receiver: oneshot::Receiver<ZkResult<WatchedEvent>>,
}

impl Future for Watch {
    type Output = ZkResult<WatchedEvent>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without delivering: the engine is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(ZkError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Result of a watch-registering read: the value now and the next change.
#[derive(Debug)]
pub struct WatchResult<T> {
    /// Value observed by the read.
    pub initial: T,
    /// Fires on the next matching change.
    pub next: Watch,
}

/// The watch table.
pub(crate) struct WatchDispatcher {
    table: Mutex<HashMap<(String, WatchKind), Vec<WatchSender>>>,
    chroot: Chroot,
}

impl WatchDispatcher {
    pub(crate) fn new(chroot: Chroot) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            chroot,
        }
    }

    pub(crate) fn register(&self, registration: WatchRegistration) {
        let WatchRegistration { path, kind, sender } = registration;
        tracing::debug!(path = %path, ?kind, "watch registered");
        self.table.lock().entry((path, kind)).or_default().push(sender);
    }

    /// Deliver an event to every registration it fires. Returns how many fired.
    pub(crate) fn dispatch(&self, event: &WatcherEvent) -> usize {
        let fired: Vec<WatchSender> = {
            let mut table = self.table.lock();
            WatchKind::fired_by(event.event_type)
                .iter()
                .filter_map(|kind| table.remove(&(event.path.clone(), *kind)))
                .flatten()
                .collect()
        };

        let watched = WatchedEvent {
            event_type: event.event_type,
            state: event.state,
            path: self.chroot.strip(&event.path),
        };
        tracing::debug!(
            path = %event.path,
            event = ?event.event_type,
            count = fired.len(),
            "dispatching watch event"
        );
        let count = fired.len();
        for sender in fired {
            // The caller may have dropped its `Watch`; that is fine.
            let _ = sender.send(Ok(watched.clone()));
        }
        count
    }

    /// Fail every registration, emptying the table.
    pub(crate) fn fail_all(&self, error: ZkError) {
        let drained: Vec<WatchSender> = {
            let mut table = self.table.lock();
            table.drain().flat_map(|(_, senders)| senders).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), %error, "failing outstanding watches");
        }
        for sender in drained {
            let _ = sender.send(Err(error.clone()));
        }
    }

    /// Registrations to replay after a session resume, relative to `last_zxid`.
    pub(crate) fn snapshot(&self, last_zxid: i64) -> SetWatches {
        let table = self.table.lock();
        let mut watches = SetWatches {
            relative_zxid: last_zxid,
            ..SetWatches::default()
        };
        for ((path, kind), senders) in table.iter() {
            if senders.iter().all(|sender| sender.is_closed()) {
                continue;
            }
            let list = match kind {
                WatchKind::Data => &mut watches.data,
                WatchKind::Exists => &mut watches.exist,
                WatchKind::Children => &mut watches.child,
            };
            list.push(path.clone());
        }
        watches.data.sort();
        watches.exist.sort();
        watches.child.sort();
        watches
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.lock().values().map(Vec::len).sum()
    }
}

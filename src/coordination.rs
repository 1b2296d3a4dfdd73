//! Coordination service interface.
//!
//! The coordination service is a hierarchical key-value store with ephemeral
//! nodes and change notification, used for group membership. The actual
//! client (session handling, reconnect policy) lives outside this crate;
//! tests use the in-memory implementation in [`crate::mocking`].

use std::sync::mpsc::Sender;

use crate::error::KafkaResult;

/// A change observed by a watch.
///
/// Events are delivered over a channel and drained on the consumption
/// thread, so watch handling never races with consumer mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// The children of the watched path changed (member joined or left).
    ChildrenChanged(String),
    /// The session was lost; every ephemeral registration is gone.
    SessionLost,
}

/// Handle to the coordination service, bound to one session.
pub trait CoordinationClient: Send + Sync {
    /// Creates an ephemeral node that is removed automatically when the
    /// session ends.
    fn register_ephemeral(&self, path: &str, data: &[u8]) -> KafkaResult<()>;

    /// Deletes a node. Deleting a missing node is not an error.
    fn delete(&self, path: &str) -> KafkaResult<()>;

    /// Returns the names of the direct children of a path.
    fn children(&self, path: &str) -> KafkaResult<Vec<String>>;

    /// Installs a persistent watch on the children of a path. Every change
    /// is delivered to `events` until the session ends.
    fn watch_children(&self, path: &str, events: Sender<CoordinationEvent>) -> KafkaResult<()>;

    /// Reports whether the session is still valid. A dead session
    /// invalidates all ephemeral registrations made through this client.
    fn session_alive(&self) -> bool;
}

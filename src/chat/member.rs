//! Room members and their outbound queues.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

/// Identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Allocate a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending side of a connection's outbound queue.
///
/// The receiving side is drained by the connection's writer task. Once that
/// task stops every send fails. The queue is bounded: a peer that stops
/// reading fills it, and further sends fail the same way.
pub type Outbound = mpsc::Sender<String>;

/// A connection occupying a slot in exactly one room.
#[derive(Debug, Clone)]
pub struct Member {
    /// Connection identity.
    pub id: MemberId,
    /// Display name given in the handshake.
    pub name: String,
    /// Room the member belongs to.
    pub room: String,
    outbound: Outbound,
}

impl Member {
    /// Create a new member.
    pub fn new(
        id: MemberId,
        name: impl Into<String>,
        room: impl Into<String>,
        outbound: Outbound,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            room: room.into(),
            outbound,
        }
    }

    /// Queue a line for this member.
    ///
    /// Returns false if the member's connection is gone or its queue is
    /// full. Either way the member can no longer keep up with the room.
    pub fn deliver(&self, line: impl Into<String>) -> bool {
        match self.outbound.try_send(line.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue of {} ({}) is full", self.name, self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

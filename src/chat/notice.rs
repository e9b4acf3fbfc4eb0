//! System notices announced to a room.
//!
//! Notices travel as plain lines, indistinguishable on the wire from chat
//! messages, and are never written to history.

/// Kind of membership change being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// A member created or joined the room.
    Joined,
    /// A member sent `leave`.
    LeftRoom,
    /// A member sent `exit`.
    LeftChat,
}

impl Notice {
    /// Format the notice for `name`.
    pub fn format(&self, name: &str) -> String {
        match self {
            Notice::Joined => format!("*** {name} joined the chat"),
            Notice::LeftRoom => format!("*** {name} left the room"),
            Notice::LeftChat => format!("*** {name} left the chat"),
        }
    }
}

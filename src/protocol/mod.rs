//! Wire protocol shared by the server and the client.
//!
//! Every field and message is a single newline-terminated line. A connection
//! opens with three lines from the client (display name, room name, action),
//! answered by one of the [`Reply`] tokens. After that, any line is a chat
//! message except the [`ControlLine`]s `leave` and `exit`.

mod frame;

use thiserror::Error;

pub use frame::{sanitize, write_line, FrameReader, DEFAULT_MAX_LINE_BYTES};

/// Action requested in the third handshake field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create a room that is not currently active.
    Create,
    /// Join a room that is currently active.
    Join,
}

impl Action {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Join => "join",
        }
    }

    /// Parse the action field, ignoring case and surrounding whitespace.
    pub fn parse(input: &str) -> Result<Self, HandshakeError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("create") {
            Ok(Action::Create)
        } else if trimmed.eq_ignore_ascii_case("join") {
            Ok(Action::Join)
        } else {
            Err(HandshakeError::InvalidAction(trimmed.to_string()))
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server replies that carry protocol meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `create` succeeded.
    RoomCreated,
    /// `create` named a room that is already active.
    RoomExists,
    /// `join` named a room that is not active.
    RoomNotFound,
    /// `join` succeeded; sent right after the history line.
    RoomJoined,
    /// The action field was neither `create` nor `join`.
    InvalidAction,
    /// Acknowledges `leave`.
    LeftRoom,
}

impl Reply {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reply::RoomCreated => "room_created",
            Reply::RoomExists => "room_exists",
            Reply::RoomNotFound => "room_not_found",
            Reply::RoomJoined => "room_joined",
            Reply::InvalidAction => "invalid_action",
            Reply::LeftRoom => "left_room",
        }
    }

    /// Recognize a reply token. Anything else is a chat line or history.
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            "room_created" => Some(Reply::RoomCreated),
            "room_exists" => Some(Reply::RoomExists),
            "room_not_found" => Some(Reply::RoomNotFound),
            "room_joined" => Some(Reply::RoomJoined),
            "invalid_action" => Some(Reply::InvalidAction),
            "left_room" => Some(Reply::LeftRoom),
            _ => None,
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client control lines recognized while a member is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    /// Leave the room; the server acknowledges with `left_room`.
    Leave,
    /// Leave the room and close without acknowledgement.
    Exit,
}

impl ControlLine {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlLine::Leave => "leave",
            ControlLine::Exit => "exit",
        }
    }

    /// Recognize a control line, ignoring case and surrounding whitespace.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("leave") {
            Some(ControlLine::Leave)
        } else if trimmed.eq_ignore_ascii_case("exit") {
            Some(ControlLine::Exit)
        } else {
            None
        }
    }
}

/// Errors raised while reading the three handshake fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Display name or room name was blank.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    /// Action was neither `create` nor `join`.
    #[error("invalid action: {0}")]
    InvalidAction(String),
    /// Peer went away before sending all fields.
    #[error("connection closed during handshake")]
    Closed,
}

/// Encode a room log as the single-line JSON history transfer.
pub fn encode_history(messages: &[String]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a history transfer line.
pub fn decode_history(line: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str(line)
}

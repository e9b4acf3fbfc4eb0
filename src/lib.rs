//! roomchat - multi-room chat server and client
//!
//! A TCP chat service with named rooms, per-room durable history and a
//! terminal client, implemented in Rust.

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;

pub use chat::{
    fan_out, Delivery, HistoryStore, Member, MemberId, Notice, RegistryError, Room, RoomRegistry,
};
pub use client::{ClientError, ClientSession, LoginRequest, SessionEvent, SessionState};
pub use config::Config;
pub use error::{Result, RoomchatError};
pub use protocol::{Action, ControlLine, FrameReader, HandshakeError, Reply};
pub use server::{ChatServer, ConnectionHandler, ShutdownHandle};

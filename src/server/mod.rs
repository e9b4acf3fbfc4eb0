//! Chat server module.
//!
//! This module provides the TCP listener and the per-connection handlers
//! that run the handshake and relay chat lines through the room registry.

mod handler;
mod listener;

pub use handler::{ConnectionHandler, ConnectionSettings};
pub use listener::{ChatServer, ShutdownHandle};

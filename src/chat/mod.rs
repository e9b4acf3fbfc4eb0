//! Chat core for roomchat.
//!
//! This module provides the shared state of the server:
//! - Members and their outbound queues
//! - The room registry (active rooms, membership, in-memory logs)
//! - Durable per-room history
//! - Fan-out to the members of a room
//! - System notices for membership changes

mod broadcast;
mod history;
mod member;
mod notice;
mod registry;

pub use broadcast::{fan_out, Delivery};
pub use history::HistoryStore;
pub use member::{Member, MemberId, Outbound};
pub use notice::Notice;
pub use registry::{RegistryError, Room, RoomRegistry};

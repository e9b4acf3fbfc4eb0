//! Room registry: the single source of truth for active rooms and membership.
//!
//! Locking is two-level. The registry lock guards the set of active rooms and
//! is always taken before a room's own lock. Membership changes (create,
//! join, removal and deactivation) hold both, so a departing last member and
//! a newcomer can never observe two rooms with the same name. Appends and
//! broadcasts hold only the room lock, so busy rooms do not contend with each
//! other.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::broadcast::{fan_out, Delivery};
use super::history::HistoryStore;
use super::member::{Member, MemberId};
use crate::protocol::{encode_history, Reply};

/// Errors returned by registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `create` named a room that is already active.
    #[error("room '{0}' already exists")]
    AlreadyExists(String),
    /// `join` named a room that is not active.
    #[error("room '{0}' not found")]
    NotFound(String),
    /// The sender is no longer registered in the room.
    #[error("not a member of room '{0}'")]
    NotMember(String),
}

struct RoomState {
    members: HashMap<MemberId, Member>,
    log: Vec<String>,
    active: bool,
}

impl RoomState {
    /// Callers must already hold a successful create or join.
    fn add_member(&mut self, member: Member) {
        self.members.insert(member.id, member);
    }
}

/// An active room.
pub struct Room {
    name: String,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(name: impl Into<String>, log: Vec<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RoomState {
                members: HashMap::new(),
                log,
                active: true,
            }),
        }
    }

    /// Get the room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    /// Snapshot of the in-memory log.
    pub async fn history(&self) -> Vec<String> {
        self.state.lock().await.log.clone()
    }
}

/// Registry of active rooms.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    history: HistoryStore,
}

impl RoomRegistry {
    /// Create an empty registry backed by `history`.
    pub fn new(history: HistoryStore) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            history,
        }
    }

    /// Activate `member.room` and register `member` as its first member.
    ///
    /// The room's persisted log is loaded (empty if none exists) and
    /// `room_created` is queued for the member before it becomes visible to
    /// broadcasts.
    pub async fn create(&self, member: Member) -> Result<Arc<Room>, RegistryError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(&member.room) {
            return Err(RegistryError::AlreadyExists(member.room));
        }

        let log = self.history.load(&member.room).await;
        let room = Arc::new(Room::new(&member.room, log));
        {
            let mut state = room.state.lock().await;
            member.deliver(Reply::RoomCreated.as_str());
            info!("Created room {} for {}", room.name(), member.name);
            state.add_member(member);
        }
        rooms.insert(room.name().to_string(), Arc::clone(&room));
        Ok(room)
    }

    /// Register `member` in the already active room `member.room`.
    ///
    /// The history transfer and `room_joined` are queued and the member is
    /// added in one critical section of the room, so the member sees every
    /// message exactly once: either in the replayed history or live.
    pub async fn join(&self, member: Member) -> Result<Arc<Room>, RegistryError> {
        let rooms = self.rooms.lock().await;
        let room = match rooms.get(&member.room) {
            Some(room) => Arc::clone(room),
            None => return Err(RegistryError::NotFound(member.room)),
        };

        let mut state = room.state.lock().await;
        member.deliver(encode_history(&state.log));
        member.deliver(Reply::RoomJoined.as_str());
        info!("User {} joined room: {}", member.name, room.name());
        state.add_member(member);
        drop(state);

        Ok(room)
    }

    /// Remove a member, deactivating the room when it becomes empty.
    ///
    /// Idempotent: removing an unknown member returns `None` and changes
    /// nothing. The room's persisted history is left intact.
    pub async fn remove_member(&self, room_name: &str, id: MemberId) -> Option<Member> {
        let mut rooms = self.rooms.lock().await;
        let room = Arc::clone(rooms.get(room_name)?);

        let mut state = room.state.lock().await;
        let removed = state.members.remove(&id)?;
        debug!("Removed {} ({}) from room {}", removed.name, id, room_name);

        if state.members.is_empty() {
            state.active = false;
            rooms.remove(room_name);
            info!("Room {} is now empty and has been removed", room_name);
        } else {
            debug!(
                "Room {} still has {} members",
                room_name,
                state.members.len()
            );
        }
        Some(removed)
    }

    /// Append a chat line to the room's history and broadcast it to every
    /// member except the sender.
    ///
    /// The history write completes before the broadcast. A failed write is
    /// logged and does not stop delivery.
    pub async fn post(
        &self,
        room_name: &str,
        sender: MemberId,
        message: String,
    ) -> Result<Delivery, RegistryError> {
        let room = self
            .room(room_name)
            .await
            .ok_or_else(|| RegistryError::NotFound(room_name.to_string()))?;

        let delivery = {
            let mut state = room.state.lock().await;
            if !state.active || !state.members.contains_key(&sender) {
                return Err(RegistryError::NotMember(room_name.to_string()));
            }

            let line = message.clone();
            if let Err(e) = self.history.append(room_name, &mut state.log, line).await {
                warn!("Error saving history for room {}: {}", room_name, e);
            }
            fan_out(state.members.values(), &message, Some(sender))
        };

        self.evict(room_name, &delivery.failed).await;
        Ok(delivery)
    }

    /// Deliver `message` to every member of the room except `exclude`.
    ///
    /// Members whose connection is gone or whose queue is full are removed
    /// through the same path as an explicit disconnect. Broadcasting to an inactive room is a no-op.
    pub async fn broadcast(
        &self,
        room_name: &str,
        message: &str,
        exclude: Option<MemberId>,
    ) -> Delivery {
        let Some(room) = self.room(room_name).await else {
            return Delivery::default();
        };

        let delivery = {
            let state = room.state.lock().await;
            fan_out(state.members.values(), message, exclude)
        };

        self.evict(room_name, &delivery.failed).await;
        delivery
    }

    async fn evict(&self, room_name: &str, failed: &[MemberId]) {
        for id in failed {
            if let Some(member) = self.remove_member(room_name, *id).await {
                info!(
                    "Dropped unreachable member {} from room {}",
                    member.name, room_name
                );
            }
        }
    }

    /// Whether `id` is currently registered in the room.
    pub async fn is_member(&self, room_name: &str, id: MemberId) -> bool {
        match self.room(room_name).await {
            Some(room) => room.state.lock().await.members.contains_key(&id),
            None => false,
        }
    }

    /// Get an active room by name.
    pub async fn room(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(name).cloned()
    }

    /// Check whether a room is active.
    pub async fn is_active(&self, name: &str) -> bool {
        self.rooms.lock().await.contains_key(name)
    }

    /// Names of all active rooms, sorted.
    pub async fn active_rooms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of members in a room (0 if the room is not active).
    pub async fn member_count(&self, name: &str) -> usize {
        match self.room(name).await {
            Some(room) => room.member_count().await,
            None => 0,
        }
    }

    /// In-memory history of an active room.
    pub async fn history(&self, name: &str) -> Option<Vec<String>> {
        match self.room(name).await {
            Some(room) => Some(room.history().await),
            None => None,
        }
    }
}

//! Per-connection worker.
//!
//! A [`ConnectionHandler`] owns one accepted stream from handshake to close.
//! Inbound lines are read here; outbound lines (replies, history, broadcasts
//! from other members) go through a bounded queue drained by a separate
//! writer task. A peer that stops reading fills its queue and is evicted
//! instead of blocking the member that is broadcasting.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, info, warn};

use crate::chat::{Member, MemberId, Notice, Outbound, RegistryError, RoomRegistry};
use crate::protocol::{write_line, Action, ControlLine, FrameReader, HandshakeError, Reply};
use crate::{Result, RoomchatError};

/// Time allowed for queued lines to reach the socket once the handler stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state representing the current phase of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Accepted, nothing read yet.
    #[default]
    Connecting,
    /// Reading name, room and action.
    Handshaking,
    /// Registered in a room.
    Active,
    /// Sent `leave`.
    Leaving,
    /// Sent `exit`.
    Exiting,
    /// Terminal; membership has been removed.
    Closed,
}

/// Per-connection limits shared by every handler of a server.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Upper bound on a single read before re-checking shutdown.
    pub read_timeout: Duration,
    /// Longest accepted inbound line.
    pub max_line_bytes: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
}

/// Room slot held by an active handler.
#[derive(Debug, Clone)]
struct Membership {
    name: String,
    room: String,
}

enum Wake {
    Read(std::result::Result<io::Result<Option<String>>, Elapsed>),
    Shutdown { sender_gone: bool },
}

/// Worker driving one client connection.
pub struct ConnectionHandler {
    id: MemberId,
    peer_addr: SocketAddr,
    state: ConnectionState,
    registry: Arc<RoomRegistry>,
    settings: ConnectionSettings,
    shutdown: watch::Receiver<bool>,
    membership: Option<Membership>,
}

impl ConnectionHandler {
    /// Create a handler for a freshly accepted connection.
    pub fn new(
        peer_addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        settings: ConnectionSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let id = MemberId::new();
        debug!("Created connection {} for {}", id, peer_addr);

        Self {
            id,
            peer_addr,
            state: ConnectionState::Connecting,
            registry,
            settings,
            shutdown,
            membership: None,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!(
            "Connection {} state changed: {:?} -> {:?}",
            self.id, self.state, state
        );
        self.state = state;
    }

    /// Serve the connection until it leaves, exits, fails or the server
    /// shuts down.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half, self.settings.max_line_bytes);
        let (tx, rx) = mpsc::channel(self.settings.outbound_queue);
        let mut writer = tokio::spawn(write_loop(write_half, rx, self.id));

        self.set_state(ConnectionState::Handshaking);
        match self.handshake(&mut reader, &tx).await {
            Ok(member) => {
                self.set_state(ConnectionState::Active);
                let name = member.name.clone();
                let room = member.room.clone();
                self.membership = Some(Membership {
                    name: name.clone(),
                    room: room.clone(),
                });
                self.registry
                    .broadcast(&room, &Notice::Joined.format(&name), Some(self.id))
                    .await;
                self.serve(&mut reader, &tx).await;
            }
            Err(e) => {
                info!("Handshake with {} failed: {}", self.peer_addr, e);
            }
        }

        self.cleanup().await;
        self.set_state(ConnectionState::Closed);

        drop(tx);
        if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            warn!("Writer for connection {} did not drain in time", self.id);
            writer.abort();
        }
        debug!("Connection {} from {} closed", self.id, self.peer_addr);
    }

    /// Read the three handshake fields and register with the registry.
    ///
    /// Success acknowledgements are queued by the registry; failure replies
    /// are queued here.
    async fn handshake<R>(
        &mut self,
        reader: &mut FrameReader<R>,
        tx: &Outbound,
    ) -> Result<Member>
    where
        R: AsyncRead + Unpin,
    {
        let name = self.next_line(reader, tx).await.ok_or(HandshakeError::Closed)?;
        let room = self.next_line(reader, tx).await.ok_or(HandshakeError::Closed)?;
        let action = self.next_line(reader, tx).await.ok_or(HandshakeError::Closed)?;

        let name = name.trim().to_string();
        let room = room.trim().to_string();
        if name.is_empty() {
            return Err(HandshakeError::EmptyField("name").into());
        }
        if room.is_empty() {
            return Err(HandshakeError::EmptyField("room").into());
        }

        let action = match Action::parse(&action) {
            Ok(action) => action,
            Err(e) => {
                self.reply(tx, Reply::InvalidAction);
                return Err(e.into());
            }
        };

        let member = Member::new(self.id, &name, &room, tx.clone());
        let result = match action {
            Action::Create => self.registry.create(member.clone()).await,
            Action::Join => self.registry.join(member.clone()).await,
        };

        match result {
            Ok(_) => {
                info!(
                    "{} ({}) {} room {}",
                    name,
                    self.peer_addr,
                    if action == Action::Create { "created" } else { "joined" },
                    room
                );
                Ok(member)
            }
            Err(e) => {
                let reply = match e {
                    RegistryError::AlreadyExists(_) => Reply::RoomExists,
                    RegistryError::NotFound(_) | RegistryError::NotMember(_) => Reply::RoomNotFound,
                };
                self.reply(tx, reply);
                Err(RoomchatError::Registry(e))
            }
        }
    }

    /// Active phase: relay chat lines until a control line or disconnect.
    async fn serve<R>(&mut self, reader: &mut FrameReader<R>, tx: &Outbound)
    where
        R: AsyncRead + Unpin,
    {
        let Some(Membership { name, room }) = self.membership.clone() else {
            return;
        };

        while let Some(line) = self.next_line(reader, tx).await {
            match ControlLine::parse(&line) {
                Some(ControlLine::Leave) => {
                    self.set_state(ConnectionState::Leaving);
                    self.registry
                        .broadcast(&room, &Notice::LeftRoom.format(&name), Some(self.id))
                        .await;
                    self.cleanup().await;
                    self.reply(tx, Reply::LeftRoom);
                    info!("User {} left room: {}", name, room);
                    return;
                }
                Some(ControlLine::Exit) => {
                    self.set_state(ConnectionState::Exiting);
                    self.registry
                        .broadcast(&room, &Notice::LeftChat.format(&name), Some(self.id))
                        .await;
                    info!("User {} exited from room: {}", name, room);
                    return;
                }
                None => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = self.registry.post(&room, self.id, line).await {
                        debug!("Connection {} dropped from room: {}", self.id, e);
                        return;
                    }
                }
            }
        }

        info!("User {} disconnected from room: {}", name, room);
    }

    fn reply(&self, tx: &Outbound, reply: Reply) {
        if let Err(e) = tx.try_send(reply.as_str().to_string()) {
            debug!("Failed to queue {} on connection {}: {}", reply, self.id, e);
        }
    }

    /// Remove this connection's membership. Safe to call more than once.
    async fn cleanup(&mut self) {
        if let Some(membership) = self.membership.take() {
            self.registry
                .remove_member(&membership.room, self.id)
                .await;
        }
    }

    /// Read the next line, or `None` once the connection should close.
    ///
    /// Each read is bounded by the read timeout; on expiry the shutdown
    /// signal, the writer task and the room membership are checked before
    /// reading again.
    async fn next_line<R>(
        &mut self,
        reader: &mut FrameReader<R>,
        tx: &Outbound,
    ) -> Option<String>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if *self.shutdown.borrow() {
                debug!("Connection {} observed shutdown", self.id);
                return None;
            }

            let wake = tokio::select! {
                result = timeout(self.settings.read_timeout, reader.read_line()) => Wake::Read(result),
                changed = self.shutdown.changed() => Wake::Shutdown { sender_gone: changed.is_err() },
            };

            match wake {
                Wake::Read(Ok(Ok(Some(line)))) => return Some(line),
                Wake::Read(Ok(Ok(None))) => {
                    debug!("Connection {} closed by peer", self.id);
                    return None;
                }
                Wake::Read(Ok(Err(e))) => {
                    debug!("Read error on connection {}: {}", self.id, e);
                    return None;
                }
                Wake::Read(Err(_)) => {
                    if tx.is_closed() {
                        debug!("Writer for connection {} has stopped", self.id);
                        return None;
                    }
                    if let Some(membership) = &self.membership {
                        if !self.registry.is_member(&membership.room, self.id).await {
                            debug!("Connection {} was evicted from {}", self.id, membership.room);
                            return None;
                        }
                    }
                }
                Wake::Shutdown { sender_gone: true } => return None,
                Wake::Shutdown { sender_gone: false } => {}
            }
        }
    }
}

/// Drain the outbound queue to the socket until every sender is gone or a
/// write fails.
async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut rx: mpsc::Receiver<String>,
    id: MemberId,
) where
    S: AsyncWrite,
{
    while let Some(line) = rx.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            debug!("Write error on connection {}: {}", id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::HistoryStore;
    use tokio::io::{DuplexStream, ReadHalf};
    use tokio::task::JoinHandle;

    type ClientReader = FrameReader<ReadHalf<DuplexStream>>;
    type ClientWriter = WriteHalf<DuplexStream>;

    struct Harness {
        registry: Arc<RoomRegistry>,
        shutdown: watch::Sender<bool>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let registry = Arc::new(RoomRegistry::new(HistoryStore::new(dir.path())));
            let (shutdown, _) = watch::channel(false);
            Self {
                registry,
                shutdown,
                _dir: dir,
            }
        }

        fn connect(&self) -> (ClientReader, ClientWriter, JoinHandle<()>) {
            let (client, server) = tokio::io::duplex(4096);
            let handler = ConnectionHandler::new(
                "127.0.0.1:9".parse().unwrap(),
                Arc::clone(&self.registry),
                ConnectionSettings {
                    read_timeout: Duration::from_millis(50),
                    max_line_bytes: 1024,
                    outbound_queue: 16,
                },
                self.shutdown.subscribe(),
            );
            let task = tokio::spawn(handler.run(server));
            let (read, write) = tokio::io::split(client);
            (FrameReader::new(read, 1024), write, task)
        }
    }

    async fn send(writer: &mut ClientWriter, lines: &[&str]) {
        for line in lines {
            write_line(writer, line).await.unwrap();
        }
    }

    async fn recv<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> Option<String> {
        timeout(Duration::from_secs(2), reader.read_line())
            .await
            .expect("timed out waiting for line")
            .unwrap()
    }

    #[test]
    fn test_default_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_create_then_leave() {
        let harness = Harness::new();
        let (mut reader, mut writer, task) = harness.connect();

        send(&mut writer, &["alice", "lobby", "create"]).await;
        assert_eq!(recv(&mut reader).await.as_deref(), Some("room_created"));
        assert!(harness.registry.is_active("lobby").await);

        send(&mut writer, &["leave"]).await;
        assert_eq!(recv(&mut reader).await.as_deref(), Some("left_room"));
        assert_eq!(recv(&mut reader).await, None);

        task.await.unwrap();
        assert!(!harness.registry.is_active("lobby").await);
    }

    #[tokio::test]
    async fn test_blank_name_closes_without_reply() {
        let harness = Harness::new();
        let (mut reader, mut writer, task) = harness.connect();

        send(&mut writer, &["   ", "lobby", "create"]).await;
        assert_eq!(recv(&mut reader).await, None);

        task.await.unwrap();
        assert!(harness.registry.active_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_action_reply() {
        let harness = Harness::new();
        let (mut reader, mut writer, task) = harness.connect();

        send(&mut writer, &["alice", "lobby", "delete"]).await;
        assert_eq!(recv(&mut reader).await.as_deref(), Some("invalid_action"));
        assert_eq!(recv(&mut reader).await, None);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_during_handshake() {
        let harness = Harness::new();
        let (mut reader, mut writer, task) = harness.connect();

        send(&mut writer, &["alice"]).await;
        writer.shutdown().await.unwrap();

        assert_eq!(recv(&mut reader).await, None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_removes_membership() {
        let harness = Harness::new();
        let (mut reader, mut writer, task) = harness.connect();

        send(&mut writer, &["alice", "lobby", "create"]).await;
        assert_eq!(recv(&mut reader).await.as_deref(), Some("room_created"));

        harness.shutdown.send_replace(true);
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert!(!harness.registry.is_active("lobby").await);
    }

    #[tokio::test]
    async fn test_abrupt_disconnect_removes_membership() {
        let harness = Harness::new();
        let (mut reader, mut writer, task) = harness.connect();

        send(&mut writer, &["alice", "lobby", "create"]).await;
        assert_eq!(recv(&mut reader).await.as_deref(), Some("room_created"));

        drop(writer);
        drop(reader);
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert!(!harness.registry.is_active("lobby").await);
    }
}

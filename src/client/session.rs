//! Client side of the chat protocol.
//!
//! A [`ClientSession`] runs the handshake, sends chat lines and receives
//! broadcasts through a background worker. After any failure it falls back
//! to [`SessionState::LoggedOut`], so the caller can never keep writing into
//! a dead connection without having seen an error first.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::protocol::{
    decode_history, write_line, Action, ControlLine, FrameReader, HandshakeError, Reply,
};

/// Session state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for name, room and action.
    #[default]
    LoggedOut,
    /// Handshake in progress.
    Connecting,
    /// In a room.
    Connected,
    /// `leave` sent, waiting for `left_room`.
    LeavingConfirm,
    /// `exit` sent.
    ExitConfirm,
    /// The session is over.
    Terminated,
}

/// Errors surfaced to the user of a [`ClientSession`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Handshake fields were rejected.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// `create` named a room that is already active.
    #[error("room '{0}' already exists")]
    RoomConflict(String),

    /// `join` named a room that is not active.
    #[error("room '{0}' not found")]
    RoomMissing(String),

    /// The server did not answer in time.
    #[error("timed out waiting for {0}")]
    ConnectTimeout(String),

    /// Socket error.
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something the handshake does not allow.
    #[error("unexpected reply from server: {0}")]
    UnexpectedReply(String),

    /// The operation needs a connected session.
    #[error("not connected to a room")]
    NotConnected,

    /// The operation is not allowed in the current state.
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        /// Attempted operation.
        action: &'static str,
        /// State the session was in.
        state: SessionState,
    },
}

/// Name, room and action entered at the login prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Display name.
    pub name: String,
    /// Room name.
    pub room: String,
    /// Whether to create or join the room.
    pub action: Action,
}

impl LoginRequest {
    /// Create a request, trimming both text fields.
    pub fn new(name: &str, room: &str, action: Action) -> Self {
        Self {
            name: name.trim().to_string(),
            room: room.trim().to_string(),
            action,
        }
    }

    /// Check that both fields are present.
    pub fn validate(&self) -> Result<(), HandshakeError> {
        if self.name.trim().is_empty() {
            return Err(HandshakeError::EmptyField("name"));
        }
        if self.room.trim().is_empty() {
            return Err(HandshakeError::EmptyField("room"));
        }
        Ok(())
    }
}

/// Something the receive worker observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A chat line or notice from the room.
    Message(String),
    /// The server acknowledged `leave`.
    LeftRoom,
    /// The connection failed while no leave or exit was in progress.
    ConnectionLost(String),
    /// The connection closed after a leave or exit.
    Closed,
}

/// Format an outgoing chat line as `[HH:MM] name: text`.
pub fn format_outgoing<Tz>(name: &str, text: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("[{}] {}: {}", at.format("%H:%M"), name, text)
}

struct Connection {
    writer: OwnedWriteHalf,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    worker: JoinHandle<()>,
    leaving: Arc<AtomicBool>,
}

/// Client session driving one connection at a time.
pub struct ClientSession {
    config: ClientConfig,
    state: SessionState,
    name: String,
    room: String,
    connection: Option<Connection>,
}

impl ClientSession {
    /// Create a logged-out session.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            config: config.clone(),
            state: SessionState::LoggedOut,
            name: String::new(),
            room: String::new(),
            connection: None,
        }
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Display name of the current or last login.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Room of the current or last login.
    pub fn room(&self) -> &str {
        &self.room
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Client state changed: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn require(&self, action: &'static str, state: SessionState) -> Result<(), ClientError> {
        if self.state == state {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    /// Connect, run the handshake and enter the room.
    ///
    /// Returns the room history (empty after `create`). On any error the
    /// connection is closed and the session stays logged out.
    pub async fn login(&mut self, request: LoginRequest) -> Result<Vec<String>, ClientError> {
        self.require("log in", SessionState::LoggedOut)?;
        request.validate()?;

        self.set_state(SessionState::Connecting);
        match self.connect(&request).await {
            Ok((reader, writer, history)) => {
                let (tx, events) = mpsc::unbounded_channel();
                let leaving = Arc::new(AtomicBool::new(false));
                let worker = tokio::spawn(receive_loop(reader, tx, Arc::clone(&leaving)));

                self.name = request.name;
                self.room = request.room;
                self.connection = Some(Connection {
                    writer,
                    events,
                    worker,
                    leaving,
                });
                self.set_state(SessionState::Connected);
                info!("Entered room {} as {}", self.room, self.name);
                Ok(history)
            }
            Err(e) => {
                warn!("Login to room {} failed: {}", request.room, e);
                self.set_state(SessionState::LoggedOut);
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        request: &LoginRequest,
    ) -> Result<(FrameReader<OwnedReadHalf>, OwnedWriteHalf, Vec<String>), ClientError> {
        let addr = self.config.server_addr();
        let wait = Duration::from_secs(self.config.connect_timeout_secs);

        let stream = timeout(wait, TcpStream::connect(&addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout(addr.clone()))??;
        let (read_half, mut writer) = stream.into_split();
        // The history transfer is a single line and may be far longer than
        // any chat message.
        let handshake_cap = self.config.max_history_bytes.max(self.config.max_line_bytes);
        let mut reader = FrameReader::new(read_half, handshake_cap);

        write_line(&mut writer, &request.name).await?;
        write_line(&mut writer, &request.room).await?;
        write_line(&mut writer, request.action.as_str()).await?;

        let first = read_reply(&mut reader, wait).await?;
        let history = match (request.action, Reply::parse(&first)) {
            (Action::Create, Some(Reply::RoomCreated)) => Vec::new(),
            (Action::Create, Some(Reply::RoomExists)) => {
                return Err(ClientError::RoomConflict(request.room.clone()))
            }
            (Action::Join, Some(Reply::RoomNotFound)) => {
                return Err(ClientError::RoomMissing(request.room.clone()))
            }
            (_, Some(Reply::InvalidAction)) => {
                return Err(HandshakeError::InvalidAction(request.action.to_string()).into())
            }
            (Action::Join, None) => {
                let history =
                    decode_history(&first).map_err(|_| ClientError::UnexpectedReply(first))?;
                let ack = read_reply(&mut reader, wait).await?;
                if Reply::parse(&ack) != Some(Reply::RoomJoined) {
                    return Err(ClientError::UnexpectedReply(ack));
                }
                history
            }
            _ => return Err(ClientError::UnexpectedReply(first)),
        };

        reader.set_max_line_bytes(self.config.max_line_bytes);
        Ok((reader, writer, history))
    }

    /// Send a chat line to the room.
    ///
    /// Returns the formatted line for local echo, or `None` if `text` was
    /// blank. A write failure ends the session.
    pub async fn send(&mut self, text: &str) -> Result<Option<String>, ClientError> {
        if self.state != SessionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let line = format_outgoing(&self.name, text, &Local::now());
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(e) = write_line(&mut connection.writer, &line).await {
            warn!("Send to room {} failed: {}", self.room, e);
            self.teardown(SessionState::LoggedOut);
            return Err(e.into());
        }
        Ok(Some(line))
    }

    /// Wait for the next event from the room.
    ///
    /// Returns `None` when not connected. A [`SessionEvent::ConnectionLost`]
    /// also returns the session to `LoggedOut`.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let connection = self.connection.as_mut()?;
        let event = connection.events.recv().await;

        match event {
            Some(SessionEvent::Message(line)) => Some(SessionEvent::Message(line)),
            Some(SessionEvent::ConnectionLost(reason)) => {
                warn!("Connection to room {} lost: {}", self.room, reason);
                self.teardown(SessionState::LoggedOut);
                Some(SessionEvent::ConnectionLost(reason))
            }
            Some(other) => Some(other),
            None => {
                self.teardown(SessionState::LoggedOut);
                Some(SessionEvent::Closed)
            }
        }
    }

    /// Leave the room and return to `LoggedOut`.
    ///
    /// Returns whether the server acknowledged the leave in time. The session
    /// is logged out either way.
    pub async fn leave(&mut self) -> Result<bool, ClientError> {
        self.require("leave", SessionState::Connected)?;
        self.set_state(SessionState::LeavingConfirm);

        let wait = Duration::from_millis(self.config.leave_ack_timeout_ms);
        let Some(connection) = self.connection.as_mut() else {
            self.set_state(SessionState::LoggedOut);
            return Err(ClientError::NotConnected);
        };
        connection.leaving.store(true, Ordering::SeqCst);

        let acknowledged =
            match write_line(&mut connection.writer, ControlLine::Leave.as_str()).await {
                Ok(()) => timeout(wait, wait_for_left_room(&mut connection.events))
                    .await
                    .unwrap_or(false),
                Err(e) => {
                    debug!("Failed to send leave: {}", e);
                    false
                }
            };

        if !acknowledged {
            warn!("No left_room acknowledgement from the server");
        }
        info!("Left room {}", self.room);
        self.teardown(SessionState::LoggedOut);
        Ok(acknowledged)
    }

    /// Send `exit` if connected and terminate the session.
    pub async fn exit(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            self.state = SessionState::ExitConfirm;
            connection.leaving.store(true, Ordering::SeqCst);
            if let Err(e) = write_line(&mut connection.writer, ControlLine::Exit.as_str()).await {
                debug!("Failed to send exit: {}", e);
            }
            info!("Exited room {}", self.room);
        }
        self.teardown(SessionState::Terminated);
    }

    fn teardown(&mut self, state: SessionState) {
        if let Some(connection) = self.connection.take() {
            connection.worker.abort();
        }
        self.set_state(state);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.worker.abort();
        }
    }
}

async fn read_reply(
    reader: &mut FrameReader<OwnedReadHalf>,
    wait: Duration,
) -> Result<String, ClientError> {
    match timeout(wait, reader.read_line()).await {
        Ok(Ok(Some(line))) => Ok(line),
        Ok(Ok(None)) => Err(HandshakeError::Closed.into()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ClientError::ConnectTimeout("the server reply".to_string())),
    }
}

async fn wait_for_left_room(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> bool {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::LeftRoom => return true,
            SessionEvent::Message(line) => debug!("Discarding line received while leaving: {}", line),
            SessionEvent::ConnectionLost(_) | SessionEvent::Closed => return false,
        }
    }
    false
}

/// Forward inbound lines to the session until `left_room` or disconnect.
async fn receive_loop(
    mut reader: FrameReader<OwnedReadHalf>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    leaving: Arc<AtomicBool>,
) {
    loop {
        let event = match reader.read_line().await {
            Ok(Some(line)) => {
                if leaving.load(Ordering::SeqCst) && Reply::parse(&line) == Some(Reply::LeftRoom) {
                    let _ = tx.send(SessionEvent::LeftRoom);
                    return;
                }
                SessionEvent::Message(line)
            }
            Ok(None) if leaving.load(Ordering::SeqCst) => SessionEvent::Closed,
            Ok(None) => SessionEvent::ConnectionLost("server closed the connection".to_string()),
            Err(_) if leaving.load(Ordering::SeqCst) => SessionEvent::Closed,
            Err(e) => SessionEvent::ConnectionLost(e.to_string()),
        };

        let done = !matches!(event, SessionEvent::Message(_));
        if tx.send(event).is_err() || done {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::net::TcpListener;

    fn config_for(port: u16) -> ClientConfig {
        ClientConfig {
            port,
            connect_timeout_secs: 2,
            leave_ack_timeout_ms: 200,
            ..ClientConfig::default()
        }
    }

    /// Accept one connection, read the handshake and answer with `replies`.
    async fn scripted_server(replies: &'static [&'static str]) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = FrameReader::new(read, 1024);
            let mut fields = Vec::new();
            for _ in 0..3 {
                fields.push(reader.read_line().await.unwrap().unwrap());
            }
            for reply in replies {
                write_line(&mut write, reply).await.unwrap();
            }
            fields
        });
        (port, task)
    }

    #[test]
    fn test_login_request_validation() {
        assert!(LoginRequest::new("alice", "lobby", Action::Create).validate().is_ok());
        assert_eq!(
            LoginRequest::new("  ", "lobby", Action::Join).validate(),
            Err(HandshakeError::EmptyField("name"))
        );
        assert_eq!(
            LoginRequest::new("alice", "", Action::Join).validate(),
            Err(HandshakeError::EmptyField("room"))
        );
    }

    #[test]
    fn test_format_outgoing() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        assert_eq!(format_outgoing("alice", "hi", &at), "[07:05] alice: hi");
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut session = ClientSession::new(&ClientConfig::default());
        assert!(matches!(session.send("hi").await, Err(ClientError::NotConnected)));
        assert!(matches!(
            session.leave().await,
            Err(ClientError::InvalidState { .. })
        ));
        assert_eq!(session.next_event().await, None);
    }

    #[tokio::test]
    async fn test_blank_field_rejected_before_connecting() {
        let mut session = ClientSession::new(&config_for(1));
        let result = session
            .login(LoginRequest::new("", "lobby", Action::Create))
            .await;

        assert!(matches!(
            result,
            Err(ClientError::Handshake(HandshakeError::EmptyField("name")))
        ));
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_connection_refused_stays_logged_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = ClientSession::new(&config_for(port));
        let result = session
            .login(LoginRequest::new("alice", "lobby", Action::Create))
            .await;

        assert!(matches!(result, Err(ClientError::Io(_))));
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_room_exists_maps_to_conflict() {
        let (port, server) = scripted_server(&["room_exists"]).await;
        let mut session = ClientSession::new(&config_for(port));

        let result = session
            .login(LoginRequest::new("alice", "lobby", Action::Create))
            .await;

        assert!(matches!(result, Err(ClientError::RoomConflict(room)) if room == "lobby"));
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert_eq!(server.await.unwrap(), vec!["alice", "lobby", "create"]);
    }

    #[tokio::test]
    async fn test_room_not_found_maps_to_missing() {
        let (port, _server) = scripted_server(&["room_not_found"]).await;
        let mut session = ClientSession::new(&config_for(port));

        let result = session
            .login(LoginRequest::new("bob", "nowhere", Action::Join))
            .await;

        assert!(matches!(result, Err(ClientError::RoomMissing(room)) if room == "nowhere"));
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_join_returns_history() {
        let (port, _server) = scripted_server(&[r#"["hi","there"]"#, "room_joined"]).await;
        let mut session = ClientSession::new(&config_for(port));

        let history = session
            .login(LoginRequest::new("bob", "lobby", Action::Join))
            .await
            .unwrap();

        assert_eq!(history, vec!["hi".to_string(), "there".to_string()]);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_join_without_ack_is_unexpected() {
        let (port, _server) = scripted_server(&["[]", "room_created"]).await;
        let mut session = ClientSession::new(&config_for(port));

        let result = session
            .login(LoginRequest::new("bob", "lobby", Action::Join))
            .await;

        assert!(matches!(result, Err(ClientError::UnexpectedReply(line)) if line == "room_created"));
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_server_close_is_connection_lost() {
        let (port, server) = scripted_server(&["room_created"]).await;
        let mut session = ClientSession::new(&config_for(port));

        session
            .login(LoginRequest::new("alice", "lobby", Action::Create))
            .await
            .unwrap();
        // The scripted server drops the socket once its replies are written.
        server.await.unwrap();

        let event = session.next_event().await;
        assert!(matches!(event, Some(SessionEvent::ConnectionLost(_))));
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_leave_without_ack_still_logs_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = FrameReader::new(read, 1024);
            for _ in 0..3 {
                reader.read_line().await.unwrap();
            }
            write_line(&mut write, "room_created").await.unwrap();
            // Keep the connection open without ever acknowledging leave.
            while let Ok(Some(_)) = reader.read_line().await {}
        });

        let mut session = ClientSession::new(&config_for(port));
        session
            .login(LoginRequest::new("alice", "lobby", Action::Create))
            .await
            .unwrap();

        assert!(!session.leave().await.unwrap());
        assert_eq!(session.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_exit_terminates() {
        let mut session = ClientSession::new(&ClientConfig::default());
        session.exit().await;
        assert_eq!(session.state(), SessionState::Terminated);
    }
}

//! Test helpers for integration tests.
//!
//! Provides TestServer, TestClient, and polling helpers for driving a real
//! server over TCP.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use roomchat::protocol::{write_line, FrameReader};
use roomchat::{ChatServer, Config, RoomRegistry, ShutdownHandle};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout used by test servers, short so that disconnects and
/// shutdown are noticed quickly.
pub const TEST_READ_TIMEOUT_MS: u64 = 50;

/// Build a configuration for a server on an OS-assigned port.
pub fn test_config(history_dir: &Path) -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config.server.read_timeout_ms = TEST_READ_TIMEOUT_MS;
    config.history.dir = history_dir.to_string_lossy().into_owned();
    config
}

/// A server running in the background.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<RoomRegistry>,
    pub history_dir: PathBuf,
    shutdown: ShutdownHandle,
    task: JoinHandle<roomchat::Result<()>>,
}

impl TestServer {
    /// Start a server that stores history in `history_dir`.
    pub async fn start(history_dir: &Path) -> Self {
        let config = test_config(history_dir);
        let server = ChatServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        Self {
            addr,
            registry,
            history_dir: history_dir.to_path_buf(),
            shutdown,
            task,
        }
    }

    /// Stop the server and wait until every connection has been cleaned up.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        timeout(DEFAULT_TIMEOUT, self.task)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
    }

    /// Wait until `room` holds exactly `messages` in memory.
    pub async fn wait_for_history(&self, room: &str, messages: &[&str]) {
        let expected: Vec<String> = messages.iter().map(|s| s.to_string()).collect();
        let registry = Arc::clone(&self.registry);
        let room = room.to_string();
        wait_until(move || {
            let registry = Arc::clone(&registry);
            let room = room.clone();
            let expected = expected.clone();
            async move { registry.history(&room).await == Some(expected) }
        })
        .await;
    }

    /// Wait until `room` is active or inactive.
    pub async fn wait_for_active(&self, room: &str, active: bool) {
        let registry = Arc::clone(&self.registry);
        let room = room.to_string();
        wait_until(move || {
            let registry = Arc::clone(&registry);
            let room = room.clone();
            async move { registry.is_active(&room).await == active }
        })
        .await;
    }

    /// Wait until `room` has exactly `count` members.
    pub async fn wait_for_members(&self, room: &str, count: usize) {
        let registry = Arc::clone(&self.registry);
        let room = room.to_string();
        wait_until(move || {
            let registry = Arc::clone(&registry);
            let room = room.clone();
            async move { registry.member_count(&room).await == count }
        })
        .await;
    }
}

/// Poll `check` until it returns true or the default timeout expires.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Raw protocol client for the chat server.
pub struct TestClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect to the server at the given address.
    pub async fn connect(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read, 64 * 1024),
            writer,
        })
    }

    /// Connect and send the three handshake fields.
    pub async fn handshake(addr: SocketAddr, name: &str, room: &str, action: &str) -> Self {
        let mut client = Self::connect(addr).await.unwrap();
        client.send_line(name).await.unwrap();
        client.send_line(room).await.unwrap();
        client.send_line(action).await.unwrap();
        client
    }

    /// Create `room` and assert success.
    pub async fn create(addr: SocketAddr, name: &str, room: &str) -> Self {
        let mut client = Self::handshake(addr, name, room, "create").await;
        assert_eq!(client.recv().await.as_deref(), Some("room_created"));
        client
    }

    /// Join `room`, assert success and return the replayed history.
    pub async fn join(addr: SocketAddr, name: &str, room: &str) -> (Self, Vec<String>) {
        let mut client = Self::handshake(addr, name, room, "join").await;
        let history = client.recv().await.expect("history line");
        assert_eq!(client.recv().await.as_deref(), Some("room_joined"));
        (client, serde_json::from_str(&history).unwrap())
    }

    /// Send a line to the server.
    pub async fn send_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        write_line(&mut self.writer, line).await
    }

    /// Receive a line with the default timeout. `None` means the server
    /// closed the connection.
    pub async fn recv(&mut self) -> Option<String> {
        timeout(DEFAULT_TIMEOUT, self.reader.read_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap_or(None)
    }

    /// Assert that nothing arrives within `duration`.
    pub async fn expect_silence(&mut self, duration: Duration) {
        if let Ok(result) = timeout(duration, self.reader.read_line()).await {
            panic!("expected no data, got {result:?}");
        }
    }
}

//! TCP listener for the chat server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::handler::{ConnectionHandler, ConnectionSettings};
use crate::chat::{HistoryStore, RoomRegistry};
use crate::config::Config;
use crate::Result;

/// Handle used to stop a running [`ChatServer`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the server and every connection to stop.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

enum Event {
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Reaped,
    Shutdown,
}

/// Chat server that accepts TCP connections.
///
/// Every accepted connection gets its own [`ConnectionHandler`] task. There
/// is no cap on concurrent connections.
pub struct ChatServer {
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    settings: ConnectionSettings,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ChatServer {
    /// Create a new ChatServer bound to the configured address.
    ///
    /// The history directory is created if it does not exist.
    pub async fn bind(config: &Config) -> Result<Self> {
        let history = HistoryStore::new(&config.history.dir);
        history.ensure_dir().await?;

        let listener = TcpListener::bind(config.server.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        info!("Chat server listening on {}", local_addr);
        info!("Chat history stored in {}", history.dir().display());

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            registry: Arc::new(RoomRegistry::new(history)),
            settings: ConnectionSettings {
                read_timeout: config.server.read_timeout(),
                max_line_bytes: config.server.max_line_bytes,
                outbound_queue: config.server.outbound_queue_len,
            },
            shutdown: Arc::new(shutdown),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get the room registry.
    pub fn registry(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get a handle that stops the server.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Run the server, accepting connections and spawning handlers, until
    /// shutdown is requested.
    ///
    /// Returns once every connection handler has finished.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut handlers = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let event = tokio::select! {
                accepted = self.listener.accept() => Event::Accepted(accepted),
                Some(_) = handlers.join_next(), if !handlers.is_empty() => Event::Reaped,
                _ = shutdown_rx.changed() => Event::Shutdown,
            };

            match event {
                Event::Accepted(Ok((stream, addr))) => {
                    debug!("Accepted connection from {}", addr);
                    let handler = ConnectionHandler::new(
                        addr,
                        Arc::clone(&self.registry),
                        self.settings,
                        self.shutdown.subscribe(),
                    );
                    handlers.spawn(handler.run(stream));
                }
                Event::Accepted(Err(e)) => {
                    error!("Failed to accept connection: {}", e);
                }
                Event::Reaped => {}
                Event::Shutdown => break,
            }
        }

        drop(self.listener);
        info!(
            "Server shutting down, waiting for {} connections",
            handlers.len()
        );
        while let Some(result) = handlers.join_next().await {
            if let Err(e) = result {
                warn!("Connection task failed: {}", e);
            }
        }
        info!("Server stopped");
        Ok(())
    }

    /// Run the server until `signal` completes, then shut down gracefully.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let handle = self.shutdown_handle();
        let server = self.run();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => return result,
            _ = signal => {
                info!("Shutdown signal received");
                handle.shutdown();
            }
        }

        server.await
    }
}

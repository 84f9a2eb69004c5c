//! GatewayServer: the facade the embedding application talks to.
//!
//! # Lifecycle
//!
//! ```text
//! new()  ──► dispatch consumer running, no registry, no listener
//! start() ──► registry + idle sweep + accept loop
//! stop()  ──► accept loop cancelled, sweep stopped; clients stay open
//! shutdown().await ──► stop + close every client + wait for all tasks
//! ```
//!
//! Notifications from the registry and the acceptor are merged into a
//! single [`ServerEvent`] stream returned by [`GatewayServer::new`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use devgate_core::{ServerConfig, ServerEvent, TextEncoding};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::application::dispatch_queue::{dispatch_queue, DataHandler, DispatchQueue};
use crate::application::ports::{Clock, SystemClock};
use crate::application::registry::{ConnectionRegistry, RegistryError};
use crate::infrastructure::acceptor::{bind_listener, Acceptor};
use crate::infrastructure::tcp_socket::TcpClientSocket;

/// Error type for facade operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A data-plane call was made before a successful `start`.
    #[error("client registry not initialized; start the server first")]
    NotInitialized,

    #[error("server already started")]
    AlreadyStarted,

    #[error("invalid listening address '{0}'")]
    InvalidAddress(String),

    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listener unusable: {0}")]
    Listener(#[source] io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The device gateway.
pub struct GatewayServer {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    queue: DispatchQueue,
    events: mpsc::UnboundedSender<ServerEvent>,
    registry: Option<Arc<ConnectionRegistry<TcpClientSocket>>>,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    receivers: TaskTracker,
    acceptor_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl GatewayServer {
    /// Creates the server and the receiver for its notifications.
    ///
    /// The dispatch consumer starts immediately and feeds `handler`.  Must be
    /// called from within a tokio runtime.
    pub fn new<H: DataHandler>(
        config: ServerConfig,
        handler: H,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        Self::with_clock(config, handler, Arc::new(SystemClock))
    }

    /// Same as [`new`](Self::new) with an injected clock for the registry.
    pub fn with_clock<H: DataHandler>(
        config: ServerConfig,
        handler: H,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (queue, consumer) = dispatch_queue();
        consumer.spawn(handler);

        let server = Self {
            config,
            clock,
            queue,
            events,
            registry: None,
            local_addr: None,
            cancel: CancellationToken::new(),
            receivers: TaskTracker::new(),
            acceptor_task: None,
            sweep_task: None,
        };
        (server, events_rx)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Binds the configured address and starts accepting clients.
    ///
    /// # Errors
    ///
    /// - [`ServerError::InvalidAddress`]: `listen_ip` is not IPv4; nothing
    ///   is created.
    /// - [`ServerError::Bind`]: the registry exists (and its sweep runs) but
    ///   no client will ever be accepted.
    /// - [`ServerError::AlreadyStarted`]: `start` was already called.
    pub fn start(&mut self, idle_minutes: u32) -> Result<SocketAddr, ServerError> {
        if self.registry.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = match self.config.listen_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("cannot start gateway: {e}");
                self.report(ServerEvent::Error {
                    message: e.to_string(),
                });
                return Err(ServerError::InvalidAddress(self.config.listen_ip.clone()));
            }
        };

        self.init_registry(idle_minutes);

        let listener = match bind_listener(addr) {
            Ok(listener) => listener,
            Err(source) => {
                error!("bind failed on {addr}: {source}");
                self.report(ServerEvent::Error {
                    message: format!("bind failed on {addr}: {source}"),
                });
                return Err(ServerError::Bind { addr, source });
            }
        };
        self.launch(listener)
    }

    /// Starts the gateway on an already-bound listener.
    ///
    /// Useful for ephemeral ports and socket activation.  The configured
    /// listen address is ignored.
    pub fn start_with_listener(
        &mut self,
        listener: TcpListener,
        idle_minutes: u32,
    ) -> Result<SocketAddr, ServerError> {
        if self.registry.is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        self.init_registry(idle_minutes);
        self.launch(listener)
    }

    fn init_registry(&mut self, idle_minutes: u32) {
        // Fresh handles so a server can be started again after `shutdown`.
        self.cancel = CancellationToken::new();
        self.receivers = TaskTracker::new();

        let (registry, mut registry_events) = ConnectionRegistry::with_send_timeout(
            idle_minutes,
            self.config.send_timeout(),
            Arc::clone(&self.clock),
        );

        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = registry_events.recv().await {
                let _ = events.send(ServerEvent::from(event));
            }
        });

        self.sweep_task = Some(registry.spawn_idle_sweep());
        self.registry = Some(registry);
    }

    fn launch(&mut self, listener: TcpListener) -> Result<SocketAddr, ServerError> {
        let registry = self.registry()?.clone();
        let addr = listener.local_addr().map_err(ServerError::Listener)?;

        let acceptor = Acceptor {
            listener,
            registry,
            queue: self.queue.clone(),
            events: self.events.clone(),
            buffer_size: self.config.effective_buffer_size(),
            cancel: self.cancel.clone(),
            tracker: self.receivers.clone(),
        };
        self.acceptor_task = Some(tokio::spawn(acceptor.run()));
        self.local_addr = Some(addr);
        info!("gateway started on {addr}");
        Ok(addr)
    }

    /// Stops accepting and stops the idle sweep.
    ///
    /// Connected clients keep their sockets and receivers.  Calling `stop`
    /// more than once, or before `start`, is harmless.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(registry) = &self.registry {
            registry.dispose();
        }
        debug!("gateway stopped");
    }

    /// Stops the server, closes every client and waits for all tasks.
    ///
    /// Afterwards the server behaves as if it had never been started.
    pub async fn shutdown(&mut self) {
        self.stop();

        if let Some(registry) = self.registry.take() {
            let closed = registry.close_all();
            info!("closed {closed} client connection(s)");
        }

        if let Some(task) = self.acceptor_task.take() {
            if let Err(e) = task.await {
                error!("accept loop ended abnormally: {e}");
            }
        }
        if let Some(task) = self.sweep_task.take() {
            if let Err(e) = task.await {
                error!("idle sweep ended abnormally: {e}");
            }
        }
        self.receivers.close();
        self.receivers.wait().await;
        self.local_addr = None;
        info!("gateway shut down");
    }

    // ── Data plane ────────────────────────────────────────────────────────────

    /// Sends `data` to every connected client.  Returns the delivery count.
    pub async fn broadcast(&self, data: &[u8]) -> Result<usize, ServerError> {
        Ok(self.registry()?.broadcast(data).await)
    }

    pub async fn broadcast_text(
        &self,
        text: &str,
        encoding: TextEncoding,
    ) -> Result<usize, ServerError> {
        self.broadcast(&encoding.encode(text)).await
    }

    /// Sends `data` to the client registered as `client_id` (`"ip:port"`).
    pub async fn send_to(&self, client_id: &str, data: &[u8]) -> Result<String, ServerError> {
        Ok(self.registry()?.send_to(client_id, data).await?)
    }

    pub async fn send_text_to(
        &self,
        client_id: &str,
        text: &str,
        encoding: TextEncoding,
    ) -> Result<String, ServerError> {
        self.send_to(client_id, &encoding.encode(text)).await
    }

    /// Disconnects and forgets `client_id`.
    pub fn remove_client(&self, client_id: &str) -> Result<String, ServerError> {
        Ok(self.registry()?.remove_connection(client_id)?)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Number of tracked clients; `0` before start.
    pub fn connection_count(&self) -> usize {
        self.registry.as_ref().map_or(0, |r| r.count())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Items received but not yet handed to the data handler.
    pub fn pending_dispatch(&self) -> usize {
        self.queue.depth()
    }

    pub fn registry(&self) -> Result<&Arc<ConnectionRegistry<TcpClientSocket>>, ServerError> {
        self.registry.as_ref().ok_or(ServerError::NotInitialized)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn report(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

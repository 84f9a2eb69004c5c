//! TCP listener setup and the accept loop.
//!
//! Connections are accepted one at a time.  Each accepted socket is
//! registered under its `"ip:port"` identifier and handed to its own
//! [`Receiver`] task before the next `accept` is awaited, so a slow client
//! never holds up the loop.  Accept errors are logged and the loop carries
//! on; only cancellation ends it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use devgate_core::{ConnectionId, ServerEvent, ACCEPT_BACKLOG};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::application::dispatch_queue::DispatchQueue;
use crate::application::registry::ConnectionRegistry;
use crate::infrastructure::receiver::Receiver;
use crate::infrastructure::tcp_socket::TcpClientSocket;

/// Binds `addr` and starts listening with the fixed accept backlog.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(ACCEPT_BACKLOG)
}

/// The accept loop and the handles it needs.
pub struct Acceptor {
    pub listener: TcpListener,
    pub registry: Arc<ConnectionRegistry<TcpClientSocket>>,
    pub queue: DispatchQueue,
    pub events: mpsc::UnboundedSender<ServerEvent>,
    pub buffer_size: usize,
    pub cancel: CancellationToken,
    /// Receiver tasks are spawned on this tracker so shutdown can await them.
    pub tracker: TaskTracker,
}

impl Acceptor {
    /// Accepts connections until `cancel` fires.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("gateway listening on {addr}"),
            Err(e) => debug!("listening (local address unavailable: {e})"),
        }

        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("accept loop cancelled");
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => self.handle_accepted(stream, addr),
                Err(e) => {
                    // Transient (e.g. EMFILE); keep accepting.
                    error!("accept error: {e}");
                    let _ = self.events.send(ServerEvent::Error {
                        message: format!("accept failed: {e}"),
                    });
                }
            }
        }
    }

    fn handle_accepted(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let socket = match TcpClientSocket::from_stream(stream) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                error!("failed to set up connection from {addr}: {e}");
                let _ = self.events.send(ServerEvent::Error {
                    message: format!("connection setup for {addr} failed: {e}"),
                });
                return;
            }
        };

        let id = ConnectionId::from_addr(addr);
        info!("client {id} connected");
        let _ = self.events.send(ServerEvent::Connected {
            client_id: id.clone(),
        });

        self.registry.upsert(&id, Arc::clone(&socket));
        let receiver = Receiver::new(
            id,
            socket,
            Arc::clone(&self.registry),
            self.queue.clone(),
            self.buffer_size,
        );
        self.tracker.spawn(receiver.run());
    }
}

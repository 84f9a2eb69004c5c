//! Per-connection receive loop.
//!
//! One task per accepted connection.  Each iteration:
//!
//! 1. reads into a fresh buffer of `buffer_size` bytes,
//! 2. refreshes the connection's timestamp in the registry (never
//!    re-inserting a record that was removed meanwhile),
//! 3. enqueues the bytes for the data handler,
//! 4. probes the socket and stops if the peer is gone.
//!
//! Bytes are forwarded exactly as chunked by the OS; there is no framing.
//! The loop also stops, without touching the registry, as soon as the socket
//! is closed locally (eviction, `remove_client`, replacement or shutdown).

use std::sync::Arc;

use devgate_core::{ConnectionId, DispatchItem};
use tracing::{debug, info, warn};

use crate::application::dispatch_queue::DispatchQueue;
use crate::application::ports::ClientSocket;
use crate::application::registry::ConnectionRegistry;
use crate::infrastructure::tcp_socket::TcpClientSocket;

/// Everything a receive loop needs.
pub struct Receiver {
    id: ConnectionId,
    socket: Arc<TcpClientSocket>,
    registry: Arc<ConnectionRegistry<TcpClientSocket>>,
    queue: DispatchQueue,
    buffer_size: usize,
}

impl Receiver {
    pub fn new(
        id: ConnectionId,
        socket: Arc<TcpClientSocket>,
        registry: Arc<ConnectionRegistry<TcpClientSocket>>,
        queue: DispatchQueue,
        buffer_size: usize,
    ) -> Self {
        Self {
            id,
            socket,
            registry,
            queue,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Runs until the peer disconnects, a read fails, or the socket is
    /// closed locally.
    pub async fn run(self) {
        debug!("receiver for {} started", self.id);
        loop {
            let mut buf = vec![0u8; self.buffer_size];
            let read = tokio::select! {
                _ = self.socket.closed().cancelled() => {
                    debug!("connection {} closed locally; receiver exiting", self.id);
                    break;
                }
                read = self.socket.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    info!("client {} closed the connection", self.id);
                    self.registry.remove_if_current(&self.id, &self.socket);
                    break;
                }
                Ok(n) => {
                    if self.socket.is_closed() {
                        break;
                    }
                    buf.truncate(n);
                    self.registry.touch(&self.id, &self.socket);
                    debug!("received {n} bytes from {}", self.id);
                    self.queue.enqueue(DispatchItem::new(self.id.clone(), buf));

                    if !self.socket.is_connected() {
                        info!("client {} went away after sending data", self.id);
                        self.registry.remove_if_current(&self.id, &self.socket);
                        break;
                    }
                }
                Err(e) => {
                    warn!("read from {} failed: {e}", self.id);
                    self.registry.remove_if_current(&self.id, &self.socket);
                    break;
                }
            }
        }
        debug!("receiver for {} stopped", self.id);
    }
}

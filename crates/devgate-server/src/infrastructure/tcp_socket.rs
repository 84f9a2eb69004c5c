//! `TcpClientSocket`: a tokio `TcpStream` adapted to the `ClientSocket` port.
//!
//! # Shared access
//!
//! One socket is shared by its receiver (reading), the registry (probing and
//! closing) and any number of senders.  tokio's `TcpStream` supports all of
//! that through `&self` (`readable` + `try_read`, `writable` + `try_write`,
//! `peek`) except `shutdown`, which needs `&mut self`.  To close from `&self`
//! we keep a duplicated `std::net::TcpStream` handle referring to the same
//! OS socket and shut that one down instead.
//!
//! A local close also cancels [`TcpClientSocket::closed`], so the receiver
//! parked in `read` wakes immediately instead of waiting for the kernel.

use std::io;
use std::net::{Shutdown, SocketAddr};

use async_trait::async_trait;
use devgate_core::ConnectionId;
use futures_util::FutureExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::ports::ClientSocket;

/// An accepted client connection.
#[derive(Debug)]
pub struct TcpClientSocket {
    stream: TcpStream,
    /// Duplicate of the same OS socket, used only for `shutdown`.
    control: std::net::TcpStream,
    remote: SocketAddr,
    closed: CancellationToken,
    /// Serialises writers so concurrent sends never interleave bytes.
    write_lock: Mutex<()>,
}

impl TcpClientSocket {
    /// Wraps an accepted stream.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the peer address cannot be read or the OS refuses to
    /// duplicate the socket handle.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let remote = stream.peer_addr()?;
        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;
        Ok(Self {
            stream,
            control,
            remote,
            closed: CancellationToken::new(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Cancelled once the socket has been closed locally.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Reads whatever is available into `buf`.
    ///
    /// Returns `Ok(0)` once the peer has closed its side.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.stream.readable().await?;
            match self.stream.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut written = 0;
        while written < data.len() {
            self.stream.writable().await?;
            match self.stream.try_write(&data[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClientSocket for TcpClientSocket {
    fn remote_endpoint(&self) -> String {
        ConnectionId::from_addr(self.remote).into_string()
    }

    /// Polls a one-byte `peek` exactly once.
    ///
    /// - pending: nothing to read yet, the connection is idle but alive
    /// - `Ok(n > 0)`: data is waiting, alive
    /// - `Ok(0)`: orderly shutdown by the peer
    /// - error: reset or otherwise broken
    fn is_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe).now_or_never() {
            None => true,
            Some(Ok(n)) => n > 0,
            Some(Err(_)) => false,
        }
    }

    async fn send(&self, data: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.write_all(data).await
    }

    /// Idempotent: a second close is a no-op.
    fn close(&self) -> io::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.closed.cancel();
        debug!("closing connection to {}", self.remote);
        self.control.shutdown(Shutdown::Both)
    }
}

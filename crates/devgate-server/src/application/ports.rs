//! Ports the registry is written against.
//!
//! The production implementation of [`ClientSocket`] is
//! [`crate::infrastructure::tcp_socket::TcpClientSocket`]; unit tests use
//! in-memory fakes or the generated `MockClientSocket`.  [`Clock`] exists so
//! the idle sweep can be driven with a [`ManualClock`] instead of real time.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// A live client connection as seen by the registry.
///
/// Implementations must be safe to use from many tasks at once: the owning
/// receiver, the idle sweep, and broadcast/send callers all hold the same
/// `Arc<S>`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientSocket: Send + Sync + 'static {
    /// Remote endpoint rendered as `"ip:port"`.
    fn remote_endpoint(&self) -> String;

    /// Non-blocking liveness probe.
    ///
    /// Returns `false` once the peer has closed its side or the socket was
    /// closed locally.  Must not consume any pending inbound bytes.
    fn is_connected(&self) -> bool;

    /// Writes all of `data` to the peer.
    async fn send(&self, data: &[u8]) -> io::Result<()>;

    /// Shuts the connection down in both directions and releases it.
    ///
    /// Closing an already-closed socket may return an error; callers report
    /// it and carry on.
    fn close(&self) -> io::Result<()>;
}

/// Source of "now" for last-access timestamps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall-clock time via [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Starts at the instant it was created and advances in whole milliseconds.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_does_not_move_on_its_own() {
        let clock = ManualClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), a);
    }

    #[test]
    fn test_manual_clock_advance_moves_now_forward() {
        // Arrange
        let clock = ManualClock::new();
        let start = clock.now();

        // Act
        clock.advance(Duration::from_secs(61));

        // Assert
        assert_eq!(clock.now() - start, Duration::from_secs(61));
        assert_eq!(clock.elapsed(), Duration::from_secs(61));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}

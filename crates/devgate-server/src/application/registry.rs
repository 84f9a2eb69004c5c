//! ConnectionRegistry: the identifier → connection map with idle eviction.
//!
//! The registry is the only shared mutable structure in the gateway.  It is
//! a [`DashMap`] of `ConnectionId → Arc<ConnectionRecord>` and is touched
//! concurrently by:
//!
//! - the acceptor (registering freshly accepted sockets),
//! - every receiver (refreshing the timestamp after each read, removing the
//!   record when the peer goes away),
//! - the idle sweep (evicting silent connections),
//! - embedding-application calls (send, broadcast, remove, count).
//!
//! # Record replacement
//!
//! Records are immutable.  Refreshing a timestamp or swapping a socket builds
//! a new record and installs it with a guarded swap: the swap only succeeds if
//! the slot still holds the exact record that was read beforehand.  The read
//! and the swap are two separate map operations, so two concurrent upserts on
//! the same identifier can race; the loser's swap fails, its status reports
//! the failure, and nothing retries.  The caller may simply upsert again.
//!
//! # Notifications
//!
//! Every state change is reported on an unbounded [`RegistryEvent`] channel
//! handed out by [`ConnectionRegistry::new`]:
//!
//! ```text
//! first upsert of an id ─► DeviceOnline
//! evict / remove        ─► ConnectionRemoved + DeviceOffline
//! close/send failure    ─► OperationError
//! ```
//!
//! # Sending
//!
//! Every outbound send is bounded by the registry's send timeout.  A peer
//! that stops reading fails with [`std::io::ErrorKind::TimedOut`] instead of
//! holding the caller (or a whole broadcast) hostage.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use devgate_core::{
    idle_threshold_from_minutes, ConnectionId, RegistryEvent, DEFAULT_SEND_TIMEOUT_SECS,
};
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ports::{ClientSocket, Clock};

/// Errors returned by registry operations.
///
/// None of these are fatal; they describe why a single request could not be
/// carried out.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("client {id} not found")]
    NotFound { id: String },

    #[error("send to client {id} failed: {source}")]
    SendFailed {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// The socket could not be closed cleanly.  The record is removed anyway.
    #[error("closing client {id} failed: {source}")]
    CloseFailed {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of [`ConnectionRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    /// A previously unseen identifier was inserted.
    Added,
    /// Another caller inserted the identifier first.
    AddFailed,
    /// The stored socket was stale and has been swapped for the new one.
    Replaced,
    /// The slot changed between read and swap; nothing was replaced.
    ReplaceFailed,
    /// Same live socket; only the timestamp was refreshed.
    Touched,
    /// The slot changed between read and swap; the timestamp was not refreshed.
    TouchFailed,
}

impl UpsertStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Added | Self::Replaced | Self::Touched)
    }
}

impl fmt::Display for UpsertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Added => "connection added",
            Self::AddFailed => "connection add failed",
            Self::Replaced => "connection address updated",
            Self::ReplaceFailed => "connection address update failed",
            Self::Touched => "connection access time refreshed",
            Self::TouchFailed => "connection access time refresh failed",
        };
        f.write_str(text)
    }
}

/// One tracked connection.
#[derive(Debug)]
pub struct ConnectionRecord<S> {
    socket: Arc<S>,
    last_access: Instant,
    remote_endpoint: String,
}

impl<S: ClientSocket> ConnectionRecord<S> {
    fn new(socket: Arc<S>, last_access: Instant) -> Self {
        let remote_endpoint = socket.remote_endpoint();
        Self {
            socket,
            last_access,
            remote_endpoint,
        }
    }

    pub fn socket(&self) -> &Arc<S> {
        &self.socket
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn remote_endpoint(&self) -> &str {
        &self.remote_endpoint
    }
}

/// Thread-safe registry of live connections.
pub struct ConnectionRegistry<S: ClientSocket> {
    connections: DashMap<ConnectionId, Arc<ConnectionRecord<S>>>,
    idle_threshold: Duration,
    send_timeout: Duration,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<RegistryEvent>,
    disposed: AtomicBool,
    shutdown: CancellationToken,
}

impl<S: ClientSocket> ConnectionRegistry<S> {
    /// Creates an empty registry and the receiver for its events.
    ///
    /// `idle_minutes` is clamped to at least one minute.  The idle sweep is
    /// not started here; call [`spawn_idle_sweep`](Self::spawn_idle_sweep).
    pub fn new(
        idle_minutes: u32,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RegistryEvent>) {
        Self::with_send_timeout(
            idle_minutes,
            Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            clock,
        )
    }

    /// Same as [`new`](Self::new) with an explicit per-send deadline.
    pub fn with_send_timeout(
        idle_minutes: u32,
        send_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            connections: DashMap::new(),
            idle_threshold: idle_threshold_from_minutes(idle_minutes),
            send_timeout,
            clock,
            events: tx,
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        (registry, rx)
    }

    /// Registers `socket` under `id`, or refreshes the existing record.
    ///
    /// - Unknown `id`: inserted, `DeviceOnline` raised.
    /// - Known `id` whose stored socket is dead or is a different socket: the
    ///   stored socket is closed (failures reported, not returned) and the
    ///   record is swapped for one holding `socket`.
    /// - Known `id` with the same live socket: the record is swapped for one
    ///   with a fresh timestamp.
    ///
    /// Swaps lose to concurrent writers without retrying; see the module docs.
    pub fn upsert(&self, id: &ConnectionId, socket: Arc<S>) -> UpsertStatus {
        let status = match self.record(id.as_str()) {
            None => self.insert_new(id, socket),
            Some(current) => {
                let same_live_socket =
                    Arc::ptr_eq(&current.socket, &socket) && current.socket.is_connected();
                if same_live_socket {
                    let touched = self.fresh_record(Arc::clone(&current.socket));
                    if self.replace(id, &current, touched) {
                        UpsertStatus::Touched
                    } else {
                        UpsertStatus::TouchFailed
                    }
                } else {
                    if let Err(e) = current.socket.close() {
                        self.report_error(format!(
                            "failed to close replaced connection {id}: {e}"
                        ));
                    }
                    if self.replace(id, &current, self.fresh_record(socket)) {
                        UpsertStatus::Replaced
                    } else {
                        UpsertStatus::ReplaceFailed
                    }
                }
            }
        };

        if status.is_success() {
            debug!("client [{id}] {status}");
        } else {
            warn!("client [{id}] {status}");
        }
        status
    }

    /// Refreshes the timestamp of `id` if its record still holds `socket`.
    ///
    /// Never inserts: if the record was evicted, removed or replaced in the
    /// meantime, nothing changes and `false` is returned.
    pub fn touch(&self, id: &ConnectionId, socket: &Arc<S>) -> bool {
        match self.connections.get_mut(id.as_str()) {
            Some(mut slot) if Arc::ptr_eq(&slot.value().socket, socket) => {
                *slot = self.fresh_record(Arc::clone(socket));
                true
            }
            _ => {
                debug!("client [{id}] no longer tracked; refresh skipped");
                false
            }
        }
    }

    fn insert_new(&self, id: &ConnectionId, socket: Arc<S>) -> UpsertStatus {
        match self.connections.entry(id.clone()) {
            Entry::Vacant(slot) => {
                let _held = slot.insert(self.fresh_record(socket));
                // Raised under the shard lock so it always precedes the
                // matching DeviceOffline.
                self.emit(RegistryEvent::DeviceOnline {
                    client_id: id.clone(),
                });
                info!("client [{id}] online");
                UpsertStatus::Added
            }
            Entry::Occupied(_) => UpsertStatus::AddFailed,
        }
    }

    /// Installs `new` only if the slot still holds `expected`.
    fn replace(
        &self,
        id: &ConnectionId,
        expected: &Arc<ConnectionRecord<S>>,
        new: Arc<ConnectionRecord<S>>,
    ) -> bool {
        match self.connections.get_mut(id.as_str()) {
            Some(mut slot) if Arc::ptr_eq(slot.value(), expected) => {
                *slot = new;
                true
            }
            _ => false,
        }
    }

    fn fresh_record(&self, socket: Arc<S>) -> Arc<ConnectionRecord<S>> {
        Arc::new(ConnectionRecord::new(socket, self.clock.now()))
    }

    // ── Eviction ──────────────────────────────────────────────────────────────

    /// Evicts every connection silent for longer than the idle threshold.
    ///
    /// Works on a snapshot of the identifiers, so connections registered
    /// while the sweep runs are left for the next pass.  Returns the number
    /// of connections torn down.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        for id in self.ids() {
            let Some(record) = self.record(id.as_str()) else {
                continue;
            };
            let silent_for = now.saturating_duration_since(record.last_access);
            if silent_for > self.idle_threshold {
                info!("client [{id}] idle for {silent_for:?}; evicting");
                if let Err(e) = record.socket.close() {
                    self.report_error(format!("failed to close idle connection {id}: {e}"));
                }
                self.remove_record(&id, &record);
                evicted += 1;
            }
        }
        evicted
    }

    /// Spawns the periodic idle sweep.
    ///
    /// The loop evicts, then sleeps for the idle threshold, and exits as soon
    /// as the registry is disposed.
    pub fn spawn_idle_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "idle sweep started (threshold {:?})",
                registry.idle_threshold
            );
            loop {
                let evicted = registry.evict_idle();
                if evicted > 0 {
                    debug!("idle sweep evicted {evicted} connection(s)");
                }
                tokio::select! {
                    _ = registry.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(registry.idle_threshold) => {}
                }
            }
            debug!("idle sweep stopped");
        })
    }

    // ── Removal ───────────────────────────────────────────────────────────────

    /// Closes and removes the connection registered under `id`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if `id` is not tracked; nothing changes.
    /// - [`RegistryError::CloseFailed`] if the socket could not be closed
    ///   cleanly.  The record is still removed and `DeviceOffline` raised.
    pub fn remove_connection(&self, id: &str) -> Result<String, RegistryError> {
        let record = self.record(id).ok_or_else(|| RegistryError::NotFound {
            id: id.to_string(),
        })?;
        let id = ConnectionId::from(id);

        let closed = record.socket.close();
        if let Err(e) = &closed {
            self.report_error(format!("failed to close connection {id}: {e}"));
        }
        self.remove_record(&id, &record);

        match closed {
            Ok(()) => Ok(format!("client {id} removed")),
            Err(source) => Err(RegistryError::CloseFailed {
                id: id.into_string(),
                source,
            }),
        }
    }

    /// Tears down `id` only if its record still holds `socket`.
    ///
    /// Used by a receiver whose peer went away: if the identifier has since
    /// been re-registered with a different socket, the newer record is left
    /// alone.  Returns whether anything was removed.
    pub fn remove_if_current(&self, id: &ConnectionId, socket: &Arc<S>) -> bool {
        let Some(record) = self.record(id.as_str()) else {
            return false;
        };
        if !Arc::ptr_eq(&record.socket, socket) {
            return false;
        }
        if let Err(e) = record.socket.close() {
            debug!("closing dead connection {id}: {e}");
        }
        self.remove_record(id, &record)
    }

    /// Erases the map entry if it still holds `record`'s socket and raises
    /// the removal notifications.  `DeviceOffline` is only raised by the
    /// caller that actually erased the entry.
    fn remove_record(&self, id: &ConnectionId, record: &Arc<ConnectionRecord<S>>) -> bool {
        let removed = self
            .connections
            .remove_if(id.as_str(), |_, current| {
                Arc::ptr_eq(&current.socket, &record.socket)
            })
            .is_some();

        let message = if removed {
            format!("client [{id}] disconnected")
        } else {
            format!("client [{id}] removal failed")
        };
        info!("{message} (remote {})", record.remote_endpoint);
        self.emit(RegistryEvent::ConnectionRemoved {
            message,
            remote_endpoint: record.remote_endpoint.clone(),
        });
        if removed {
            self.emit(RegistryEvent::DeviceOffline {
                client_id: id.clone(),
            });
        }
        removed
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Sends `data` to every tracked connection.
    ///
    /// Sends run concurrently over a snapshot of the registry.  A failure on
    /// one connection is reported as `OperationError` and does not affect the
    /// others.  Returns the number of successful deliveries.
    pub async fn broadcast(&self, data: &[u8]) -> usize {
        let targets: Vec<(ConnectionId, Arc<S>)> = self
            .connections
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.value().socket)))
            .collect();

        let results =
            join_all(targets.iter().map(|(_, socket)| self.send_bounded(socket, data))).await;

        let mut delivered = 0;
        for ((id, _), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => self.report_error(format!("broadcast to {id} failed: {e}")),
            }
        }
        debug!("broadcast {} bytes to {delivered}/{} client(s)", data.len(), targets.len());
        delivered
    }

    /// Sends `data` to the connection registered under `id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for an unknown `id`,
    /// [`RegistryError::SendFailed`] if the write fails or outlasts the send
    /// timeout (source kind `TimedOut`).
    pub async fn send_to(&self, id: &str, data: &[u8]) -> Result<String, RegistryError> {
        let socket = self
            .connections
            .get(id)
            .map(|entry| Arc::clone(&entry.value().socket))
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;

        self.send_bounded(&socket, data)
            .await
            .map_err(|source| RegistryError::SendFailed {
                id: id.to_string(),
                source,
            })?;
        Ok(format!("client {id}: {} bytes sent", data.len()))
    }

    async fn send_bounded(&self, socket: &S, data: &[u8]) -> std::io::Result<()> {
        match tokio::time::timeout(self.send_timeout, socket.send(data)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("send timed out after {:?}", self.send_timeout),
            )),
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Number of tracked connections at the moment of the call.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Snapshot of the tracked identifiers.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// The current record for `id`, if any.
    pub fn record(&self, id: &str) -> Option<Arc<ConnectionRecord<S>>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Stops the idle sweep.  Tracked connections are left untouched.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!("registry disposed");
        }
        self.shutdown.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Closes and removes every tracked connection.
    ///
    /// Returns the number of connections torn down.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for id in self.ids() {
            if let Some(record) = self.record(id.as_str()) {
                if let Err(e) = record.socket.close() {
                    self.report_error(format!("failed to close connection {id}: {e}"));
                }
                self.remove_record(&id, &record);
                closed += 1;
            }
        }
        closed
    }

    fn report_error(&self, message: String) {
        warn!("{message}");
        self.emit(RegistryEvent::OperationError { message });
    }

    fn emit(&self, event: RegistryEvent) {
        // The receiver may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Notifications raised by the gateway.
//!
//! Two layers of events exist:
//!
//! - [`RegistryEvent`] is what the connection registry raises internally while
//!   inserting, replacing, evicting and removing records.
//! - [`ServerEvent`] is the single outward stream the embedding application
//!   consumes.  The server facade converts every registry event into one, and
//!   adds `Connected` notifications from the acceptor.
//!
//! Received payloads never travel on this stream; they go through the
//! dispatch queue instead.

use std::fmt;

use super::connection::ConnectionId;

/// Discriminant of a [`ServerEvent`], handy for filtering and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Online,
    Offline,
    Error,
    Other,
}

/// Outward notification delivered to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The acceptor completed a new TCP connection.
    Connected { client_id: ConnectionId },
    /// A previously unseen identifier was registered.
    Online { client_id: ConnectionId },
    /// A tracked identifier was removed (idle sweep, explicit removal, or a
    /// closed peer).
    Offline { client_id: ConnectionId },
    /// A non-fatal failure inside the gateway (close or send failure).
    Error { message: String },
    /// Anything else; removal results are reported here keyed by the
    /// remote endpoint.
    Other { client_id: String, message: String },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connected { .. } => EventKind::Connected,
            ServerEvent::Online { .. } => EventKind::Online,
            ServerEvent::Offline { .. } => EventKind::Offline,
            ServerEvent::Error { .. } => EventKind::Error,
            ServerEvent::Other { .. } => EventKind::Other,
        }
    }

    /// The connection identifier the event refers to, if any.
    pub fn client_id(&self) -> Option<&str> {
        match self {
            ServerEvent::Connected { client_id }
            | ServerEvent::Online { client_id }
            | ServerEvent::Offline { client_id } => Some(client_id.as_str()),
            ServerEvent::Other { client_id, .. } => Some(client_id.as_str()),
            ServerEvent::Error { .. } => None,
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Connected { client_id } => write!(f, "client {client_id} connected"),
            ServerEvent::Online { client_id } => write!(f, "client {client_id} online"),
            ServerEvent::Offline { client_id } => write!(f, "client {client_id} offline"),
            ServerEvent::Error { message } => f.write_str(message),
            ServerEvent::Other { message, .. } => f.write_str(message),
        }
    }
}

/// Events raised by the connection registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A record was torn down.  `message` states whether the map entry was
    /// actually removed; `remote_endpoint` is the endpoint captured from the
    /// record before its socket was closed.
    ConnectionRemoved {
        message: String,
        remote_endpoint: String,
    },
    /// A close or send failed; the registry carried on.
    OperationError { message: String },
    DeviceOnline { client_id: ConnectionId },
    DeviceOffline { client_id: ConnectionId },
}

impl From<RegistryEvent> for ServerEvent {
    fn from(event: RegistryEvent) -> Self {
        match event {
            RegistryEvent::ConnectionRemoved {
                message,
                remote_endpoint,
            } => ServerEvent::Other {
                message: format!("client {remote_endpoint}: {message}"),
                client_id: remote_endpoint,
            },
            RegistryEvent::OperationError { message } => ServerEvent::Error { message },
            RegistryEvent::DeviceOnline { client_id } => ServerEvent::Online { client_id },
            RegistryEvent::DeviceOffline { client_id } => ServerEvent::Offline { client_id },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

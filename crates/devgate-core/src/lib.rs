//! # devgate-core
//!
//! Shared types for the devgate TCP device gateway.
//!
//! The gateway accepts many raw-byte device connections, keeps track of which
//! ones are still alive, and hands every inbound payload to the embedding
//! application.  This crate holds the pieces of that system that do not touch
//! a socket or an async runtime:
//!
//! - **`domain::config`** – listener/registry settings and TOML loading.
//! - **`domain::connection`** – the `"ip:port"` connection identifier.
//! - **`domain::events`** – notifications emitted by the registry and the
//!   server facade.
//! - **`domain::dispatch`** – the immutable `{id, payload}` item that travels
//!   through the dispatch queue.
//! - **`encoding`** – text-to-bytes conversion for the text send overloads.
//!
//! The gateway imposes no framing on the byte stream; turning bytes into
//! messages is the embedding application's job.

pub mod domain;
pub mod encoding;

pub use domain::config::{
    idle_threshold_from_minutes, load_config, parse_config, AppConfig, ConfigError, LoggingConfig,
    ServerConfig, ACCEPT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_MINUTES, DEFAULT_PORT,
    DEFAULT_SEND_TIMEOUT_SECS,
};
pub use domain::connection::ConnectionId;
pub use domain::dispatch::DispatchItem;
pub use domain::events::{EventKind, RegistryEvent, ServerEvent};
pub use encoding::TextEncoding;

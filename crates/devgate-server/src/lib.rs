//! devgate-server library crate.
//!
//! The concurrency engine of the device gateway:
//!
//! ```text
//! TcpListener ──accept (one at a time)──► Acceptor
//!                                           │ upsert(id, socket)
//!                                           ▼
//!                                   ConnectionRegistry ◄── idle sweep
//!                                           ▲  (DashMap)    remove_client
//!                                           │ touch
//!                              Receiver (one per connection)
//!                                           │ enqueue {id, bytes}
//!                                           ▼
//!                                    DispatchQueue ──► DataHandler
//! ```
//!
//! # Layers
//!
//! - `application` – the registry, the dispatch queue, and the ports
//!   (`ClientSocket`, `Clock`) they depend on.  No `tokio::net` in here.
//! - `infrastructure` – the tokio TCP adapter, the acceptor and the
//!   per-connection receiver.
//! - `server` – the [`GatewayServer`] facade the embedding application talks to.

pub mod application;
pub mod infrastructure;
pub mod server;

pub use application::dispatch_queue::{dispatch_queue, DataHandler, DispatchConsumer, DispatchQueue};
pub use application::ports::{ClientSocket, Clock, ManualClock, SystemClock};
pub use application::registry::{ConnectionRegistry, RegistryError, UpsertStatus};
pub use infrastructure::tcp_socket::TcpClientSocket;
pub use server::{GatewayServer, ServerError};

pub use devgate_core::{
    ConnectionId, DispatchItem, EventKind, ServerConfig, ServerEvent, TextEncoding,
};

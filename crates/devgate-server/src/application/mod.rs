//! Application layer of the gateway.
//!
//! # Sub-modules
//!
//! - **`ports`** – traits the registry depends on: [`ports::ClientSocket`]
//!   abstracts a live connection, [`ports::Clock`] abstracts "now" so idle
//!   eviction can be tested without waiting real minutes.
//!
//! - **`registry`** – the concurrent identifier → connection map with idle
//!   eviction, broadcast, point-to-point send and online/offline signalling.
//!
//! - **`dispatch_queue`** – the FIFO that decouples the per-connection
//!   receivers from the single data handler.
//!
//! Nothing here opens sockets; the infrastructure layer plugs real TCP
//! streams into the `ClientSocket` port.

pub mod dispatch_queue;
pub mod ports;
pub mod registry;

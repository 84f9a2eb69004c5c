//! Domain layer for devgate.
//!
//! Pure types only: nothing in here opens a socket, spawns a task or sleeps.
//! The server crate builds its registry, acceptor and receivers on top of
//! these definitions.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod events;

//! Infrastructure layer of the gateway.
//!
//! Contains the OS-facing adapters: the tokio TCP stream wrapped as a
//! [`ClientSocket`](crate::application::ports::ClientSocket), the accept
//! loop, and the per-connection receive loop.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `devgate_core`, but MUST NOT be imported by the `application` layer.

pub mod acceptor;
pub mod receiver;
pub mod tcp_socket;

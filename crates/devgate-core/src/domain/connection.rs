//! Connection identifiers.

use std::borrow::Borrow;
use std::fmt;
use std::net::SocketAddr;

/// Registry key for a connection: its remote endpoint rendered as `"ip:port"`.
///
/// Two sockets from the same remote endpoint share an identifier, which is
/// how the registry notices that a device reconnected from the same port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Builds the identifier for a remote endpoint.
    ///
    /// Uses the `SocketAddr` display form, so IPv6 hosts are bracketed
    /// (`[::1]:9000`).  Socket adapters render their remote endpoint through
    /// this function too, so both strings always agree.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        Self::from_addr(addr)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets the registry map be queried with a plain `&str`.
impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! The unit of work carried by the dispatch queue.

use super::connection::ConnectionId;

/// One received payload, tagged with the connection it arrived on.
///
/// Items are immutable once built; the dispatch consumer hands them to the
/// data handler exactly as the receiver produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchItem {
    client_id: ConnectionId,
    payload: Vec<u8>,
}

impl DispatchItem {
    pub fn new(client_id: ConnectionId, payload: Vec<u8>) -> Self {
        Self { client_id, payload }
    }

    /// Identifier of the connection the bytes were read from.
    pub fn client_id(&self) -> &ConnectionId {
        &self.client_id
    }

    /// The bytes exactly as read from the socket.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_parts(self) -> (ConnectionId, Vec<u8>) {
        (self.client_id, self.payload)
    }
}

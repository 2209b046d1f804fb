//! Transport abstraction layer for Shardlink.
//!
//! The session core never blocks on I/O. It talks to the network through
//! the [`Transport`] trait, which has exactly two operations: queue some
//! bytes for a connection, and drain whatever has arrived since the last
//! call. Anything asynchronous (sockets, reconnects, framing of the
//! underlying stream) lives behind that trait.
//!
//! Two implementations ship with this crate:
//!
//! - [`LoopbackTransport`]: an in-memory queue pair. Tests and demos push
//!   inbound frames into it and inspect what the session sent.
//! - [`WebSocketTransport`] (feature `websocket`, on by default): a client
//!   that keeps one WebSocket per server connection, with background tasks
//!   doing the actual reads and writes.

mod error;
mod loopback;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use loopback::LoopbackTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use std::fmt;

/// Opaque identifier for a connection.
///
/// A client may hold several connections at once (one per server it talks
/// to). Ordering is only guaranteed within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A non-blocking, message-oriented transport.
///
/// Both methods must return promptly. `send` queues; it does not wait for
/// the bytes to leave the machine. `poll_received` returns only what is
/// already buffered, in arrival order per connection.
pub trait Transport {
    /// Queues one frame for delivery on `connection`.
    ///
    /// # Errors
    /// [`TransportError::UnknownConnection`] if the id was never opened, or
    /// [`TransportError::ConnectionClosed`] if it has since gone away.
    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError>;

    /// Drains every frame received since the previous call.
    fn poll_received(&mut self) -> Vec<(ConnectionId, Vec<u8>)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "game");
        map.insert(ConnectionId::new(2), "auth");
        assert_eq!(map[&ConnectionId::new(1)], "game");
    }
}

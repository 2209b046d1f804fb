//! In-memory transport.
//!
//! Nothing leaves the process: inbound frames are whatever the owner pushes
//! with [`LoopbackTransport::push_inbound`], and outbound frames pile up
//! until [`LoopbackTransport::take_sent`] collects them.

use std::collections::{HashSet, VecDeque};

use crate::{ConnectionId, Transport, TransportError};

/// A [`Transport`] backed by two in-memory queues.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inbound: VecDeque<(ConnectionId, Vec<u8>)>,
    sent: Vec<(ConnectionId, Vec<u8>)>,
    closed: HashSet<ConnectionId>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame as if it had arrived on `connection`.
    pub fn push_inbound(&mut self, connection: ConnectionId, data: impl Into<Vec<u8>>) {
        self.inbound.push_back((connection, data.into()));
    }

    /// Takes every frame sent so far, oldest first.
    pub fn take_sent(&mut self) -> Vec<(ConnectionId, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }

    /// Frames sent so far, without taking them.
    pub fn sent(&self) -> &[(ConnectionId, Vec<u8>)] {
        &self.sent
    }

    /// Makes every later `send` on `connection` fail.
    pub fn close(&mut self, connection: ConnectionId) {
        self.closed.insert(connection);
    }

    /// Undoes [`LoopbackTransport::close`].
    pub fn reopen(&mut self, connection: ConnectionId) {
        self.closed.remove(&connection);
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.contains(&connection) {
            return Err(TransportError::ConnectionClosed(connection));
        }
        tracing::trace!(%connection, len = data.len(), "loopback send");
        self.sent.push((connection, data.to_vec()));
        Ok(())
    }

    fn poll_received(&mut self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.inbound.drain(..).collect()
    }
}

use crate::ConnectionId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed by either side.
    #[error("connection {0} closed")]
    ConnectionClosed(ConnectionId),

    /// No connection with this id was ever opened on this transport.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Opening a connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),
}

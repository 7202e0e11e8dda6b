//! Transport abstraction for sync frames.
//!
//! The protocol only needs an ordered, reliable, bidirectional byte channel
//! per connection. Framing, encryption and connection management belong to
//! the transport implementation.
//!
//! A connection uses two transports: one carrying request/response pairs,
//! one carrying server notifications.
//!
//! # Available Transports
//!
//! - [`ChannelTransport`]: In-process channel pair, useful for tests and for
//!   embedding the server in the same process

use bytes::Bytes;
use std::future::Future;

/// Transport trait for exchanging sync frames.
///
/// # Example
///
/// ```ignore
/// use windowed_sync::Transport;
///
/// struct WsTransport {
///     socket: WebSocket,
/// }
///
/// impl Transport for WsTransport {
///     type Error = WsError;
///
///     async fn send(&self, data: Bytes) -> Result<(), Self::Error> {
///         self.socket.send_binary(data).await
///     }
///
///     async fn recv(&self) -> Result<Bytes, Self::Error> {
///         self.socket.next_binary().await
///     }
/// }
/// ```
#[auto_impl::auto_impl(Box, Arc)]
pub trait Transport: Send + Sync + 'static {
    /// Error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send one frame to the other end.
    fn send(&self, data: Bytes) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Wait for the next frame from the other end.
    fn recv(&self) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;
}

/// One end of an in-process bidirectional channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: async_channel::Sender<Bytes>,
    rx: async_channel::Receiver<Bytes>,
}

impl ChannelTransport {
    /// Create both ends of a connection, each direction bounded by `capacity`.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = async_channel::bounded(capacity);
        let (b_tx, a_rx) = async_channel::bounded(capacity);
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }

    /// Close both directions; pending and future calls on either end fail.
    pub fn close(&self) {
        self.tx.close();
        self.rx.close();
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Error type for channel transport.
#[derive(Debug, Clone)]
pub struct ChannelTransportError(pub String);

impl std::fmt::Display for ChannelTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel transport error: {}", self.0)
    }
}

impl std::error::Error for ChannelTransportError {}

impl Transport for ChannelTransport {
    type Error = ChannelTransportError;

    async fn send(&self, data: Bytes) -> Result<(), Self::Error> {
        self.tx
            .send(data)
            .await
            .map_err(|e| ChannelTransportError(e.to_string()))
    }

    async fn recv(&self) -> Result<Bytes, Self::Error> {
        self.rx
            .recv()
            .await
            .map_err(|e| ChannelTransportError(e.to_string()))
    }
}

//! Transport trait abstraction for pluggable link backends

use super::TransportError;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream to one remote device
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Stream handed out by a connector, owned by exactly one session
pub type BoxedStream = Box<dyn TransportStream>;

/// Factory for opening links to devices by address
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Attempt to connect to `address`, returning a stream on success
    async fn connect(&self, address: &str) -> Result<BoxedStream, TransportError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

//! TCP transport for talking to the simulated sensor during development

use crate::transport::traits::{BoxedStream, TransportConnector};
use crate::transport::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// TCP connector; device addresses are `host:port`
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<BoxedStream, TransportError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::connect(address, "timed out"))?
            .map_err(|e| TransportError::connect(address, e))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}

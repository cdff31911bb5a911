//! Serial transport for an SPP link already bound to a tty (e.g. `/dev/rfcomm0`)

use crate::transport::traits::{BoxedStream, TransportConnector};
use crate::transport::TransportError;
use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// Baud rate HC-05/HC-06 modules ship with
pub const DEFAULT_BAUD: u32 = 9600;

/// Serial connector; device addresses are tty paths
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud: u32,
}

impl SerialConnector {
    pub fn new(baud: u32) -> Self {
        Self { baud }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD)
    }
}

#[async_trait]
impl TransportConnector for SerialConnector {
    async fn connect(&self, address: &str) -> Result<BoxedStream, TransportError> {
        let port = tokio_serial::new(address, self.baud)
            .open_native_async()
            .map_err(|e| TransportError::connect(address, e))?;
        info!("[Serial] Opened {} at {} baud", address, self.baud);
        Ok(Box::new(port))
    }

    fn name(&self) -> &'static str {
        "Serial"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tty_is_connect_error() {
        let err = SerialConnector::default()
            .connect("/dev/carwatch-does-not-exist")
            .await
            .err()
            .expect("should fail");
        assert!(err.is_connect());
    }
}

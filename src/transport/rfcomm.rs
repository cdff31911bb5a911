//! RFCOMM transport for Bluetooth SPP sensor modules

use crate::transport::traits::{BoxedStream, TransportConnector};
use crate::transport::TransportError;
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::Address;
use carwatch_shared::defaults::RFCOMM_CHANNEL;
use tracing::{debug, info};

/// RFCOMM connector for paired SPP devices
#[derive(Debug, Clone)]
pub struct RfcommConnector {
    /// RFCOMM channel number
    channel: u8,
}

impl RfcommConnector {
    /// Create a new RFCOMM connector on the given channel
    pub fn new(channel: u8) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl Default for RfcommConnector {
    fn default() -> Self {
        Self::new(RFCOMM_CHANNEL)
    }
}

/// Parse a `AA:BB:CC:DD:EE:FF` device address
pub fn parse_address(address: &str) -> Result<Address, TransportError> {
    address
        .parse::<Address>()
        .map_err(|e| TransportError::connect(address, e))
}

#[async_trait]
impl TransportConnector for RfcommConnector {
    async fn connect(&self, address: &str) -> Result<BoxedStream, TransportError> {
        let target = parse_address(address)?;
        let socket_addr = RfcommAddr::new(target, self.channel);
        debug!("[BT] Connecting to {} channel {}", target, self.channel);

        let stream = RfcommStream::connect(socket_addr)
            .await
            .map_err(|e| TransportError::connect(address, e))?;

        info!("[BT] Connected to {}", target);
        Ok(Box::new(stream))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

//! Sensor link transports
//!
//! This module handles:
//! - Opening a byte stream to one device (RFCOMM, serial tty, TCP simulation)
//! - Line framing on top of that stream
//! - Looking up paired devices by name or address

pub mod directory;
mod error;
pub mod link;
pub mod rfcomm;
pub mod serial;
pub mod tcp;
pub mod traits;

pub use directory::{
    pick_default, AdapterStatus, BluerDirectory, DeviceDirectory, PairedDevice, StaticDirectory,
};
pub use error::TransportError;
pub use link::LineLink;
pub use rfcomm::RfcommConnector;
pub use serial::SerialConnector;
pub use tcp::TcpConnector;
pub use traits::{BoxedStream, TransportConnector, TransportStream};

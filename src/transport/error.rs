use carwatch_shared::codec::LineError;
use thiserror::Error;

/// Failures on the sensor link.
///
/// Observers only ever see a `disconnected` event; the variant is for logs.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link closed by peer ({pending} bytes without terminator)")]
    Closed { pending: usize },

    #[error("protocol error: {0}")]
    Line(#[from] LineError),
}

impl TransportError {
    pub fn connect(address: &str, reason: impl ToString) -> Self {
        Self::Connect {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the link never came up
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

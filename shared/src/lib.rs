//! carwatch Shared Types
//!
//! This crate provides the pieces of carwatch that do no I/O: the lifecycle
//! events broadcast to observers, the line codec spoken by the door sensor,
//! and the estimator that turns readings into a closed/not-closed verdict.

pub mod codec;
pub mod estimator;
pub mod event;

use std::time::{SystemTime, UNIX_EPOCH};

pub use estimator::{boost_for_elapsed, Estimator, Verdict, UNKNOWN_CONFIDENCE};
pub use event::{EventKind, LifecycleEvent};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Defaults shared by the daemon and the simulator
pub mod defaults {
    /// Alarm threshold used when the user never picked one
    pub const MINIMUM_THRESHOLD: i32 = 40;

    /// Sensor modules tried, in order, when no default device is saved
    pub const DEVICE_NAMES: &[&str] = &["HC-05", "HC-06"];

    /// Serial Port Profile service class
    pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805f9b34fb";

    /// RFCOMM channel the SPP modules listen on
    pub const RFCOMM_CHANNEL: u8 = 1;

    /// Longest reading accepted before a terminator must appear
    pub const MAX_LINE_LEN: usize = 1024;

    /// Notification raised when the car was probably left open
    pub const ALERT_TITLE: &str = "carwatch";
    pub const ALERT_BODY: &str = "Looks like you did not close your car!";
}

//! Lifecycle events broadcast to observers

use std::fmt;

/// Discriminant of a [`LifecycleEvent`], used to filter subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TelemetryReceived,
    Connecting,
    Connected,
    Disconnected,
    DeviceNotFound,
    BluetoothDisabled,
    NoDevicesPaired,
    CarClosed,
    CarNotClosed,
    ApplicationStopped,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::TelemetryReceived,
        EventKind::Connecting,
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::DeviceNotFound,
        EventKind::BluetoothDisabled,
        EventKind::NoDevicesPaired,
        EventKind::CarClosed,
        EventKind::CarNotClosed,
        EventKind::ApplicationStopped,
    ];

    /// Bit used by subscription filters
    pub fn bit(self) -> u16 {
        1 << self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::TelemetryReceived => "telemetry-received",
            EventKind::Connecting => "connecting",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::DeviceNotFound => "device-not-found",
            EventKind::BluetoothDisabled => "bluetooth-disabled",
            EventKind::NoDevicesPaired => "no-devices-paired",
            EventKind::CarClosed => "car-closed",
            EventKind::CarNotClosed => "car-not-closed",
            EventKind::ApplicationStopped => "application-stopped",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A state change published on the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Raw line read from the sensor, forwarded whether or not it parsed
    TelemetryReceived { raw: String },
    /// Opening the link to a device
    Connecting { address: String },
    /// Link open, readings will follow
    Connected { address: String },
    /// Session over, for whatever reason
    Disconnected { address: String },
    /// Requested or default device is not among the paired ones
    DeviceNotFound { query: String },
    /// Bluetooth adapter missing or powered off
    BluetoothDisabled,
    /// Adapter has no paired devices at all
    NoDevicesPaired,
    /// Car probably closed, with the boosted confidence
    CarClosed { confidence: i32 },
    /// Car probably left open, with the last confidence
    CarNotClosed { confidence: i32 },
    /// Background service exited
    ApplicationStopped,
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::TelemetryReceived { .. } => EventKind::TelemetryReceived,
            LifecycleEvent::Connecting { .. } => EventKind::Connecting,
            LifecycleEvent::Connected { .. } => EventKind::Connected,
            LifecycleEvent::Disconnected { .. } => EventKind::Disconnected,
            LifecycleEvent::DeviceNotFound { .. } => EventKind::DeviceNotFound,
            LifecycleEvent::BluetoothDisabled => EventKind::BluetoothDisabled,
            LifecycleEvent::NoDevicesPaired => EventKind::NoDevicesPaired,
            LifecycleEvent::CarClosed { .. } => EventKind::CarClosed,
            LifecycleEvent::CarNotClosed { .. } => EventKind::CarNotClosed,
            LifecycleEvent::ApplicationStopped => EventKind::ApplicationStopped,
        }
    }

    /// Payload rendered as text, the way observers display it
    pub fn payload(&self) -> Option<String> {
        match self {
            LifecycleEvent::TelemetryReceived { raw } => Some(raw.clone()),
            LifecycleEvent::Connecting { address }
            | LifecycleEvent::Connected { address }
            | LifecycleEvent::Disconnected { address } => Some(address.clone()),
            LifecycleEvent::DeviceNotFound { query } => Some(query.clone()),
            LifecycleEvent::CarClosed { confidence }
            | LifecycleEvent::CarNotClosed { confidence } => Some(confidence.to_string()),
            LifecycleEvent::BluetoothDisabled
            | LifecycleEvent::NoDevicesPaired
            | LifecycleEvent::ApplicationStopped => None,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload() {
            Some(payload) => write!(f, "{}({})", self.kind(), payload),
            None => write!(f, "{}", self.kind()),
        }
    }
}

//! Lifecycle event distribution
//!
//! Carries connection, telemetry and verdict events from the connection
//! worker and the background service to any number of observers.

mod event_bus;

pub use event_bus::{EventBus, EventFilter, SubscriptionId};

//! Sensor connection management
//!
//! This module handles:
//! - Running one link session on its own task
//! - Forwarding each received line as a telemetry event
//! - Stopping sessions within a bounded grace period
//! - Announcing every session end with a single disconnect event

mod worker;

pub use worker::{ConnectionWorker, SessionPhase};

//! Background monitoring service
//!
//! This module handles:
//! - Executing connect, disconnect and stop commands
//! - Feeding telemetry into the closure estimator
//! - Turning each session end into a closed/not-closed verdict
//! - Alerting the user and persisting their preferences

pub mod notifier;
pub mod preferences;
#[allow(clippy::module_inception)]
mod service;

pub use notifier::{LogNotifier, NotificationRecord, Notifier, RecordedNotifier};
pub use preferences::{FilePreferences, PreferenceStore, Preferences, PreferencesError, StaticPreferences};
pub use service::{
    BackgroundService, Collaborators, ServiceCommand, ServiceConfig, ServiceHandle, ServiceState,
    ServiceStatus,
};

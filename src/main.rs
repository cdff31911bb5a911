mod bus;
mod config;
mod connection;
mod service;
mod transport;

use anyhow::Result;
use bus::EventFilter;
use carwatch_shared::LifecycleEvent;
use config::{MonitorConfig, CONFIG_ENV};
use service::{
    BackgroundService, Collaborators, FilePreferences, LogNotifier, NotificationRecord,
    RecordedNotifier, ServiceCommand, ServiceHandle,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os(CONFIG_ENV))
        .map(PathBuf::from);
    let config = MonitorConfig::load(config_path.as_deref())?;

    info!("carwatch starting");
    info!("  Transport: {}", config.transport);
    info!("  Data dir: {}", config.data_dir()?.display());

    let preferences = Arc::new(config.preferences()?);
    let record = config.notification_record()?;
    if record.is_marked() {
        warn!("An alert from a previous run is still pending (\"clear\" to dismiss)");
    }

    let collaborators = Collaborators {
        directory: config.build_directory(),
        preferences: preferences.clone(),
        notifier: Arc::new(RecordedNotifier::new(LogNotifier, record.clone())),
    };
    let (service, handle) =
        BackgroundService::new(config.build_connector(), collaborators, config.service_config());

    // Observer registered before the service runs so startup events are seen
    let (_, events) = handle.subscribe_channel(EventFilter::all());
    tokio::spawn(log_events(events));

    let service_task = tokio::spawn(service.run(config.device.clone()));

    let console_handle = handle.clone();
    let console = tokio::spawn(async move {
        run_console(console_handle, preferences, record).await;
    });

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Interrupted, stopping");
        signal_handle.stop_service();
    });

    if let Err(e) = service_task.await {
        error!("Service task failed: {}", e);
    }
    console.abort();
    info!("carwatch stopped");
    Ok(())
}

/// `RUST_LOG` directives when given and valid, `info` otherwise
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Commands accepted on stdin
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Service(ServiceCommand),
    Status,
    SetThreshold(i32),
    SaveDefault(Option<String>),
    ClearAlert,
    Help,
}

const HELP: &str = "commands: connect <name|address>, disconnect, status, \
threshold <0-100>, default [address], clear, stop";

fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let arg = parts.next();

    let parsed = match (command, arg) {
        ("connect", Some(device)) => {
            ConsoleCommand::Service(ServiceCommand::SetDevice(device.to_string()))
        }
        ("disconnect", None) => ConsoleCommand::Service(ServiceCommand::CloseConnection),
        ("stop" | "quit", None) => ConsoleCommand::Service(ServiceCommand::Stop),
        ("status", None) => ConsoleCommand::Status,
        ("threshold", Some(value)) => ConsoleCommand::SetThreshold(value.parse().ok()?),
        ("default", address) => ConsoleCommand::SaveDefault(address.map(str::to_string)),
        ("clear", None) => ConsoleCommand::ClearAlert,
        ("help", _) => ConsoleCommand::Help,
        _ => return None,
    };

    if parts.next().is_some() {
        return None;
    }
    Some(parsed)
}

/// Read commands from stdin until it closes
async fn run_console(handle: ServiceHandle, preferences: Arc<FilePreferences>, record: NotificationRecord) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("[Console] stdin closed");
                return;
            }
            Err(e) => {
                warn!("[Console] stdin error: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_console_command(&line) {
            Some(ConsoleCommand::Service(command)) => {
                if !handle.send(command) {
                    warn!("[Console] Service is no longer running");
                }
            }
            Some(ConsoleCommand::Status) => {
                let status = handle.status();
                info!(
                    "[Console] {} address={} estimate={}",
                    status.state,
                    status.address.as_deref().unwrap_or("-"),
                    status.confidence
                );
            }
            Some(ConsoleCommand::SetThreshold(value)) => {
                let preferences = preferences.clone();
                match tokio::task::spawn_blocking(move || preferences.save_minimum_threshold(value)).await {
                    Ok(Ok(())) => info!("[Console] Minimum threshold set to {}", value),
                    Ok(Err(e)) => warn!("[Console] {}", e),
                    Err(e) => warn!("[Console] Saving threshold failed: {}", e),
                }
            }
            Some(ConsoleCommand::SaveDefault(address)) => {
                let preferences = preferences.clone();
                let saved = address.clone();
                match tokio::task::spawn_blocking(move || preferences.save_default_address(saved.as_deref())).await {
                    Ok(Ok(())) => info!("[Console] Default device set to {}", address.as_deref().unwrap_or("none")),
                    Ok(Err(e)) => warn!("[Console] {}", e),
                    Err(e) => warn!("[Console] Saving default device failed: {}", e),
                }
            }
            Some(ConsoleCommand::ClearAlert) => {
                let record = record.clone();
                match tokio::task::spawn_blocking(move || record.clear()).await {
                    Ok(Ok(())) => info!("[Console] Alert cleared"),
                    Ok(Err(e)) => warn!("[Console] Could not clear alert: {}", e),
                    Err(e) => warn!("[Console] Clearing alert failed: {}", e),
                }
            }
            Some(ConsoleCommand::Help) => info!("[Console] {}", HELP),
            None => warn!("[Console] Unknown command {:?}; {}", line.trim(), HELP),
        }
    }
}

/// Log every lifecycle event until the service stops
async fn log_events(mut events: UnboundedReceiver<LifecycleEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            LifecycleEvent::TelemetryReceived { raw } => debug!("[Event] Reading {}", raw),
            LifecycleEvent::CarClosed { confidence } => {
                info!("[Event] Car closed (estimate {})", confidence)
            }
            LifecycleEvent::CarNotClosed { confidence } => {
                warn!("[Event] Car NOT closed (estimate {})", confidence)
            }
            LifecycleEvent::DeviceNotFound { .. }
            | LifecycleEvent::BluetoothDisabled
            | LifecycleEvent::NoDevicesPaired
            | LifecycleEvent::Disconnected { .. } => warn!("[Event] {}", event),
            LifecycleEvent::ApplicationStopped => {
                info!("[Event] {}", event);
                break;
            }
            _ => info!("[Event] {}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_follows_rust_log() {
        use tracing_subscriber::filter::LevelFilter;

        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("")).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(Some("warn")).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_parse_service_commands() {
        assert_eq!(
            parse_console_command("connect HC-05"),
            Some(ConsoleCommand::Service(ServiceCommand::SetDevice("HC-05".into())))
        );
        assert_eq!(
            parse_console_command("  disconnect "),
            Some(ConsoleCommand::Service(ServiceCommand::CloseConnection))
        );
        assert_eq!(
            parse_console_command("quit"),
            Some(ConsoleCommand::Service(ServiceCommand::Stop))
        );
    }

    #[test]
    fn test_parse_preference_commands() {
        assert_eq!(parse_console_command("threshold 55"), Some(ConsoleCommand::SetThreshold(55)));
        assert_eq!(parse_console_command("default"), Some(ConsoleCommand::SaveDefault(None)));
        assert_eq!(
            parse_console_command("default 00:11:22:33:44:55"),
            Some(ConsoleCommand::SaveDefault(Some("00:11:22:33:44:55".into())))
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_console_command("connect"), None);
        assert_eq!(parse_console_command("threshold high"), None);
        assert_eq!(parse_console_command("stop now"), None);
        assert_eq!(parse_console_command("connect a b"), None);
        assert_eq!(parse_console_command("open sesame"), None);
        assert_eq!(parse_console_command(""), None);
    }
}

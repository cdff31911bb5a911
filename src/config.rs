//! Daemon configuration

use crate::service::{FilePreferences, NotificationRecord, ServiceConfig};
use crate::transport::{
    BluerDirectory, DeviceDirectory, PairedDevice, RfcommConnector, SerialConnector,
    StaticDirectory, TcpConnector, TransportConnector,
};
use anyhow::{Context, Result};
use carwatch_shared::defaults::RFCOMM_CHANNEL;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming the config file when no argument is given
pub const CONFIG_ENV: &str = "CARWATCH_CONFIG";

/// Address the development simulator listens on
pub const SIMULATOR_ADDRESS: &str = "127.0.0.1:9000";

/// How the daemon reaches the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Rfcomm,
    Tcp,
    Serial,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Rfcomm => write!(f, "rfcomm"),
            TransportMode::Tcp => write!(f, "tcp"),
            TransportMode::Serial => write!(f, "serial"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub transport: TransportMode,
    pub rfcomm_channel: u8,
    pub serial_baud: u32,
    /// Known devices for the tcp and serial transports
    pub devices: Vec<PairedDevice>,
    /// Device to connect to at startup, overriding the saved default
    pub device: Option<String>,
    pub stop_grace_ms: u64,
    pub connect_timeout_ms: u64,
    pub data_dir: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Rfcomm,
            rfcomm_channel: RFCOMM_CHANNEL,
            serial_baud: crate::transport::serial::DEFAULT_BAUD,
            devices: Vec::new(),
            device: None,
            stop_grace_ms: 2000,
            connect_timeout_ms: 5000,
            data_dir: None,
        }
    }
}

impl MonitorConfig {
    /// Load from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            stop_grace: Duration::from_millis(self.stop_grace_ms),
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let dirs = directories::ProjectDirs::from("", "", "carwatch")
            .context("cannot determine data directory")?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn preferences(&self) -> Result<FilePreferences> {
        Ok(FilePreferences::new(self.data_dir()?.join("settings.toml")))
    }

    pub fn notification_record(&self) -> Result<NotificationRecord> {
        Ok(NotificationRecord::new(self.data_dir()?.join("notification.flag")))
    }

    /// Configured devices; the tcp transport falls back to the simulator
    pub fn devices(&self) -> Vec<PairedDevice> {
        if self.devices.is_empty() && self.transport == TransportMode::Tcp {
            return vec![PairedDevice::new("HC-05", SIMULATOR_ADDRESS)];
        }
        self.devices.clone()
    }

    pub fn build_connector(&self) -> Arc<dyn TransportConnector> {
        match self.transport {
            TransportMode::Rfcomm => Arc::new(RfcommConnector::new(self.rfcomm_channel)),
            TransportMode::Tcp => Arc::new(TcpConnector::new(Duration::from_millis(
                self.connect_timeout_ms,
            ))),
            TransportMode::Serial => Arc::new(SerialConnector::new(self.serial_baud)),
        }
    }

    pub fn build_directory(&self) -> Arc<dyn DeviceDirectory> {
        match self.transport {
            TransportMode::Rfcomm => Arc::new(BluerDirectory::new()),
            TransportMode::Tcp | TransportMode::Serial => {
                Arc::new(StaticDirectory::new(self.devices()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::load(None).unwrap();

        assert_eq!(config.transport, TransportMode::Rfcomm);
        assert_eq!(config.rfcomm_channel, 1);
        assert_eq!(config.service_config().stop_grace, Duration::from_secs(2));
        assert!(config.devices().is_empty());
    }

    #[test]
    fn test_parse_tcp_with_devices() {
        let config = MonitorConfig::parse(
            r#"
            transport = "tcp"
            device = "garage"
            stop_grace_ms = 500

            [[devices]]
            name = "garage"
            address = "192.168.1.20:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.transport, TransportMode::Tcp);
        assert_eq!(config.device.as_deref(), Some("garage"));
        assert_eq!(config.service_config().stop_grace, Duration::from_millis(500));
        assert_eq!(
            config.devices(),
            vec![PairedDevice::new("garage", "192.168.1.20:9000")]
        );
        assert_eq!(config.build_connector().name(), "TCP simulation");
    }

    #[test]
    fn test_tcp_defaults_to_simulator() {
        let config = MonitorConfig::parse("transport = \"tcp\"").unwrap();
        assert_eq!(
            config.devices(),
            vec![PairedDevice::new("HC-05", SIMULATOR_ADDRESS)]
        );
    }

    #[test]
    fn test_unknown_transport_rejected() {
        assert!(MonitorConfig::parse("transport = \"carrier-pigeon\"").is_err());
    }

    #[test]
    fn test_paths_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("carwatch.toml");
        std::fs::write(
            &config_path,
            format!("data_dir = {:?}\n", dir.path().join("data")),
        )
        .unwrap();

        let config = MonitorConfig::load(Some(&config_path)).unwrap();
        assert_eq!(
            config.preferences().unwrap().path(),
            dir.path().join("data").join("settings.toml")
        );
        assert_eq!(
            config.notification_record().unwrap().path(),
            dir.path().join("data").join("notification.flag")
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = MonitorConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}

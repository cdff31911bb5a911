//! Paired-device lookup
//!
//! Translates a device name or address into something a connector can dial.
//! Nothing here scans or pairs: only devices the adapter already knows about
//! are considered.

use async_trait::async_trait;
use bluer::{Adapter, Address};
use carwatch_shared::defaults::DEVICE_NAMES;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

/// State of the local Bluetooth adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Ready,
    /// Missing or powered off
    Disabled,
}

/// A device the adapter is paired with
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PairedDevice {
    pub name: Option<String>,
    pub address: String,
}

impl PairedDevice {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    fn matches(&self, query: &str) -> bool {
        self.address.eq_ignore_ascii_case(query) || self.name.as_deref() == Some(query)
    }
}

/// Source of paired devices
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn adapter_status(&self) -> AdapterStatus;

    async fn paired_devices(&self) -> Vec<PairedDevice>;

    /// Resolve a name or address to the address of a paired device.
    ///
    /// `None` means "no such device", never an error.
    async fn resolve_address(&self, name_or_address: &str) -> Option<String> {
        self.paired_devices()
            .await
            .into_iter()
            .find(|d| d.matches(name_or_address))
            .map(|d| d.address)
    }
}

/// Pick the device to connect to when the user did not name one.
///
/// The saved default wins while it is still paired; otherwise the first of
/// the stock sensor module names that is paired.
pub fn pick_default(paired: &[PairedDevice], saved: Option<&str>) -> Option<String> {
    if let Some(saved) = saved.filter(|s| !s.is_empty()) {
        if let Some(device) = paired.iter().find(|d| d.address.eq_ignore_ascii_case(saved)) {
            return Some(device.address.clone());
        }
        debug!("Saved device {} is no longer paired", saved);
    }

    DEVICE_NAMES.iter().find_map(|name| {
        paired
            .iter()
            .find(|d| d.name.as_deref() == Some(*name))
            .map(|d| d.address.clone())
    })
}

/// Directory backed by BlueZ
#[derive(Debug, Default, Clone)]
pub struct BluerDirectory;

impl BluerDirectory {
    pub fn new() -> Self {
        Self
    }

    /// Get the default Bluetooth adapter
    async fn adapter() -> bluer::Result<Adapter> {
        let session = bluer::Session::new().await?;
        session.default_adapter().await
    }

    async fn describe(adapter: &Adapter, address: Address) -> Option<PairedDevice> {
        let device = adapter.device(address).ok()?;
        if !device.is_paired().await.unwrap_or(false) {
            return None;
        }
        Some(PairedDevice {
            name: device.name().await.ok().flatten(),
            address: address.to_string(),
        })
    }
}

#[async_trait]
impl DeviceDirectory for BluerDirectory {
    async fn adapter_status(&self) -> AdapterStatus {
        let adapter = match Self::adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("[BT] No usable adapter: {}", e);
                return AdapterStatus::Disabled;
            }
        };

        match adapter.is_powered().await {
            Ok(true) => AdapterStatus::Ready,
            Ok(false) => AdapterStatus::Disabled,
            Err(e) => {
                warn!("[BT] Cannot read adapter power state: {}", e);
                AdapterStatus::Disabled
            }
        }
    }

    async fn paired_devices(&self) -> Vec<PairedDevice> {
        let adapter = match Self::adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("[BT] No usable adapter: {}", e);
                return Vec::new();
            }
        };

        let addresses = match adapter.device_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!("[BT] Cannot list devices: {}", e);
                return Vec::new();
            }
        };

        join_all(addresses.into_iter().map(|addr| Self::describe(&adapter, addr)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Fixed device list, for the TCP and serial transports
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    devices: Vec<PairedDevice>,
    status: AdapterStatus,
}

impl StaticDirectory {
    pub fn new(devices: Vec<PairedDevice>) -> Self {
        Self {
            devices,
            status: AdapterStatus::Ready,
        }
    }

    pub fn with_status(mut self, status: AdapterStatus) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn adapter_status(&self) -> AdapterStatus {
        self.status
    }

    async fn paired_devices(&self) -> Vec<PairedDevice> {
        self.devices.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> Vec<PairedDevice> {
        vec![
            PairedDevice::new("Headphones", "AA:AA:AA:AA:AA:AA"),
            PairedDevice::new("HC-06", "66:66:66:66:66:66"),
            PairedDevice::new("HC-05", "55:55:55:55:55:55"),
        ]
    }

    #[test]
    fn test_saved_default_wins() {
        let picked = pick_default(&paired(), Some("aa:aa:aa:aa:aa:aa"));
        assert_eq!(picked.as_deref(), Some("AA:AA:AA:AA:AA:AA"));
    }

    #[test]
    fn test_falls_back_to_stock_names_in_order() {
        let picked = pick_default(&paired(), Some("11:11:11:11:11:11"));
        assert_eq!(picked.as_deref(), Some("55:55:55:55:55:55"));

        let picked = pick_default(&paired()[..2], None);
        assert_eq!(picked.as_deref(), Some("66:66:66:66:66:66"));
    }

    #[test]
    fn test_nothing_to_pick() {
        assert_eq!(pick_default(&paired()[..1], Some("")), None);
        assert_eq!(pick_default(&[], None), None);
    }

    #[tokio::test]
    async fn test_resolve_by_name_or_address() {
        let directory = StaticDirectory::new(paired());

        assert_eq!(
            directory.resolve_address("HC-05").await.as_deref(),
            Some("55:55:55:55:55:55")
        );
        assert_eq!(
            directory.resolve_address("66:66:66:66:66:66").await.as_deref(),
            Some("66:66:66:66:66:66")
        );
        assert_eq!(directory.resolve_address("HC-07").await, None);
    }

    #[tokio::test]
    async fn test_static_status() {
        let directory = StaticDirectory::new(vec![]).with_status(AdapterStatus::Disabled);
        assert_eq!(directory.adapter_status().await, AdapterStatus::Disabled);
        assert!(directory.paired_devices().await.is_empty());
    }
}

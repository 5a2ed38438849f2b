//! In-memory registry of discovered root devices.
//!
//! Entries are keyed by the root device's UDN. Lookups by UDN also reach
//! embedded devices, since announcements are sent for every device in a tree.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::RwLock;
use upnp_api::Device;

/// Root devices known to a control point.
///
/// A single reader/writer lock guards the map; the discovery loop writes
/// while callers read.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a root device, returning the previous entry.
    pub fn insert(&self, device: Device) -> Option<Device> {
        self.devices
            .write()
            .insert(device.udn().to_string(), device)
    }

    /// Remove the root device whose tree contains `udn`.
    pub fn remove(&self, udn: &str) -> Option<Device> {
        let mut devices = self.devices.write();
        let key = devices
            .iter()
            .find(|(_, d)| d.device_by_udn(udn).is_some())
            .map(|(key, _)| key.clone())?;
        devices.remove(&key)
    }

    /// Refresh metadata of a known device announced again from `location`.
    ///
    /// Returns false when no root containing `udn` was fetched from
    /// `location`, meaning the description must be (re)fetched.
    pub fn refresh(&self, udn: &str, location: &str, source: Option<SocketAddr>) -> bool {
        let mut devices = self.devices.write();
        let Some(root) = devices
            .values_mut()
            .find(|d| d.device_by_udn(udn).is_some())
        else {
            return false;
        };
        if root.location() != Some(location) {
            return false;
        }
        root.touch(source);
        true
    }

    /// Run `f` on the device (root or embedded) identified by `udn`.
    pub fn with_device<R>(&self, udn: &str, f: impl FnOnce(&Device) -> R) -> Option<R> {
        let devices = self.devices.read();
        devices.values().find_map(|d| d.device_by_udn(udn)).map(f)
    }

    pub fn with_device_mut<R>(&self, udn: &str, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        let mut devices = self.devices.write();
        devices
            .values_mut()
            .find_map(|d| d.device_by_udn_mut(udn))
            .map(f)
    }

    /// Copy of the device identified by `udn`.
    pub fn get(&self, udn: &str) -> Option<Device> {
        self.with_device(udn, Device::clone)
    }

    pub fn contains(&self, udn: &str) -> bool {
        self.with_device(udn, |_| ()).is_some()
    }

    /// Every root device, ordered by UDN.
    pub fn all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.udn().cmp(b.udn()));
        devices
    }

    /// Root devices of exactly `device_type`, ordered by UDN.
    pub fn by_type(&self, device_type: &str) -> Vec<Device> {
        self.all()
            .into_iter()
            .filter(|d| d.device_type == device_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn clear(&self) {
        self.devices.write().clear();
    }
}

//! Time-expiring device registry shared between the discovery loop and the
//! cast orchestrator.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::trace;

use crate::device::CastDevice;
use crate::errors::UpnpError;

/// Registry of currently known renderers, keyed by UDN.
///
/// There is no background sweeper: expired entries are evicted lazily when
/// the registry is listed.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, CastDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a record.
    ///
    /// A record that is still valid is never overwritten: a flapping
    /// LOCATION on rediscovery must not invalidate an active cast target
    /// mid-session. The new record only wins when the mapping is absent or
    /// the existing record has already expired.
    pub fn upsert(&self, device: CastDevice) {
        let mut devices = self.devices.lock().unwrap();
        match devices.get(&device.udn) {
            Some(existing) if !existing.is_expired() => {
                trace!(udn = %device.udn, "Rediscovered while still valid, keeping existing record");
            }
            _ => {
                trace!(udn = %device.udn, name = %device.friendly_name, "Registering renderer");
                devices.insert(device.udn.clone(), device);
            }
        }
    }

    /// Evicts expired entries, then returns the remaining records in
    /// arbitrary order.
    pub fn list(&self) -> Vec<CastDevice> {
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|_, device| !device.is_expired());
        devices.values().cloned().collect()
    }

    /// Looks a device up by UDN.
    ///
    /// `DeviceNotFound` does not distinguish "never seen" from "expired and
    /// evicted".
    pub fn lookup(&self, udn: &str) -> Result<CastDevice, UpnpError> {
        self.devices
            .lock()
            .unwrap()
            .get(udn)
            .cloned()
            .ok_or_else(|| UpnpError::DeviceNotFound(udn.to_string()))
    }

    /// Looks a device up by friendly name (first match wins).
    pub fn lookup_by_name(&self, name: &str) -> Result<CastDevice, UpnpError> {
        self.devices
            .lock()
            .unwrap()
            .values()
            .find(|device| device.friendly_name == name)
            .cloned()
            .ok_or_else(|| UpnpError::DeviceNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn device(udn: &str, base_url: &str, max_age: u32) -> CastDevice {
        CastDevice::new(udn, "Test TV", base_url, "ctrl", "192.168.1.2", max_age)
    }

    fn expired_device(udn: &str, base_url: &str) -> CastDevice {
        let mut d = device(udn, base_url, 0);
        d.expires_at = Instant::now() - Duration::from_secs(1);
        d
    }

    #[test]
    fn upsert_keeps_valid_record() {
        let registry = DeviceRegistry::new();
        registry.upsert(device("uuid:a", "http://first/", 100));
        registry.upsert(device("uuid:a", "http://second/", 100));

        let found = registry.lookup("uuid:a").unwrap();
        assert_eq!(found.base_url, "http://first/");
    }

    #[test]
    fn upsert_replaces_expired_record() {
        let registry = DeviceRegistry::new();
        registry.upsert(expired_device("uuid:a", "http://first/"));
        registry.upsert(device("uuid:a", "http://second/", 100));

        let found = registry.lookup("uuid:a").unwrap();
        assert_eq!(found.base_url, "http://second/");
    }

    #[test]
    fn list_never_returns_expired_records() {
        let registry = DeviceRegistry::new();
        registry.upsert(expired_device("uuid:old", "http://old/"));
        registry.upsert(device("uuid:new", "http://new/", 100));

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].udn, "uuid:new");

        // The expired entry was evicted, not just filtered
        assert!(registry.lookup("uuid:old").is_err());
    }

    #[test]
    fn lookup_signals_not_found() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.lookup("uuid:missing"),
            Err(UpnpError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn lookup_by_name_finds_matching_device() {
        let registry = DeviceRegistry::new();
        registry.upsert(device("uuid:a", "http://a/", 100));

        assert_eq!(registry.lookup_by_name("Test TV").unwrap().udn, "uuid:a");
        assert!(registry.lookup_by_name("Bedroom TV").is_err());
    }
}

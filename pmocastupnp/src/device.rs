//! Renderer device records built by the discovery loop.

use std::time::{Duration, Instant};

use url::Url;

use crate::errors::UpnpError;

/// A discovered AVTransport-capable renderer.
///
/// `local_addr` is the address of the local interface this host was reached
/// on by that device; callback URLs handed to the renderer are built from it
/// so that multi-homed hosts advertise an address the device can actually
/// dial back to.
#[derive(Debug, Clone)]
pub struct CastDevice {
    pub udn: String,
    pub friendly_name: String,
    pub base_url: String,
    pub control_url: String,
    pub local_addr: String,
    pub expires_at: Instant,
}

impl CastDevice {
    /// Builds a record valid for `max_age` seconds from now.
    pub fn new(
        udn: impl Into<String>,
        friendly_name: impl Into<String>,
        base_url: impl Into<String>,
        control_url: impl Into<String>,
        local_addr: impl Into<String>,
        max_age: u32,
    ) -> Self {
        Self {
            udn: udn.into(),
            friendly_name: friendly_name.into(),
            base_url: base_url.into(),
            control_url: control_url.into(),
            local_addr: local_addr.into(),
            expires_at: Instant::now() + Duration::from_secs(u64::from(max_age)),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Instant::now()
    }

    /// Absolute URL of the AVTransport control endpoint.
    pub fn control_endpoint(&self) -> Result<String, UpnpError> {
        let base = Url::parse(&self.base_url).map_err(|e| UpnpError::url(&self.base_url, e))?;
        let joined = base
            .join(&self.control_url)
            .map_err(|e| UpnpError::url(&self.control_url, e))?;
        Ok(joined.to_string())
    }

    /// URL of a local HTTP endpoint as seen from the device's side of the
    /// network.
    pub fn callback_url(&self, http_port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.local_addr, http_port, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_endpoint_joins_relative_url() {
        let device = CastDevice::new(
            "uuid:1234",
            "Living Room TV",
            "http://192.168.1.20:49152/",
            "upnp/control/AVTransport1",
            "192.168.1.2",
            100,
        );
        assert_eq!(
            device.control_endpoint().unwrap(),
            "http://192.168.1.20:49152/upnp/control/AVTransport1"
        );
    }

    #[test]
    fn control_endpoint_keeps_absolute_url() {
        let device = CastDevice::new(
            "uuid:1234",
            "TV",
            "http://192.168.1.20:49152/",
            "http://192.168.1.20:49153/ctrl",
            "192.168.1.2",
            100,
        );
        assert_eq!(
            device.control_endpoint().unwrap(),
            "http://192.168.1.20:49153/ctrl"
        );
    }

    #[test]
    fn callback_url_uses_local_interface_address() {
        let device = CastDevice::new(
            "uuid:1234",
            "TV",
            "http://192.168.1.20:49152/",
            "ctrl",
            "192.168.1.2",
            100,
        );
        assert_eq!(
            device.callback_url(12345, "/live"),
            "http://192.168.1.2:12345/live"
        );
    }
}

//! # Discovery loop
//!
//! Periodic M-SEARCH broadcast plus per-response descriptor probing,
//! feeding the [`DeviceRegistry`]. The loop owns its socket and runs on a
//! dedicated thread; all I/O here is synchronous.
//!
//! Every network or parse error aborts only the current candidate and falls
//! through to the next iteration. The 5-second read deadline on the
//! discovery socket paces the loop and doubles as the stop-flag check
//! interval, so a stop request is honored within one deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use ureq::Agent;

use crate::description::{
    AVTRANSPORT_SERVICE_TYPE, SET_AV_TRANSPORT_URI, base_url_for, fetch_device_description,
    probe_scpd_for_action, resolve_url,
};
use crate::device::CastDevice;
use crate::errors::UpnpError;
use crate::registry::DeviceRegistry;
use crate::ssdp::{SEARCH_TARGET, SearchResponse, SsdpClient, local_addr_for};

/// Handle used to stop a running discovery loop.
#[derive(Clone)]
pub struct DiscoveryStop {
    stop: Arc<AtomicBool>,
}

impl DiscoveryStop {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

pub struct DiscoveryLoop {
    client: SsdpClient,
    registry: Arc<DeviceRegistry>,
    agent: Agent,
    mx: u32,
    stop: Arc<AtomicBool>,
}

impl DiscoveryLoop {
    pub fn new(client: SsdpClient, registry: Arc<DeviceRegistry>, mx: u32) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(5)))
            .build();

        Self {
            client,
            registry,
            agent: config.into(),
            mx,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> DiscoveryStop {
        DiscoveryStop {
            stop: self.stop.clone(),
        }
    }

    /// Spawns the loop on its own thread.
    pub fn spawn(self) -> (thread::JoinHandle<()>, DiscoveryStop) {
        let stop = self.stop_handle();
        let handle = thread::Builder::new()
            .name("ssdp-discovery".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn discovery thread");
        (handle, stop)
    }

    /// Runs until a stop is requested.
    pub fn run(self) {
        info!("🔍 SSDP discovery loop started (ST={})", SEARCH_TARGET);

        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.client.send_msearch(SEARCH_TARGET, self.mx) {
                warn!("Failed to send M-SEARCH: {}", e);
            }

            match self.client.recv_response() {
                Ok(Some(response)) => self.handle_response(response),
                Ok(None) => {} // deadline expiry, next iteration re-broadcasts
                Err(e) => warn!("SSDP read error: {}", e),
            }
        }

        info!("SSDP discovery loop stopped");
    }

    fn handle_response(&self, response: SearchResponse) {
        let location = response.location.clone();
        match self.describe(&response) {
            Ok(Some(device)) => {
                debug!(
                    udn = %device.udn,
                    name = %device.friendly_name,
                    "Renderer qualifies for casting"
                );
                self.registry.upsert(device);
            }
            Ok(None) => {
                trace!("No usable AVTransport service at {}", location);
            }
            Err(e) => {
                // Candidate dropped; the device will be retried on its next
                // announcement or search response.
                debug!("Discovery candidate {} dropped: {}", location, e);
            }
        }
    }

    /// Fetches the description behind one search response and builds a
    /// device record if an AVTransport service advertising
    /// `SetAVTransportURI` is found.
    fn describe(&self, response: &SearchResponse) -> Result<Option<CastDevice>, UpnpError> {
        let local_addr = local_addr_for(response.from);

        let description = fetch_device_description(&self.agent, &response.location)?;
        let base_url = base_url_for(&response.location, description.url_base.as_deref())?;

        for service in &description.services {
            if service.service_type != AVTRANSPORT_SERVICE_TYPE {
                continue;
            }

            let scpd_url = resolve_url(&base_url, &service.scpd_url)?;
            if probe_scpd_for_action(&self.agent, &scpd_url, SET_AV_TRANSPORT_URI)? {
                return Ok(Some(CastDevice::new(
                    &description.udn,
                    &description.friendly_name,
                    &base_url,
                    &service.control_url,
                    local_addr,
                    response.max_age,
                )));
            }
        }

        Ok(None)
    }
}

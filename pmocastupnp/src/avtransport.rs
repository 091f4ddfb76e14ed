//! AVTransport control client.
//!
//! `SetAVTransportURI` is the only action this control point issues:
//! stopping a cast is handled locally by tearing down the relay and the
//! encoder, never by a UPnP Stop action.

use crate::description::AVTRANSPORT_SERVICE_TYPE;
use crate::device::CastDevice;
use crate::errors::UpnpError;
use crate::soap::{invoke_upnp_action, parse_upnp_fault};

#[derive(Debug, Clone)]
pub struct AvTransportClient {
    pub control_url: String,
    pub service_type: String,
}

impl AvTransportClient {
    pub fn new(control_url: String) -> Self {
        Self {
            control_url,
            service_type: AVTRANSPORT_SERVICE_TYPE.to_string(),
        }
    }

    /// Builds a client for a discovered device's control endpoint.
    pub fn for_device(device: &CastDevice) -> Result<Self, UpnpError> {
        Ok(Self::new(device.control_endpoint()?))
    }

    /// Points the renderer at `uri`.
    ///
    /// Sends `SetAVTransportURI` with empty metadata; any transport failure
    /// or non-2xx response surfaces as an error, enriched with the UPnP
    /// fault detail when the body carries one.
    pub fn set_av_transport_uri(&self, instance_id: u32, uri: &str) -> Result<(), UpnpError> {
        let instance_id_str = instance_id.to_string();
        let args = [
            ("InstanceID", instance_id_str.as_str()),
            ("CurrentURI", uri),
            ("CurrentURIMetaData", ""),
        ];

        let call_result = invoke_upnp_action(
            &self.control_url,
            &self.service_type,
            "SetAVTransportURI",
            &args,
        )?;

        if !(200..300).contains(&call_result.status) {
            if let Some(fault) = parse_upnp_fault(&call_result.raw_body) {
                return Err(UpnpError::SoapFault(
                    "SetAVTransportURI".to_string(),
                    fault.error_code,
                    fault.error_description,
                    call_result.status,
                ));
            }
            return Err(UpnpError::SoapStatus(
                "SetAVTransportURI".to_string(),
                call_result.status,
            ));
        }

        Ok(())
    }
}

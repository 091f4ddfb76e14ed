//! Device description and SCPD probing.
//!
//! The description document is parsed with a streaming reader; only the
//! handful of fields the control point needs are extracted (friendlyName,
//! UDN, URLBase and the service list).

use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;
use ureq::Agent;
use url::Url;

use crate::errors::UpnpError;

/// Service type this control point drives.
pub const AVTRANSPORT_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// Action probed for in the SCPD document.
pub const SET_AV_TRANSPORT_URI: &str = "SetAVTransportURI";

/// One `<service>` entry of the description document.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub service_type: String,
    pub control_url: String,
    pub scpd_url: String,
}

/// The fields of a device description this control point cares about.
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub udn: String,
    pub friendly_name: String,
    pub url_base: Option<String>,
    pub services: Vec<ServiceEntry>,
}

/// Fetches and parses the description document advertised in an SSDP
/// LOCATION header.
pub fn fetch_device_description(
    agent: &Agent,
    location: &str,
) -> Result<DeviceDescription, UpnpError> {
    debug!("Fetching device description at {}", location);

    let response = agent
        .get(location)
        .call()
        .map_err(|e| UpnpError::http(location, e))?;

    let (_parts, body) = response.into_parts();
    let body_reader = body.into_reader();

    parse_device_description(std::io::BufReader::new(body_reader), location)
}

/// Parses a description document from any buffered reader.
pub fn parse_device_description<R: BufRead>(
    reader: R,
    location: &str,
) -> Result<DeviceDescription, UpnpError> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();

    let mut udn: Option<String> = None;
    let mut friendly_name: Option<String> = None;
    let mut url_base: Option<String> = None;
    let mut services: Vec<ServiceEntry> = Vec::new();

    let mut in_device = false;
    let mut in_service = false;
    let mut current_tag: Option<String> = None;

    // Tracked while inside <service>...</service>
    let mut current_service_type: Option<String> = None;
    let mut current_control_url: Option<String> = None;
    let mut current_scpd_url: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(UpnpError::xml)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "device" => {
                        in_device = true;
                        current_tag = None;
                    }
                    "service" => {
                        if in_device {
                            in_service = true;
                            current_tag = None;
                            current_service_type = None;
                            current_control_url = None;
                            current_scpd_url = None;
                        }
                    }
                    _ => {
                        current_tag = Some(name);
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "device" => {
                        in_device = false;
                    }
                    "service" => {
                        if in_device && in_service {
                            if let (Some(st), Some(ctrl), Some(scpd)) = (
                                current_service_type.take(),
                                current_control_url.take(),
                                current_scpd_url.take(),
                            ) {
                                services.push(ServiceEntry {
                                    service_type: st,
                                    control_url: ctrl,
                                    scpd_url: scpd,
                                });
                            }
                            in_service = false;
                        }
                    }
                    _ => {}
                }
                current_tag = None;
            }
            Event::Text(e) => {
                if let Some(tag) = &current_tag {
                    let text = e.decode().map_err(UpnpError::xml)?.into_owned();

                    match tag.as_str() {
                        "URLBase" => {
                            if url_base.is_none() {
                                url_base = Some(text);
                            }
                        }
                        "UDN" if in_device => {
                            if udn.is_none() {
                                udn = Some(text);
                            }
                        }
                        "friendlyName" if in_device => {
                            if friendly_name.is_none() {
                                friendly_name = Some(text);
                            }
                        }
                        "serviceType" if in_service => {
                            current_service_type = Some(text);
                        }
                        "controlURL" if in_service => {
                            current_control_url = Some(text);
                        }
                        "SCPDURL" if in_service => {
                            current_scpd_url = Some(text);
                        }
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    let udn = udn
        .ok_or_else(|| UpnpError::IncompleteDescription(location.to_string(), "UDN".to_string()))?;
    let friendly_name = friendly_name.ok_or_else(|| {
        UpnpError::IncompleteDescription(location.to_string(), "friendlyName".to_string())
    })?;

    Ok(DeviceDescription {
        udn,
        friendly_name,
        url_base,
        services,
    })
}

/// Base URL the description's relative URLs resolve against.
///
/// Many devices omit `URLBase`; the LOCATION URL's origin is the base in
/// that case.
pub fn base_url_for(location: &str, url_base: Option<&str>) -> Result<String, UpnpError> {
    if let Some(base) = url_base {
        if !base.is_empty() {
            return Ok(base.to_string());
        }
    }

    let mut url = Url::parse(location).map_err(|e| UpnpError::url(location, e))?;
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Resolves a possibly-relative description URL against a base.
pub fn resolve_url(base: &str, relative: &str) -> Result<String, UpnpError> {
    let base = Url::parse(base).map_err(|e| UpnpError::url(base, e))?;
    let joined = base
        .join(relative)
        .map_err(|e| UpnpError::url(relative, e))?;
    Ok(joined.to_string())
}

/// Checks whether the SCPD document at `scpd_url` mentions `action`.
///
/// This is a literal substring probe, not a structural parse of the action
/// list: it can false-positive on the token appearing in a comment or an
/// unrelated attribute, which is accepted for its cheapness.
pub fn probe_scpd_for_action(
    agent: &Agent,
    scpd_url: &str,
    action: &str,
) -> Result<bool, UpnpError> {
    let mut response = agent
        .get(scpd_url)
        .call()
        .map_err(|e| UpnpError::http(scpd_url, e))?;

    let content = response
        .body_mut()
        .read_to_string()
        .map_err(|e| UpnpError::http(scpd_url, e))?;

    Ok(content.contains(action))
}

//! SOAP request construction and invocation for UPnP actions.

use tracing::debug;
use ureq::Agent;
use xmltree::{Element, EmitterConfig, XMLNode};

use crate::errors::UpnpError;

/// Result of a SOAP call: HTTP status plus the raw XML body, which is read
/// even for SOAP Faults (HTTP 500 carries the UPnP error detail).
pub struct SoapCallResult {
    pub status: u16,
    pub raw_body: String,
}

/// UPnP error detail carried in a SOAP Fault.
#[derive(Debug, Clone)]
pub struct UpnpFault {
    pub error_code: String,
    pub error_description: String,
}

fn build_soap_envelope_with_body(body_child: Element) -> Result<String, UpnpError> {
    // Body
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(body_child));

    // Envelope
    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(true)
        .indent_string("  ");
    envelope
        .write_with_config(&mut buf, config)
        .map_err(|e| UpnpError::SoapBuild(e.to_string()))?;

    String::from_utf8(buf).map_err(|e| UpnpError::SoapBuild(e.to_string()))
}

/// Builds a SOAP 1.1 request envelope invoking a UPnP action.
///
/// # Arguments
///
/// * `service_urn` - service URN (ex: "urn:schemas-upnp-org:service:AVTransport:1")
/// * `action` - action name (ex: "SetAVTransportURI")
/// * `args` - list of (name, value) pairs
pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, UpnpError> {
    let request_name = format!("u:{}", action);
    let mut request_elem = Element::new(&request_name);
    request_elem
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in args {
        let mut child = Element::new(*name);
        child.children.push(XMLNode::Text((*value).to_string()));
        request_elem.children.push(XMLNode::Element(child));
    }

    build_soap_envelope_with_body(request_elem)
}

/// Invokes a UPnP SOAP action on a control URL.
///
/// The agent is configured to *not* treat 4xx/5xx as transport errors so the
/// body of an HTTP 500 SOAP Fault can still be read and reported.
pub fn invoke_upnp_action(
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<SoapCallResult, UpnpError> {
    let body_xml = build_soap_request(service_type, action, args)?;

    let config = Agent::config_builder()
        .http_status_as_error(false)
        .build();
    let agent: Agent = config.into();

    // SOAPACTION header: "urn:service#Action"
    let soap_action_header = format!(r#""{}#{}""#, service_type, action);

    debug!("SOAP {} -> {}", action, control_url);

    let mut response = agent
        .post(control_url)
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("SOAPACTION", &soap_action_header)
        .send(body_xml)
        .map_err(|e| UpnpError::http(control_url, e))?;

    let status = response.status().as_u16();

    let raw_body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| UpnpError::http(control_url, e))?;

    Ok(SoapCallResult { status, raw_body })
}

/// Extracts the UPnP error detail from a SOAP Fault body, if any.
pub fn parse_upnp_fault(xml: &str) -> Option<UpnpFault> {
    let root = Element::parse(xml.as_bytes()).ok()?;
    let fault = find_descendant(&root, "Fault")?;
    let detail = find_descendant(fault, "detail")?;
    let upnp_error = find_descendant(detail, "UPnPError")?;

    let error_code = child_text(upnp_error, "errorCode")?;
    let error_description = child_text(upnp_error, "errorDescription").unwrap_or_default();

    Some(UpnpFault {
        error_code,
        error_description,
    })
}

fn find_descendant<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    for node in &parent.children {
        if let XMLNode::Element(elem) = node {
            if elem.name.ends_with(suffix) {
                return Some(elem);
            }
            if let Some(found) = find_descendant(elem, suffix) {
                return Some(found);
            }
        }
    }
    None
}

fn child_text(parent: &Element, suffix: &str) -> Option<String> {
    find_descendant(parent, suffix)
        .and_then(|elem| elem.get_text())
        .map(|text| text.trim().to_string())
}

//! SOAP envelopes and GENA property sets
//!
//! Builders produce the documents exchanged on control and event URLs; parsers
//! accept what real devices send, which is namespace-prefixed XML with
//! inconsistent casing in the fault detail element.

use std::borrow::Cow;

use quick_xml::escape::escape;
use xmltree::{Element, XMLNode};

use crate::error::{Result, SoapError, UpnpError};

pub const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const CONTROL_NS: &str = "urn:schemas-upnp-org:control-1-0";
pub const EVENT_NS: &str = "urn:schemas-upnp-org:event-1-0";

/// Content type used for every SOAP and event body.
pub const CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

/// An inbound control request as seen by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    /// Namespace of the action element, normally the service type.
    pub service_type: Option<String>,
    pub action: String,
    pub arguments: Vec<(String, String)>,
}

impl SoapRequest {
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn wrap_body(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{ENVELOPE_NS}" s:encodingStyle="{ENCODING_STYLE}"><s:Body>{inner}</s:Body></s:Envelope>"#
    )
}

fn write_arguments(out: &mut String, arguments: &[(&str, &str)]) {
    for (name, value) in arguments {
        out.push_str(&format!("<{name}>{}</{name}>", escape(value)));
    }
}

/// Request envelope for `action` on `service_type`.
pub fn build_request(service_type: &str, action: &str, arguments: &[(&str, &str)]) -> String {
    let mut inner = format!(r#"<u:{action} xmlns:u="{}">"#, escape(service_type));
    write_arguments(&mut inner, arguments);
    inner.push_str(&format!("</u:{action}>"));
    wrap_body(&inner)
}

/// Success envelope carrying the output arguments.
pub fn build_response(service_type: &str, action: &str, outputs: &[(&str, &str)]) -> String {
    let mut inner = format!(r#"<u:{action}Response xmlns:u="{}">"#, escape(service_type));
    write_arguments(&mut inner, outputs);
    inner.push_str(&format!("</u:{action}Response>"));
    wrap_body(&inner)
}

/// Fault envelope carrying a UPnP error.
pub fn build_fault(error: &UpnpError) -> String {
    let inner = format!(
        r#"<s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="{CONTROL_NS}"><errorCode>{}</errorCode><errorDescription>{}</errorDescription></UPnPError></detail></s:Fault>"#,
        error.code,
        escape(&error.description)
    );
    wrap_body(&inner)
}

/// Value of the `SOAPACTION` header.
pub fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{}#{}\"", service_type, action)
}

/// Split a `SOAPACTION` header into service type and action name.
pub fn parse_soap_action(header: &str) -> Option<(String, String)> {
    let value = header.trim().trim_matches('"');
    let (service_type, action) = value.rsplit_once('#')?;
    if action.is_empty() {
        return None;
    }
    Some((service_type.to_string(), action.to_string()))
}

fn parse_document(body: &[u8]) -> Result<Element> {
    Element::parse(body).map_err(|e| SoapError::Parse(e.to_string()))
}

fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(XMLNode::as_element)
}

fn text_of(element: &Element) -> String {
    element
        .get_text()
        .map(Cow::into_owned)
        .unwrap_or_default()
}

fn arguments_of(element: &Element) -> Vec<(String, String)> {
    child_elements(element)
        .map(|child| (child.name.clone(), text_of(child)))
        .collect()
}

fn body_of(envelope: &Element) -> Result<&Element> {
    envelope
        .get_child("Body")
        .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))
}

/// Parse a control request received by a device.
pub fn parse_request(body: &[u8]) -> Result<SoapRequest> {
    let envelope = parse_document(body)?;
    let action = child_elements(body_of(&envelope)?)
        .next()
        .ok_or_else(|| SoapError::Parse("Missing action element".to_string()))?;

    Ok(SoapRequest {
        service_type: action.namespace.clone(),
        action: action.name.clone(),
        arguments: arguments_of(action),
    })
}

/// Parse the device's answer to `action`.
///
/// # Errors
///
/// A fault body yields `SoapError::Fault` with the decoded UPnP error. A body
/// without `<actionResponse>` yields `SoapError::Parse`.
pub fn parse_response(body: &[u8], action: &str) -> Result<Vec<(String, String)>> {
    let envelope = parse_document(body)?;
    let body = body_of(&envelope)?;

    if let Some(fault) = body.get_child("Fault") {
        return Err(SoapError::Fault(decode_fault(fault)));
    }

    let response_name = format!("{}Response", action);
    body.get_child(response_name.as_str())
        .map(arguments_of)
        .ok_or_else(|| SoapError::Parse(format!("Missing {} element", response_name)))
}

/// Decode the UPnP error inside a `<Fault>`; devices disagree on the casing of
/// `UPnPError`, and a fault without detail maps to code 500.
fn decode_fault(fault: &Element) -> UpnpError {
    let detail = fault
        .get_child("detail")
        .and_then(|d| child_elements(d).find(|e| e.name.eq_ignore_ascii_case("UPnPError")));

    let code = detail
        .and_then(|d| d.get_child("errorCode"))
        .and_then(|c| c.get_text())
        .and_then(|t| t.trim().parse::<u16>().ok())
        .unwrap_or(500);

    let description = detail
        .and_then(|d| d.get_child("errorDescription"))
        .map(text_of)
        .or_else(|| fault.get_child("faultstring").map(text_of))
        .unwrap_or_default();

    UpnpError::new(code, description)
}

/// Event body announcing changed state variables.
pub fn build_property_set(variables: &[(&str, &str)]) -> String {
    let mut out = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><e:propertyset xmlns:e="{EVENT_NS}">"#
    );
    for (name, value) in variables {
        out.push_str(&format!(
            "<e:property><{name}>{}</{name}></e:property>",
            escape(value)
        ));
    }
    out.push_str("</e:propertyset>");
    out
}

/// Parse an event body into `(variable, value)` pairs in document order.
pub fn parse_property_set(body: &[u8]) -> Result<Vec<(String, String)>> {
    let root = parse_document(body)?;
    if root.name != "propertyset" {
        return Err(SoapError::Parse(format!(
            "Expected propertyset, found {}",
            root.name
        )));
    }

    Ok(child_elements(&root)
        .filter(|e| e.name == "property")
        .flat_map(arguments_of)
        .collect())
}

/// Parse a `TIMEOUT: Second-N` header. `Second-infinite` and garbage yield `None`.
pub fn parse_timeout_header(value: &str) -> Option<u32> {
    let value = value.trim();
    let prefix = value.get(..7)?;
    if !prefix.eq_ignore_ascii_case("Second-") {
        return None;
    }
    value[7..].trim().parse().ok()
}

pub fn format_timeout_header(seconds: u32) -> String {
    format!("Second-{}", seconds)
}

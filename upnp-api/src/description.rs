//! Device description and SCPD documents.
//!
//! Parsing goes through serde-mapped structs; the documents a hosted device
//! serves are written back out by hand with escaped text content.

use quick_xml::escape::escape;
use serde::Deserialize;
use uuid::Uuid;

use crate::action::Action;
use crate::argument::{Argument, Direction};
use crate::device::Device;
use crate::error::{ApiError, Result};
use crate::service::{Service, StateVariable};

pub const DEVICE_NS: &str = "urn:schemas-upnp-org:device-1-0";
pub const SERVICE_NS: &str = "urn:schemas-upnp-org:service-1-0";

/// UPnP device description root element.
#[derive(Debug, Deserialize)]
struct RootDescription {
    #[serde(rename = "URLBase")]
    url_base: Option<String>,
    device: DeviceDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDescription {
    #[serde(default)]
    device_type: String,
    #[serde(default)]
    friendly_name: String,
    #[serde(default)]
    manufacturer: String,
    #[serde(rename = "manufacturerURL")]
    manufacturer_url: Option<String>,
    model_description: Option<String>,
    #[serde(default)]
    model_name: String,
    model_number: Option<String>,
    #[serde(rename = "modelURL")]
    model_url: Option<String>,
    serial_number: Option<String>,
    #[serde(rename = "UDN", default)]
    udn: String,
    #[serde(rename = "presentationURL")]
    presentation_url: Option<String>,
    service_list: Option<ServiceList>,
    device_list: Option<DeviceList>,
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(rename = "service", default)]
    services: Vec<ServiceDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceDescription {
    service_type: String,
    service_id: String,
    #[serde(rename = "SCPDURL", default)]
    scpd_url: String,
    #[serde(rename = "controlURL", default)]
    control_url: String,
    #[serde(rename = "eventSubURL", default)]
    event_sub_url: String,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(rename = "device", default)]
    devices: Vec<DeviceDescription>,
}

/// SCPD root element.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScpdDescription {
    action_list: Option<ActionList>,
    service_state_table: Option<StateTable>,
}

#[derive(Debug, Deserialize)]
struct ActionList {
    #[serde(rename = "action", default)]
    actions: Vec<ActionDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionDescription {
    name: String,
    argument_list: Option<ArgumentList>,
}

#[derive(Debug, Deserialize)]
struct ArgumentList {
    #[serde(rename = "argument", default)]
    arguments: Vec<ArgumentDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArgumentDescription {
    name: String,
    direction: String,
    #[serde(default)]
    related_state_variable: String,
}

#[derive(Debug, Deserialize)]
struct StateTable {
    #[serde(rename = "stateVariable", default)]
    variables: Vec<StateVariableDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateVariableDescription {
    #[serde(rename = "@sendEvents")]
    send_events: Option<String>,
    /// UPnP 1.0 drafts put the flag in an element instead of an attribute.
    send_events_attribute: Option<String>,
    name: String,
    #[serde(default)]
    data_type: String,
    default_value: Option<String>,
    allowed_value_list: Option<AllowedValueList>,
}

#[derive(Debug, Deserialize)]
struct AllowedValueList {
    #[serde(rename = "allowedValue", default)]
    values: Vec<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a device description into a device tree.
///
/// # Errors
///
/// Returns `ApiError::Description` if the XML is malformed, a device has no
/// UDN, or identity keys repeat within a parent.
pub fn parse_device_description(xml: &str, location: Option<&str>) -> Result<Device> {
    let root = parse_root(xml)?;
    let mut device = build_device(root.device, MissingUdn::Reject)?;
    device.set_url_base(non_empty(root.url_base));
    if let Some(location) = location {
        device.set_location(location);
    }
    Ok(device)
}

/// Parse the description of a device about to be hosted.
///
/// Devices without a UDN get a fresh `uuid:<v4>` one.
pub fn parse_hosted_description(xml: &str) -> Result<Device> {
    let root = parse_root(xml)?;
    let mut device = build_device(root.device, MissingUdn::Generate)?;
    device.set_url_base(non_empty(root.url_base));
    Ok(device)
}

fn parse_root(xml: &str) -> Result<RootDescription> {
    quick_xml::de::from_str(xml)
        .map_err(|e| ApiError::Description(format!("Failed to parse device XML: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingUdn {
    Reject,
    Generate,
}

fn build_device(description: DeviceDescription, missing_udn: MissingUdn) -> Result<Device> {
    let udn = match description.udn.trim() {
        "" if missing_udn == MissingUdn::Generate => format!("uuid:{}", Uuid::new_v4()),
        "" => {
            return Err(ApiError::Description(format!(
                "device '{}' has no UDN",
                description.friendly_name.trim()
            )))
        }
        udn => udn.to_string(),
    };

    let mut device = Device::new(
        udn,
        description.device_type.trim(),
        description.friendly_name.trim(),
    );
    device.manufacturer = description.manufacturer.trim().to_string();
    device.manufacturer_url = non_empty(description.manufacturer_url);
    device.model_description = non_empty(description.model_description);
    device.model_name = description.model_name.trim().to_string();
    device.model_number = non_empty(description.model_number);
    device.model_url = non_empty(description.model_url);
    device.serial_number = non_empty(description.serial_number);
    device.presentation_url = non_empty(description.presentation_url);

    for service in description.service_list.map(|l| l.services).unwrap_or_default() {
        device.add_service(
            Service::new(service.service_type.trim(), service.service_id.trim()).with_urls(
                service.scpd_url.trim(),
                service.control_url.trim(),
                service.event_sub_url.trim(),
            ),
        )?;
    }

    for child in description.device_list.map(|l| l.devices).unwrap_or_default() {
        device.add_device(build_device(child, missing_udn)?)?;
    }

    Ok(device)
}

/// Parse an SCPD document into actions and state variables.
pub fn parse_scpd(xml: &str) -> Result<(Vec<Action>, Vec<StateVariable>)> {
    let scpd: ScpdDescription = quick_xml::de::from_str(xml)
        .map_err(|e| ApiError::Description(format!("Failed to parse SCPD XML: {}", e)))?;

    let mut actions = Vec::new();
    for description in scpd.action_list.map(|l| l.actions).unwrap_or_default() {
        let mut action = Action::new(description.name.trim());
        for argument in description.argument_list.map(|l| l.arguments).unwrap_or_default() {
            let direction: Direction = argument.direction.parse()?;
            action.add_argument(Argument::new(
                argument.name.trim(),
                direction,
                argument.related_state_variable.trim(),
            ))?;
        }
        actions.push(action);
    }

    let variables = scpd
        .service_state_table
        .map(|t| t.variables)
        .unwrap_or_default()
        .into_iter()
        .map(|v| {
            // Absent flag means evented.
            let send_events = v
                .send_events
                .or(v.send_events_attribute)
                .map(|flag| !flag.trim().eq_ignore_ascii_case("no"))
                .unwrap_or(true);
            let default_value = non_empty(v.default_value);
            StateVariable {
                name: v.name.trim().to_string(),
                data_type: v.data_type.trim().to_string(),
                value: default_value.clone().unwrap_or_default(),
                default_value,
                allowed_values: v
                    .allowed_value_list
                    .map(|l| l.values.into_iter().map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
                send_events,
            }
        })
        .collect();

    Ok((actions, variables))
}

fn push_element(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!("<{name}>{}</{name}>", escape(value)));
}

fn push_optional(out: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        push_element(out, name, value);
    }
}

const SPEC_VERSION: &str = "<specVersion><major>1</major><minor>0</minor></specVersion>";

pub(crate) fn write_device_description(device: &Device) -> String {
    let mut out = format!(r#"<?xml version="1.0"?><root xmlns="{DEVICE_NS}">{SPEC_VERSION}"#);
    push_optional(&mut out, "URLBase", device.url_base());
    write_device(&mut out, device);
    out.push_str("</root>");
    out
}

fn write_device(out: &mut String, device: &Device) {
    out.push_str("<device>");
    push_element(out, "deviceType", &device.device_type);
    push_element(out, "friendlyName", &device.friendly_name);
    push_element(out, "manufacturer", &device.manufacturer);
    push_optional(out, "manufacturerURL", device.manufacturer_url.as_deref());
    push_optional(out, "modelDescription", device.model_description.as_deref());
    push_element(out, "modelName", &device.model_name);
    push_optional(out, "modelNumber", device.model_number.as_deref());
    push_optional(out, "modelURL", device.model_url.as_deref());
    push_optional(out, "serialNumber", device.serial_number.as_deref());
    push_element(out, "UDN", device.udn());
    push_optional(out, "presentationURL", device.presentation_url.as_deref());

    if !device.services().is_empty() {
        out.push_str("<serviceList>");
        for service in device.services() {
            out.push_str("<service>");
            push_element(out, "serviceType", service.service_type());
            push_element(out, "serviceId", service.service_id());
            push_element(out, "SCPDURL", &service.scpd_url);
            push_element(out, "controlURL", &service.control_url);
            push_element(out, "eventSubURL", &service.event_sub_url);
            out.push_str("</service>");
        }
        out.push_str("</serviceList>");
    }

    if !device.devices().is_empty() {
        out.push_str("<deviceList>");
        for child in device.devices() {
            write_device(out, child);
        }
        out.push_str("</deviceList>");
    }
    out.push_str("</device>");
}

pub(crate) fn write_scpd(service: &Service) -> String {
    let mut out = format!(r#"<?xml version="1.0"?><scpd xmlns="{SERVICE_NS}">{SPEC_VERSION}"#);

    out.push_str("<actionList>");
    for action in service.actions() {
        out.push_str("<action>");
        push_element(&mut out, "name", action.name());
        if !action.arguments().is_empty() {
            out.push_str("<argumentList>");
            for argument in action.arguments() {
                out.push_str("<argument>");
                push_element(&mut out, "name", argument.name());
                push_element(&mut out, "direction", argument.direction().as_str());
                push_element(&mut out, "relatedStateVariable", argument.related_state_variable());
                out.push_str("</argument>");
            }
            out.push_str("</argumentList>");
        }
        out.push_str("</action>");
    }
    out.push_str("</actionList>");

    out.push_str("<serviceStateTable>");
    for variable in service.state_variables() {
        let flag = if variable.send_events { "yes" } else { "no" };
        out.push_str(&format!(r#"<stateVariable sendEvents="{flag}">"#));
        push_element(&mut out, "name", &variable.name);
        push_element(&mut out, "dataType", &variable.data_type);
        push_optional(&mut out, "defaultValue", variable.default_value.as_deref());
        if !variable.allowed_values.is_empty() {
            out.push_str("<allowedValueList>");
            for value in &variable.allowed_values {
                push_element(&mut out, "allowedValue", value);
            }
            out.push_str("</allowedValueList>");
        }
        out.push_str("</stateVariable>");
    }
    out.push_str("</serviceStateTable></scpd>");
    out
}

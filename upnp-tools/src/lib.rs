//! Shared pieces of the `upnpdump` and `upnpgwdump` binaries.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use tracing::debug;
use upnp_sdk::logging::{self, LoggingMode};
use upnp_sdk::{ControlPoint, ControlPointConfig, Device, Service};

pub const INTERNET_GATEWAY_DEVICE: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";
pub const WAN_IP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";
pub const WAN_PPP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANPPPConnection:1";

/// `-v LEVEL` option shared by the tools.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct Verbosity {
    /// Log level: 0 silent, 1 info, 2 debug, 3 trace
    #[arg(short = 'v', long = "verbose", value_name = "LEVEL", default_value_t = 0)]
    pub level: u8,
}

impl Verbosity {
    pub fn mode(&self) -> LoggingMode {
        logging::mode_for_verbosity(self.level)
    }

    pub fn install(&self) -> Result<()> {
        logging::install(self.mode()).context("Failed to set up logging")
    }
}

/// Start a control point, search for root devices and wait out the window.
pub fn discover(config: ControlPointConfig) -> Result<ControlPoint> {
    let control_point = ControlPoint::new(config).context("Failed to create control point")?;
    control_point.start().context("Failed to start control point")?;
    control_point
        .search_root_device()
        .context("Failed to send search")?;

    debug!("Waiting {:?} for search responses", control_point.config().search_window());
    control_point.wait_for_responses();
    Ok(control_point)
}

/// Presentation URL when the device declares a resolvable one, else its location.
pub fn device_url(device: &Device) -> String {
    match device.presentation_absolute_url() {
        Some(Ok(url)) => url,
        _ => device.location().unwrap_or_default().to_string(),
    }
}

/// `[n] 'friendlyName', 'deviceType', url`
pub fn device_line(n: usize, device: &Device) -> String {
    format!(
        "[{}] '{}', '{}', {}",
        n,
        device.friendly_name,
        device.device_type,
        device_url(device)
    )
}

/// `[n] friendlyName (location)`
pub fn gateway_line(n: usize, gateway: &Device) -> String {
    format!(
        "[{}] {} ({})",
        n,
        gateway.friendly_name,
        gateway.location().unwrap_or_default()
    )
}

/// The WAN connection service of a gateway, IP preferred over PPP.
pub fn wan_connection(gateway: &Device) -> Option<(&Device, &Service)> {
    gateway
        .find_service(WAN_IP_CONNECTION)
        .or_else(|| gateway.find_service(WAN_PPP_CONNECTION))
}

/// Ask a gateway for its external address.
pub fn external_ip_address(control_point: &ControlPoint, gateway: &Device) -> Result<String> {
    let (device, service) = wan_connection(gateway)
        .ok_or_else(|| anyhow!("{} has no WAN connection service", gateway.udn()))?;

    let outputs = control_point.invoke(
        device.udn(),
        service.service_type(),
        "GetExternalIPAddress",
        &HashMap::new(),
    )?;
    outputs
        .get("NewExternalIPAddress")
        .cloned()
        .ok_or_else(|| anyhow!("GetExternalIPAddress returned no address"))
}

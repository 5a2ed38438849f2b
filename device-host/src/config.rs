//! Host configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use ssdp::{DEFAULT_MAX_AGE, SSDP_PORT};
use upnp_api::eventing::DEFAULT_SUBSCRIPTION_TIMEOUT;

/// Settings for a [`DeviceHost`](crate::DeviceHost).
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address the HTTP server binds to.
    pub bind_ip: IpAddr,
    /// HTTP port; 0 picks an ephemeral port.
    pub port: u16,
    /// Address written into the advertised location. Detected when `None`
    /// and `bind_ip` is unspecified.
    pub advertise_ip: Option<IpAddr>,
    /// Path the device description is served from.
    pub description_path: String,
    /// `CACHE-CONTROL: max-age` of advertisements, in seconds.
    pub max_age: u32,
    /// `SERVER` header for SSDP and HTTP replies.
    pub server_header: String,
    /// Subscription timeout granted when the subscriber asks for none, or for infinite.
    pub subscription_timeout: u32,
    /// Bound on one event delivery.
    pub event_timeout: Duration,
    /// Delay before a new subscriber's initial event.
    pub initial_event_delay: Duration,
    /// Socket address the SSDP advertiser binds to.
    pub multicast_bind: SocketAddrV4,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            advertise_ip: None,
            description_path: "/description.xml".to_string(),
            max_age: DEFAULT_MAX_AGE,
            server_header: default_server_header(),
            subscription_timeout: DEFAULT_SUBSCRIPTION_TIMEOUT,
            event_timeout: Duration::from_secs(5),
            initial_event_delay: Duration::from_millis(200),
            multicast_bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT),
        }
    }
}

impl HostConfig {
    /// Serve on `127.0.0.1` with an ephemeral port.
    pub fn loopback() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            advertise_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_advertise_ip(mut self, ip: IpAddr) -> Self {
        self.advertise_ip = Some(ip);
        self
    }

    pub fn with_description_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.description_path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }
}

/// `OS/version UPnP/1.1 product/version`, as UDA asks for.
pub fn default_server_header() -> String {
    format!(
        "{}/1.0 UPnP/1.1 upnp-sdk/{}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    )
}

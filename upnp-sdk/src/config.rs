//! Control point configuration.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use ssdp::{DEFAULT_MX, ROOT_DEVICE, SSDP_PORT};

/// Settings for a [`ControlPoint`](crate::ControlPoint).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use upnp_sdk::ControlPointConfig;
///
/// let config = ControlPointConfig::default()
///     .with_search_mx(2)
///     .with_invocation_timeout(Duration::from_secs(3));
/// assert_eq!(config.search_mx, 2);
/// ```
#[derive(Debug, Clone)]
pub struct ControlPointConfig {
    /// Response window advertised in searches, in seconds. Devices spread
    /// their responses over this window and discovery waits it out.
    /// Default: 3
    pub search_mx: u32,

    /// Target of [`ControlPoint::search_root_device`](crate::ControlPoint::search_root_device).
    /// Default: `upnp:rootdevice`
    pub search_target: String,

    /// Bound on one description or SCPD fetch.
    /// Default: 5 seconds
    pub http_timeout: Duration,

    /// Bound on one action invocation.
    /// Default: 10 seconds
    pub invocation_timeout: Duration,

    /// Address the announcement listener binds to.
    /// Default: `0.0.0.0:1900`
    pub multicast_bind: SocketAddrV4,

    /// Address searches are sent from; responses arrive here.
    /// Default: `0.0.0.0:0`
    pub unicast_bind: SocketAddrV4,

    /// Fetch every SCPD when a device registers instead of on first use.
    /// Default: false
    pub load_service_descriptions: bool,

    /// `USER-AGENT` header of searches.
    pub user_agent: String,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            search_mx: DEFAULT_MX,
            search_target: ROOT_DEVICE.to_string(),
            http_timeout: Duration::from_secs(5),
            invocation_timeout: Duration::from_secs(10),
            multicast_bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT),
            unicast_bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            load_service_descriptions: false,
            user_agent: format!(
                "{}/1.0 UPnP/1.1 upnp-sdk/{}",
                std::env::consts::OS,
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl ControlPointConfig {
    /// Short response window for interactive tools.
    pub fn fast() -> Self {
        Self {
            search_mx: 1,
            ..Self::default()
        }
    }

    pub fn with_search_mx(mut self, search_mx: u32) -> Self {
        self.search_mx = search_mx;
        self
    }

    pub fn with_search_target(mut self, search_target: impl Into<String>) -> Self {
        self.search_target = search_target.into();
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    pub fn with_service_descriptions(mut self, load: bool) -> Self {
        self.load_service_descriptions = load;
        self
    }

    /// The response window as a duration.
    pub fn search_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.search_mx))
    }
}

//! ControlPoint - main entry point for the SDK
//!
//! Discovers devices, keeps the registry current and invokes actions on
//! registered devices. Fully synchronous: discovery runs on the SSDP receive
//! threads, everything else on the caller's thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use soap_client::{SoapClient, SubscriptionResponse};
use ssdp::{
    InboundMessage, MulticastListener, MulticastServer, MulticastSocket, ResponseListener,
    SsdpMessage, UdpTransport, UnicastServer, ROOT_DEVICE,
};
use tracing::{debug, info, trace, warn};
use upnp_api::{ActionInvoker, ApiError, Device, Service};

use crate::config::ControlPointConfig;
use crate::error::{Result, SdkError};
use crate::fetch::{DescriptionFetcher, HttpFetcher};
use crate::registry::DeviceRegistry;

/// Turns discovery traffic into registry updates.
struct DiscoveryHandler {
    registry: Arc<DeviceRegistry>,
    fetcher: Arc<dyn DescriptionFetcher>,
    load_services: bool,
}

impl DiscoveryHandler {
    fn handle(&self, message: &SsdpMessage, from: SocketAddr) {
        if message.is_byebye() {
            if let Some(udn) = message.udn() {
                if let Some(device) = self.registry.remove(udn) {
                    info!("Removed {} ('{}')", device.udn(), device.friendly_name);
                }
            }
            return;
        }

        let (Some(location), Some(udn)) = (message.location(), message.udn()) else {
            trace!("Advertisement from {} without LOCATION or USN", from);
            return;
        };
        if self.registry.refresh(udn, location, Some(from)) {
            trace!("Refreshed {} from {}", udn, from);
            return;
        }

        match self.describe(location) {
            Ok(mut device) => {
                device.touch(Some(from));
                info!(
                    "Registered {} ('{}', {}) at {}",
                    device.udn(),
                    device.friendly_name,
                    device.device_type,
                    location
                );
                self.registry.insert(device);
            }
            Err(e) => warn!("Skipping device at {}: {}", location, e),
        }
    }

    fn describe(&self, location: &str) -> Result<Device> {
        let xml = self.fetcher.fetch_document(location)?;
        let mut device = Device::from_description(&xml, Some(location))?;
        if self.load_services {
            load_all_services(&mut device, self.fetcher.as_ref());
        }
        Ok(device)
    }
}

impl MulticastListener for DiscoveryHandler {
    fn device_notify_received(&self, request: &InboundMessage) {
        self.handle(&request.message, request.from);
    }

    fn device_search_received(&self, request: &InboundMessage) {
        trace!("Ignoring M-SEARCH from {}", request.from);
    }
}

impl ResponseListener for DiscoveryHandler {
    fn device_response_received(&self, response: &InboundMessage) {
        self.handle(&response.message, response.from);
    }
}

/// Fetch the SCPD of every service in the tree. Failures leave the service unloaded.
fn load_all_services(device: &mut Device, fetcher: &dyn DescriptionFetcher) {
    let mut pending = Vec::new();
    for node in device.all_devices() {
        for service in node.services().iter().filter(|s| !s.is_loaded()) {
            match node.absolute_url(&service.scpd_url) {
                Ok(url) => pending.push((node.udn().to_string(), service.service_id().to_string(), url)),
                Err(e) => warn!("No SCPD URL for {}: {}", service.service_id(), e),
            }
        }
    }

    for (udn, service_id, url) in pending {
        let loaded = fetcher.fetch_document(&url).and_then(|xml| {
            let service = device
                .device_by_udn_mut(&udn)
                .and_then(|d| d.service_by_id_mut(&service_id))
                .ok_or_else(|| SdkError::Api(ApiError::ServiceNotFound(service_id.clone())))?;
            service.load_scpd(&xml).map_err(SdkError::from)
        });
        if let Err(e) = loaded {
            warn!("Could not load {} from {}: {}", service_id, url, e);
        }
    }
}

/// Where to reach one service of a registered device.
struct ServiceEndpoint {
    service: Service,
    control_url: String,
}

/// UPnP control point.
///
/// # Example
///
/// ```no_run
/// use std::collections::HashMap;
/// use upnp_sdk::{ControlPoint, ControlPointConfig};
///
/// fn main() -> Result<(), upnp_sdk::SdkError> {
///     let control_point = ControlPoint::new(ControlPointConfig::default())?;
///     control_point.start()?;
///
///     for device in control_point.discover()? {
///         println!("{} ({})", device.friendly_name, device.device_type);
///     }
///
///     let outputs = control_point.invoke(
///         "uuid:lamp-1",
///         "urn:schemas-upnp-org:service:SwitchPower:1",
///         "GetStatus",
///         &HashMap::new(),
///     )?;
///     println!("{:?}", outputs.get("ResultStatus"));
///
///     control_point.stop()?;
///     Ok(())
/// }
/// ```
pub struct ControlPoint {
    config: ControlPointConfig,
    registry: Arc<DeviceRegistry>,
    fetcher: Arc<dyn DescriptionFetcher>,
    multicast: MulticastServer,
    unicast: UnicastServer,
    invoker: ActionInvoker,
    events: SoapClient,
}

impl ControlPoint {
    /// Control point on real UDP sockets with an HTTP fetcher.
    pub fn new(config: ControlPointConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.http_timeout)?);
        let multicast = Arc::new(UdpTransport::multicast(config.multicast_bind));
        let unicast = Arc::new(UdpTransport::unicast(config.unicast_bind));
        Ok(Self::with_parts(config, multicast, unicast, fetcher))
    }

    /// Control point over the given transports and fetcher.
    pub fn with_parts(
        config: ControlPointConfig,
        multicast_socket: Arc<dyn MulticastSocket>,
        unicast_socket: Arc<dyn MulticastSocket>,
        fetcher: Arc<dyn DescriptionFetcher>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let handler = Arc::new(DiscoveryHandler {
            registry: Arc::clone(&registry),
            fetcher: Arc::clone(&fetcher),
            load_services: config.load_service_descriptions,
        });

        let multicast = MulticastServer::new(multicast_socket, handler.clone());
        let unicast = UnicastServer::new(unicast_socket, handler, config.user_agent.clone());

        Self {
            invoker: ActionInvoker::with_timeout(config.invocation_timeout),
            events: SoapClient::with_timeout(config.http_timeout),
            config,
            registry,
            fetcher,
            multicast,
            unicast,
        }
    }

    pub fn config(&self) -> &ControlPointConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Start listening for announcements and search responses.
    ///
    /// # Errors
    ///
    /// `SsdpError::BindFailure` if either socket cannot be bound, including
    /// when the control point is already running. Nothing is left listening.
    pub fn start(&self) -> Result<()> {
        self.multicast.start()?;
        if let Err(e) = self.unicast.start() {
            let _ = self.multicast.stop();
            return Err(e.into());
        }
        info!("Control point started");
        Ok(())
    }

    /// Stop both receive loops and release their sockets.
    ///
    /// Safe to call when stopped. In-flight invocations are not cancelled.
    pub fn stop(&self) -> Result<()> {
        let multicast = self.multicast.stop();
        let unicast = self.unicast.stop();
        multicast?;
        unicast?;
        debug!("Control point stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.multicast.is_listening() && self.unicast.is_listening()
    }

    /// Search for the configured target (root devices by default).
    pub fn search_root_device(&self) -> Result<()> {
        self.search(&self.config.search_target)
    }

    /// Search for an arbitrary target. Responses are handled in the background.
    pub fn search(&self, search_target: &str) -> Result<()> {
        self.unicast.search(search_target, self.config.search_mx)?;
        Ok(())
    }

    /// Sleep out the search response window.
    pub fn wait_for_responses(&self) {
        thread::sleep(self.config.search_window());
    }

    /// Search for root devices, wait the full response window and return the registry.
    pub fn discover(&self) -> Result<Vec<Device>> {
        self.search(ROOT_DEVICE)?;
        self.wait_for_responses();
        Ok(self.root_devices())
    }

    /// Every registered root device.
    pub fn root_devices(&self) -> Vec<Device> {
        self.registry.all()
    }

    pub fn root_devices_by_type(&self, device_type: &str) -> Vec<Device> {
        self.registry.by_type(device_type)
    }

    /// The device (root or embedded) identified by `udn`.
    pub fn device_by_udn(&self, udn: &str) -> Result<Device> {
        self.registry
            .get(udn)
            .ok_or_else(|| SdkError::DeviceNotFound(udn.to_string()))
    }

    /// Fetch and attach the SCPD of a service if it is not loaded yet.
    pub fn load_service(&self, udn: &str, service_type: &str) -> Result<()> {
        let scpd_url = self
            .registry
            .with_device(udn, |device| -> upnp_api::Result<Option<String>> {
                let service = device
                    .service_by_type(service_type)
                    .ok_or_else(|| ApiError::ServiceNotFound(format!("{} on {}", service_type, udn)))?;
                if service.is_loaded() {
                    return Ok(None);
                }
                device.absolute_url(&service.scpd_url).map(Some)
            })
            .ok_or_else(|| SdkError::DeviceNotFound(udn.to_string()))??;

        let Some(scpd_url) = scpd_url else {
            return Ok(());
        };
        let xml = self.fetcher.fetch_document(&scpd_url)?;

        self.registry
            .with_device_mut(udn, |device| {
                let service = device
                    .services_mut()
                    .iter_mut()
                    .find(|s| s.service_type() == service_type);
                match service {
                    Some(service) if !service.is_loaded() => service.load_scpd(&xml),
                    Some(_) => Ok(()),
                    None => Err(ApiError::ServiceNotFound(service_type.to_string())),
                }
            })
            .ok_or_else(|| SdkError::DeviceNotFound(udn.to_string()))??;
        debug!("Loaded {} of {} from {}", service_type, udn, scpd_url);
        Ok(())
    }

    fn endpoint(&self, udn: &str, service_type: &str) -> Result<ServiceEndpoint> {
        self.load_service(udn, service_type)?;
        let endpoint = self
            .registry
            .with_device(udn, |device| -> std::result::Result<ServiceEndpoint, ApiError> {
                let service = device
                    .service_by_type(service_type)
                    .ok_or_else(|| ApiError::ServiceNotFound(format!("{} on {}", service_type, udn)))?;
                Ok(ServiceEndpoint {
                    control_url: device.absolute_url(&service.control_url)?,
                    service: service.clone(),
                })
            })
            .ok_or_else(|| SdkError::DeviceNotFound(udn.to_string()))??;
        Ok(endpoint)
    }

    /// Invoke `action` on a service of a registered device.
    ///
    /// The service description is loaded on first use. The call itself runs
    /// with no registry lock held.
    ///
    /// # Errors
    ///
    /// - `SdkError::DeviceNotFound` for an unknown UDN
    /// - `ApiError::ServiceNotFound` / `ActionNotFound` for lookup misses
    /// - `ApiError::MissingArgument`, `MissingResult`, `InvocationTimeout`
    ///   and `Upnp` as returned by the invocation
    pub fn invoke(
        &self,
        udn: &str,
        service_type: &str,
        action: &str,
        inputs: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        let endpoint = self.endpoint(udn, service_type)?;
        let mut action = endpoint.service.action(action)?.clone();

        self.invoker.invoke(&endpoint.control_url, &mut action, inputs)?;
        Ok(action.output_values())
    }

    /// Subscribe `callback_url` to a service's events.
    pub fn subscribe(
        &self,
        udn: &str,
        service_type: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse> {
        let endpoint = self.event_endpoint(udn, service_type)?;
        let response = self
            .events
            .subscribe(&endpoint, callback_url, timeout_seconds)?;
        debug!("Subscribed to {} on {} as {}", service_type, udn, response.sid);
        Ok(response)
    }

    /// Renew a subscription, returning the granted timeout.
    pub fn renew(&self, udn: &str, service_type: &str, sid: &str, timeout_seconds: u32) -> Result<u32> {
        let endpoint = self.event_endpoint(udn, service_type)?;
        Ok(self.events.renew_subscription(&endpoint, sid, timeout_seconds)?)
    }

    pub fn unsubscribe(&self, udn: &str, service_type: &str, sid: &str) -> Result<()> {
        let endpoint = self.event_endpoint(udn, service_type)?;
        self.events.unsubscribe(&endpoint, sid)?;
        Ok(())
    }

    // Eventing does not need the SCPD.
    fn event_endpoint(&self, udn: &str, service_type: &str) -> Result<String> {
        self.registry
            .with_device(udn, |device| -> upnp_api::Result<String> {
                let service = device
                    .service_by_type(service_type)
                    .ok_or_else(|| ApiError::ServiceNotFound(format!("{} on {}", service_type, udn)))?;
                device.absolute_url(&service.event_sub_url)
            })
            .ok_or_else(|| SdkError::DeviceNotFound(udn.to_string()))?
            .map_err(SdkError::from)
    }
}

impl Drop for ControlPoint {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

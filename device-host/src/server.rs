//! HTTP hosting of a device tree.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use soap_client::{envelope, SoapClient, UpnpError};
use ssdp::{MulticastListener, MulticastServer, MulticastSocket, UdpTransport};
use tokio::sync::mpsc;
use warp::http::{HeaderMap, Method, Response, StatusCode};
use warp::path::FullPath;
use warp::Filter;
use tracing::{debug, error, info, warn};
use upnp_api::invocation::{dispatch, prepare_action};
use upnp_api::{ActionListener, ActionReply, ApiError, DeliveryReport, Device, EventBatch, EventSender, Service};

use crate::advertiser::Advertiser;
use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::router::{assign_default_urls, Endpoint, Route, Router};

const NT_EVENT: &str = "upnp:event";

/// State shared by every request handler.
struct HostState {
    device: RwLock<Device>,
    router: Router,
    listener: Option<Arc<dyn ActionListener>>,
    events: Arc<dyn EventSender>,
    config: HostConfig,
}

/// Serves a device tree over HTTP and, on request, advertises it over SSDP.
///
/// The host answers on the paths the device declares:
///
/// - `GET` on the description path and on every `SCPDURL`
/// - `POST` on every `controlURL`, dispatched to the [`ActionListener`]
/// - `SUBSCRIBE`/`UNSUBSCRIBE` on every `eventSubURL`
///
/// # Example
///
/// ```no_run
/// use device_host::{DeviceHost, HostConfig};
/// use upnp_api::Device;
///
/// #[tokio::main]
/// async fn main() {
///     let device = Device::new("uuid:lamp-1", "urn:schemas-upnp-org:device:BinaryLight:1", "Lamp");
///     let mut host = DeviceHost::start(device, None, HostConfig::default())
///         .await
///         .expect("Failed to start device host");
///
///     host.start_advertising().expect("Failed to advertise");
///     println!("Description at {}", host.location());
///
///     host.shutdown().await.unwrap();
/// }
/// ```
pub struct DeviceHost {
    state: Arc<HostState>,
    local_addr: SocketAddr,
    base_url: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
    advertising: Option<(MulticastServer, Arc<Advertiser>)>,
}

impl DeviceHost {
    /// Start serving `device`, delivering events with a [`SoapClient`].
    pub async fn start(
        device: Device,
        listener: Option<Arc<dyn ActionListener>>,
        config: HostConfig,
    ) -> Result<Self> {
        let events = Arc::new(SoapClient::with_timeout(config.event_timeout));
        Self::start_with_sender(device, listener, events, config).await
    }

    /// Start serving `device` with a custom event channel.
    ///
    /// Services without URLs are served under `/service/{scpd,control,event}/`.
    ///
    /// # Errors
    ///
    /// - `HostError::PathConflict` if two endpoints of the tree share a path
    /// - `HostError::Bind` if the HTTP listener cannot be bound
    /// - `HostError::NoAdvertiseAddress` if no reachable address is known
    pub async fn start_with_sender(
        mut device: Device,
        listener: Option<Arc<dyn ActionListener>>,
        events: Arc<dyn EventSender>,
        config: HostConfig,
    ) -> Result<Self> {
        assign_default_urls(&mut device);
        let router = Router::new(&device, &config.description_path)?;
        let bind_addr = SocketAddr::new(config.bind_ip, config.port);
        let state = Arc::new(HostState {
            device: RwLock::new(device),
            router,
            listener,
            events,
            config,
        });

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (local_addr, server) = warp::serve(routes(state.clone()))
            .try_bind_with_graceful_shutdown(bind_addr, async move {
                shutdown_rx.recv().await;
            })
            .map_err(|e| HostError::Bind(format!("{}: {}", bind_addr, e)))?;

        let advertise_ip = advertise_ip(&state.config, local_addr)?;
        let base_url = format!("http://{}", SocketAddr::new(advertise_ip, local_addr.port()));
        let udn = {
            let mut device = state.device.write();
            device.set_location(format!("{}{}", base_url, state.config.description_path));
            device.udn().to_string()
        };

        let server_handle = tokio::spawn(server);
        info!("Hosting {} at {} ({} routes)", udn, base_url, state.router.len());

        Ok(Self {
            state,
            local_addr,
            base_url,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
            advertising: None,
        })
    }

    /// `http://ip:port` the device is reachable at.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of the device description.
    pub fn location(&self) -> String {
        format!("{}{}", self.base_url, self.state.config.description_path)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &HostConfig {
        &self.state.config
    }

    /// Snapshot of the hosted tree, including live subscriptions.
    pub fn device(&self) -> Device {
        self.state.device.read().clone()
    }

    /// Current value of a state variable of the service `service_id` on `device_udn`.
    pub fn state_variable(&self, device_udn: &str, service_id: &str, name: &str) -> Option<String> {
        let device = self.state.device.read();
        find_service(&device, device_udn, service_id)?
            .state_variable(name)
            .map(|v| v.value.clone())
    }

    /// Change a state variable and notify the service's subscribers.
    ///
    /// Delivery is best-effort: failures are reported, never retried, and do
    /// not end the subscription.
    pub async fn set_state_variable(
        &self,
        device_udn: &str,
        service_id: &str,
        name: &str,
        value: &str,
    ) -> Result<DeliveryReport> {
        let batch = {
            let mut device = self.state.device.write();
            let service = find_service_mut(&mut device, device_udn, service_id).ok_or_else(|| {
                HostError::ServiceNotFound(format!("{} on {}", service_id, device_udn))
            })?;
            service.update_state_variable(name, value)?
        };

        let Some(batch) = batch else {
            return Ok(DeliveryReport::default());
        };
        let events = self.state.events.clone();
        tokio::task::spawn_blocking(move || batch.deliver(events.as_ref()))
            .await
            .map_err(|e| HostError::Runtime(e.to_string()))
    }

    /// Join the discovery group on the configured address and announce the device.
    pub fn start_advertising(&mut self) -> Result<()> {
        let socket = Arc::new(UdpTransport::multicast(self.state.config.multicast_bind));
        self.start_advertising_on(socket)
    }

    /// Advertise over an already constructed transport.
    pub fn start_advertising_on(&mut self, socket: Arc<dyn MulticastSocket>) -> Result<()> {
        if self.advertising.is_some() {
            debug!("Already advertising {}", self.location());
            return Ok(());
        }

        let advertiser = {
            let device = self.state.device.read();
            Arc::new(Advertiser::new(
                socket.clone(),
                &device,
                self.location(),
                self.state.config.max_age,
                self.state.config.server_header.clone(),
            ))
        };
        let listener: Arc<dyn MulticastListener> = advertiser.clone();
        let server = MulticastServer::new(socket, listener);
        server.start()?;

        if let Err(e) = advertiser.announce_alive() {
            warn!("Initial announcement failed: {}", e);
        }
        self.advertising = Some((server, advertiser));
        Ok(())
    }

    /// Withdraw the device from discovery and leave the group.
    pub fn stop_advertising(&mut self) -> Result<()> {
        let Some((server, advertiser)) = self.advertising.take() else {
            return Ok(());
        };
        if let Err(e) = advertiser.announce_byebye() {
            warn!("Withdrawal announcement failed: {}", e);
        }
        server.stop()?;
        Ok(())
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.is_some()
    }

    /// Stop advertising, then stop the HTTP server and wait for it to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop_advertising()?;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| HostError::Runtime(format!("server task failed: {}", e)))?;
        }
        info!("Stopped hosting {}", self.base_url);
        Ok(())
    }
}

impl Drop for DeviceHost {
    fn drop(&mut self) {
        if let Err(e) = self.stop_advertising() {
            debug!("Stopping advertiser on drop: {}", e);
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

fn routes(
    state: Arc<HostState>,
) -> impl Filter<Extract = (Response<String>,), Error = warp::Rejection> + Clone + Send + Sync + 'static {
    let state = warp::any().map(move || state.clone());
    warp::method()
        .and(warp::path::full())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and(state)
        .and_then(
            |method: Method, path: FullPath, headers: HeaderMap, body: Bytes, state: Arc<HostState>| async move {
                Ok::<_, warp::Rejection>(state.respond(&method, path.as_str(), &headers, body).await)
            },
        )
}

impl HostState {
    async fn respond(
        self: &Arc<Self>,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response<String> {
        let Some(route) = self.router.resolve(path).cloned() else {
            debug!("No route for {} {}", method, path);
            return http_response(StatusCode::NOT_FOUND, &[], String::new());
        };

        let response = match (method.as_str(), route.endpoint) {
            ("GET" | "HEAD", Endpoint::Description) => self.description(),
            ("GET" | "HEAD", Endpoint::Scpd) => self.scpd(&route),
            ("POST", Endpoint::Control) => self.control(&route, headers, body).await,
            ("SUBSCRIBE", Endpoint::Event) => self.subscribe(&route, headers),
            ("UNSUBSCRIBE", Endpoint::Event) => self.unsubscribe(&route, headers),
            _ => http_response(StatusCode::METHOD_NOT_ALLOWED, &[], String::new()),
        };
        debug!("{} {} -> {}", method, path, response.status());
        response
    }

    fn description(&self) -> Response<String> {
        let xml = self.device.read().to_description_xml();
        http_response(StatusCode::OK, &[("Content-Type", envelope::CONTENT_TYPE)], xml)
    }

    fn scpd(&self, route: &Route) -> Response<String> {
        let device = self.device.read();
        match route.service(&device) {
            Some(service) => http_response(
                StatusCode::OK,
                &[("Content-Type", envelope::CONTENT_TYPE)],
                service.to_scpd_xml(),
            ),
            None => http_response(StatusCode::NOT_FOUND, &[], String::new()),
        }
    }

    async fn control(&self, route: &Route, headers: &HeaderMap, body: Bytes) -> Response<String> {
        let request = match envelope::parse_request(&body) {
            Ok(request) => request,
            Err(e) => {
                debug!("Unreadable control request: {}", e);
                return http_response(StatusCode::BAD_REQUEST, &[], String::new());
            }
        };

        let declared = header_value(headers, "SOAPACTION").and_then(envelope::parse_soap_action);
        if let Some((_, action)) = declared.filter(|(_, action)| *action != request.action) {
            debug!("SOAPACTION {} does not match body {}", action, request.action);
            return self.action_response(&ActionReply::Fault(UpnpError::invalid_action()), "");
        }

        let (service_type, prepared) = {
            let device = self.device.read();
            let Some(service) = route.service(&device) else {
                return http_response(StatusCode::NOT_FOUND, &[], String::new());
            };
            (
                service.service_type().to_string(),
                prepare_action(service, &request),
            )
        };

        let reply = match prepared {
            Ok(action) => {
                let listener = self.listener.clone();
                tokio::task::spawn_blocking(move || dispatch(action, listener.as_deref()))
                    .await
                    .unwrap_or_else(|e| {
                        error!("Action handler for {} failed: {}", request.action, e);
                        ActionReply::Fault(UpnpError::action_failed())
                    })
            }
            Err(fault) => {
                debug!("Rejected {}: {}", request.action, fault);
                ActionReply::Fault(fault)
            }
        };
        self.action_response(&reply, &service_type)
    }

    fn action_response(&self, reply: &ActionReply, service_type: &str) -> Response<String> {
        let status = StatusCode::from_u16(reply.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        http_response(
            status,
            &[
                ("Content-Type", envelope::CONTENT_TYPE),
                ("EXT", ""),
                ("SERVER", self.config.server_header.as_str()),
            ],
            reply.to_xml(service_type),
        )
    }

    fn subscribe(self: &Arc<Self>, route: &Route, headers: &HeaderMap) -> Response<String> {
        let requested = header_value(headers, "TIMEOUT")
            .and_then(envelope::parse_timeout_header)
            .unwrap_or(self.config.subscription_timeout);
        let sid = header_value(headers, "SID");
        let callback = header_value(headers, "CALLBACK");
        let nt = header_value(headers, "NT");

        let outcome = {
            let mut device = self.device.write();
            let Some(service) = route.service_mut(&mut device) else {
                return http_response(StatusCode::NOT_FOUND, &[], String::new());
            };

            match sid {
                Some(sid) => {
                    if callback.is_some() || nt.is_some() {
                        return http_response(StatusCode::BAD_REQUEST, &[], String::new());
                    }
                    service
                        .subscriptions_mut()
                        .renew(sid, Some(requested))
                        .map(|s| (s, None))
                }
                None => {
                    if nt != Some(NT_EVENT) {
                        return http_response(StatusCode::PRECONDITION_FAILED, &[], String::new());
                    }
                    let accepted = service
                        .subscriptions_mut()
                        .subscribe(callback.unwrap_or_default(), Some(requested));
                    accepted.map(|s| {
                        let initial = service.initial_event(s.sid());
                        (s, initial)
                    })
                }
            }
        };

        match outcome {
            Ok((subscription, initial)) => {
                if let Some(batch) = initial {
                    self.deliver_later(batch);
                }
                let timeout = envelope::format_timeout_header(subscription.timeout_seconds());
                http_response(
                    StatusCode::OK,
                    &[
                        ("SID", subscription.sid()),
                        ("TIMEOUT", timeout.as_str()),
                        ("SERVER", self.config.server_header.as_str()),
                    ],
                    String::new(),
                )
            }
            Err(e) => {
                debug!("SUBSCRIBE on {} rejected: {}", route.service_id, e);
                http_response(error_status(&e), &[], String::new())
            }
        }
    }

    fn unsubscribe(&self, route: &Route, headers: &HeaderMap) -> Response<String> {
        if header_value(headers, "CALLBACK").is_some() || header_value(headers, "NT").is_some() {
            return http_response(StatusCode::BAD_REQUEST, &[], String::new());
        }
        let Some(sid) = header_value(headers, "SID") else {
            return http_response(StatusCode::PRECONDITION_FAILED, &[], String::new());
        };

        let mut device = self.device.write();
        let Some(service) = route.service_mut(&mut device) else {
            return http_response(StatusCode::NOT_FOUND, &[], String::new());
        };
        match service.subscriptions_mut().unsubscribe(sid) {
            Ok(()) => http_response(StatusCode::OK, &[], String::new()),
            Err(e) => http_response(error_status(&e), &[], String::new()),
        }
    }

    /// Send the initial event once the subscriber has had time to read its SID.
    fn deliver_later(&self, batch: EventBatch) {
        let events = self.events.clone();
        let delay = self.config.initial_event_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(move || batch.deliver(events.as_ref())).await {
                warn!("Initial event delivery failed: {}", e);
            }
        });
    }
}

fn error_status(error: &ApiError) -> StatusCode {
    match error {
        ApiError::InvalidCallback(_) => StatusCode::BAD_REQUEST,
        ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

fn http_response(status: StatusCode, headers: &[(&str, &str)], body: String) -> Response<String> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body).unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut response = Response::new(String::new());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

// Service ids are only unique within one device.
fn find_service<'a>(device: &'a Device, device_udn: &str, service_id: &str) -> Option<&'a Service> {
    device.device_by_udn(device_udn)?.service_by_id(service_id)
}

fn find_service_mut<'a>(
    device: &'a mut Device,
    device_udn: &str,
    service_id: &str,
) -> Option<&'a mut Service> {
    device.device_by_udn_mut(device_udn)?.service_by_id_mut(service_id)
}

fn advertise_ip(config: &HostConfig, local_addr: SocketAddr) -> Result<IpAddr> {
    if let Some(ip) = config.advertise_ip {
        return Ok(ip);
    }
    if !local_addr.ip().is_unspecified() {
        return Ok(local_addr.ip());
    }
    detect_local_ip().ok_or_else(|| {
        HostError::NoAdvertiseAddress(format!(
            "bound to {} and no outbound interface found",
            local_addr
        ))
    })
}

/// Local IP of the interface used for outbound traffic.
fn detect_local_ip() -> Option<IpAddr> {
    // Connecting a UDP socket sends nothing; it only selects a route.
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use upnp_api::StateVariable;

    #[test]
    fn test_advertise_ip_prefers_config() {
        let config = HostConfig::default().with_advertise_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        let ip = advertise_ip(&config, "0.0.0.0:8080".parse().unwrap()).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

        let bound = advertise_ip(&HostConfig::default(), "192.168.1.4:8080".parse().unwrap()).unwrap();
        assert_eq!(bound, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 4)));
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            error_status(&ApiError::InvalidCallback("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&ApiError::PreconditionFailed("x".into())),
            StatusCode::PRECONDITION_FAILED
        );
    }

    #[test]
    fn test_http_response_headers() {
        let response = http_response(StatusCode::OK, &[("EXT", ""), ("SID", "uuid:1")], "x".into());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["SID"], "uuid:1");
        assert_eq!(response.headers()["EXT"], "");
    }

    #[test]
    fn test_find_service_in_embedded_device() {
        let child = Device::new("uuid:c", "urn:d:C:1", "C")
            .with_service(Service::new("urn:s:X:1", "urn:id:X"))
            .unwrap();
        let mut root = Device::new("uuid:r", "urn:d:R:1", "R").with_device(child).unwrap();

        assert!(find_service(&root, "uuid:c", "urn:id:X").is_some());
        assert_eq!(
            find_service_mut(&mut root, "uuid:c", "urn:id:X").unwrap().parent_device(),
            "uuid:c"
        );
        assert!(find_service(&root, "uuid:r", "urn:id:X").is_none());
        assert!(find_service(&root, "uuid:c", "urn:id:Y").is_none());
    }

    #[test]
    fn test_same_service_id_on_sibling_devices() {
        let connection = |udn: &str| {
            Device::new(udn, "urn:schemas-upnp-org:device:WANConnectionDevice:1", udn)
                .with_service(
                    Service::new(
                        "urn:schemas-upnp-org:service:WANIPConnection:1",
                        "urn:upnp-org:serviceId:WANIPConn1",
                    )
                    .with_state_variable(StateVariable::evented("ExternalIPAddress", "string", ""))
                    .unwrap(),
                )
                .unwrap()
        };
        let igd = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";
        let mut root = Device::new("uuid:igd", igd, "IGD")
            .with_device(connection("uuid:wan-1"))
            .unwrap()
            .with_device(connection("uuid:wan-2"))
            .unwrap();

        find_service_mut(&mut root, "uuid:wan-2", "urn:upnp-org:serviceId:WANIPConn1")
            .unwrap()
            .update_state_variable("ExternalIPAddress", "203.0.113.7")
            .unwrap();

        let value = |udn: &str| {
            find_service(&root, udn, "urn:upnp-org:serviceId:WANIPConn1")
                .and_then(|s| s.state_variable("ExternalIPAddress"))
                .map(|v| v.value.clone())
        };
        assert_eq!(value("uuid:wan-1").as_deref(), Some(""));
        assert_eq!(value("uuid:wan-2").as_deref(), Some("203.0.113.7"));
    }
}

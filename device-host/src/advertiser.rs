//! SSDP presence for a hosted device.
//!
//! The `Advertiser` announces every notification target of a device tree on
//! the discovery group and answers matching `M-SEARCH` requests with unicast
//! responses, each sent after a random delay within the requester's `MX`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use ssdp::message::{header, MAN_DISCOVER};
use ssdp::{
    multicast_socket_addr, InboundMessage, MulticastListener, MulticastSocket, SsdpMessage,
    ROOT_DEVICE, SSDP_ALL,
};
use tracing::{debug, trace, warn};
use upnp_api::Device;

/// Upper bound on the response delay, whatever `MX` asks for.
const MAX_RESPONSE_DELAY_SECS: u32 = 5;

/// One advertised notification type with its unique service name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub notification_type: String,
    pub usn: String,
}

/// Notification targets of a device tree, in announcement order.
///
/// The root device adds `upnp:rootdevice`; every device adds its UDN and
/// device type; every service adds its service type.
pub fn notification_targets(root: &Device) -> Vec<Target> {
    let mut targets = vec![Target {
        notification_type: ROOT_DEVICE.to_string(),
        usn: format!("{}::{}", root.udn(), ROOT_DEVICE),
    }];

    for device in root.all_devices() {
        targets.push(Target {
            notification_type: device.udn().to_string(),
            usn: device.udn().to_string(),
        });
        targets.push(Target {
            notification_type: device.device_type.clone(),
            usn: format!("{}::{}", device.udn(), device.device_type),
        });
        for service in device.services() {
            let target = Target {
                notification_type: service.service_type().to_string(),
                usn: format!("{}::{}", device.udn(), service.service_type()),
            };
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}

/// Announces a device and answers searches for it.
pub struct Advertiser {
    socket: Arc<dyn MulticastSocket>,
    targets: Vec<Target>,
    location: String,
    max_age: u32,
    server: String,
}

impl Advertiser {
    pub fn new(
        socket: Arc<dyn MulticastSocket>,
        device: &Device,
        location: impl Into<String>,
        max_age: u32,
        server: impl Into<String>,
    ) -> Self {
        Self {
            socket,
            targets: notification_targets(device),
            location: location.into(),
            max_age,
            server: server.into(),
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Targets answering a search for `search_target`.
    pub fn matching(&self, search_target: &str) -> Vec<&Target> {
        self.targets
            .iter()
            .filter(|t| search_target == SSDP_ALL || t.notification_type == search_target)
            .collect()
    }

    /// Multicast `ssdp:alive` for every target.
    pub fn announce_alive(&self) -> ssdp::Result<()> {
        for target in &self.targets {
            let message = SsdpMessage::notify_alive(
                &target.notification_type,
                &target.usn,
                &self.location,
                self.max_age,
                &self.server,
            );
            self.socket.send(&message.to_bytes(), multicast_socket_addr())?;
        }
        debug!("Announced {} target(s) at {}", self.targets.len(), self.location);
        Ok(())
    }

    /// Multicast `ssdp:byebye` for every target.
    pub fn announce_byebye(&self) -> ssdp::Result<()> {
        for target in &self.targets {
            let message = SsdpMessage::notify_byebye(&target.notification_type, &target.usn);
            self.socket.send(&message.to_bytes(), multicast_socket_addr())?;
        }
        debug!("Withdrew {} target(s)", self.targets.len());
        Ok(())
    }

    fn responses(&self, search_target: &str) -> Vec<SsdpMessage> {
        self.matching(search_target)
            .into_iter()
            .map(|target| {
                let st = if search_target == SSDP_ALL {
                    target.notification_type.as_str()
                } else {
                    search_target
                };
                SsdpMessage::search_response(st, &target.usn, &self.location, self.max_age, &self.server)
            })
            .collect()
    }
}

fn response_delay(mx: u32) -> Duration {
    let window_ms = u64::from(mx.clamp(1, MAX_RESPONSE_DELAY_SECS)) * 1000;
    Duration::from_millis(rand::rng().random_range(0..window_ms))
}

impl MulticastListener for Advertiser {
    fn device_notify_received(&self, request: &InboundMessage) {
        trace!("Ignoring NOTIFY from {}", request.from);
    }

    fn device_search_received(&self, request: &InboundMessage) {
        let message = &request.message;
        let discover = message
            .header(header::MAN)
            .is_some_and(|man| {
                man.trim()
                    .trim_matches('"')
                    .eq_ignore_ascii_case(MAN_DISCOVER.trim_matches('"'))
            });
        let Some(search_target) = message.st().filter(|_| discover) else {
            trace!("Ignoring malformed M-SEARCH from {}", request.from);
            return;
        };

        let responses = self.responses(search_target);
        if responses.is_empty() {
            return;
        }

        let delay = response_delay(message.mx().unwrap_or(1));
        let socket = self.socket.clone();
        let destination: SocketAddr = request.from;
        debug!(
            "Answering M-SEARCH {} from {} with {} response(s) in {:?}",
            search_target,
            destination,
            responses.len(),
            delay
        );

        let spawned = thread::Builder::new()
            .name("ssdp-search-response".to_string())
            .spawn(move || {
                thread::sleep(delay);
                for response in responses {
                    if let Err(e) = socket.send(&response.to_bytes(), destination) {
                        warn!("Search response to {} failed: {}", destination, e);
                        return;
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("Could not schedule search response: {}", e);
        }
    }
}

//! Path routing for hosted devices.
//!
//! This module provides the `Router` which maps the request paths a device
//! publishes in its description (SCPD, control and event URLs of every
//! service, plus the description itself) to the service that answers them.

use std::collections::HashMap;

use upnp_api::{Device, Service};
use url::Url;

use crate::error::{HostError, Result};

/// Kind of endpoint a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Description,
    Scpd,
    Control,
    Event,
}

/// Where a request path leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub endpoint: Endpoint,
    /// UDN of the device owning the service; empty for the description.
    pub device_udn: String,
    /// Service id; empty for the description.
    pub service_id: String,
}

impl Route {
    /// The addressed service inside `root`, if it still exists.
    pub fn service<'a>(&self, root: &'a Device) -> Option<&'a Service> {
        root.device_by_udn(&self.device_udn)?
            .service_by_id(&self.service_id)
    }

    pub fn service_mut<'a>(&self, root: &'a mut Device) -> Option<&'a mut Service> {
        root.device_by_udn_mut(&self.device_udn)?
            .service_by_id_mut(&self.service_id)
    }
}

/// Path table built once from a device tree.
#[derive(Debug, Clone)]
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    /// Build the table for `root` and every embedded device.
    ///
    /// # Errors
    ///
    /// `HostError::PathConflict` when two endpoints resolve to the same path.
    pub fn new(root: &Device, description_path: &str) -> Result<Self> {
        let mut router = Self {
            routes: HashMap::new(),
        };
        router.insert(
            description_path,
            Route {
                endpoint: Endpoint::Description,
                device_udn: String::new(),
                service_id: String::new(),
            },
        )?;

        for device in root.all_devices() {
            for service in device.services() {
                let endpoints = [
                    (Endpoint::Scpd, &service.scpd_url),
                    (Endpoint::Control, &service.control_url),
                    (Endpoint::Event, &service.event_sub_url),
                ];
                for (endpoint, url) in endpoints {
                    if url.trim().is_empty() {
                        continue;
                    }
                    router.insert(
                        url,
                        Route {
                            endpoint,
                            device_udn: device.udn().to_string(),
                            service_id: service.service_id().to_string(),
                        },
                    )?;
                }
            }
        }
        Ok(router)
    }

    fn insert(&mut self, url: &str, route: Route) -> Result<()> {
        let path = normalize(url);
        if self.routes.contains_key(&path) {
            return Err(HostError::PathConflict(path));
        }
        self.routes.insert(path, route);
        Ok(())
    }

    /// Route for a request path, ignoring any query string.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.get(&normalize(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Give services that declare no URLs the default
/// `/service/{scpd,control,event}/<Name>` paths, `<Name>` being the type
/// name of the service (`SwitchPower` for `urn:...:service:SwitchPower:1`).
pub fn assign_default_urls(device: &mut Device) {
    for service in device.services_mut() {
        let name = service_name(service).to_string();
        if service.scpd_url.trim().is_empty() {
            service.scpd_url = format!("/service/scpd/{}.xml", name);
        }
        if service.control_url.trim().is_empty() {
            service.control_url = format!("/service/control/{}", name);
        }
        if service.event_sub_url.trim().is_empty() {
            service.event_sub_url = format!("/service/event/{}", name);
        }
    }
    for child in device.devices_mut() {
        assign_default_urls(child);
    }
}

fn service_name(service: &Service) -> &str {
    match service.service_type().split(':').nth(3) {
        Some(name) if !name.is_empty() => name,
        _ => service.service_id().rsplit(':').next().unwrap_or_default(),
    }
}

/// Reduce a description URL or request path to an absolute path.
fn normalize(url: &str) -> String {
    let url = url.trim();
    let path = match Url::parse(url) {
        Ok(absolute) => absolute.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

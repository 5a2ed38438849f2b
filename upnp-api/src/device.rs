use std::net::SocketAddr;
use std::time::SystemTime;

use url::Url;

use crate::description;
use crate::error::{ApiError, Result};
use crate::service::Service;

/// A UPnP device and its embedded devices and services.
///
/// The tree owns its children; children refer to their parent only by
/// identity key, so a `Device` can be cloned and moved freely.
#[derive(Debug, Clone)]
pub struct Device {
    udn: String,
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: Option<String>,
    pub model_description: Option<String>,
    pub model_name: String,
    pub model_number: Option<String>,
    pub model_url: Option<String>,
    pub serial_number: Option<String>,
    pub presentation_url: Option<String>,
    location: Option<String>,
    url_base: Option<String>,
    source: Option<SocketAddr>,
    last_seen: Option<SystemTime>,
    devices: Vec<Device>,
    services: Vec<Service>,
}

impl Device {
    pub fn new(
        udn: impl Into<String>,
        device_type: impl Into<String>,
        friendly_name: impl Into<String>,
    ) -> Self {
        Self {
            udn: udn.into(),
            device_type: device_type.into(),
            friendly_name: friendly_name.into(),
            manufacturer: String::new(),
            manufacturer_url: None,
            model_description: None,
            model_name: String::new(),
            model_number: None,
            model_url: None,
            serial_number: None,
            presentation_url: None,
            location: None,
            url_base: None,
            source: None,
            last_seen: None,
            devices: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Parse a device description document fetched from `location`.
    pub fn from_description(xml: &str, location: Option<&str>) -> Result<Self> {
        description::parse_device_description(xml, location)
    }

    /// Parse the description of a device this process will host.
    /// A missing UDN is generated instead of rejected.
    pub fn from_hosted_description(xml: &str) -> Result<Self> {
        description::parse_hosted_description(xml)
    }

    pub fn to_description_xml(&self) -> String {
        description::write_device_description(self)
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    /// URL the description was fetched from.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn url_base(&self) -> Option<&str> {
        self.url_base.as_deref()
    }

    /// Set the location on this device and every embedded device.
    pub fn set_location(&mut self, location: impl Into<String>) {
        let location = location.into();
        for child in &mut self.devices {
            child.set_location(location.clone());
        }
        self.location = Some(location);
    }

    /// Set the `URLBase` on this device and every embedded device.
    pub fn set_url_base(&mut self, url_base: Option<String>) {
        for child in &mut self.devices {
            child.set_url_base(url_base.clone());
        }
        self.url_base = url_base;
    }

    /// Address the last discovery message came from.
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn last_seen(&self) -> Option<SystemTime> {
        self.last_seen
    }

    /// Record that the device was heard from.
    pub fn touch(&mut self, source: Option<SocketAddr>) {
        if source.is_some() {
            self.source = source;
        }
        self.last_seen = Some(SystemTime::now());
    }

    /// Resolve a URL from the description against `URLBase` or the location.
    ///
    /// # Errors
    ///
    /// `ApiError::InvalidUrl` when the URL is empty, the device has no base, or
    /// the result is not a valid absolute URL.
    pub fn absolute_url(&self, relative: &str) -> Result<String> {
        let relative = relative.trim();
        if relative.is_empty() {
            return Err(ApiError::InvalidUrl(format!(
                "empty URL on device {}",
                self.udn
            )));
        }

        if let Ok(absolute) = Url::parse(relative) {
            return Ok(absolute.to_string());
        }

        let base = self
            .url_base
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .or(self.location.as_deref())
            .ok_or_else(|| {
                ApiError::InvalidUrl(format!("no base URL to resolve '{}' on {}", relative, self.udn))
            })?;

        let resolved = Url::parse(base.trim())?.join(relative)?;
        Ok(resolved.to_string())
    }

    /// Absolute presentation URL, if the device declares one.
    pub fn presentation_absolute_url(&self) -> Option<Result<String>> {
        self.presentation_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| self.absolute_url(u))
    }

    /// Append an embedded device; it inherits this device's location and base.
    pub fn add_device(&mut self, mut device: Device) -> Result<()> {
        if device.udn == self.udn || self.device_by_udn(&device.udn).is_some() {
            return Err(ApiError::Description(format!(
                "duplicate device {} under {}",
                device.udn, self.udn
            )));
        }
        if let Some(location) = &self.location {
            device.set_location(location.clone());
        }
        device.set_url_base(self.url_base.clone());
        self.devices.push(device);
        Ok(())
    }

    pub fn with_device(mut self, device: Device) -> Result<Self> {
        self.add_device(device)?;
        Ok(self)
    }

    pub fn add_service(&mut self, mut service: Service) -> Result<()> {
        // Service ids are unique per device, whatever the type.
        if self.service_by_id(service.service_id()).is_some() {
            return Err(ApiError::Description(format!(
                "duplicate service {} on {}",
                service.service_id(),
                self.udn
            )));
        }
        service.set_parent(&self.udn);
        self.services.push(service);
        Ok(())
    }

    pub fn with_service(mut self, service: Service) -> Result<Self> {
        self.add_service(service)?;
        Ok(self)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut [Service] {
        &mut self.services
    }

    pub fn service_by_type(&self, service_type: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.service_type() == service_type)
    }

    pub fn service_by_id(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.service_id() == service_id)
    }

    pub fn service_by_id_mut(&mut self, service_id: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.service_id() == service_id)
    }

    /// Search this device and its embedded devices, depth first.
    pub fn device_by_type(&self, device_type: &str) -> Option<&Device> {
        if self.device_type == device_type {
            return Some(self);
        }
        self.devices.iter().find_map(|d| d.device_by_type(device_type))
    }

    pub fn device_by_udn(&self, udn: &str) -> Option<&Device> {
        if self.udn == udn {
            return Some(self);
        }
        self.devices.iter().find_map(|d| d.device_by_udn(udn))
    }

    pub fn device_by_udn_mut(&mut self, udn: &str) -> Option<&mut Device> {
        if self.udn == udn {
            return Some(self);
        }
        self.devices
            .iter_mut()
            .find_map(|d| d.device_by_udn_mut(udn))
    }

    /// First service of `service_type` in the tree, with the device that holds it.
    pub fn find_service(&self, service_type: &str) -> Option<(&Device, &Service)> {
        if let Some(service) = self.service_by_type(service_type) {
            return Some((self, service));
        }
        self.devices.iter().find_map(|d| d.find_service(service_type))
    }

    pub fn find_service_mut(&mut self, service_type: &str) -> Option<&mut Service> {
        if let Some(index) = self.services.iter().position(|s| s.service_type() == service_type) {
            return self.services.get_mut(index);
        }
        self.devices
            .iter_mut()
            .find_map(|d| d.find_service_mut(service_type))
    }

    /// Every device in the tree, this one first.
    pub fn all_devices(&self) -> Vec<&Device> {
        let mut all = vec![self];
        for child in &self.devices {
            all.extend(child.all_devices());
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn root() -> Device {
        let mut device = Device::new("uuid:root", "urn:schemas-upnp-org:device:Basic:1", "Root");
        device.set_location("http://192.168.1.20:49152/description.xml");
        device
    }

    #[rstest]
    #[case("/control", "http://192.168.1.20:49152/control")]
    #[case("control", "http://192.168.1.20:49152/control")]
    #[case("http://10.0.0.1/abs", "http://10.0.0.1/abs")]
    fn test_absolute_url_against_location(#[case] relative: &str, #[case] expected: &str) {
        assert_eq!(root().absolute_url(relative).unwrap(), expected);
    }

    #[test]
    fn test_url_base_wins_over_location() {
        let mut device = root();
        device.set_url_base(Some("http://192.168.1.20:5000/base/".to_string()));
        assert_eq!(
            device.absolute_url("ctl").unwrap(),
            "http://192.168.1.20:5000/base/ctl"
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn test_empty_url_is_error(#[case] relative: &str) {
        assert!(matches!(root().absolute_url(relative), Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_no_base_is_error() {
        let device = Device::new("uuid:x", "t", "x");
        assert!(matches!(device.absolute_url("/ctl"), Err(ApiError::InvalidUrl(_))));

        let mut broken = Device::new("uuid:y", "t", "y");
        broken.set_location("not a url");
        assert!(matches!(broken.absolute_url("/ctl"), Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_embedded_devices_inherit_location() {
        let child = Device::new("uuid:child", "urn:schemas-upnp-org:device:WANDevice:1", "WAN");
        let device = root().with_device(child).unwrap();

        let child = device.device_by_udn("uuid:child").unwrap();
        assert_eq!(child.location(), device.location());
        assert_eq!(
            child.absolute_url("/wan").unwrap(),
            "http://192.168.1.20:49152/wan"
        );
        assert!(device.device_by_type("urn:schemas-upnp-org:device:WANDevice:1").is_some());
        assert_eq!(device.all_devices().len(), 2);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let device = root()
            .with_service(Service::new("urn:s:1", "urn:id:1"))
            .unwrap();
        assert!(device
            .clone()
            .with_service(Service::new("urn:s:2", "urn:id:1"))
            .is_err());
        assert!(device
            .clone()
            .with_device(Device::new("uuid:root", "t", "dup"))
            .is_err());
    }

    #[test]
    fn test_services_point_back_to_device() {
        let device = root()
            .with_service(Service::new("urn:s:1", "urn:id:1"))
            .unwrap();
        assert_eq!(device.services()[0].parent_device(), "uuid:root");
    }

    #[test]
    fn test_touch_records_metadata() {
        let mut device = root();
        assert!(device.last_seen().is_none());
        device.touch(Some("192.168.1.20:1900".parse().unwrap()));
        assert!(device.last_seen().is_some());
        assert_eq!(device.source(), Some("192.168.1.20:1900".parse().unwrap()));
    }
}

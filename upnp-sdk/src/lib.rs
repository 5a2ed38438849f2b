//! # UPnP SDK - control point for UPnP devices
//!
//! Discovers devices on the local network, keeps a registry of what is
//! currently announced and invokes actions on registered devices:
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use upnp_sdk::{ControlPoint, ControlPointConfig};
//!
//! fn main() -> Result<(), upnp_sdk::SdkError> {
//!     let control_point = ControlPoint::new(ControlPointConfig::default())?;
//!     control_point.start()?;
//!
//!     // Search, then wait out the MX window.
//!     let gateways = {
//!         control_point.discover()?;
//!         control_point.root_devices_by_type("urn:schemas-upnp-org:device:InternetGatewayDevice:1")
//!     };
//!
//!     for gateway in gateways {
//!         let Some((wan, _)) = gateway.find_service("urn:schemas-upnp-org:service:WANIPConnection:1") else {
//!             continue;
//!         };
//!         let outputs = control_point.invoke(
//!             wan.udn(),
//!             "urn:schemas-upnp-org:service:WANIPConnection:1",
//!             "GetExternalIPAddress",
//!             &HashMap::new(),
//!         )?;
//!         println!("{:?}", outputs.get("NewExternalIPAddress"));
//!     }
//!
//!     control_point.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! upnp-sdk (ControlPoint, DeviceRegistry)
//!     ↓
//! upnp-api (Device / Service / Action model, invocation, eventing)
//!     ↓
//! ssdp (discovery)        soap-client (SOAP and GENA over HTTP)
//! ```
//!
//! Devices are hosted with the companion `device-host` crate.

pub mod config;
pub mod control_point;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod registry;

pub use config::ControlPointConfig;
pub use control_point::ControlPoint;
pub use error::{Result, SdkError};
pub use fetch::{DescriptionFetcher, HttpFetcher};
pub use registry::DeviceRegistry;

// Re-export the model so most callers need only this crate
pub use soap_client::SubscriptionResponse;
pub use upnp_api::{Action, ApiError, Argument, Device, Direction, Service, StateVariable, UpnpError};

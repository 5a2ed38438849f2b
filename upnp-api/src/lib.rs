//! UPnP device model, action invocation and eventing
//!
//! The object model is a tree built from description documents:
//!
//! ```text
//! Device ─┬─ Service ─── Action ─── Argument
//!         └─ Device (embedded) ─ ...
//! ```
//!
//! Parents own their children through ordered lists. Children refer back to
//! their parent by identity key ([`Service::parent_device`],
//! [`Action::parent_service`], [`Argument::parent_action`]), assigned when
//! they are attached and never changed afterwards.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use upnp_api::{ActionInvoker, Device};
//!
//! # fn run(xml: &str) -> upnp_api::Result<()> {
//! let device = Device::from_description(xml, Some("http://192.168.1.20:49152/description.xml"))?;
//! let (holder, service) = device
//!     .find_service("urn:schemas-upnp-org:service:SwitchPower:1")
//!     .ok_or_else(|| upnp_api::ApiError::ServiceNotFound("SwitchPower".into()))?;
//!
//! let mut action = service.action("GetStatus")?.clone();
//! let control_url = holder.absolute_url(&service.control_url)?;
//! ActionInvoker::default().invoke(&control_url, &mut action, &HashMap::new())?;
//! println!("status = {}", action.argument_value("ResultStatus")?);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod argument;
pub mod description;
pub mod device;
pub mod error;
pub mod eventing;
pub mod invocation;
pub mod service;

pub use action::Action;
pub use argument::{ActionKey, Argument, Direction};
pub use device::Device;
pub use error::{ApiError, Result};
pub use eventing::{
    DeliveryReport, EventBatch, EventNotification, EventSender, Subscription, SubscriptionRegistry,
};
pub use invocation::{ActionInvoker, ActionListener, ActionReply, ControlTransport};
pub use service::{Service, ServiceKey, StateVariable};

pub use soap_client::UpnpError;

//! Hosting for UPnP devices
//!
//! This crate puts a [`upnp_api::Device`] tree on the network:
//!
//! - [`DeviceHost`]: HTTP server for the description, SCPD, control and
//!   event subscription endpoints the device declares
//! - [`Advertiser`]: SSDP announcements and search responses for the tree
//! - [`Router`]: maps request paths to the service that answers them
//!
//! Inbound actions are dispatched to an [`upnp_api::ActionListener`] on the
//! blocking pool; state changes made through
//! [`DeviceHost::set_state_variable`] are evented to subscribers.

pub mod advertiser;
pub mod config;
pub mod error;
pub mod router;
pub mod server;

pub use advertiser::{notification_targets, Advertiser, Target};
pub use config::HostConfig;
pub use error::{HostError, Result};
pub use router::{assign_default_urls, Endpoint, Route, Router};
pub use server::DeviceHost;

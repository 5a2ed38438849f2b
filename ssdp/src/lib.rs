//! SSDP (Simple Service Discovery Protocol) for UPnP discovery
//!
//! This crate provides the discovery half of the UPnP stack:
//!
//! - [`SsdpMessage`]: parsing and serialization of the HTTP-over-UDP messages
//!   (`M-SEARCH`, `NOTIFY` and search responses) exchanged on the discovery group.
//! - [`MulticastSocket`]: the transport capability the servers depend on, with
//!   [`UdpTransport`] as the concrete UDP implementation.
//! - [`MulticastServer`]: listens on the discovery group and hands announcements
//!   and searches to a [`MulticastListener`].
//! - [`UnicastServer`]: sends searches from an ephemeral port and hands the
//!   unicast responses to a [`ResponseListener`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ssdp::{InboundMessage, MulticastListener, MulticastServer, UdpTransport};
//!
//! struct Dump;
//!
//! impl MulticastListener for Dump {
//!     fn device_notify_received(&self, request: &InboundMessage) {
//!         println!("NOTIFY from {}: {:?}", request.from, request.message.usn());
//!     }
//!
//!     fn device_search_received(&self, request: &InboundMessage) {
//!         println!("M-SEARCH from {} for {:?}", request.from, request.message.st());
//!     }
//! }
//!
//! let server = MulticastServer::new(Arc::new(UdpTransport::multicast_default()), Arc::new(Dump));
//! server.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! server.stop()?;
//! # Ok::<(), ssdp::SsdpError>(())
//! ```

mod error;
pub mod message;
mod server;
mod socket;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use error::{Result, SsdpError};
pub use message::{Headers, InboundMessage, SsdpMessage, StartLine};
pub use server::{MulticastListener, MulticastServer, ResponseListener, ServerState, UnicastServer};
pub use socket::{MulticastSocket, SsdpPacket, UdpTransport};

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// IPv4 discovery multicast group.
pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Discovery port.
pub const SSDP_PORT: u16 = 1900;

/// Search target matching every root device.
pub const ROOT_DEVICE: &str = "upnp:rootdevice";

/// Search target matching every device and service.
pub const SSDP_ALL: &str = "ssdp:all";

/// Default search response window, in seconds.
pub const DEFAULT_MX: u32 = 3;

/// Default advertisement lifetime, in seconds.
pub const DEFAULT_MAX_AGE: u32 = 1800;

/// The discovery group as a socket address.
pub fn multicast_socket_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(MULTICAST_ADDR, SSDP_PORT))
}

//! Transport socket capability and its UDP implementation
//!
//! The servers never touch `std::net` directly; they go through
//! [`MulticastSocket`] so tests can substitute an in-memory transport.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{Result, SsdpError};
use crate::{MULTICAST_ADDR, SSDP_PORT};

/// Largest datagram accepted from the network.
const MAX_DATAGRAM_SIZE: usize = 8192;

/// How often a blocked read wakes up to notice `close()`.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A raw datagram and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpPacket {
    pub bytes: Vec<u8>,
    pub from: SocketAddr,
}

/// Datagram transport used by the discovery servers.
///
/// `read` blocks until a datagram arrives. After `close` returns, a pending or
/// subsequent `read` fails with `SsdpError::TransportClosed`.
pub trait MulticastSocket: Send + Sync {
    fn bind(&self) -> Result<()>;

    /// Release the socket. Must succeed when the socket was never bound.
    fn close(&self) -> Result<()>;

    fn read(&self) -> Result<SsdpPacket>;

    fn send(&self, bytes: &[u8], destination: SocketAddr) -> Result<()>;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// UDP transport, either joined to the discovery group or on a unicast port.
pub struct UdpTransport {
    bind_addr: SocketAddrV4,
    group: Option<Ipv4Addr>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Transport that joins the discovery group after binding `bind_addr`.
    pub fn multicast(bind_addr: SocketAddrV4) -> Self {
        Self {
            bind_addr,
            group: Some(MULTICAST_ADDR),
            socket: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Multicast transport on `0.0.0.0:1900`.
    pub fn multicast_default() -> Self {
        Self::multicast(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT))
    }

    /// Plain unicast transport, typically on an ephemeral port.
    pub fn unicast(bind_addr: SocketAddrV4) -> Self {
        Self {
            bind_addr,
            group: None,
            socket: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn open(&self) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::V4(self.bind_addr).into())?;

        if let Some(group) = self.group {
            socket.join_multicast_v4(&group, self.bind_addr.ip())?;
            socket.set_multicast_loop_v4(true)?;
        }
        socket.set_multicast_ttl_v4(4)?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(READ_POLL_INTERVAL))?;
        Ok(socket)
    }

    fn current(&self) -> Result<Arc<UdpSocket>> {
        self.socket
            .read()
            .as_ref()
            .cloned()
            .ok_or(SsdpError::TransportClosed)
    }
}

impl MulticastSocket for UdpTransport {
    fn bind(&self) -> Result<()> {
        let mut slot = self.socket.write();
        if slot.is_some() {
            return Err(SsdpError::BindFailure(format!(
                "{} is already bound",
                self.bind_addr
            )));
        }

        let socket = self
            .open()
            .map_err(|e| SsdpError::BindFailure(format!("{}: {}", self.bind_addr, e)))?;
        debug!("Bound SSDP socket on {:?}", socket.local_addr().ok());

        *slot = Some(Arc::new(socket));
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.socket.write().take().is_some() {
            debug!("Closed SSDP socket on {}", self.bind_addr);
        }
        Ok(())
    }

    fn read(&self) -> Result<SsdpPacket> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let socket = self.current()?;
            match socket.recv_from(&mut buffer) {
                Ok((size, from)) => {
                    return Ok(SsdpPacket {
                        bytes: buffer[..size].to_vec(),
                        from,
                    })
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(SsdpError::TransportClosed);
                    }
                }
                Err(_) if self.closed.load(Ordering::SeqCst) => {
                    return Err(SsdpError::TransportClosed)
                }
                Err(e) => return Err(SsdpError::Io(format!("recv failed: {}", e))),
            }
        }
    }

    fn send(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        let socket = self.current()?;
        socket
            .send_to(bytes, destination)
            .map_err(|e| SsdpError::Io(format!("send to {} failed: {}", destination, e)))?;
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.current().ok()?.local_addr().ok()
    }
}

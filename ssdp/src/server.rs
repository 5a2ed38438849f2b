//! Discovery servers
//!
//! Each server owns a transport socket and, while listening, one background
//! thread that blocks on `read`. Closing the socket is the shutdown handshake:
//! the pending read fails with `TransportClosed`, the loop exits and `stop`
//! joins the thread.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::error::{Result, SsdpError};
use crate::message::{InboundMessage, SsdpMessage};
use crate::socket::MulticastSocket;
use crate::multicast_socket_addr;

/// Lifecycle of a discovery server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
}

/// Receiver of messages arriving on the discovery group.
pub trait MulticastListener: Send + Sync {
    /// `NOTIFY` announcement (alive, byebye or update).
    fn device_notify_received(&self, request: &InboundMessage);

    /// `M-SEARCH` request.
    fn device_search_received(&self, request: &InboundMessage);
}

/// Receiver of unicast search responses.
pub trait ResponseListener: Send + Sync {
    fn device_response_received(&self, response: &InboundMessage);
}

/// Socket plus receive thread shared by both server flavours.
struct Worker {
    name: &'static str,
    socket: Arc<dyn MulticastSocket>,
    state: Arc<Mutex<ServerState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn new(name: &'static str, socket: Arc<dyn MulticastSocket>) -> Self {
        Self {
            name,
            socket,
            state: Arc::new(Mutex::new(ServerState::Stopped)),
            handle: Mutex::new(None),
        }
    }

    fn start<F>(&self, dispatch: F) -> Result<()>
    where
        F: Fn(InboundMessage) + Send + 'static,
    {
        // A second bind on a listening socket fails here and is surfaced as is.
        self.socket.bind()?;

        let mut handle_slot = self.handle.lock();
        if let Some(finished) = handle_slot.take() {
            // Left over from a loop that ended on a read error.
            let _ = finished.join();
        }

        *self.state.lock() = ServerState::Listening;

        let socket = Arc::clone(&self.socket);
        let state = Arc::clone(&self.state);
        let name = self.name;
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || receive_loop(name, socket.as_ref(), &state, dispatch));

        match spawned {
            Ok(handle) => {
                *handle_slot = Some(handle);
                debug!("{} listening on {:?}", self.name, self.socket.local_addr());
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ServerState::Stopped;
                let _ = self.socket.close();
                Err(SsdpError::Io(format!(
                    "failed to spawn {} thread: {}",
                    self.name, e
                )))
            }
        }
    }

    fn stop(&self) -> Result<()> {
        let closed = self.socket.close();

        if let Some(handle) = self.handle.lock().take() {
            // A listener calling stop() runs on the loop thread itself.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("{} receive loop panicked", self.name);
            }
        }

        *self.state.lock() = ServerState::Stopped;
        closed
    }

    fn state(&self) -> ServerState {
        *self.state.lock()
    }

    fn send(&self, message: &SsdpMessage, destination: SocketAddr) -> Result<()> {
        if self.state() != ServerState::Listening {
            return Err(SsdpError::NotListening);
        }
        trace!("{} -> {}:\n{}", self.name, destination, message);
        self.socket.send(&message.to_bytes(), destination)
    }
}

fn receive_loop<F>(
    name: &str,
    socket: &dyn MulticastSocket,
    state: &Mutex<ServerState>,
    dispatch: F,
) where
    F: Fn(InboundMessage),
{
    debug!("{} receive loop started", name);

    loop {
        let packet = match socket.read() {
            Ok(packet) => packet,
            Err(SsdpError::TransportClosed) => {
                debug!("{} socket closed", name);
                break;
            }
            Err(e) => {
                error!("{} read failed, receive loop stopped: {}", name, e);
                break;
            }
        };

        if packet.bytes.is_empty() {
            continue;
        }

        match InboundMessage::from_packet(&packet) {
            Ok(inbound) => dispatch(inbound),
            Err(e) => debug!("{} dropped datagram from {}: {}", name, packet.from, e),
        }
    }

    *state.lock() = ServerState::Stopped;
}

/// Server bound to the discovery group.
///
/// Announcements go to [`MulticastListener::device_notify_received`], searches to
/// [`MulticastListener::device_search_received`]; anything else is dropped.
pub struct MulticastServer {
    worker: Worker,
    listener: Arc<dyn MulticastListener>,
}

impl MulticastServer {
    pub fn new(socket: Arc<dyn MulticastSocket>, listener: Arc<dyn MulticastListener>) -> Self {
        Self {
            worker: Worker::new("ssdp-multicast", socket),
            listener,
        }
    }

    /// Bind the socket and start the receive loop.
    ///
    /// # Errors
    ///
    /// Returns `SsdpError::BindFailure` if the socket cannot be bound, including
    /// when the server is already listening.
    pub fn start(&self) -> Result<()> {
        let listener = Arc::clone(&self.listener);
        self.worker.start(move |inbound| {
            let message = &inbound.message;
            if message.is_notify() {
                trace!("NOTIFY {:?} from {}", message.nts(), inbound.from);
                listener.device_notify_received(&inbound);
            } else if message.is_search() {
                trace!("M-SEARCH {:?} from {}", message.st(), inbound.from);
                listener.device_search_received(&inbound);
            } else {
                trace!("Ignoring {} from {}", message.start_line, inbound.from);
            }
        })
    }

    /// Close the socket and wait for the receive loop to exit.
    ///
    /// Safe to call on a server that is stopped or failed to start.
    pub fn stop(&self) -> Result<()> {
        self.worker.stop()
    }

    pub fn state(&self) -> ServerState {
        self.worker.state()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Send a message to `destination` from the server's socket.
    pub fn send(&self, message: &SsdpMessage, destination: SocketAddr) -> Result<()> {
        self.worker.send(message, destination)
    }

    /// Send a message to the discovery group.
    pub fn announce(&self, message: &SsdpMessage) -> Result<()> {
        self.worker.send(message, multicast_socket_addr())
    }
}

impl Drop for MulticastServer {
    fn drop(&mut self) {
        let _ = self.worker.stop();
    }
}

/// Server on a unicast port that issues searches and collects the responses.
pub struct UnicastServer {
    worker: Worker,
    listener: Arc<dyn ResponseListener>,
    user_agent: String,
}

impl UnicastServer {
    pub fn new(
        socket: Arc<dyn MulticastSocket>,
        listener: Arc<dyn ResponseListener>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            worker: Worker::new("ssdp-unicast", socket),
            listener,
            user_agent: user_agent.into(),
        }
    }

    pub fn start(&self) -> Result<()> {
        let listener = Arc::clone(&self.listener);
        self.worker.start(move |inbound| {
            if inbound.message.is_response() {
                trace!("Search response {:?} from {}", inbound.message.usn(), inbound.from);
                listener.device_response_received(&inbound);
            } else {
                trace!(
                    "Ignoring {} on unicast port from {}",
                    inbound.message.start_line,
                    inbound.from
                );
            }
        })
    }

    pub fn stop(&self) -> Result<()> {
        self.worker.stop()
    }

    pub fn state(&self) -> ServerState {
        self.worker.state()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Multicast an `M-SEARCH` for `search_target`; responses arrive on this socket.
    pub fn search(&self, search_target: &str, mx: u32) -> Result<()> {
        let request = SsdpMessage::search_request(search_target, mx, &self.user_agent);
        debug!("Searching for {} (MX {})", search_target, mx);
        self.worker.send(&request, multicast_socket_addr())
    }
}

impl Drop for UnicastServer {
    fn drop(&mut self) {
        let _ = self.worker.stop();
    }
}

//! In-memory transport for tests
//!
//! [`MemorySocket`] behaves like a bound UDP socket whose inbound datagrams are
//! injected by the test and whose outbound datagrams are recorded.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, SsdpError};
use crate::message::SsdpMessage;
use crate::socket::{MulticastSocket, SsdpPacket};

pub struct MemorySocket {
    local: SocketAddr,
    inbox_tx: Sender<Result<SsdpPacket>>,
    inbox_rx: Mutex<Receiver<Result<SsdpPacket>>>,
    bound: AtomicBool,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl MemorySocket {
    pub fn new(local: SocketAddr) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel();
        Self {
            local,
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            bound: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue a raw datagram for the next `read`.
    pub fn inject(&self, bytes: &[u8], from: SocketAddr) {
        let _ = self.inbox_tx.send(Ok(SsdpPacket {
            bytes: bytes.to_vec(),
            from,
        }));
    }

    pub fn inject_message(&self, message: &SsdpMessage, from: SocketAddr) {
        self.inject(&message.to_bytes(), from);
    }

    /// Make a pending or future `read` fail with `error`.
    pub fn inject_error(&self, error: SsdpError) {
        let _ = self.inbox_tx.send(Err(error));
    }

    /// Datagrams passed to `send`, oldest first.
    pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.sent.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }
}

impl MulticastSocket for MemorySocket {
    fn bind(&self) -> Result<()> {
        if self.bound.swap(true, Ordering::SeqCst) {
            return Err(SsdpError::BindFailure(format!(
                "{} is already bound",
                self.local
            )));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.bound.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self) -> Result<SsdpPacket> {
        let inbox = self.inbox_rx.lock();
        loop {
            if !self.is_bound() {
                return Err(SsdpError::TransportClosed);
            }
            match inbox.recv_timeout(Duration::from_millis(20)) {
                Ok(item) => return item,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(SsdpError::TransportClosed),
            }
        }
    }

    fn send(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        if !self.is_bound() {
            return Err(SsdpError::TransportClosed);
        }
        self.sent.lock().push((bytes.to_vec(), destination));
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.is_bound().then_some(self.local)
    }
}

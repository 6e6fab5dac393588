//! Addressable peer endpoints owned by a session.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;

use crate::message::Message;

/// Slot index of a connection within its session. `0xFF` is the invalid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionIndex(pub u8);

impl ConnectionIndex {
    /// Sentinel for an unassigned connection.
    pub const INVALID: Self = Self(0xFF);

    /// Whether this index can address a slot.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Index as a `usize` for slot addressing.
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl Default for ConnectionIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ConnectionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#invalid")
        }
    }
}

/// Snapshot of a connection's identity, handed to session notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Slot the connection occupied.
    pub index: ConnectionIndex,
    /// Peer address.
    pub address: SocketAddr,
}

/// A session's handle to one peer.
///
/// Connections are exclusively owned by the session that created them. The
/// session assigns the index and demultiplexes inbound traffic where the
/// transport does not do it per peer.
pub trait Connection {
    /// Address of the peer.
    fn address(&self) -> SocketAddr;

    /// Slot index, [`ConnectionIndex::INVALID`] while unassigned.
    fn index(&self) -> ConnectionIndex;

    /// Assign the slot index. Only the owning session calls this.
    fn set_index(&mut self, index: ConnectionIndex);

    /// Transmit a message to the peer. The connection owns `message` and
    /// drops it once it has been handed to the transport.
    fn send(&mut self, message: Message);

    /// Next inbound message, if any.
    fn receive(&mut self) -> Option<Message>;

    /// Whether this connection has been torn down. This only reflects local
    /// knowledge; there is no liveness timeout.
    fn is_disconnected(&self) -> bool;

    /// Pump pending transport I/O. Called once per session update.
    fn poll(&mut self) {}

    /// Tear the connection down.
    fn close(&mut self);

    /// Identity snapshot.
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            index: self.index(),
            address: self.address(),
        }
    }
}

/// The local peer's own connection. Messages sent to it loop back into its
/// inbox and are dispatched on the next update.
#[derive(Debug)]
pub struct LoopbackConnection {
    address: SocketAddr,
    index: ConnectionIndex,
    inbox: VecDeque<Message>,
    closed: bool,
}

impl LoopbackConnection {
    /// Create a loopback connection advertising `address`.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            index: ConnectionIndex::INVALID,
            inbox: VecDeque::new(),
            closed: false,
        }
    }
}

impl Connection for LoopbackConnection {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn index(&self) -> ConnectionIndex {
        self.index
    }

    fn set_index(&mut self, index: ConnectionIndex) {
        self.index = index;
    }

    fn send(&mut self, message: Message) {
        if !self.closed {
            self.inbox.push_back(message);
        }
    }

    fn receive(&mut self) -> Option<Message> {
        self.inbox.pop_front()
    }

    fn is_disconnected(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
        self.inbox.clear();
    }
}

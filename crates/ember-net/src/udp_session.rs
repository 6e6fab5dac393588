//! Connectionless session: bind a datagram port and poll it.
//!
//! There is no join handshake. `host`, `join` and listening are not
//! meaningful here; the session binds with [`UdpSession::start`], exchanges
//! packets with [`UdpSession::send_direct`] or with peers registered through
//! [`UdpSession::add_peer`], and dispatches everything it receives.

use std::net::SocketAddr;
use std::rc::Rc;

use crate::connection::{Connection, ConnectionIndex, ConnectionInfo};
use crate::error::NetError;
use crate::message::Message;
use crate::packet::Packet;
use crate::routing::MessageRegistry;
use crate::session::{NetSession, Session, SessionConfig};
use crate::transport::DatagramTransport;

// ---------------------------------------------------------------------------
// UdpConnection
// ---------------------------------------------------------------------------

/// Address-keyed peer sharing the session's datagram transport.
///
/// Each `send` packs the message into its own packet. Inbound traffic is
/// tagged with the peer's slot and dispatched by the session, so `receive`
/// never yields anything.
pub struct UdpConnection {
    transport: Rc<dyn DatagramTransport>,
    address: SocketAddr,
    index: ConnectionIndex,
    closed: bool,
}

impl UdpConnection {
    /// Create a connection to `address` over `transport`.
    pub fn new(transport: Rc<dyn DatagramTransport>, address: SocketAddr) -> Self {
        Self {
            transport,
            address,
            index: ConnectionIndex::INVALID,
            closed: false,
        }
    }
}

impl Connection for UdpConnection {
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
        if self.closed {
            return;
        }
        if let Err(e) = send_packet(self.transport.as_ref(), self.address, &message) {
            tracing::warn!("Send to {} failed: {e}", self.address);
        }
    }

    fn receive(&mut self) -> Option<Message> {
        None
    }

    fn is_disconnected(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Pack `message` alone into a fresh packet and hand it to `transport`.
fn send_packet(
    transport: &dyn DatagramTransport,
    address: SocketAddr,
    message: &Message,
) -> Result<(), NetError> {
    let mut packet = Packet::new();
    packet.write(message)?;
    transport.send(address, packet.as_bytes())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// UdpSession
// ---------------------------------------------------------------------------

/// Connectionless session over a [`DatagramTransport`].
pub struct UdpSession<T: DatagramTransport + 'static> {
    net: NetSession,
    registry: MessageRegistry,
    transport: Option<Rc<T>>,
}

impl<T: DatagramTransport + 'static> UdpSession<T> {
    /// Create a session that has not bound a port yet.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            net: NetSession::new(config),
            registry: MessageRegistry::new(),
            transport: None,
        }
    }

    /// Bind a default-constructed transport. See [`Self::start_with`].
    pub fn start(&mut self, port: u16) -> Result<u16, NetError>
    where
        T: Default,
    {
        self.start_with(T::default(), port)
    }

    /// Bind `transport` to `port`, moving to the next port on failure.
    ///
    /// Tries at most `bind_attempts` consecutive ports and returns the port
    /// actually bound. When every attempt fails the transport is dropped and
    /// the session holds nothing.
    pub fn start_with(&mut self, mut transport: T, port: u16) -> Result<u16, NetError> {
        if self.transport.is_some() {
            return Err(NetError::AlreadyRunning);
        }

        let attempts = self.net.config().bind_attempts;
        for attempt in 0..attempts {
            let Some(candidate) = u16::try_from(attempt).ok().and_then(|a| port.checked_add(a))
            else {
                break;
            };
            if transport.bind(candidate) {
                let bound = transport
                    .local_address()
                    .map_or(candidate, |addr| addr.port());
                tracing::info!("Session bound to port {bound} after {} attempt(s)", attempt + 1);
                self.transport = Some(Rc::new(transport));
                return Ok(bound);
            }
            tracing::debug!("Port {candidate} unavailable");
        }

        drop(transport);
        tracing::warn!("Failed to bind after {attempts} attempts starting at port {port}");
        Err(NetError::BindFailed {
            first_port: port,
            attempts,
        })
    }

    /// Release every peer and the transport.
    pub fn stop(&mut self) {
        self.net.close_all();
        if self.transport.take().is_some() {
            tracing::info!("Session stopped");
        }
    }

    /// Whether a transport is bound.
    pub fn is_started(&self) -> bool {
        self.transport.is_some()
    }

    /// Bound local address.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.transport.as_ref()?.local_address()
    }

    /// Pack `message` into a fresh packet and send it to `address`.
    pub fn send_direct(&self, address: SocketAddr, message: &Message) -> Result<(), NetError> {
        let transport = self.transport.as_ref().ok_or(NetError::NotStarted)?;
        send_packet(transport.as_ref(), address, message)
    }

    /// Register a peer by address. Returns the existing slot if the peer is
    /// already known.
    pub fn add_peer(&mut self, address: SocketAddr) -> Result<ConnectionIndex, NetError> {
        let transport = self.transport.as_ref().ok_or(NetError::NotStarted)?;
        if let Some(index) = self.net.index_of_address(address) {
            return Ok(index);
        }
        let index = self
            .net
            .free_connection_index()
            .ok_or(NetError::NoFreeSlot(self.net.config().max_connections))?;
        let shared: Rc<dyn DatagramTransport> = transport.clone();
        self.net
            .join_connection(index, Box::new(UdpConnection::new(shared, address)));
        Ok(index)
    }

    /// Forget the peer in slot `index`.
    pub fn remove_peer(&mut self, index: ConnectionIndex) -> Option<ConnectionInfo> {
        self.net.destroy_connection(index)
    }

    /// Drain the transport in arrival order. Messages from registered peers
    /// are tagged with their slot; the rest carry only the source address.
    fn drain_transport(&mut self, transport: &T) -> Vec<Message> {
        let mut inbound = Vec::new();
        let mut packet = Packet::new();
        while transport.receive(&mut packet) {
            let mut message = Message::default();
            while packet.read(&mut message) {
                let known = message
                    .sender_address()
                    .and_then(|addr| self.net.index_of_address(addr));
                message.set_sender(known);
                inbound.push(std::mem::take(&mut message));
            }
        }
        inbound
    }
}

impl<T: DatagramTransport + 'static> Default for UdpSession<T> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl<T: DatagramTransport + 'static> Session for UdpSession<T> {
    fn host(&mut self, _port: u16) -> Result<(), NetError> {
        tracing::debug!("host() ignored by connectionless session");
        Err(NetError::Unsupported("host"))
    }

    fn join(&mut self, _address: SocketAddr) -> Result<(), NetError> {
        tracing::debug!("join() ignored by connectionless session");
        Err(NetError::Unsupported("join"))
    }

    fn leave(&mut self) {}

    fn update(&mut self) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let mut inbound = self.drain_transport(&transport);
        inbound.extend(self.net.poll_connections());
        for message in inbound {
            self.registry.dispatch(message, &mut self.net);
        }
        self.net.reap_disconnected();
    }

    fn start_listening(&mut self) -> Result<(), NetError> {
        Err(NetError::Unsupported("start_listening"))
    }

    fn stop_listening(&mut self) {}

    fn is_listening(&self) -> bool {
        false
    }

    fn net(&self) -> &NetSession {
        &self.net
    }

    fn net_mut(&mut self) -> &mut NetSession {
        &mut self.net
    }

    fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut MessageRegistry {
        &mut self.registry
    }
}

impl<T: DatagramTransport + 'static> Drop for UdpSession<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Session core: connection ownership, state machine and send helpers.
//!
//! [`NetSession`] holds everything the two session variants share. Handlers
//! receive it mutably during dispatch, which is how a handler replies or moves
//! the session between states. The variant-specific surface (host, join,
//! update, listening) lives on the [`Session`] trait.
//!
//! State machine:
//!
//! ```text
//! Disconnected --join--> Joining --join response--> Ready
//!      |                                              ^
//!      +-------------------host-----------------------+
//! ```

use std::net::SocketAddr;

use crate::connection::{Connection, ConnectionIndex, ConnectionInfo};
use crate::connection_table::ConnectionTable;
use crate::error::NetError;
use crate::events::Event;
use crate::message::{CoreMessage, Message, MessageTypeId};
use crate::routing::{MessageHandler, MessageRegistry};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session is active.
    #[default]
    Disconnected,
    /// A join attempt is outstanding.
    Joining,
    /// The session is an active peer.
    Ready,
}

/// Tunables shared by every session variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on connection slots. Index 255 is reserved as invalid.
    pub max_connections: u8,
    /// Number of consecutive ports tried by a bind before giving up.
    pub bind_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            bind_attempts: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// NetSession
// ---------------------------------------------------------------------------

/// State shared by all session variants.
pub struct NetSession {
    state: SessionState,
    config: SessionConfig,
    connections: ConnectionTable,
    self_index: Option<ConnectionIndex>,
    host_index: Option<ConnectionIndex>,
    /// Connection to the host while a join is outstanding. It has no slot
    /// until the host assigns one.
    joining: Option<Box<dyn Connection>>,
    /// Fired after a connection takes a slot.
    pub connection_joined: Event<ConnectionInfo>,
    /// Fired after a connection is destroyed.
    pub connection_left: Event<ConnectionInfo>,
    /// Fired when the host connection of a client is lost.
    pub host_left: Event<()>,
}

impl NetSession {
    /// Create a disconnected session with no connections.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            connections: ConnectionTable::new(config.max_connections),
            config,
            self_index: None,
            host_index: None,
            joining: None,
            connection_joined: Event::new(),
            connection_left: Event::new(),
            host_left: Event::new(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Change the slot limit, e.g. to adopt the host's limit after joining.
    pub fn set_max_connections(&mut self, max_connections: u8) {
        self.config.max_connections = max_connections;
        self.connections.set_max_connections(max_connections);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `state`, logging the transition.
    pub fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::info!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Whether this peer is the host.
    pub fn is_host(&self) -> bool {
        self.self_index.is_some() && self.self_index == self.host_index
    }

    /// Whether this peer is a client of some other host.
    pub fn is_client(&self) -> bool {
        self.self_index.is_some() && self.self_index != self.host_index
    }

    /// Whether this peer has its own connection.
    pub fn is_running(&self) -> bool {
        self.self_index.is_some()
    }

    /// Whether the session is an active peer.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    // -- connections ---------------------------------------------------------

    /// Lowest free slot, or `None` when the table is full.
    pub fn free_connection_index(&self) -> Option<ConnectionIndex> {
        self.connections.free_index()
    }

    /// Place `connection` into slot `index` and announce it.
    ///
    /// # Panics
    ///
    /// Panics if `index` is invalid or already occupied.
    pub fn join_connection(&mut self, index: ConnectionIndex, mut connection: Box<dyn Connection>) {
        if index.is_valid() && self.connections.contains(index) {
            tracing::error!("Refusing to join {} into occupied slot {index}", connection.address());
        }
        connection.set_index(index);
        let info = connection.info();
        self.connections.insert(index, connection);
        tracing::info!("Connection {} joined at {}", info.address, info.index);
        self.connection_joined.emit(&info);
    }

    /// Destroy the connection in slot `index`.
    ///
    /// Clears the self and host references if they point at it, closes it and
    /// frees the slot. Returns the identity of the destroyed connection.
    pub fn destroy_connection(&mut self, index: ConnectionIndex) -> Option<ConnectionInfo> {
        let mut connection = self.connections.remove(index)?;
        if self.self_index == Some(index) {
            self.self_index = None;
        }
        if self.host_index == Some(index) {
            self.host_index = None;
        }
        connection.close();
        let info = connection.info();
        tracing::info!("Connection {} left from {}", info.address, info.index);
        self.connection_left.emit(&info);
        Some(info)
    }

    /// Connection in slot `index`.
    pub fn connection(&self, index: ConnectionIndex) -> Option<&dyn Connection> {
        self.connections.get(index)
    }

    /// Mutable connection in slot `index`.
    pub fn connection_mut(&mut self, index: ConnectionIndex) -> Option<&mut (dyn Connection + 'static)> {
        self.connections.get_mut(index)
    }

    /// Slot of the connection whose peer is `address`.
    pub fn index_of_address(&self, address: SocketAddr) -> Option<ConnectionIndex> {
        self.connections.index_of_address(address)
    }

    /// Indices of occupied slots in ascending order.
    pub fn connection_indices(&self) -> Vec<ConnectionIndex> {
        self.connections.indices()
    }

    /// Number of occupied slots.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Slot of the local peer's own connection.
    pub fn self_index(&self) -> Option<ConnectionIndex> {
        self.self_index
    }

    /// Slot of the host connection.
    pub fn host_index(&self) -> Option<ConnectionIndex> {
        self.host_index
    }

    /// The local peer's own connection.
    pub fn self_connection(&self) -> Option<&dyn Connection> {
        self.connections.get(self.self_index?)
    }

    /// The host's connection.
    pub fn host_connection(&self) -> Option<&dyn Connection> {
        self.connections.get(self.host_index?)
    }

    /// Mark slot `index` as the local peer's own connection.
    ///
    /// # Panics
    ///
    /// Panics if `index` names an empty slot.
    pub fn set_self_connection(&mut self, index: Option<ConnectionIndex>) {
        if let Some(index) = index {
            assert!(self.connections.contains(index), "self connection {index} is not joined");
        }
        self.self_index = index;
    }

    /// Mark slot `index` as the host connection.
    ///
    /// # Panics
    ///
    /// Panics if `index` names an empty slot.
    pub fn set_host_connection(&mut self, index: Option<ConnectionIndex>) {
        if let Some(index) = index {
            assert!(self.connections.contains(index), "host connection {index} is not joined");
        }
        self.host_index = index;
    }

    // -- sending -------------------------------------------------------------

    /// Send a copy of `message` to slot `index`. Returns whether the slot was
    /// occupied.
    pub fn send_message_to_index(&mut self, index: ConnectionIndex, message: &Message) -> bool {
        match self.connections.get_mut(index) {
            Some(connection) => {
                connection.send(message.clone());
                true
            }
            None => false,
        }
    }

    fn send_to_each(&mut self, message: &Message, mut include: impl FnMut(ConnectionIndex) -> bool) {
        for (index, connection) in self.connections.iter_mut() {
            if include(index) {
                connection.send(message.clone());
            }
        }
    }

    /// Send a copy of `message` to every connection, self included.
    pub fn send_message_to_all(&mut self, message: &Message) {
        self.send_to_each(message, |_| true);
    }

    /// Send a copy of `message` to every connection except the local one.
    pub fn send_message_to_others(&mut self, message: &Message) {
        let self_index = self.self_index;
        self.send_to_each(message, |index| Some(index) != self_index);
    }

    /// Send a copy of `message` to every client except `excluded`.
    ///
    /// The host and the local connection are never recipients.
    pub fn send_message_to_all_clients_but_index(&mut self, message: &Message, excluded: ConnectionIndex) {
        let self_index = self.self_index;
        let host_index = self.host_index;
        self.send_to_each(message, |index| {
            index != excluded && Some(index) != host_index && Some(index) != self_index
        });
    }

    /// Send a copy of `message` to the host. Returns whether a host exists.
    pub fn send_message_to_host(&mut self, message: &Message) -> bool {
        match self.host_index {
            Some(index) => self.send_message_to_index(index, message),
            None => false,
        }
    }

    // -- variant plumbing ----------------------------------------------------

    /// Pump every connection and collect their inbound messages, each tagged
    /// with the slot it arrived on. Messages from the outstanding join carry
    /// no sender.
    pub(crate) fn poll_connections(&mut self) -> Vec<Message> {
        let mut inbound = Vec::new();
        if let Some(joining) = self.joining.as_mut() {
            joining.poll();
            // Frames behind the join response come from the host's slot once
            // the join completes, so they are left queued.
            while let Some(mut message) = joining.receive() {
                let is_response = message.type_id() == CoreMessage::JoinResponse.id();
                message.set_sender(None);
                inbound.push(message);
                if is_response {
                    break;
                }
            }
        }
        for (index, connection) in self.connections.iter_mut() {
            connection.poll();
            while let Some(mut message) = connection.receive() {
                message.set_sender(Some(index));
                inbound.push(message);
            }
        }
        inbound
    }

    /// Park the connection to the host while the handshake runs.
    pub(crate) fn begin_join(&mut self, connection: Box<dyn Connection>) {
        tracing::debug!("Join outstanding to {}", connection.address());
        self.joining = Some(connection);
        self.set_state(SessionState::Joining);
    }

    /// Take the parked host connection to complete the handshake.
    pub(crate) fn take_joining(&mut self) -> Option<Box<dyn Connection>> {
        self.joining.take()
    }

    /// Whether a join is outstanding.
    pub fn is_joining(&self) -> bool {
        self.joining.is_some()
    }

    /// Destroy connections known to be torn down.
    ///
    /// A client that loses its host fires `host_left`; the return value tells
    /// the variant to leave. A join whose connection died returns the session
    /// to [`SessionState::Disconnected`].
    pub(crate) fn reap_disconnected(&mut self) -> bool {
        if self.joining.as_ref().is_some_and(|c| c.is_disconnected()) {
            if let Some(mut joining) = self.joining.take() {
                tracing::warn!("Join to {} failed: connection closed", joining.address());
                joining.close();
            }
            self.set_state(SessionState::Disconnected);
        }

        let dead: Vec<ConnectionIndex> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_disconnected())
            .map(|(index, _)| index)
            .collect();

        let mut host_lost = false;
        for index in dead {
            let was_remote_host = self.host_index == Some(index) && self.self_index != Some(index);
            self.destroy_connection(index);
            if was_remote_host {
                tracing::warn!("Lost connection to host at {index}");
                host_lost = true;
            }
        }
        if host_lost {
            self.host_left.emit(&());
        }
        host_lost
    }

    /// Close and destroy every connection, abandon any join and return to
    /// [`SessionState::Disconnected`].
    pub(crate) fn close_all(&mut self) {
        if let Some(mut joining) = self.joining.take() {
            joining.close();
        }
        for index in self.connections.indices() {
            self.destroy_connection(index);
        }
        self.self_index = None;
        self.host_index = None;
        self.set_state(SessionState::Disconnected);
    }
}

impl Default for NetSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Session trait
// ---------------------------------------------------------------------------

/// Variant-specific session surface.
///
/// Not every operation is meaningful for every variant: a connectionless
/// session reports [`NetError::Unsupported`] for `host` and `join`.
pub trait Session {
    /// Start hosting on `port`.
    fn host(&mut self, port: u16) -> Result<(), NetError>;

    /// Start joining the host at `address`.
    fn join(&mut self, address: SocketAddr) -> Result<(), NetError>;

    /// Tear down every connection and return to disconnected.
    fn leave(&mut self);

    /// Process all pending inbound traffic and dispatch it. Call once per
    /// tick; never blocks.
    fn update(&mut self);

    /// Begin accepting new peers.
    fn start_listening(&mut self) -> Result<(), NetError>;

    /// Stop accepting new peers.
    fn stop_listening(&mut self);

    /// Whether new peers are being accepted.
    fn is_listening(&self) -> bool;

    /// Shared session core.
    fn net(&self) -> &NetSession;

    /// Mutable shared session core.
    fn net_mut(&mut self) -> &mut NetSession;

    /// Dispatch registry.
    fn registry(&self) -> &MessageRegistry;

    /// Mutable dispatch registry.
    fn registry_mut(&mut self) -> &mut MessageRegistry;

    /// Bind `handler` to `type_id`. Fails if the id is already bound.
    fn register_message<H>(
        &mut self,
        type_id: impl Into<MessageTypeId>,
        handler: H,
    ) -> Result<(), NetError>
    where
        Self: Sized,
        H: MessageHandler + 'static,
    {
        self.registry_mut().register(type_id, handler)
    }

    /// Remove the handler bound to `type_id`, if any.
    fn unregister_message(&mut self, type_id: MessageTypeId) {
        self.registry_mut().unregister(type_id);
    }

    /// Current lifecycle state.
    fn state(&self) -> SessionState {
        self.net().state()
    }

    /// Whether this peer is the host.
    fn is_host(&self) -> bool {
        self.net().is_host()
    }

    /// Whether this peer is a client.
    fn is_client(&self) -> bool {
        self.net().is_client()
    }

    /// Whether this peer has its own connection.
    fn is_running(&self) -> bool {
        self.net().is_running()
    }

    /// Whether the session is an active peer.
    fn is_ready(&self) -> bool {
        self.net().is_ready()
    }
}

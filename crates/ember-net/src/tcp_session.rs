//! Connection-oriented session in a star topology.
//!
//! The host listens for streams. Opening a stream is the join request: the
//! host allocates a slot, answers with a `JoinResponse` carrying the
//! [`JoinInfo`], and announces the new connection. The client parks its
//! stream until that response arrives, then installs the host and its own
//! loopback connection at the indices the host chose.
//!
//! ```text
//! client                          host
//!   | --- connect ------------------> |  accept, allocate slot
//!   | <-- JoinResponse (JoinInfo) --- |  connection joined
//!   |  install host + self, Ready     |
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::connection::{Connection, ConnectionIndex, LoopbackConnection};
use crate::error::NetError;
use crate::framing::{FrameReader, write_frame};
use crate::handshake::{JoinInfo, PeerEntry};
use crate::message::{CoreMessage, Message};
use crate::routing::MessageRegistry;
use crate::session::{NetSession, Session, SessionConfig, SessionState};
use crate::transport::{ByteStream, StreamListener, StreamTransport, is_transient};

const READ_CHUNK: usize = 4096;

/// Unflushed bytes a connection may hold before the peer is treated as gone.
pub const MAX_PENDING_BYTES: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// TcpConnection
// ---------------------------------------------------------------------------

/// Peer reached over a byte stream.
///
/// Outbound messages are framed into a buffer that is flushed as far as the
/// stream accepts; inbound bytes are reassembled into messages on `poll`.
pub struct TcpConnection<S: ByteStream> {
    stream: S,
    address: SocketAddr,
    index: ConnectionIndex,
    reader: FrameReader,
    outgoing: Vec<u8>,
    inbox: VecDeque<Message>,
    closed: bool,
}

impl<S: ByteStream> TcpConnection<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        let address = stream.peer_address();
        Self {
            stream,
            address,
            index: ConnectionIndex::INVALID,
            reader: FrameReader::new(),
            outgoing: Vec::new(),
            inbox: VecDeque::new(),
            closed: false,
        }
    }

    /// Bytes framed but not yet accepted by the stream.
    pub fn pending_bytes(&self) -> usize {
        self.outgoing.len()
    }

    fn mark_closed(&mut self, reason: &str) {
        if !self.closed {
            tracing::info!("Connection {} to {} closed: {reason}", self.index, self.address);
            self.closed = true;
        }
    }

    fn flush(&mut self) {
        while !self.outgoing.is_empty() && !self.closed {
            match self.stream.write(&self.outgoing) {
                Ok(0) => self.mark_closed("stream refused data"),
                Ok(n) => {
                    self.outgoing.drain(..n);
                }
                Err(e) if is_transient(&e) => break,
                Err(e) => self.mark_closed(&format!("write failed: {e}")),
            }
        }
    }

    fn fill(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        while !self.closed {
            match self.stream.read(&mut buf) {
                Ok(0) => self.mark_closed("peer closed the stream"),
                Ok(n) => self.reader.extend(&buf[..n]),
                Err(e) if is_transient(&e) => break,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    self.mark_closed("connection reset")
                }
                Err(e) => self.mark_closed(&format!("read failed: {e}")),
            }
        }

        loop {
            match self.reader.next_message() {
                Ok(Some(message)) => self.inbox.push_back(message),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Corrupt stream from {}: {e}", self.address);
                    self.mark_closed("corrupt stream");
                    break;
                }
            }
        }
    }
}

impl<S: ByteStream> Connection for TcpConnection<S> {
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
        write_frame(&message, &mut self.outgoing);
        self.flush();
        if self.outgoing.len() > MAX_PENDING_BYTES {
            self.outgoing.clear();
            self.mark_closed("peer stopped reading");
        }
    }

    fn receive(&mut self) -> Option<Message> {
        self.inbox.pop_front()
    }

    fn is_disconnected(&self) -> bool {
        self.closed
    }

    fn poll(&mut self) {
        self.flush();
        self.fill();
    }

    fn close(&mut self) {
        if !self.closed {
            self.flush();
        }
        self.stream.shutdown();
        self.closed = true;
    }
}

// ---------------------------------------------------------------------------
// TcpSession
// ---------------------------------------------------------------------------

/// Connection-oriented session over a [`StreamTransport`].
pub struct TcpSession<T: StreamTransport> {
    net: NetSession,
    registry: MessageRegistry,
    transport: T,
    listener: Option<T::Listener>,
    /// Port the host listens on, kept so listening can be resumed.
    listen_port: Option<u16>,
    /// Peers the host reported when this session joined.
    roster: Rc<RefCell<Vec<PeerEntry>>>,
}

impl<T: StreamTransport> TcpSession<T> {
    /// Create a disconnected session. The join-response handler is
    /// registered up front.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let roster = Rc::new(RefCell::new(Vec::new()));
        let mut registry = MessageRegistry::new();
        let handler_roster = Rc::clone(&roster);
        let registered = registry
            .register(CoreMessage::JoinResponse, move |message: Message, net: &mut NetSession| {
                complete_join(net, &handler_roster, &message);
            })
            .is_ok();
        debug_assert!(registered);

        Self {
            net: NetSession::new(config),
            registry,
            transport,
            listener: None,
            listen_port: None,
            roster,
        }
    }

    /// Connections other than the host.
    pub fn number_of_live_clients(&self) -> usize {
        let host = self.net.host_index();
        self.net
            .connection_indices()
            .into_iter()
            .filter(|index| Some(*index) != host)
            .count()
    }

    /// Peers the host reported when this session joined.
    pub fn roster(&self) -> Vec<PeerEntry> {
        self.roster.borrow().clone()
    }

    /// Address of the listener, while listening.
    pub fn listen_address(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_address())
    }

    fn accept_new_peers(&mut self) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        let mut accepted = Vec::new();
        loop {
            match listener.accept() {
                Ok(Some(stream)) => accepted.push(stream),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Accept failed: {e}");
                    break;
                }
            }
        }
        for stream in accepted {
            self.admit(stream);
        }
    }

    fn dispatch_inbound(&mut self) {
        for message in self.net.poll_connections() {
            self.registry.dispatch(message, &mut self.net);
        }
    }

    /// Give an accepted stream a slot and send it the join information.
    fn admit(&mut self, mut stream: T::Stream) {
        let address = stream.peer_address();
        let Some(index) = self.net.free_connection_index() else {
            tracing::warn!("Rejecting {address}: all connection slots are taken");
            stream.shutdown();
            return;
        };

        let roster = self
            .net
            .connection_indices()
            .into_iter()
            .filter_map(|i| {
                self.net.connection(i).map(|c| PeerEntry {
                    index: i,
                    address: c.address().to_string(),
                })
            })
            .collect();
        let info = JoinInfo {
            assigned_index: index,
            assigned_address: address,
            host_index: self.net.host_index().unwrap_or(ConnectionIndex::INVALID),
            max_connections: self.net.config().max_connections,
            roster,
        };

        let mut connection = TcpConnection::new(stream);
        match info.to_message() {
            Ok(response) => connection.send(response),
            Err(e) => {
                tracing::warn!("Could not encode join response for {address}: {e}");
                connection.close();
                return;
            }
        }
        tracing::debug!("Sent join response to {address} (slot {index})");
        self.net.join_connection(index, Box::new(connection));
    }
}

/// Finish a join on the client once the host's response arrives.
fn complete_join(net: &mut NetSession, roster: &RefCell<Vec<PeerEntry>>, message: &Message) {
    let Some(mut host) = net.take_joining() else {
        tracing::warn!("Ignoring join response with no join outstanding");
        return;
    };

    let info = match JoinInfo::from_message(message) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("Join to {} failed: {e}", host.address());
            host.close();
            net.set_state(SessionState::Disconnected);
            return;
        }
    };

    tracing::debug!(
        "Join accepted: slot {} of {}, host at {}",
        info.assigned_index,
        info.max_connections,
        info.host_index
    );
    net.set_max_connections(info.max_connections);
    net.join_connection(info.host_index, host);
    net.join_connection(
        info.assigned_index,
        Box::new(LoopbackConnection::new(info.assigned_address)),
    );
    net.set_host_connection(Some(info.host_index));
    net.set_self_connection(Some(info.assigned_index));
    *roster.borrow_mut() = info.roster;
    net.set_state(SessionState::Ready);
}

impl<T: StreamTransport> Session for TcpSession<T> {
    fn host(&mut self, port: u16) -> Result<(), NetError> {
        if self.net.state() != SessionState::Disconnected || self.listener.is_some() {
            return Err(NetError::AlreadyRunning);
        }
        let index = self
            .net
            .free_connection_index()
            .ok_or(NetError::NoFreeSlot(self.net.config().max_connections))?;

        let listener = self.transport.listen(port)?;
        let local = listener.local_address();
        self.listen_port = Some(local.port());
        self.listener = Some(listener);

        self.net
            .join_connection(index, Box::new(LoopbackConnection::new(local)));
        self.net.set_self_connection(Some(index));
        self.net.set_host_connection(Some(index));
        self.net.set_state(SessionState::Ready);
        tracing::info!("Hosting on {local}");
        Ok(())
    }

    fn join(&mut self, address: SocketAddr) -> Result<(), NetError> {
        if self.net.state() != SessionState::Disconnected {
            return Err(NetError::AlreadyRunning);
        }
        let stream = self.transport.connect(address)?;
        tracing::info!("Joining {address}");
        self.roster.borrow_mut().clear();
        self.net.begin_join(Box::new(TcpConnection::new(stream)));
        Ok(())
    }

    fn leave(&mut self) {
        self.listener = None;
        self.listen_port = None;
        self.net.close_all();
        tracing::info!("Left session");
    }

    fn update(&mut self) {
        self.accept_new_peers();

        let was_joining = self.net.is_joining();
        self.dispatch_inbound();
        if was_joining && self.net.is_ready() {
            // Pick up host traffic queued behind the join response.
            self.dispatch_inbound();
        }

        if self.net.reap_disconnected() {
            self.leave();
        }
    }

    fn start_listening(&mut self) -> Result<(), NetError> {
        if self.listener.is_some() {
            return Ok(());
        }
        let port = self.listen_port.filter(|_| self.net.is_host()).ok_or(NetError::NotStarted)?;
        self.listener = Some(self.transport.listen(port)?);
        Ok(())
    }

    fn stop_listening(&mut self) {
        self.listener = None;
    }

    fn is_listening(&self) -> bool {
        self.listener.is_some()
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

impl<T: StreamTransport + Default> Default for TcpSession<T> {
    fn default() -> Self {
        Self::new(T::default(), SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use crate::transport::memory::MemoryStream;
    use crate::stream::BinaryStream;

    fn connection_pair() -> (TcpConnection<MemoryStream>, TcpConnection<MemoryStream>) {
        let net = MemoryNetwork::new();
        let mut streams = net.streams();
        let mut listener = streams.listen(0).unwrap();
        let port = listener.local_address().port();
        let client = streams
            .connect(SocketAddr::from(([127, 0, 0, 1], port)))
            .unwrap();
        let server = listener.accept().unwrap().unwrap();
        (TcpConnection::new(client), TcpConnection::new(server))
    }

    #[test]
    fn test_messages_cross_stream_in_order() {
        let (mut a, mut b) = connection_pair();
        a.send(Message::new(7));
        a.send(Message::new(8));

        b.poll();
        assert_eq!(b.receive().map(|m| m.type_id()), Some(7));
        assert_eq!(b.receive().map(|m| m.type_id()), Some(8));
        assert!(b.receive().is_none());
        assert!(!b.is_disconnected());
    }

    #[test]
    fn test_peer_close_marks_disconnected() {
        let (mut a, mut b) = connection_pair();
        a.send(Message::new(1));
        a.close();

        b.poll();
        assert!(b.is_disconnected());
        // Messages that arrived before the close are still delivered.
        assert_eq!(b.receive().map(|m| m.type_id()), Some(1));
    }

    /// Stream whose peer never reads or writes.
    struct StalledStream;

    impl ByteStream for StalledStream {
        fn write(&mut self, _bytes: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
        fn peer_address(&self) -> SocketAddr {
            SocketAddr::from(([127, 0, 0, 1], 4000))
        }
        fn shutdown(&mut self) {}
    }

    #[test]
    fn test_unread_backlog_is_capped() {
        let mut conn = TcpConnection::new(StalledStream);
        let mut message = Message::new(9);
        message.write_bytes(&[0u8; 1000]);

        conn.send(message.clone());
        assert!(!conn.is_disconnected());
        assert_eq!(conn.pending_bytes(), 1003);

        for _ in 0..MAX_PENDING_BYTES / 1003 + 1 {
            conn.send(message.clone());
        }
        assert!(conn.is_disconnected());
        assert_eq!(conn.pending_bytes(), 0);
    }

    #[test]
    fn test_send_after_close_is_dropped() {
        let (mut a, _b) = connection_pair();
        a.close();
        a.send(Message::new(1));
        assert_eq!(a.pending_bytes(), 0);
    }

    #[test]
    fn test_corrupt_stream_disconnects() {
        let net = MemoryNetwork::new();
        let mut streams = net.streams();
        let mut listener = streams.listen(0).unwrap();
        let port = listener.local_address().port();
        let mut raw = streams
            .connect(SocketAddr::from(([127, 0, 0, 1], port)))
            .unwrap();
        let mut conn = TcpConnection::new(listener.accept().unwrap().unwrap());

        raw.write(&[0, 0, 9]).unwrap();
        conn.poll();
        assert!(conn.is_disconnected());
        assert!(conn.receive().is_none());
    }
}

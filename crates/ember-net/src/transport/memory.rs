//! In-process transports for tests and single-process play.
//!
//! A [`MemoryNetwork`] is a shared switchboard. Datagram endpoints and stream
//! listeners register ports on it; every endpoint lives at `127.0.0.1:port`.
//! Ports can be marked occupied to make binds fail on purpose.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use crate::packet::Packet;
use crate::transport::{ByteStream, DatagramTransport, StreamListener, StreamTransport};

const FIRST_EPHEMERAL_PORT: u16 = 49152;

fn local(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

#[derive(Debug)]
struct NetworkState {
    /// Ports that refuse every bind and listen.
    occupied: HashSet<u16>,
    /// Pending datagrams per bound port.
    datagrams: HashMap<u16, VecDeque<(SocketAddr, Vec<u8>)>>,
    /// Streams waiting to be accepted per listening port.
    listeners: HashMap<u16, VecDeque<MemoryStream>>,
    /// Ports held by connected client streams.
    stream_ports: HashSet<u16>,
    next_ephemeral: u16,
    bind_attempts: u32,
}

impl NetworkState {
    fn in_use(&self, port: u16) -> bool {
        self.occupied.contains(&port)
            || self.datagrams.contains_key(&port)
            || self.listeners.contains_key(&port)
            || self.stream_ports.contains(&port)
    }

    fn ephemeral_port(&mut self) -> Option<u16> {
        for _ in FIRST_EPHEMERAL_PORT..=u16::MAX {
            let port = self.next_ephemeral;
            self.next_ephemeral = if port == u16::MAX {
                FIRST_EPHEMERAL_PORT
            } else {
                port + 1
            };
            if !self.in_use(port) {
                return Some(port);
            }
        }
        None
    }

    fn resolve_port(&mut self, port: u16) -> Option<u16> {
        if port == 0 {
            self.ephemeral_port()
        } else if self.in_use(port) {
            None
        } else {
            Some(port)
        }
    }
}

/// Shared in-process network. Cloning yields another handle to the same
/// network.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                occupied: HashSet::new(),
                datagrams: HashMap::new(),
                listeners: HashMap::new(),
                stream_ports: HashSet::new(),
                next_ephemeral: FIRST_EPHEMERAL_PORT,
                bind_attempts: 0,
            })),
        }
    }

    /// Make `port` refuse binds until released.
    pub fn occupy(&self, port: u16) {
        self.state.borrow_mut().occupied.insert(port);
    }

    /// Undo [`Self::occupy`].
    pub fn release(&self, port: u16) {
        self.state.borrow_mut().occupied.remove(&port);
    }

    /// Total datagram bind attempts made on this network.
    pub fn bind_attempts(&self) -> u32 {
        self.state.borrow().bind_attempts
    }

    /// Ports currently bound by datagram endpoints, ascending.
    pub fn bound_datagram_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.state.borrow().datagrams.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Whether a stream listener is registered on `port`.
    pub fn is_listening(&self, port: u16) -> bool {
        self.state.borrow().listeners.contains_key(&port)
    }

    /// Create an unbound datagram endpoint.
    pub fn datagram(&self) -> MemoryDatagram {
        MemoryDatagram {
            network: self.clone(),
            port: None,
        }
    }

    /// Create a stream transport.
    pub fn streams(&self) -> MemoryStreams {
        MemoryStreams {
            network: self.clone(),
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Datagrams
// ---------------------------------------------------------------------------

/// In-process [`DatagramTransport`]. Unbinds when dropped.
#[derive(Debug)]
pub struct MemoryDatagram {
    network: MemoryNetwork,
    port: Option<u16>,
}

impl MemoryDatagram {
    fn unbind(&mut self) {
        if let Some(port) = self.port.take() {
            self.network.state.borrow_mut().datagrams.remove(&port);
        }
    }
}

impl Default for MemoryDatagram {
    /// Endpoint on a private network of its own.
    fn default() -> Self {
        MemoryNetwork::new().datagram()
    }
}

impl DatagramTransport for MemoryDatagram {
    fn bind(&mut self, port: u16) -> bool {
        let mut state = self.network.state.borrow_mut();
        state.bind_attempts += 1;
        let Some(port) = state.resolve_port(port) else {
            return false;
        };
        if let Some(old) = self.port.replace(port) {
            state.datagrams.remove(&old);
        }
        state.datagrams.insert(port, VecDeque::new());
        true
    }

    fn send(&self, address: SocketAddr, bytes: &[u8]) -> io::Result<usize> {
        let Some(port) = self.port else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "endpoint is not bound"));
        };
        // Datagrams to nobody vanish, as on a real network.
        if let Some(inbox) = self.network.state.borrow_mut().datagrams.get_mut(&address.port()) {
            inbox.push_back((local(port), bytes.to_vec()));
        }
        Ok(bytes.len())
    }

    fn receive(&self, packet: &mut Packet) -> bool {
        let Some(port) = self.port else {
            return false;
        };
        loop {
            let next = self
                .network
                .state
                .borrow_mut()
                .datagrams
                .get_mut(&port)
                .and_then(VecDeque::pop_front);
            let Some((from, bytes)) = next else {
                return false;
            };
            match packet.load(from, &bytes) {
                Ok(()) => return true,
                Err(e) => tracing::warn!("Dropping datagram from {from}: {e}"),
            }
        }
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.port.map(local)
    }
}

impl Drop for MemoryDatagram {
    fn drop(&mut self) {
        self.unbind();
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// One direction of a stream.
#[derive(Debug, Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
}

/// In-process [`ByteStream`]. Shuts down when dropped.
#[derive(Debug)]
pub struct MemoryStream {
    network: MemoryNetwork,
    local: SocketAddr,
    peer: SocketAddr,
    incoming: Rc<RefCell<Pipe>>,
    outgoing: Rc<RefCell<Pipe>>,
    /// Whether this end holds its local port (client ends do).
    owns_port: bool,
}

impl MemoryStream {
    /// Address of this end.
    pub fn local_address(&self) -> SocketAddr {
        self.local
    }
}

impl ByteStream for MemoryStream {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut pipe = self.outgoing.borrow_mut();
        if pipe.writer_closed || pipe.reader_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed"));
        }
        pipe.bytes.extend(bytes);
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.incoming.borrow_mut();
        if pipe.bytes.is_empty() {
            return if pipe.writer_closed || pipe.reader_closed {
                Ok(0)
            } else {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "no data pending"))
            };
        }
        let n = buf.len().min(pipe.bytes.len());
        for (dst, src) in buf.iter_mut().zip(pipe.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn peer_address(&self) -> SocketAddr {
        self.peer
    }

    fn shutdown(&mut self) {
        self.outgoing.borrow_mut().writer_closed = true;
        let mut incoming = self.incoming.borrow_mut();
        incoming.reader_closed = true;
        incoming.bytes.clear();
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.shutdown();
        if self.owns_port
            && let Ok(mut state) = self.network.state.try_borrow_mut()
        {
            state.stream_ports.remove(&self.local.port());
        }
    }
}

/// In-process [`StreamTransport`].
#[derive(Debug, Clone)]
pub struct MemoryStreams {
    network: MemoryNetwork,
}

impl Default for MemoryStreams {
    /// Transport on a private network of its own.
    fn default() -> Self {
        MemoryNetwork::new().streams()
    }
}

impl StreamTransport for MemoryStreams {
    type Stream = MemoryStream;
    type Listener = MemoryListener;

    fn listen(&mut self, port: u16) -> io::Result<MemoryListener> {
        let mut state = self.network.state.borrow_mut();
        let port = state
            .resolve_port(port)
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "port is in use"))?;
        state.listeners.insert(port, VecDeque::new());
        Ok(MemoryListener {
            network: self.network.clone(),
            port,
        })
    }

    fn connect(&mut self, address: SocketAddr) -> io::Result<MemoryStream> {
        let mut state = self.network.state.borrow_mut();
        if !state.listeners.contains_key(&address.port()) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nobody is listening"));
        }
        let client_port = state
            .ephemeral_port()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no free port"))?;
        state.stream_ports.insert(client_port);

        let to_server = Rc::new(RefCell::new(Pipe::default()));
        let to_client = Rc::new(RefCell::new(Pipe::default()));
        let client = MemoryStream {
            network: self.network.clone(),
            local: local(client_port),
            peer: local(address.port()),
            incoming: Rc::clone(&to_client),
            outgoing: Rc::clone(&to_server),
            owns_port: true,
        };
        let server = MemoryStream {
            network: self.network.clone(),
            local: local(address.port()),
            peer: local(client_port),
            incoming: to_server,
            outgoing: to_client,
            owns_port: false,
        };
        if let Some(pending) = state.listeners.get_mut(&address.port()) {
            pending.push_back(server);
        }
        Ok(client)
    }
}

/// In-process [`StreamListener`]. Unregisters when dropped; streams still
/// waiting to be accepted are closed.
#[derive(Debug)]
pub struct MemoryListener {
    network: MemoryNetwork,
    port: u16,
}

impl StreamListener for MemoryListener {
    type Stream = MemoryStream;

    fn accept(&mut self) -> io::Result<Option<MemoryStream>> {
        Ok(self
            .network
            .state
            .borrow_mut()
            .listeners
            .get_mut(&self.port)
            .and_then(VecDeque::pop_front))
    }

    fn local_address(&self) -> SocketAddr {
        local(self.port)
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let pending = self.network.state.borrow_mut().listeners.remove(&self.port);
        drop(pending);
    }
}

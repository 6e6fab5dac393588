//! Transport collaborators consumed by the sessions.
//!
//! Sessions never touch sockets directly. The connectionless variant drives a
//! [`DatagramTransport`]; the connection-oriented variant drives a
//! [`StreamTransport`]. Every call is non-blocking so that `update()` never
//! stalls the tick.

use std::io;
use std::net::SocketAddr;

use crate::packet::Packet;

pub mod memory;
pub mod tcp;
pub mod udp;

pub use memory::{MemoryDatagram, MemoryListener, MemoryNetwork, MemoryStream, MemoryStreams};
pub use tcp::{TcpByteStream, TcpStreamListener, TcpTransport};
pub use udp::UdpTransport;

/// Packet-oriented transport.
pub trait DatagramTransport {
    /// Bind to `port` on every interface. Port 0 lets the system choose.
    fn bind(&mut self, port: u16) -> bool;

    /// Transmit one datagram.
    fn send(&self, address: SocketAddr, bytes: &[u8]) -> io::Result<usize>;

    /// Load the next pending datagram into `packet`.
    ///
    /// Returns `false` when nothing is pending. Never blocks.
    fn receive(&self, packet: &mut Packet) -> bool;

    /// Bound address, if bound.
    fn local_address(&self) -> Option<SocketAddr>;
}

/// Reliable ordered byte stream to one peer.
///
/// Follows the `std::io` conventions of a non-blocking socket: `read`
/// returns `Ok(0)` once the peer has closed, and [`io::ErrorKind::WouldBlock`]
/// when no data is pending.
pub trait ByteStream {
    /// Write as much of `bytes` as the stream accepts right now.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Read pending bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Address of the remote end.
    fn peer_address(&self) -> SocketAddr;

    /// Close both directions.
    fn shutdown(&mut self);
}

/// Accepts inbound streams.
pub trait StreamListener {
    /// Stream type produced by `accept`.
    type Stream: ByteStream;

    /// Next pending inbound stream, if any. Never blocks.
    fn accept(&mut self) -> io::Result<Option<Self::Stream>>;

    /// Address the listener is bound to.
    fn local_address(&self) -> SocketAddr;
}

/// Factory for listeners and outbound streams.
pub trait StreamTransport {
    /// Stream type for both directions.
    type Stream: ByteStream + 'static;
    /// Listener type.
    type Listener: StreamListener<Stream = Self::Stream>;

    /// Listen on `port`.
    fn listen(&mut self, port: u16) -> io::Result<Self::Listener>;

    /// Open a stream to `address`.
    fn connect(&mut self, address: SocketAddr) -> io::Result<Self::Stream>;
}

/// Whether an I/O error only means "try again later".
pub(crate) fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

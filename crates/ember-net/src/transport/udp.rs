//! Datagram transport over a non-blocking UDP socket.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::packet::{PACKET_MTU, Packet};
use crate::platform;
use crate::transport::{DatagramTransport, is_transient};

/// [`DatagramTransport`] backed by a `std` UDP socket.
#[derive(Debug, Default)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    /// Create an unbound transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatagramTransport for UdpTransport {
    fn bind(&mut self, port: u16) -> bool {
        match platform::create_datagram_socket(platform::ipv4_bind_address(port)) {
            Ok(socket) => {
                self.socket = Some(socket);
                true
            }
            Err(e) => {
                tracing::debug!("UDP bind to port {port} failed: {e}");
                false
            }
        }
    }

    fn send(&self, address: SocketAddr, bytes: &[u8]) -> io::Result<usize> {
        match &self.socket {
            Some(socket) => socket.send_to(bytes, address),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "transport is not bound")),
        }
    }

    fn receive(&self, packet: &mut Packet) -> bool {
        let Some(socket) = &self.socket else {
            return false;
        };
        let mut buf = [0u8; PACKET_MTU];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => match packet.load(from, &buf[..len]) {
                    Ok(()) => return true,
                    Err(e) => tracing::warn!("Dropping datagram from {from}: {e}"),
                },
                Err(e) if is_transient(&e) => return false,
                // Windows reports ICMP port-unreachable as a reset on the next read.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    tracing::warn!("UDP receive failed: {e}");
                    return false;
                }
            }
        }
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

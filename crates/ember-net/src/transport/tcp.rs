//! Stream transport over non-blocking TCP sockets.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use crate::platform::{self, SocketConfig};
use crate::transport::{ByteStream, StreamListener, StreamTransport};

/// [`StreamTransport`] backed by `std` TCP sockets.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: SocketConfig,
}

impl TcpTransport {
    /// Create a transport with default socket options.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamTransport for TcpTransport {
    type Stream = TcpByteStream;
    type Listener = TcpStreamListener;

    fn listen(&mut self, port: u16) -> io::Result<TcpStreamListener> {
        let listener = platform::create_listener(platform::ipv4_bind_address(port), &self.config)?;
        let local = listener.local_addr()?;
        tracing::info!("TCP listening on {local}");
        Ok(TcpStreamListener {
            listener,
            local,
            config: self.config.clone(),
        })
    }

    fn connect(&mut self, address: SocketAddr) -> io::Result<TcpByteStream> {
        let stream = platform::connect_stream(address, &self.config)?;
        TcpByteStream::new(stream)
    }
}

/// Non-blocking TCP listener.
#[derive(Debug)]
pub struct TcpStreamListener {
    listener: TcpListener,
    local: SocketAddr,
    config: SocketConfig,
}

impl StreamListener for TcpStreamListener {
    type Stream = TcpByteStream;

    fn accept(&mut self) -> io::Result<Option<TcpByteStream>> {
        match self.listener.accept() {
            Ok((stream, _)) => {
                platform::configure_stream(&stream, &self.config)?;
                TcpByteStream::new(stream).map(Some)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_address(&self) -> SocketAddr {
        self.local
    }
}

/// Non-blocking TCP stream.
#[derive(Debug)]
pub struct TcpByteStream {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpByteStream {
    fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }
}

impl ByteStream for TcpByteStream {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.stream.write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn peer_address(&self) -> SocketAddr {
        self.peer
    }

    fn shutdown(&mut self) {
        // Already-closed sockets report NotConnected here.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

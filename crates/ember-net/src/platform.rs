//! Cross-platform socket construction.
//!
//! [`SocketConfig`] gathers the options applied to every TCP socket
//! (TCP_NODELAY, keepalive, SO_REUSEADDR). All sockets built here are
//! non-blocking, since sessions only ever poll them.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

/// Socket options for stream connections.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Keepalive probe interval. Default: 10s.
    pub keepalive_interval: Duration,
    /// Probes before the OS declares the connection dead. Default: 3.
    pub keepalive_retries: u32,
    /// Enable `SO_REUSEADDR` on listeners. Default: true except on Windows.
    pub reuse_addr: bool,
    /// Timeout for outbound connects. Default: 5s.
    pub connect_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Apply `config` to a connected stream and make it non-blocking.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Retries are supported on Linux and Windows but not macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    stream.set_nonblocking(true)
}

fn domain_for(addr: SocketAddr) -> Domain {
    if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 }
}

/// Create a non-blocking listener bound to `addr`.
pub fn create_listener(addr: SocketAddr, config: &SocketConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(domain_for(addr), Type::STREAM, Some(Protocol::TCP))?;
    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

/// Open a stream to `addr`, waiting at most `config.connect_timeout`, then
/// configure it.
pub fn connect_stream(addr: SocketAddr, config: &SocketConfig) -> io::Result<TcpStream> {
    let socket = Socket::new(domain_for(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), config.connect_timeout)?;
    let stream: TcpStream = socket.into();
    configure_stream(&stream, config)?;
    Ok(stream)
}

/// Create a non-blocking datagram socket bound to `addr`.
///
/// Address reuse stays off, so binding an occupied port fails and the caller
/// can move on to the next one.
pub fn create_datagram_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(domain_for(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// IPv4 wildcard address on `port`.
pub fn ipv4_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// IPv4 loopback address on `port`.
pub fn loopback_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

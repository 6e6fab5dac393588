//! Ember session server.
//!
//! Runs one session per process: a connectionless datagram endpoint, or a
//! stream session that either hosts or joins. Every peer answers pings and,
//! when it has somewhere to send them, pings once a second.

mod ping;

use std::cell::Cell;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;
use std::time::{Duration, Instant};

use clap::Parser;
use ember_config::{AppDirs, CliArgs, Config, TransportKind};
use ember_net::{
    NetError, Session, SessionConfig, TcpSession, TcpTransport, UdpSession, UdpTransport,
};

const PING_INTERVAL: Duration = Duration::from_secs(1);

type BoxError = Box<dyn std::error::Error>;

fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    let dirs = AppDirs::resolve_with_override(args.config.as_deref())?;

    let mut config = Config::load_or_create(&dirs.config_dir)?;
    config.apply_cli_overrides(&args);
    config.validate()?;

    ember_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));
    tracing::info!(
        "Ember server starting ({} transport, config at {})",
        config.network.transport,
        dirs.config_dir.display()
    );

    let session_config = SessionConfig {
        max_connections: config.network.max_connections,
        bind_attempts: config.network.bind_attempts,
    };
    let tick = Duration::from_secs(1) / config.network.tick_rate_hz;

    match config.network.transport {
        TransportKind::Udp => run_datagram(&config, &args, session_config, tick),
        TransportKind::Tcp => run_stream(&config, &args, session_config, tick),
    }
}

fn resolve(config: &Config) -> Result<SocketAddr, BoxError> {
    let host = (config.network.server_address.as_str(), config.network.server_port);
    host.to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("{}:{} did not resolve", host.0, host.1).into())
}

/// Sleep out the remainder of the tick that started at `started`.
fn wait_for_next_tick(started: Instant, tick: Duration) {
    if let Some(remaining) = tick.checked_sub(started.elapsed()) {
        std::thread::sleep(remaining);
    }
}

fn run_datagram(
    config: &Config,
    args: &CliArgs,
    session_config: SessionConfig,
    tick: Duration,
) -> Result<(), BoxError> {
    let mut session: UdpSession<UdpTransport> = UdpSession::new(session_config);
    let stats = ping::register(&mut session)?;

    // With an explicit remote we are the pinging side and bind anywhere.
    let remote = match args.server {
        Some(_) => Some(resolve(config)?),
        None => None,
    };
    let port = if remote.is_some() { 0 } else { config.network.server_port };
    session.start(port)?;

    if let Some(remote) = remote {
        let index = session.add_peer(remote)?;
        tracing::info!("Pinging {remote} through {index}");
    }

    let mut sequence = 0u32;
    let mut last_ping = Instant::now();
    loop {
        let started = Instant::now();
        session.update();

        for (address, sequence) in ping::drain_pending(&stats.pending) {
            if let Err(e) = session.send_direct(address, &ping::pong(sequence)?) {
                tracing::warn!("Pong to {address} failed: {e}");
            }
        }

        if remote.is_some() && last_ping.elapsed() >= PING_INTERVAL {
            sequence = sequence.wrapping_add(1);
            session.net_mut().send_message_to_all(&ping::ping(sequence)?);
            last_ping = Instant::now();
        }

        wait_for_next_tick(started, tick);
    }
}

fn run_stream(
    config: &Config,
    args: &CliArgs,
    session_config: SessionConfig,
    tick: Duration,
) -> Result<(), BoxError> {
    let mut session = TcpSession::new(TcpTransport::new(), session_config);
    ping::register(&mut session)?;

    let host_lost = Rc::new(Cell::new(false));
    {
        let net = session.net_mut();
        net.connection_joined
            .subscribe(|info| tracing::info!("Peer {} joined from {}", info.index, info.address));
        net.connection_left
            .subscribe(|info| tracing::info!("Peer {} at {} left", info.index, info.address));
        let lost = Rc::clone(&host_lost);
        net.host_left.subscribe(move |_| lost.set(true));
    }

    if args.host || args.server.is_none() {
        session.host(config.network.server_port)?;
        tracing::info!("Hosting on {:?}", session.listen_address());
    } else {
        let address = resolve(config)?;
        session.join(address)?;
        tracing::info!("Joining {address}");
    }

    let mut sequence = 0u32;
    let mut last_ping = Instant::now();
    loop {
        let started = Instant::now();
        session.update();

        if host_lost.get() {
            tracing::warn!("Host went away; shutting down");
            return Ok(());
        }
        if !session.is_running() && !session.net().is_joining() {
            return Err(NetError::NotStarted.into());
        }

        if session.is_ready() && last_ping.elapsed() >= PING_INTERVAL {
            sequence = sequence.wrapping_add(1);
            session.net_mut().send_message_to_others(&ping::ping(sequence)?);
            last_ping = Instant::now();
        }

        wait_for_next_tick(started, tick);
    }
}

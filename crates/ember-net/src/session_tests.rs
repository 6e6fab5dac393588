//! Session scenarios driven over the in-process memory transport.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::connection::ConnectionIndex;
use crate::error::NetError;
use crate::message::{CoreMessage, Message, NUM_CORE_MESSAGES};
use crate::session::{NetSession, Session, SessionConfig, SessionState};
use crate::stream::BinaryStream;
use crate::tcp_session::TcpSession;
use crate::transport::{MemoryDatagram, MemoryNetwork, MemoryStreams};
use crate::udp_session::UdpSession;

const CHAT: u8 = NUM_CORE_MESSAGES;

fn local(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn counter() -> (Rc<Cell<u32>>, impl FnMut(Message, &mut NetSession)) {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    (count, move |_: Message, _: &mut NetSession| c.set(c.get() + 1))
}

// ---------------------------------------------------------------------------
// Connectionless
// ---------------------------------------------------------------------------

fn udp_session() -> UdpSession<MemoryDatagram> {
    UdpSession::new(SessionConfig::default())
}

#[test]
fn test_bind_retry_skips_occupied_ports() {
    let net = MemoryNetwork::new();
    for port in 7000..7003 {
        net.occupy(port);
    }

    let mut session = udp_session();
    assert_eq!(session.start_with(net.datagram(), 7000).unwrap(), 7003);
    assert_eq!(net.bind_attempts(), 4);
    assert!(session.is_started());
    assert_eq!(net.bound_datagram_ports(), vec![7003]);
}

#[test]
fn test_bind_retry_exhaustion_releases_transport() {
    let net = MemoryNetwork::new();
    for port in 7000..7008 {
        net.occupy(port);
    }

    let mut session = udp_session();
    let result = session.start_with(net.datagram(), 7000);
    assert!(matches!(
        result,
        Err(NetError::BindFailed {
            first_port: 7000,
            attempts: 8
        })
    ));
    assert_eq!(net.bind_attempts(), 8);
    assert!(!session.is_started());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(net.bound_datagram_ports().is_empty());

    // A freed port makes the next start succeed.
    net.release(7000);
    assert_eq!(session.start_with(net.datagram(), 7000).unwrap(), 7000);
}

#[test]
fn test_start_twice_is_rejected() {
    let net = MemoryNetwork::new();
    let mut session = udp_session();
    session.start_with(net.datagram(), 7100).unwrap();
    assert!(matches!(
        session.start_with(net.datagram(), 7200),
        Err(NetError::AlreadyRunning)
    ));
    session.stop();
    assert!(net.bound_datagram_ports().is_empty());
}

#[test]
fn test_direct_send_is_dispatched_by_type() {
    let net = MemoryNetwork::new();
    let mut a = udp_session();
    let mut b = udp_session();
    a.start_with(net.datagram(), 7300).unwrap();
    b.start_with(net.datagram(), 7400).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    b.register_message(CHAT, move |mut msg: Message, _: &mut NetSession| {
        let text = msg.read_string(64).unwrap_or_default();
        s.borrow_mut().push((text, msg.sender(), msg.sender_address()));
    })
    .unwrap();

    let mut msg = Message::new(CHAT);
    msg.write_string(Some("hello")).unwrap();
    a.send_direct(local(7400), &msg).unwrap();
    b.update();

    assert_eq!(
        *seen.borrow(),
        vec![("hello".to_string(), None, Some(local(7300)))]
    );
}

#[test]
fn test_known_peer_traffic_is_tagged_with_slot() {
    let net = MemoryNetwork::new();
    let mut a = udp_session();
    let mut b = udp_session();
    a.start_with(net.datagram(), 7500).unwrap();
    b.start_with(net.datagram(), 7600).unwrap();

    let senders = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&senders);
    b.register_message(CHAT, move |msg: Message, _: &mut NetSession| {
        s.borrow_mut().push(msg.sender());
    })
    .unwrap();

    let peer = b.add_peer(local(7500)).unwrap();
    assert_eq!(peer, ConnectionIndex(0));
    assert_eq!(b.add_peer(local(7500)).unwrap(), peer);

    a.send_direct(local(7600), &Message::new(CHAT)).unwrap();
    b.update();

    b.remove_peer(peer);
    a.send_direct(local(7600), &Message::new(CHAT)).unwrap();
    b.update();

    assert_eq!(*senders.borrow(), vec![Some(peer), None]);
}

#[test]
fn test_mixed_senders_dispatch_in_arrival_order() {
    let net = MemoryNetwork::new();
    let mut known = udp_session();
    let mut stranger = udp_session();
    let mut b = udp_session();
    known.start_with(net.datagram(), 7900).unwrap();
    stranger.start_with(net.datagram(), 7950).unwrap();
    b.start_with(net.datagram(), 7910).unwrap();
    let peer = b.add_peer(local(7900)).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    b.register_message(CHAT, move |mut msg: Message, _: &mut NetSession| {
        let tag = msg.read::<u8>().unwrap_or_default();
        s.borrow_mut().push((tag, msg.sender()));
    })
    .unwrap();

    let tagged = |tag: u8| {
        let mut msg = Message::new(CHAT);
        msg.write(tag).unwrap();
        msg
    };
    known.send_direct(local(7910), &tagged(1)).unwrap();
    stranger.send_direct(local(7910), &tagged(2)).unwrap();
    known.send_direct(local(7910), &tagged(3)).unwrap();
    b.update();

    assert_eq!(
        *seen.borrow(),
        vec![(1, Some(peer)), (2, None), (3, Some(peer))]
    );
}

#[test]
fn test_peer_connections_send_packets() {
    let net = MemoryNetwork::new();
    let mut a = udp_session();
    let mut b = udp_session();
    a.start_with(net.datagram(), 7700).unwrap();
    b.start_with(net.datagram(), 7800).unwrap();

    let (pings, handler) = counter();
    b.register_message(CoreMessage::Ping, handler).unwrap();

    let index = a.add_peer(local(7800)).unwrap();
    assert!(a.net_mut().send_message_to_index(index, &Message::new(CoreMessage::Ping)));
    a.net_mut().send_message_to_all(&Message::new(CoreMessage::Ping));
    b.update();

    assert_eq!(pings.get(), 2);
}

#[test]
fn test_add_peer_requires_started_session() {
    let mut session = udp_session();
    assert!(matches!(session.add_peer(local(1)), Err(NetError::NotStarted)));
    assert!(matches!(
        session.send_direct(local(1), &Message::new(0)),
        Err(NetError::NotStarted)
    ));
}

#[test]
fn test_connectionless_policy_noops() {
    let mut session = udp_session();
    assert!(matches!(session.host(7000), Err(NetError::Unsupported(_))));
    assert!(matches!(session.join(local(7000)), Err(NetError::Unsupported(_))));
    assert!(session.start_listening().is_err());
    assert!(!session.is_listening());
    session.leave();
    session.update();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
#[should_panic(expected = "no handler registered for message type 7")]
fn test_unhandled_message_type_is_fatal() {
    let net = MemoryNetwork::new();
    let mut a = udp_session();
    let mut b = udp_session();
    a.start_with(net.datagram(), 7900).unwrap();
    b.start_with(net.datagram(), 8000).unwrap();

    a.send_direct(local(8000), &Message::new(CHAT)).unwrap();
    b.update();
}

#[test]
fn test_registry_uniqueness_through_session() {
    let mut session = udp_session();
    session.register_message(5, |_: Message, _: &mut NetSession| {}).unwrap();
    assert!(matches!(
        session.register_message(5, |_: Message, _: &mut NetSession| {}),
        Err(NetError::AlreadyRegistered(5))
    ));
    session.unregister_message(5);
    assert!(session.register_message(5, |_: Message, _: &mut NetSession| {}).is_ok());
}

// ---------------------------------------------------------------------------
// Connection-oriented
// ---------------------------------------------------------------------------

fn tcp_session(net: &MemoryNetwork) -> TcpSession<MemoryStreams> {
    TcpSession::new(net.streams(), SessionConfig::default())
}

fn hosted(net: &MemoryNetwork, port: u16) -> TcpSession<MemoryStreams> {
    let mut host = tcp_session(net);
    host.host(port).unwrap();
    host
}

/// Run the join handshake of `client` against `host`.
fn handshake(host: &mut TcpSession<MemoryStreams>, client: &mut TcpSession<MemoryStreams>, port: u16) {
    client.join(local(port)).unwrap();
    assert_eq!(client.state(), SessionState::Joining);
    host.update();
    client.update();
}

#[test]
fn test_host_owns_first_slot() {
    let net = MemoryNetwork::new();
    let host = hosted(&net, 9000);

    assert!(host.is_host());
    assert!(!host.is_client());
    assert!(host.is_running());
    assert!(host.is_ready());
    assert!(host.is_listening());
    assert_eq!(host.net().self_index(), Some(ConnectionIndex(0)));
    assert_eq!(host.number_of_live_clients(), 0);
}

#[test]
fn test_host_twice_is_rejected() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9001);
    assert!(matches!(host.host(9002), Err(NetError::AlreadyRunning)));
}

#[test]
fn test_join_handshake_assigns_slot_and_roster() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9010);
    let joined = Rc::new(RefCell::new(Vec::new()));
    let j = Rc::clone(&joined);
    host.net_mut()
        .connection_joined
        .subscribe(move |info| j.borrow_mut().push(info.index));

    let mut client = tcp_session(&net);
    handshake(&mut host, &mut client, 9010);

    assert!(client.is_ready());
    assert!(client.is_client());
    assert!(!client.is_host());
    assert_eq!(client.net().self_index(), Some(ConnectionIndex(1)));
    assert_eq!(client.net().host_index(), Some(ConnectionIndex(0)));
    assert_eq!(client.net().host_connection().map(|c| c.address()), Some(local(9010)));

    let roster = client.roster();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].index, ConnectionIndex(0));
    assert_eq!(roster[0].address, local(9010).to_string());

    assert_eq!(*joined.borrow(), vec![ConnectionIndex(1)]);
    assert_eq!(host.number_of_live_clients(), 1);
}

#[test]
fn test_host_traffic_behind_join_response_carries_host_slot() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9090);
    let mut client = tcp_session(&net);
    let senders = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&senders);
    client
        .register_message(CHAT, move |msg: Message, _: &mut NetSession| {
            s.borrow_mut().push(msg.sender());
        })
        .unwrap();

    client.join(local(9090)).unwrap();
    host.update();
    // Arrives in the same read as the join response.
    host.net_mut().send_message_to_others(&Message::new(CHAT));
    client.update();

    assert!(client.is_ready());
    assert_eq!(*senders.borrow(), vec![Some(ConnectionIndex(0))]);
}

#[test]
fn test_messages_flow_between_host_and_client() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9020);
    let mut client = tcp_session(&net);
    handshake(&mut host, &mut client, 9020);

    // Host answers every ping with a pong to whoever sent it.
    let ping_senders = Rc::new(RefCell::new(Vec::new()));
    let p = Rc::clone(&ping_senders);
    host.register_message(CoreMessage::Ping, move |msg: Message, net: &mut NetSession| {
        p.borrow_mut().push(msg.sender());
        if let Some(sender) = msg.sender() {
            net.send_message_to_index(sender, &Message::new(CoreMessage::Pong));
        }
    })
    .unwrap();
    let (pongs, on_pong) = counter();
    client.register_message(CoreMessage::Pong, on_pong).unwrap();

    assert!(client.net_mut().send_message_to_host(&Message::new(CoreMessage::Ping)));
    host.update();
    client.update();

    assert_eq!(*ping_senders.borrow(), vec![Some(ConnectionIndex(1))]);
    assert_eq!(pongs.get(), 1);
}

#[test]
fn test_self_addressed_messages_loop_back() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9030);
    let mut client = tcp_session(&net);
    handshake(&mut host, &mut client, 9030);

    let (host_hits, on_host) = counter();
    host.register_message(CHAT, on_host).unwrap();
    let (client_hits, on_client) = counter();
    client.register_message(CHAT, on_client).unwrap();

    host.net_mut().send_message_to_all(&Message::new(CHAT));
    host.update();
    client.update();
    assert_eq!(host_hits.get(), 1);
    assert_eq!(client_hits.get(), 1);

    host.net_mut().send_message_to_others(&Message::new(CHAT));
    host.update();
    client.update();
    assert_eq!(host_hits.get(), 1);
    assert_eq!(client_hits.get(), 2);
}

#[test]
fn test_client_departure_frees_slot() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9040);
    let left = Rc::new(RefCell::new(Vec::new()));
    let l = Rc::clone(&left);
    host.net_mut()
        .connection_left
        .subscribe(move |info| l.borrow_mut().push(info.index));

    let mut clients: Vec<_> = (0..3).map(|_| tcp_session(&net)).collect();
    for client in &mut clients {
        handshake(&mut host, client, 9040);
    }
    assert_eq!(host.number_of_live_clients(), 3);
    assert_eq!(clients[1].net().self_index(), Some(ConnectionIndex(2)));

    clients[1].leave();
    assert_eq!(clients[1].state(), SessionState::Disconnected);
    host.update();

    assert_eq!(*left.borrow(), vec![ConnectionIndex(2)]);
    assert_eq!(host.number_of_live_clients(), 2);
    assert_eq!(host.net().free_connection_index(), Some(ConnectionIndex(2)));

    let mut late = tcp_session(&net);
    handshake(&mut host, &mut late, 9040);
    assert_eq!(late.net().self_index(), Some(ConnectionIndex(2)));
}

#[test]
fn test_host_departure_fires_host_left() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9050);
    let mut client = tcp_session(&net);
    handshake(&mut host, &mut client, 9050);

    let fired = Rc::new(Cell::new(false));
    let f = Rc::clone(&fired);
    client.net_mut().host_left.subscribe(move |_| f.set(true));

    host.leave();
    assert!(!host.is_listening());
    assert!(!net.is_listening(9050));
    client.update();

    assert!(fired.get());
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!client.is_running());
    assert_eq!(client.net().connection_count(), 0);
}

#[test]
fn test_full_host_rejects_join() {
    let net = MemoryNetwork::new();
    let config = SessionConfig {
        max_connections: 2,
        ..SessionConfig::default()
    };
    let mut host = TcpSession::new(net.streams(), config);
    host.host(9060).unwrap();

    let mut first = tcp_session(&net);
    handshake(&mut host, &mut first, 9060);
    assert!(first.is_ready());
    assert_eq!(first.net().config().max_connections, 2);

    let mut second = tcp_session(&net);
    handshake(&mut host, &mut second, 9060);
    assert_eq!(second.state(), SessionState::Disconnected);
    assert!(!second.net().is_joining());
    assert_eq!(host.number_of_live_clients(), 1);
}

#[test]
fn test_join_unreachable_host_fails() {
    let net = MemoryNetwork::new();
    let mut client = tcp_session(&net);
    assert!(matches!(client.join(local(9070)), Err(NetError::Io(_))));
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[test]
fn test_listening_can_be_paused() {
    let net = MemoryNetwork::new();
    let mut host = hosted(&net, 9080);
    host.stop_listening();
    assert!(!host.is_listening());

    let mut client = tcp_session(&net);
    assert!(client.join(local(9080)).is_err());

    host.start_listening().unwrap();
    handshake(&mut host, &mut client, 9080);
    assert!(client.is_ready());
}

#[test]
fn test_start_listening_requires_hosting() {
    let net = MemoryNetwork::new();
    let mut session = tcp_session(&net);
    assert!(matches!(session.start_listening(), Err(NetError::NotStarted)));
}

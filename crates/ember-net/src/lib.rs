//! Session layer: binary messages, MTU-bounded packets, connection slots,
//! type-keyed dispatch and the connectionless and connection-oriented session
//! variants built on them.
//!
//! Everything runs on the caller's thread. Sessions are driven by calling
//! [`Session::update`] once per tick; all inbound processing and handler
//! dispatch happens inside that call.

pub mod connection;
pub mod connection_table;
pub mod error;
pub mod events;
pub mod framing;
pub mod handshake;
pub mod message;
pub mod packet;
pub mod platform;
pub mod routing;
pub mod session;
pub mod stream;
pub mod tcp_session;
pub mod transport;
pub mod udp_session;

#[cfg(test)]
mod session_tests;

pub use connection::{Connection, ConnectionIndex, ConnectionInfo, LoopbackConnection};
pub use connection_table::ConnectionTable;
pub use error::NetError;
pub use events::{Event, SubscriptionId};
pub use framing::{FrameError, FrameReader};
pub use handshake::{JoinInfo, PeerEntry};
pub use message::{CoreMessage, MAX_PAYLOAD_SIZE, Message, MessageTypeId, NUM_CORE_MESSAGES};
pub use packet::{PACKET_MTU, Packet, PacketHeader};
pub use platform::SocketConfig;
pub use routing::{BoundMethod, MessageHandler, MessageRegistry};
pub use session::{NetSession, Session, SessionConfig, SessionState};
pub use stream::{BinaryStream, ByteOrder, WireValue};
pub use tcp_session::{TcpConnection, TcpSession};
pub use transport::{
    ByteStream, DatagramTransport, MemoryNetwork, StreamListener, StreamTransport, TcpTransport,
    UdpTransport,
};
pub use udp_session::{UdpConnection, UdpSession};

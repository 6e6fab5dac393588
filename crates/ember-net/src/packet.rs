//! Fixed-MTU packet container bundling several messages.
//!
//! Every datagram exchanged with the transport is one packet:
//!
//! ```text
//! +-----------+---------+-------------+---------------+----------------------+
//! | from (u8) | ack u16 | reliable u8 | unreliable u8 | message blocks ...   |
//! +-----------+---------+-------------+---------------+----------------------+
//! |<------------------ header (5 bytes) ------------->|
//! ```
//!
//! The whole packet never exceeds [`PACKET_MTU`] bytes. `unreliable` counts
//! the message blocks still unread. `ack` and `reliable` are carried but
//! inert: no retransmission is built on them.

use std::net::SocketAddr;

use crate::connection::ConnectionIndex;
use crate::error::NetError;
use crate::message::{BODY_SIZE_PREFIX, MAX_BODY_SIZE, Message, TYPE_ID_SIZE};

/// Fixed packet capacity, header included.
pub const PACKET_MTU: usize = 1452;

/// Encoded header size.
pub const PACKET_HEADER_SIZE: usize = 5;

/// Ack value of a packet that acknowledges nothing.
pub const NO_ACK: u16 = 0xFFFF;

const FROM_OFFSET: usize = 0;
const ACK_OFFSET: usize = 1;
const RELIABLE_OFFSET: usize = 3;
const UNRELIABLE_OFFSET: usize = 4;

/// Decoded view of the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Connection index of the sender, [`ConnectionIndex::INVALID`] if none.
    pub from_connection_index: ConnectionIndex,
    /// Reserved acknowledgment field.
    pub ack: u16,
    /// Reserved reliable message count.
    pub reliable_count: u8,
    /// Number of unread messages.
    pub unreliable_count: u8,
}

/// A fixed-capacity transmission unit.
pub struct Packet {
    sender: Option<SocketAddr>,
    buffer: [u8; PACKET_MTU],
    bytes_used: usize,
    /// Offset of the next message to read. Independent of `bytes_used`.
    read_cursor: usize,
}

impl Packet {
    /// Create an empty packet with a fresh header.
    pub fn new() -> Self {
        let mut packet = Self {
            sender: None,
            buffer: [0u8; PACKET_MTU],
            bytes_used: PACKET_HEADER_SIZE,
            read_cursor: PACKET_HEADER_SIZE,
        };
        packet.buffer[FROM_OFFSET] = ConnectionIndex::INVALID.0;
        packet.buffer[ACK_OFFSET..ACK_OFFSET + 2].copy_from_slice(&NO_ACK.to_le_bytes());
        packet
    }

    /// Decode the header at the front of the buffer.
    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            from_connection_index: ConnectionIndex(self.buffer[FROM_OFFSET]),
            ack: u16::from_le_bytes([self.buffer[ACK_OFFSET], self.buffer[ACK_OFFSET + 1]]),
            reliable_count: self.buffer[RELIABLE_OFFSET],
            unreliable_count: self.buffer[UNRELIABLE_OFFSET],
        }
    }

    /// Stamp the sender's connection index into the header.
    pub fn set_from_connection_index(&mut self, index: ConnectionIndex) {
        self.buffer[FROM_OFFSET] = index.0;
    }

    /// Number of messages not yet read.
    pub fn message_count(&self) -> u8 {
        self.buffer[UNRELIABLE_OFFSET]
    }

    fn set_message_count(&mut self, count: u8) {
        self.buffer[UNRELIABLE_OFFSET] = count;
    }

    /// Bytes in use, header included.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Bytes still free for messages.
    pub fn free_bytes(&self) -> usize {
        PACKET_MTU - self.bytes_used
    }

    /// The bytes to hand to the transport.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.bytes_used]
    }

    /// Source address of a received packet.
    pub fn sender(&self) -> Option<SocketAddr> {
        self.sender
    }

    /// Append a message. Fails without touching the packet if it does not fit.
    ///
    /// Also fails once 255 messages are packed, since the count is one byte.
    pub fn write(&mut self, message: &Message) -> Result<(), NetError> {
        let size = usize::from(message.full_size());
        let available = self.free_bytes();
        let count = self.message_count();
        if size > available || count == u8::MAX {
            return Err(NetError::PacketFull { size, available });
        }

        message.serialize_to(&mut self.buffer[self.bytes_used..]);
        self.bytes_used += size;
        self.set_message_count(count + 1);
        Ok(())
    }

    /// Read the next message into `out`, tagging it with the packet's sender.
    ///
    /// Messages come out in the order they were written. Returns `false` once
    /// the packet is drained, or if the remaining bytes are malformed, in which
    /// case the rest of the packet is discarded.
    pub fn read(&mut self, out: &mut Message) -> bool {
        let count = self.message_count();
        if count == 0 {
            return false;
        }

        let start = self.read_cursor;
        if start + BODY_SIZE_PREFIX > self.bytes_used {
            return self.discard_malformed("truncated body size");
        }

        let body_size =
            usize::from(u16::from_le_bytes([self.buffer[start], self.buffer[start + 1]]));
        let body_start = start + BODY_SIZE_PREFIX;
        if body_size < TYPE_ID_SIZE || body_size > MAX_BODY_SIZE {
            return self.discard_malformed("invalid body size");
        }
        if body_start + body_size > self.bytes_used {
            return self.discard_malformed("truncated message body");
        }

        let type_id = self.buffer[body_start];
        let payload = &self.buffer[body_start + TYPE_ID_SIZE..body_start + body_size];
        if !out.load(type_id, payload) {
            return self.discard_malformed("payload exceeds message capacity");
        }
        out.set_sender_address(self.sender);

        self.read_cursor = body_start + body_size;
        self.set_message_count(count - 1);
        true
    }

    fn discard_malformed(&mut self, reason: &str) -> bool {
        tracing::warn!(
            "Discarding malformed packet from {:?}: {reason}",
            self.sender
        );
        self.set_message_count(0);
        false
    }

    /// Replace the contents with a received datagram.
    ///
    /// Rejects datagrams shorter than the header or longer than the MTU and
    /// leaves the packet unchanged in that case.
    pub fn load(&mut self, sender: SocketAddr, bytes: &[u8]) -> Result<(), NetError> {
        if bytes.len() < PACKET_HEADER_SIZE || bytes.len() > PACKET_MTU {
            return Err(NetError::InvalidPacket(bytes.len()));
        }
        self.buffer[..bytes.len()].copy_from_slice(bytes);
        self.bytes_used = bytes.len();
        self.read_cursor = PACKET_HEADER_SIZE;
        self.sender = Some(sender);
        Ok(())
    }

    /// Return to the freshly constructed state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

//! Application-level datagrams with a bounded payload.
//!
//! A [`Message`] is the unit handlers see. On the wire it is framed as:
//!
//! ```text
//! +---------------------+--------------+---------------------------+
//! | body_size (2 bytes) | type (1 byte)| payload (body_size - 1)   |
//! | u16 little-endian   | u8           |                           |
//! +---------------------+--------------+---------------------------+
//! ```
//!
//! `body_size` counts the type byte plus the payload, never itself.

use std::fmt;
use std::net::SocketAddr;

use crate::connection::ConnectionIndex;
use crate::stream::BinaryStream;

/// Fixed payload capacity of a single message.
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Size of the `body_size` prefix.
pub const BODY_SIZE_PREFIX: usize = 2;

/// Size of the type identifier.
pub const TYPE_ID_SIZE: usize = 1;

/// Largest `body_size` a valid message can carry.
pub const MAX_BODY_SIZE: usize = TYPE_ID_SIZE + MAX_PAYLOAD_SIZE;

/// Message type identifier.
pub type MessageTypeId = u8;

/// Message types reserved by the engine. Application ids start at
/// [`NUM_CORE_MESSAGES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoreMessage {
    /// Liveness probe.
    Ping = 0,
    /// Reply to a ping.
    Pong = 1,
    /// Join information sent by the host to a newly accepted peer.
    JoinResponse = 2,
    /// Replicated object creation.
    ObjectCreate = 3,
    /// Replicated object destruction.
    ObjectDestroy = 4,
    /// Replicated object state update.
    ObjectUpdate = 5,
    /// Replicated clock adjustment.
    ObjectSetClock = 6,
}

/// First message type id free for application use.
pub const NUM_CORE_MESSAGES: MessageTypeId = 7;

impl CoreMessage {
    /// Wire identifier of this message type.
    pub fn id(self) -> MessageTypeId {
        self as MessageTypeId
    }

    /// Map a wire identifier back to a reserved message type.
    pub fn from_id(id: MessageTypeId) -> Option<Self> {
        match id {
            0 => Some(CoreMessage::Ping),
            1 => Some(CoreMessage::Pong),
            2 => Some(CoreMessage::JoinResponse),
            3 => Some(CoreMessage::ObjectCreate),
            4 => Some(CoreMessage::ObjectDestroy),
            5 => Some(CoreMessage::ObjectUpdate),
            6 => Some(CoreMessage::ObjectSetClock),
            _ => None,
        }
    }
}

impl From<CoreMessage> for MessageTypeId {
    fn from(message: CoreMessage) -> Self {
        message.id()
    }
}

/// One logical datagram: a type id plus up to [`MAX_PAYLOAD_SIZE`] bytes.
///
/// Cloning copies only the used part of the payload and rewinds the read
/// cursor; the sender tags are carried over.
pub struct Message {
    type_id: MessageTypeId,
    /// Connection the message arrived on, if any. Locally authored messages
    /// have none.
    sender: Option<ConnectionIndex>,
    /// Datagram source address, tagged when unpacked from a packet.
    sender_address: Option<SocketAddr>,
    payload: Box<[u8; MAX_PAYLOAD_SIZE]>,
    bytes_used: usize,
    bytes_read: usize,
}

impl Message {
    /// Create an empty message of the given type.
    pub fn new(type_id: impl Into<MessageTypeId>) -> Self {
        Self {
            type_id: type_id.into(),
            sender: None,
            sender_address: None,
            payload: Box::new([0u8; MAX_PAYLOAD_SIZE]),
            bytes_used: 0,
            bytes_read: 0,
        }
    }

    /// Message type identifier.
    pub fn type_id(&self) -> MessageTypeId {
        self.type_id
    }

    /// Connection this message arrived on.
    pub fn sender(&self) -> Option<ConnectionIndex> {
        self.sender
    }

    /// Tag the connection this message arrived on.
    pub fn set_sender(&mut self, sender: Option<ConnectionIndex>) {
        self.sender = sender;
    }

    /// Source address of the datagram that carried this message.
    pub fn sender_address(&self) -> Option<SocketAddr> {
        self.sender_address
    }

    /// Tag the source address of the datagram that carried this message.
    pub fn set_sender_address(&mut self, address: Option<SocketAddr>) {
        self.sender_address = address;
    }

    /// The written part of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.bytes_used]
    }

    /// Number of payload bytes written.
    pub fn payload_len(&self) -> usize {
        self.bytes_used
    }

    /// Bytes still available for writing.
    pub fn remaining_capacity(&self) -> usize {
        MAX_PAYLOAD_SIZE - self.bytes_used
    }

    /// Whether the read cursor has consumed every written byte.
    pub fn has_read_all_data(&self) -> bool {
        self.bytes_read >= self.bytes_used
    }

    /// Size of the type id plus payload.
    pub fn body_size(&self) -> u16 {
        (TYPE_ID_SIZE + self.bytes_used) as u16
    }

    /// Size of the message on the wire, including the `body_size` prefix.
    pub fn full_size(&self) -> u16 {
        BODY_SIZE_PREFIX as u16 + self.body_size()
    }

    /// Write the wire representation into the front of `dest`.
    ///
    /// Returns the number of bytes written, always [`Self::full_size`].
    ///
    /// # Panics
    ///
    /// Panics if `dest` is shorter than [`Self::full_size`].
    pub fn serialize_to(&self, dest: &mut [u8]) -> usize {
        let full = usize::from(self.full_size());
        dest[..BODY_SIZE_PREFIX].copy_from_slice(&self.body_size().to_le_bytes());
        dest[BODY_SIZE_PREFIX] = self.type_id;
        dest[BODY_SIZE_PREFIX + TYPE_ID_SIZE..full].copy_from_slice(self.payload());
        full
    }

    /// Append the wire representation to `out`.
    pub fn append_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + usize::from(self.full_size()), 0);
        self.serialize_to(&mut out[start..]);
    }

    /// Clear cursors, sender tags and the payload so the message can be reused.
    pub fn reset(&mut self) {
        self.sender = None;
        self.sender_address = None;
        self.bytes_used = 0;
        self.bytes_read = 0;
        self.payload.fill(0);
    }

    /// Replace type and payload with decoded wire contents.
    ///
    /// Returns `false` without touching the message if `payload` exceeds
    /// [`MAX_PAYLOAD_SIZE`].
    pub(crate) fn load(&mut self, type_id: MessageTypeId, payload: &[u8]) -> bool {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return false;
        }
        self.type_id = type_id;
        self.sender = None;
        self.sender_address = None;
        self.payload[..payload.len()].copy_from_slice(payload);
        self.bytes_used = payload.len();
        self.bytes_read = 0;
        true
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clone for Message {
    fn clone(&self) -> Self {
        let mut copy = Message::new(self.type_id);
        copy.sender = self.sender;
        copy.sender_address = self.sender_address;
        copy.payload[..self.bytes_used].copy_from_slice(self.payload());
        copy.bytes_used = self.bytes_used;
        copy
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type_id", &self.type_id)
            .field("sender", &self.sender)
            .field("sender_address", &self.sender_address)
            .field("bytes_used", &self.bytes_used)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

impl BinaryStream for Message {
    fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        if self.bytes_used + bytes.len() > MAX_PAYLOAD_SIZE {
            return 0;
        }
        self.payload[self.bytes_used..self.bytes_used + bytes.len()].copy_from_slice(bytes);
        self.bytes_used += bytes.len();
        bytes.len()
    }

    fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        if self.bytes_read + out.len() > self.bytes_used {
            return 0;
        }
        out.copy_from_slice(&self.payload[self.bytes_read..self.bytes_read + out.len()]);
        self.bytes_read += out.len();
        out.len()
    }
}

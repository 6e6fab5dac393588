//! Join information exchanged when a host accepts a new peer.
//!
//! Payload of a `JoinResponse` message:
//!
//! ```text
//! assigned_index:u8 · host_index:u8 · max_connections:u8 ·
//! assigned_address:string · roster_len:u8 · roster_len × (index:u8 · address:string)
//! ```

use std::net::SocketAddr;

use crate::connection::ConnectionIndex;
use crate::error::NetError;
use crate::message::{CoreMessage, Message};
use crate::stream::BinaryStream;

/// Longest address string accepted from the wire.
pub const MAX_ADDRESS_LENGTH: usize = 64;

/// One already-connected peer as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    /// Slot the peer occupies on the host.
    pub index: ConnectionIndex,
    /// Peer address as the host sees it.
    pub address: String,
}

/// Everything a joining peer needs to take its place in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Slot assigned to the joining peer.
    pub assigned_index: ConnectionIndex,
    /// Address of the joining peer as the host sees it.
    pub assigned_address: SocketAddr,
    /// Slot of the host.
    pub host_index: ConnectionIndex,
    /// Host's connection limit.
    pub max_connections: u8,
    /// Peers connected before the joining peer, host included.
    pub roster: Vec<PeerEntry>,
}

impl JoinInfo {
    /// Encode as a `JoinResponse` message.
    ///
    /// Roster entries that do not fit in one message are left out.
    pub fn to_message(&self) -> Result<Message, NetError> {
        let mut message = Message::new(CoreMessage::JoinResponse);
        message.write(self.assigned_index.0)?;
        message.write(self.host_index.0)?;
        message.write(self.max_connections)?;
        message.write_string(Some(&self.assigned_address.to_string()))?;

        let mut budget = message.remaining_capacity().saturating_sub(1);
        let fitting: Vec<&PeerEntry> = self
            .roster
            .iter()
            .take(usize::from(u8::MAX))
            .take_while(|entry| {
                let size = 1 + 2 + entry.address.len();
                if size > budget {
                    return false;
                }
                budget -= size;
                true
            })
            .collect();
        if fitting.len() < self.roster.len() {
            tracing::warn!(
                "Join roster truncated to {} of {} entries",
                fitting.len(),
                self.roster.len()
            );
        }

        message.write(fitting.len() as u8)?;
        for entry in fitting {
            message.write(entry.index.0)?;
            message.write_string(Some(&entry.address))?;
        }
        Ok(message)
    }

    /// Decode a `JoinResponse` message. The message itself is not consumed.
    pub fn from_message(message: &Message) -> Result<Self, NetError> {
        let mut reader = message.clone();
        let assigned_index = ConnectionIndex(reader.read::<u8>()?);
        let host_index = ConnectionIndex(reader.read::<u8>()?);
        let max_connections = reader.read::<u8>()?;
        let assigned_address = reader
            .read_string(MAX_ADDRESS_LENGTH)
            .and_then(|s| s.parse::<SocketAddr>().ok())
            .ok_or(NetError::MalformedJoinInfo("assigned address"))?;

        if !assigned_index.is_valid() || !host_index.is_valid() {
            return Err(NetError::MalformedJoinInfo("invalid connection index"));
        }
        if assigned_index == host_index {
            return Err(NetError::MalformedJoinInfo("assigned index equals host index"));
        }
        if assigned_index.0 >= max_connections || host_index.0 >= max_connections {
            return Err(NetError::MalformedJoinInfo("index beyond connection limit"));
        }

        let count = reader.read::<u8>()?;
        let mut roster = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let index = ConnectionIndex(reader.read::<u8>()?);
            let address = reader.read_string(MAX_ADDRESS_LENGTH).unwrap_or_default();
            roster.push(PeerEntry { index, address });
        }

        Ok(Self {
            assigned_index,
            assigned_address,
            host_index,
            max_connections,
            roster,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(roster: Vec<PeerEntry>) -> JoinInfo {
        JoinInfo {
            assigned_index: ConnectionIndex(2),
            assigned_address: "127.0.0.1:50000".parse().unwrap(),
            host_index: ConnectionIndex(0),
            max_connections: 8,
            roster,
        }
    }

    #[test]
    fn test_join_info_survives_encoding() {
        let original = info(vec![
            PeerEntry {
                index: ConnectionIndex(0),
                address: "127.0.0.1:7777".into(),
            },
            PeerEntry {
                index: ConnectionIndex(1),
                address: "127.0.0.1:50001".into(),
            },
        ]);
        let message = original.to_message().unwrap();
        assert_eq!(message.type_id(), CoreMessage::JoinResponse.id());
        assert_eq!(JoinInfo::from_message(&message).unwrap(), original);
        // Decoding does not consume the caller's message.
        assert_eq!(JoinInfo::from_message(&message).unwrap(), original);
    }

    #[test]
    fn test_oversized_roster_is_truncated() {
        let roster: Vec<PeerEntry> = (0..200u8)
            .map(|i| PeerEntry {
                index: ConnectionIndex(i),
                address: format!("192.168.100.{i}:60000"),
            })
            .collect();
        let message = info(roster).to_message().unwrap();
        let decoded = JoinInfo::from_message(&message).unwrap();
        assert!(!decoded.roster.is_empty());
        assert!(decoded.roster.len() < 200);
        assert_eq!(decoded.roster[0].address, "192.168.100.0:60000");
    }

    #[test]
    fn test_same_assigned_and_host_index_rejected() {
        let mut bad = info(Vec::new());
        bad.assigned_index = ConnectionIndex(0);
        let message = bad.to_message().unwrap();
        assert!(matches!(
            JoinInfo::from_message(&message),
            Err(NetError::MalformedJoinInfo(_))
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut message = Message::new(CoreMessage::JoinResponse);
        message.write(1u8).unwrap();
        assert!(matches!(
            JoinInfo::from_message(&message),
            Err(NetError::ReadUnderflow { .. })
        ));
    }
}

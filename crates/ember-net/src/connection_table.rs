//! Index-addressed arena of connection slots with lowest-index reuse.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use crate::connection::{Connection, ConnectionIndex};

/// Sparse table of connections addressed by [`ConnectionIndex`].
///
/// Grows on demand up to `max_connections` slots. Emptied slots are tracked in
/// a free set so the lowest free index is found without rescanning.
pub struct ConnectionTable {
    slots: Vec<Option<Box<dyn Connection>>>,
    /// Empty slots below `slots.len()`.
    free: BTreeSet<u8>,
    max_connections: u8,
}

impl ConnectionTable {
    /// Create an empty table. `max_connections` is clamped to 255 usable
    /// slots by its type; index 255 is the invalid sentinel.
    pub fn new(max_connections: u8) -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            max_connections: max_connections.min(ConnectionIndex::INVALID.0),
        }
    }

    /// Change the slot limit. Existing slots are kept.
    pub fn set_max_connections(&mut self, max_connections: u8) {
        self.max_connections = max_connections.min(ConnectionIndex::INVALID.0);
    }

    /// Lowest empty slot, or the next slot past the end while below the limit.
    pub fn free_index(&self) -> Option<ConnectionIndex> {
        if let Some(&index) = self.free.first() {
            return Some(ConnectionIndex(index));
        }
        if self.slots.len() < usize::from(self.max_connections) {
            return Some(ConnectionIndex(self.slots.len() as u8));
        }
        None
    }

    /// Place `connection` into slot `index`, growing the table if needed.
    ///
    /// # Panics
    ///
    /// Panics if `index` is invalid or the slot is occupied. Either means the
    /// caller computed the index wrongly.
    pub fn insert(&mut self, index: ConnectionIndex, connection: Box<dyn Connection>) {
        assert!(index.is_valid(), "cannot join a connection at the invalid index");
        let slot = index.as_usize();
        assert!(
            slot >= self.slots.len() || self.slots[slot].is_none(),
            "invalid join index {index}: slot is occupied"
        );

        if slot >= self.slots.len() {
            for gap in self.slots.len()..slot {
                self.free.insert(gap as u8);
            }
            self.slots.resize_with(slot + 1, || None);
        }
        self.free.remove(&index.0);
        self.slots[slot] = Some(connection);
    }

    /// Empty slot `index` and return its connection.
    pub fn remove(&mut self, index: ConnectionIndex) -> Option<Box<dyn Connection>> {
        let connection = self.slots.get_mut(index.as_usize())?.take()?;
        self.free.insert(index.0);
        Some(connection)
    }

    /// Connection in slot `index`.
    pub fn get(&self, index: ConnectionIndex) -> Option<&dyn Connection> {
        self.slots.get(index.as_usize())?.as_deref()
    }

    /// Mutable connection in slot `index`.
    pub fn get_mut(&mut self, index: ConnectionIndex) -> Option<&mut (dyn Connection + 'static)> {
        self.slots.get_mut(index.as_usize())?.as_deref_mut()
    }

    /// Whether slot `index` is occupied.
    pub fn contains(&self, index: ConnectionIndex) -> bool {
        self.get(index).is_some()
    }

    /// Number of slots, occupied or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of occupied slots in ascending order.
    pub fn indices(&self) -> Vec<ConnectionIndex> {
        self.iter().map(|(index, _)| index).collect()
    }

    /// Occupied slots in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionIndex, &dyn Connection)> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, connection)| {
            connection
                .as_deref()
                .map(|connection| (ConnectionIndex(slot as u8), connection))
        })
    }

    /// Mutable occupied slots in ascending index order.
    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (ConnectionIndex, &mut (dyn Connection + 'static))> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(slot, connection)| {
            connection
                .as_deref_mut()
                .map(|connection| (ConnectionIndex(slot as u8), connection))
        })
    }

    /// Slot of the connection whose peer is `address`.
    pub fn index_of_address(&self, address: SocketAddr) -> Option<ConnectionIndex> {
        self.iter()
            .find(|(_, connection)| connection.address() == address)
            .map(|(index, _)| index)
    }
}

//! Client connection bookkeeping
//!
//! A connection owns every surface and window its client created. Closing it
//! is the single place where all of them are released.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::compositor::{SurfaceId, WindowId};

/// Unique identifier for client connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Objects owned by one connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub surfaces: BTreeSet<SurfaceId>,
    pub windows: BTreeSet<WindowId>,
    pub opened: Instant,
}

impl Connection {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            surfaces: BTreeSet::new(),
            windows: BTreeSet::new(),
            opened: Instant::now(),
        }
    }
}

/// All open connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(id, Connection::new(id));
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_open_remove() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.open();
        assert!(registry.contains(id));
        registry
            .get_mut(id)
            .unwrap()
            .surfaces
            .insert(SurfaceId(3));
        let conn = registry.remove(id).unwrap();
        assert_eq!(conn.surfaces.len(), 1);
        assert!(registry.is_empty());
    }
}

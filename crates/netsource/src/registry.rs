//! Output connection registry.
//!
//! The registry holds an immutable snapshot of the active connections. Every
//! update builds a new snapshot and swaps it in under a short write lock, so
//! the worker iterating one snapshot never sees a half-applied change.

use crate::error::{NetSourceError, Result};
use crate::sample::SampleKind;
use crate::sink::PacketSink;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Delivery counters for one connection.
#[derive(Debug, Default)]
struct ConnectionCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    samples: AtomicU64,
}

/// Point-in-time delivery statistics of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStat {
    pub name: String,
    pub kind: SampleKind,
    pub packets: u64,
    pub bytes: u64,
    pub samples: u64,
}

/// A fan-out target: destination, declared element kind and optional
/// byte-swap override.
pub struct Connection {
    name: String,
    kind: SampleKind,
    byte_swap: Option<u16>,
    destination: Arc<dyn PacketSink>,
    counters: ConnectionCounters,
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        kind: SampleKind,
        destination: Arc<dyn PacketSink>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            byte_swap: None,
            destination,
            counters: ConnectionCounters::default(),
        }
    }

    /// Creates a connection from a declared port type name.
    pub fn from_port_type(
        name: impl Into<String>,
        port_type: &str,
        destination: Arc<dyn PacketSink>,
    ) -> Result<Self> {
        let kind: SampleKind = port_type.parse()?;
        Ok(Self::new(name, kind, destination))
    }

    /// Overrides the source-wide swap width for this connection.
    pub fn with_byte_swap(mut self, byte_swap: u16) -> Self {
        self.byte_swap = Some(byte_swap);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.kind.bytes_per_sample()
    }

    pub fn byte_swap(&self) -> Option<u16> {
        self.byte_swap
    }

    pub(crate) fn destination(&self) -> &dyn PacketSink {
        self.destination.as_ref()
    }

    pub(crate) fn record_delivery(&self, bytes: usize, samples: usize) {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.counters.samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn stat(&self) -> ConnectionStat {
        ConnectionStat {
            name: self.name.clone(),
            kind: self.kind,
            packets: self.counters.packets.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            samples: self.counters.samples.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("byte_swap", &self.byte_swap)
            .finish_non_exhaustive()
    }
}

/// Consistent view of the registry at one instant.
pub type ConnectionSnapshot = Arc<[Arc<Connection>]>;

/// Set of active output connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    current: RwLock<ConnectionSnapshot>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Returns the current snapshot. Later updates do not affect it.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the whole set. Names must be unique.
    pub fn replace(&self, connections: Vec<Connection>) -> Result<()> {
        for (i, conn) in connections.iter().enumerate() {
            if connections[..i].iter().any(|c| c.name == conn.name) {
                return Err(NetSourceError::DuplicateConnection(conn.name.clone()));
            }
        }

        let next: Vec<Arc<Connection>> = connections.into_iter().map(Arc::new).collect();
        info!(count = next.len(), "Replacing output connections");
        *self.current.write() = Arc::from(next);
        Ok(())
    }

    /// Adds one connection, keeping the existing ones.
    pub fn add(&self, connection: Connection) -> Result<()> {
        let mut guard = self.current.write();
        if guard.iter().any(|c| c.name == connection.name) {
            return Err(NetSourceError::DuplicateConnection(connection.name));
        }

        debug!(name = %connection.name, kind = %connection.kind, "Adding output connection");
        let mut next: Vec<Arc<Connection>> = guard.iter().cloned().collect();
        next.push(Arc::new(connection));
        *guard = Arc::from(next);
        Ok(())
    }

    /// Removes a connection by name. Returns whether one was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut guard = self.current.write();
        if !guard.iter().any(|c| c.name == name) {
            return false;
        }

        debug!(name, "Removing output connection");
        let next: Vec<Arc<Connection>> = guard.iter().filter(|c| c.name != name).cloned().collect();
        *guard = Arc::from(next);
        true
    }

    pub fn clear(&self) {
        *self.current.write() = Arc::from(Vec::new());
    }

    /// Swap overrides of all registered connections.
    pub fn byte_swap_overrides(&self) -> Vec<u16> {
        self.current.read().iter().filter_map(|c| c.byte_swap).collect()
    }

    pub fn stats(&self) -> Vec<ConnectionStat> {
        self.current.read().iter().map(|c| c.stat()).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

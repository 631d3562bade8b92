//! Worker state and throughput counters.
//!
//! Counters are written only by the worker thread and read by callers as
//! snapshots; a reader may observe values up to one update stale.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle state of the streaming worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Never started.
    Idle,
    /// Waiting for a listener accept or a client connect.
    AwaitingConnection,
    /// Data socket established, reading and flushing.
    Streaming,
    /// Stop requested, loop winding down.
    Stopping,
    /// Loop exited.
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::AwaitingConnection,
            2 => WorkerState::Streaming,
            3 => WorkerState::Stopping,
            4 => WorkerState::Stopped,
            _ => WorkerState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::AwaitingConnection => 1,
            WorkerState::Streaming => 2,
            WorkerState::Stopping => 3,
            WorkerState::Stopped => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::AwaitingConnection => "awaiting_connection",
            WorkerState::Streaming => "streaming",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// Snapshot of source statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStats {
    pub state: WorkerState,
    /// Bytes received on the current data connection.
    pub total_bytes: u64,
    /// Receive rate over the last measurement window.
    pub bytes_per_sec: f64,
    /// Packets delivered across all connections since creation.
    pub packets_pushed: u64,
    /// Data sockets established (accepted or connected) since creation.
    pub connections_established: u64,
    /// Address of the listening socket, when serving.
    pub listen_addr: Option<SocketAddr>,
}

/// Shared counters behind [`SourceStats`].
#[derive(Debug)]
pub(crate) struct StatsCell {
    state: AtomicU8,
    total_bytes: AtomicU64,
    bytes_per_sec_bits: AtomicU64,
    packets_pushed: AtomicU64,
    connections_established: AtomicU64,
    listen_addr: Mutex<Option<SocketAddr>>,
}

impl StatsCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle.as_u8()),
            total_bytes: AtomicU64::new(0),
            bytes_per_sec_bits: AtomicU64::new(0f64.to_bits()),
            packets_pushed: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            listen_addr: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Starts a new connection lifetime: counters restart from zero.
    pub(crate) fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        self.bytes_per_sec_bits.store(0f64.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_received(&self, total_bytes: u64, bytes_per_sec: f64) {
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
        self.bytes_per_sec_bits
            .store(bytes_per_sec.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn add_packets(&self, count: u64) {
        self.packets_pushed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn set_listen_addr(&self, addr: Option<SocketAddr>) {
        *self.listen_addr.lock() = addr;
    }

    pub(crate) fn snapshot(&self) -> SourceStats {
        SourceStats {
            state: self.state(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            bytes_per_sec: f64::from_bits(self.bytes_per_sec_bits.load(Ordering::Relaxed)),
            packets_pushed: self.packets_pushed.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            listen_addr: *self.listen_addr.lock(),
        }
    }
}

/// Windowed receive-rate meter.
///
/// The rate is recomputed once per window from the bytes seen inside it, so
/// it decays to zero when the stream goes quiet.
#[derive(Debug)]
pub struct ThroughputMeter {
    window: Duration,
    window_start: Instant,
    window_bytes: u64,
    total_bytes: u64,
    rate: f64,
}

impl ThroughputMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            window_bytes: 0,
            total_bytes: 0,
            rate: 0.0,
        }
    }

    /// Clears all counters for a new connection lifetime.
    pub fn reset(&mut self) {
        self.window_start = Instant::now();
        self.window_bytes = 0;
        self.total_bytes = 0;
        self.rate = 0.0;
    }

    /// Accounts `bytes` received now. Zero is valid and lets the rate decay.
    pub fn record(&mut self, bytes: usize) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&mut self, bytes: usize, now: Instant) {
        self.window_bytes += bytes as u64;
        self.total_bytes += bytes as u64;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window {
            self.rate = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.window_bytes = 0;
            self.window_start = now;
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        let cell = StatsCell::new();
        assert_eq!(cell.state(), WorkerState::Idle);
        for state in [
            WorkerState::AwaitingConnection,
            WorkerState::Streaming,
            WorkerState::Stopping,
            WorkerState::Stopped,
        ] {
            cell.set_state(state);
            assert_eq!(cell.state(), state);
        }
    }

    #[test]
    fn test_connection_established_resets_counters() {
        let cell = StatsCell::new();
        cell.set_received(500, 250.0);
        cell.add_packets(3);
        cell.connection_established();

        let stats = cell.snapshot();
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.bytes_per_sec, 0.0);
        assert_eq!(stats.packets_pushed, 3);
        assert_eq!(stats.connections_established, 1);
    }

    #[test]
    fn test_meter_rate_per_window() {
        let mut meter = ThroughputMeter::new(Duration::from_secs(1));
        let start = meter.window_start;

        meter.record_at(1000, start + Duration::from_millis(200));
        assert_eq!(meter.bytes_per_sec(), 0.0);
        meter.record_at(1000, start + Duration::from_secs(2));
        assert!((meter.bytes_per_sec() - 1000.0).abs() < 1e-6);
        assert_eq!(meter.total_bytes(), 2000);

        meter.record_at(0, start + Duration::from_secs(4));
        assert_eq!(meter.bytes_per_sec(), 0.0);
    }

    #[test]
    fn test_meter_reset() {
        let mut meter = ThroughputMeter::new(Duration::from_secs(1));
        meter.record(42);
        meter.reset();
        assert_eq!(meter.total_bytes(), 0);
        assert_eq!(meter.bytes_per_sec(), 0.0);
    }
}

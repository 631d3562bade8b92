//! Shared helpers for loopback integration tests.

#![allow(dead_code)]

use netsource::*;
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Collects every packet pushed to it.
#[derive(Clone, Default)]
pub struct Collector {
    packets: Arc<Mutex<Vec<SamplePacket>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> Arc<dyn PacketSink> {
        let packets = Arc::clone(&self.packets);
        Arc::new(FnSink(move |p: SamplePacket| packets.lock().push(p)))
    }

    pub fn packets(&self) -> Vec<SamplePacket> {
        self.packets.lock().clone()
    }

    pub fn data_packets(&self) -> Vec<SamplePacket> {
        self.packets().into_iter().filter(|p| !p.end_of_stream).collect()
    }

    pub fn eos_count(&self) -> usize {
        self.packets.lock().iter().filter(|p| p.end_of_stream).count()
    }

    /// Concatenation of all `UInt8` payloads received so far.
    pub fn octets(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for packet in self.packets.lock().iter() {
            if let SampleData::UInt8(bytes) = &packet.data {
                out.extend_from_slice(bytes);
            }
        }
        out
    }
}

/// Fast-ticking server config on an ephemeral loopback port.
pub fn loopback_config() -> SourceConfig {
    let mut config = SourceConfig::default();
    config.port = 0;
    config.bind_address = "127.0.0.1".to_string();
    config.stream_id = "testing".to_string();
    config.timing.poll_interval_ms = 100;
    config.timing.reconnect_backoff_ms = 20;
    config.timing.idle_backoff_ms = 50;
    config.timing.shutdown_poll_ms = 20;
    config.timing.shutdown_retries = 100;
    config
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Waits for the source to publish its listening address.
pub fn listen_addr(source: &NetworkSource) -> SocketAddr {
    assert!(
        wait_until(Duration::from_secs(5), || source.stats().listen_addr.is_some()),
        "source never started listening"
    );
    source.stats().listen_addr.unwrap()
}

/// Connects to the source and waits until it reports streaming.
pub fn connect_peer(source: &NetworkSource) -> TcpStream {
    let addr = listen_addr(source);
    let peer = TcpStream::connect(addr).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || source.state() == WorkerState::Streaming),
        "source never accepted the peer"
    );
    peer
}

/// Deterministic test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

//! The streaming loop.
//!
//! One worker thread per run owns the socket manager and the byte buffer.
//! Everything else it needs (properties, registry, counters) is read through
//! [`Shared`], which callers mutate concurrently.

use crate::alignment::TransferBounds;
use crate::config::SourceConfig;
use crate::decoder::{SampleClock, SampleDecoder};
use crate::registry::{ConnectionRegistry, ConnectionSnapshot};
use crate::socket::{Endpoint, ReadOutcome, SocketManager};
use crate::stats::{StatsCell, ThroughputMeter, WorkerState};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Window of the receive-rate meter.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Upper bound on the initial buffer reservation; larger buffers grow on demand.
const BUFFER_RESERVE_LIMIT: usize = 1 << 20;

/// Current property values together with the thresholds derived from them.
#[derive(Debug, Clone)]
pub(crate) struct Properties {
    pub(crate) config: SourceConfig,
    pub(crate) bounds: TransferBounds,
}

impl Properties {
    pub(crate) fn endpoint(&self) -> Endpoint {
        Endpoint {
            connection_type: self.config.connection_type,
            ip_address: self.config.ip_address.clone(),
            port: self.config.port,
            bind_address: self.config.bind_address.clone(),
        }
    }
}

/// State shared between a source and its worker runs.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) properties: RwLock<Properties>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) stats: StatsCell,
    pub(crate) reopen_requested: AtomicBool,
    /// Unaligned bytes left over by the last run, restored by the next.
    pub(crate) parked: Mutex<Vec<u8>>,
}

/// Per-run stop request and completion flag.
#[derive(Debug, Default)]
pub(crate) struct RunControl {
    pub(crate) stop: AtomicBool,
    pub(crate) finished: AtomicBool,
}

impl RunControl {
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Thread entry point.
pub(crate) fn run(shared: Arc<Shared>, control: Arc<RunControl>) {
    let mut worker = StreamWorker::new(shared, control);
    worker.run();
}

struct StreamWorker {
    shared: Arc<Shared>,
    control: Arc<RunControl>,
    sockets: Option<SocketManager>,
    buffer: Vec<u8>,
    decoder: SampleDecoder,
    clock: SampleClock,
    meter: ThroughputMeter,
    connect_failures: u32,
    idle_logged: bool,
}

impl StreamWorker {
    fn new(shared: Arc<Shared>, control: Arc<RunControl>) -> Self {
        let (stream_id, max_bytes) = {
            let props = shared.properties.read();
            (props.config.stream_id.clone(), props.bounds.max_bytes)
        };

        let mut buffer = Vec::with_capacity(max_bytes.saturating_mul(2).min(BUFFER_RESERVE_LIMIT));
        buffer.append(&mut shared.parked.lock());

        Self {
            shared,
            control,
            sockets: None,
            buffer,
            decoder: SampleDecoder::new(stream_id),
            clock: SampleClock::start(),
            meter: ThroughputMeter::new(RATE_WINDOW),
            connect_failures: 0,
            idle_logged: false,
        }
    }

    fn stopping(&self) -> bool {
        self.control.stop.load(Ordering::Acquire)
    }

    fn run(&mut self) {
        info!(
            stream_id = self.decoder.stream_id(),
            restored = self.buffer.len(),
            "Stream worker started"
        );
        self.shared.stats.set_state(WorkerState::AwaitingConnection);

        while !self.stopping() {
            if self.shared.reopen_requested.swap(false, Ordering::AcqRel) {
                self.reopen();
            }

            let connected = self.sockets.as_ref().is_some_and(|s| s.is_connected());
            if connected {
                self.stream_once();
            } else {
                self.await_connection();
            }
        }

        self.shared.stats.set_state(WorkerState::Stopping);
        self.drain();
        if let Some(mut sockets) = self.sockets.take() {
            sockets.close();
        }
        self.shared.stats.set_listen_addr(None);
        self.shared.stats.set_state(WorkerState::Stopped);
        info!(stream_id = self.decoder.stream_id(), "Stream worker stopped");
        self.control.finished.store(true, Ordering::Release);
    }

    /// Sleeps for `duration` in short slices, returning early on stop.
    fn pause(&self, duration: Duration) {
        let slice = self.shared.properties.read().config.timing.shutdown_poll();
        let deadline = Instant::now() + duration;
        while !self.stopping() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(slice));
        }
    }

    fn reopen(&mut self) {
        if let Some(mut sockets) = self.sockets.take() {
            info!(endpoint = %sockets.endpoint().target(), "Closing sockets for reopen");
            sockets.close();
        }
        self.connect_failures = 0;
        self.shared.stats.set_listen_addr(None);
        self.shared.stats.set_state(WorkerState::AwaitingConnection);
    }

    fn await_connection(&mut self) {
        let (endpoint, read_chunk, timing) = {
            let props = self.shared.properties.read();
            (
                props.endpoint(),
                props.config.read_chunk_bytes,
                props.config.timing.clone(),
            )
        };
        let sockets = self
            .sockets
            .get_or_insert_with(|| SocketManager::new(endpoint, read_chunk, &timing));

        if let Err(e) = sockets.open() {
            if self.connect_failures == 0 {
                warn!(error = %e, "Unable to open socket, retrying");
            } else {
                debug!(error = %e, attempt = self.connect_failures + 1, "Socket open retry failed");
            }
            self.connect_failures = self.connect_failures.saturating_add(1);
            self.pause(timing.reconnect_backoff());
            return;
        }
        self.shared.stats.set_listen_addr(sockets.local_addr());

        if !sockets.is_connected() {
            match sockets.accept(timing.poll_interval(), &self.control.stop) {
                Ok(true) => {}
                Ok(false) => {
                    self.pause(timing.reconnect_backoff());
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    self.pause(timing.reconnect_backoff());
                    return;
                }
            }
        }

        info!(peer = ?sockets.peer_addr(), "Data connection established");
        self.connect_failures = 0;
        self.idle_logged = false;
        self.meter.reset();
        self.shared.stats.connection_established();
        self.shared.stats.set_state(WorkerState::Streaming);
        self.pause(timing.reconnect_backoff());
    }

    fn stream_once(&mut self) {
        let snapshot = self.shared.registry.snapshot();
        let (byte_swap, bounds, timing) = {
            let props = self.shared.properties.read();
            (props.config.byte_swap, props.bounds, props.config.timing.clone())
        };

        if snapshot.is_empty() {
            if !self.idle_logged {
                info!("No output connections, holding data socket");
                self.idle_logged = true;
            }
            self.pause(timing.idle_backoff());
            return;
        }
        self.idle_logged = false;

        self.flush_chunks(&snapshot, bounds, byte_swap);

        let Some(sockets) = self.sockets.as_mut() else {
            return;
        };
        let outcome =
            sockets.read_available(&mut self.buffer, timing.poll_interval(), &self.control.stop);
        match outcome {
            Ok(ReadOutcome::Data(n)) => self.meter.record(n),
            Ok(ReadOutcome::NotReady) => self.meter.record(0),
            Ok(ReadOutcome::Closed) => {
                info!(buffered = self.buffer.len(), "Peer closed connection");
                self.end_stream(&snapshot);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Read failed, dropping data socket");
                self.end_stream(&snapshot);
                return;
            }
        }
        self.shared
            .stats
            .set_received(self.meter.total_bytes(), self.meter.bytes_per_sec());

        if self.stopping() {
            return;
        }

        // Setters may have moved the thresholds while the read was waiting.
        let (byte_swap, bounds) = {
            let props = self.shared.properties.read();
            (props.config.byte_swap, props.bounds)
        };
        if !self.buffer.is_empty() && self.buffer.len() >= bounds.min_bytes {
            self.flush_chunks(&snapshot, bounds, byte_swap);
            if self.buffer.len() >= bounds.min_bytes {
                let len = bounds.aligned_len(self.buffer.len());
                self.flush(&snapshot, len, byte_swap);
            }
        }
    }

    /// Flushes whole `max_bytes` chunks while the buffer holds one.
    fn flush_chunks(
        &mut self,
        snapshot: &ConnectionSnapshot,
        bounds: TransferBounds,
        byte_swap: u16,
    ) {
        while self.buffer.len() >= bounds.max_bytes {
            self.flush(snapshot, bounds.max_bytes, byte_swap);
        }
    }

    /// Pushes the first `len` buffered bytes to every connection.
    fn flush(&mut self, snapshot: &ConnectionSnapshot, len: usize, byte_swap: u16) {
        if len == 0 {
            return;
        }
        let time = self.clock.now();
        let pushed = self
            .decoder
            .push_all(snapshot, &self.buffer[..len], byte_swap, time);
        self.buffer.drain(..len);
        self.shared.stats.add_packets(pushed as u64);
        debug!(bytes = len, connections = pushed, retained = self.buffer.len(), "Flushed");
    }

    fn end_stream(&mut self, snapshot: &ConnectionSnapshot) {
        let pushed = self.decoder.push_end_of_stream(snapshot, self.clock.now());
        self.shared.stats.add_packets(pushed as u64);
        if let Some(sockets) = self.sockets.as_mut() {
            sockets.disconnect();
        }
        self.shared.stats.set_state(WorkerState::AwaitingConnection);
    }

    /// Pushes the aligned part of the buffer and parks the rest.
    fn drain(&mut self) {
        let snapshot = self.shared.registry.snapshot();
        let (byte_swap, bounds) = {
            let props = self.shared.properties.read();
            (props.config.byte_swap, props.bounds)
        };

        if !snapshot.is_empty() {
            self.flush_chunks(&snapshot, bounds, byte_swap);
            let len = bounds.aligned_len(self.buffer.len());
            self.flush(&snapshot, len, byte_swap);
        }

        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "Parking unflushed bytes");
            let mut parked = self.shared.parked.lock();
            parked.clear();
            parked.append(&mut self.buffer);
        }
    }
}

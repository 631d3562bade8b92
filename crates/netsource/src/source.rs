//! Public control surface of a network source.
//!
//! A [`NetworkSource`] owns the mutable properties, the connection registry
//! and the worker thread handle. Setters may be called at any time, from any
//! thread; the running worker picks up changes at its next loop tick.

use crate::alignment::{TransferBounds, alignment_unit};
use crate::config::{ConnectionType, SourceConfig};
use crate::error::{NetSourceError, Result};
use crate::registry::{Connection, ConnectionRegistry, ConnectionSnapshot, ConnectionStat};
use crate::stats::{SourceStats, StatsCell, WorkerState};
use crate::worker::{self, Properties, RunControl, Shared};
use parking_lot::{Mutex, RwLock};
use std::iter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, instrument};

/// Handle of one worker run.
#[derive(Debug)]
struct WorkerHandle {
    control: Arc<RunControl>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Stream worker thread panicked");
            }
        }
    }
}

/// TCP byte stream to typed packets bridge.
#[derive(Debug)]
pub struct NetworkSource {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl NetworkSource {
    /// Creates a stopped source from a validated configuration.
    ///
    /// `config.connections` is ignored here; connections carry destinations
    /// and are registered with [`NetworkSource::add_connection`].
    pub fn new(config: SourceConfig) -> Result<Self> {
        config.validate()?;

        let bounds = TransferBounds::compute(
            alignment_unit([config.byte_swap]),
            config.max_bytes,
            config.min_bytes,
        );
        let mut config = config;
        config.max_bytes = bounds.max_bytes;
        config.min_bytes = bounds.min_bytes;

        Ok(Self {
            shared: Arc::new(Shared {
                properties: RwLock::new(Properties { config, bounds }),
                registry: ConnectionRegistry::new(),
                stats: StatsCell::new(),
                reopen_requested: AtomicBool::new(false),
                parked: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Starts the worker thread. A no-op while a worker is running.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        if let Some(handle) = slot.as_mut() {
            if !handle.control.is_finished() {
                debug!("Stream worker already running");
                return Ok(());
            }
            handle.join();
        }

        let control = Arc::new(RunControl::default());
        self.shared.stats.set_state(WorkerState::AwaitingConnection);
        let thread = {
            let shared = Arc::clone(&self.shared);
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("netsource-worker".to_string())
                .spawn(move || worker::run(shared, control))
                .map_err(|source| NetSourceError::WorkerSpawn { source })?
        };

        *slot = Some(WorkerHandle {
            control,
            thread: Some(thread),
        });
        info!("Network source started");
        Ok(())
    }

    /// Stops the worker and waits for it within the shutdown budget.
    ///
    /// Returns [`NetSourceError::ShutdownTimeout`] when the worker does not
    /// finish in time; the stop request stays raised.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        let Some(handle) = slot.as_mut() else {
            return Ok(());
        };

        handle.control.stop.store(true, Ordering::Release);
        let (poll, retries) = {
            let props = self.shared.properties.read();
            (props.config.timing.shutdown_poll(), props.config.timing.shutdown_retries)
        };

        for _ in 0..retries {
            if handle.control.is_finished() {
                break;
            }
            thread::sleep(poll);
        }

        if !handle.control.is_finished() {
            let waited_ms = u64::try_from(poll.as_millis()).unwrap_or(u64::MAX)
                * u64::from(retries);
            error!(waited_ms, "Stream worker did not stop in time");
            return Err(NetSourceError::ShutdownTimeout { waited_ms });
        }

        handle.join();
        *slot = None;
        info!("Network source stopped");
        Ok(())
    }

    /// True while a worker run has not finished.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|h| !h.control.is_finished())
    }

    pub fn state(&self) -> WorkerState {
        self.shared.stats.state()
    }

    pub fn stats(&self) -> SourceStats {
        self.shared.stats.snapshot()
    }

    /// Bytes received on the current data connection.
    pub fn total_bytes(&self) -> u64 {
        self.stats().total_bytes
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.stats().bytes_per_sec
    }

    /// Copy of the current property values.
    pub fn config(&self) -> SourceConfig {
        self.shared.properties.read().config.clone()
    }

    pub fn transfer_bounds(&self) -> TransferBounds {
        self.shared.properties.read().bounds
    }

    pub fn byte_swap(&self) -> u16 {
        self.shared.properties.read().config.byte_swap
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.shared.properties.read().config.connection_type
    }

    pub fn ip_address(&self) -> String {
        self.shared.properties.read().config.ip_address.clone()
    }

    pub fn port(&self) -> u16 {
        self.shared.properties.read().config.port
    }

    pub fn max_bytes(&self) -> usize {
        self.shared.properties.read().config.max_bytes
    }

    pub fn min_bytes(&self) -> usize {
        self.shared.properties.read().config.min_bytes
    }

    pub fn set_byte_swap(&self, byte_swap: u16) {
        let mut props = self.shared.properties.write();
        if props.config.byte_swap == byte_swap {
            return;
        }
        props.config.byte_swap = byte_swap;
        info!(byte_swap, "Byte swap changed");
        self.recompute(&mut props);
    }

    pub fn set_max_bytes(&self, max_bytes: usize) {
        let mut props = self.shared.properties.write();
        if props.config.max_bytes == max_bytes {
            return;
        }
        props.config.max_bytes = max_bytes;
        self.recompute(&mut props);
    }

    pub fn set_min_bytes(&self, min_bytes: usize) {
        let mut props = self.shared.properties.write();
        if props.config.min_bytes == min_bytes {
            return;
        }
        props.config.min_bytes = min_bytes;
        self.recompute(&mut props);
    }

    /// Switches between `server` and `client`. Any other value is rejected
    /// and leaves the source untouched.
    pub fn set_connection_type(&self, connection_type: &str) -> Result<()> {
        let connection_type: ConnectionType = connection_type.parse()?;
        let mut props = self.shared.properties.write();
        if props.config.connection_type != connection_type {
            props.config.connection_type = connection_type;
            info!(%connection_type, "Connection type changed");
            self.request_reopen();
        }
        Ok(())
    }

    pub fn set_ip_address(&self, ip_address: &str) {
        let mut props = self.shared.properties.write();
        if props.config.ip_address != ip_address {
            props.config.ip_address = ip_address.to_string();
            info!(ip_address, "IP address changed");
            self.request_reopen();
        }
    }

    pub fn set_port(&self, port: u16) {
        let mut props = self.shared.properties.write();
        if props.config.port != port {
            props.config.port = port;
            info!(port, "Port changed");
            self.request_reopen();
        }
    }

    fn request_reopen(&self) {
        self.shared.reopen_requested.store(true, Ordering::Release);
    }

    /// Clamps the thresholds to the alignment unit of the global swap width
    /// and every connection override.
    fn recompute(&self, props: &mut Properties) {
        let overrides = self.shared.registry.byte_swap_overrides();
        let unit = alignment_unit(iter::once(props.config.byte_swap).chain(overrides));
        let bounds = TransferBounds::compute(unit, props.config.max_bytes, props.config.min_bytes);

        props.config.max_bytes = bounds.max_bytes;
        props.config.min_bytes = bounds.min_bytes;
        props.bounds = bounds;
        debug!(
            unit = bounds.unit,
            max_bytes = bounds.max_bytes,
            min_bytes = bounds.min_bytes,
            "Transfer bounds recomputed"
        );
    }

    fn recompute_now(&self) {
        let mut props = self.shared.properties.write();
        self.recompute(&mut props);
    }

    /// Registers an output connection.
    pub fn add_connection(&self, connection: Connection) -> Result<()> {
        let widens = connection.byte_swap().is_some_and(|w| w > 1);
        self.shared.registry.add(connection)?;
        if widens {
            self.recompute_now();
        }
        Ok(())
    }

    /// Replaces the whole connection set.
    pub fn replace_connections(&self, connections: Vec<Connection>) -> Result<()> {
        self.shared.registry.replace(connections)?;
        self.recompute_now();
        Ok(())
    }

    /// Removes a connection by name. Returns whether one was removed.
    pub fn remove_connection(&self, name: &str) -> bool {
        let removed = self.shared.registry.remove(name);
        if removed {
            self.recompute_now();
        }
        removed
    }

    pub fn connections(&self) -> ConnectionSnapshot {
        self.shared.registry.snapshot()
    }

    pub fn connection_stats(&self) -> Vec<ConnectionStat> {
        self.shared.registry.stats()
    }
}

impl Drop for NetworkSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "Failed to stop network source on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleKind;
    use crate::sink::{FnSink, PacketSink, SamplePacket};
    use pretty_assertions::assert_eq;

    fn null_sink() -> Arc<dyn PacketSink> {
        Arc::new(FnSink(|_: SamplePacket| {}))
    }

    fn source() -> NetworkSource {
        let mut config = SourceConfig::default();
        config.port = 0;
        config.bind_address = "127.0.0.1".to_string();
        config.timing.shutdown_poll_ms = 20;
        config.timing.reconnect_backoff_ms = 20;
        config.timing.poll_interval_ms = 100;
        NetworkSource::new(config).unwrap()
    }

    #[test]
    fn test_defaults() {
        let src = NetworkSource::new(SourceConfig::default()).unwrap();
        assert_eq!(src.connection_type(), ConnectionType::Server);
        assert_eq!(src.port(), 32191);
        assert_eq!(src.max_bytes(), 16384);
        assert_eq!(src.min_bytes(), 16384);
        assert_eq!(src.byte_swap(), 0);
        assert_eq!(src.state(), WorkerState::Idle);
        assert_eq!(src.total_bytes(), 0);
    }

    #[test]
    fn test_byte_swap_realigns_bounds() {
        let src = source();
        src.set_min_bytes(100);
        assert_eq!(src.min_bytes(), 104);

        src.set_byte_swap(3);
        let bounds = src.transfer_bounds();
        assert_eq!(bounds.unit, 24);
        assert_eq!(bounds.max_bytes, 16368);
        assert_eq!(bounds.min_bytes, 120);
        assert_eq!(src.max_bytes(), 16368);
    }

    #[test]
    fn test_min_above_max_is_capped() {
        let src = source();
        src.set_max_bytes(1000);
        src.set_min_bytes(5000);
        assert_eq!(src.max_bytes(), 1000);
        assert_eq!(src.min_bytes(), 1000);
    }

    #[test]
    fn test_connection_override_widens_unit() {
        let src = source();
        src.add_connection(Connection::new("c", SampleKind::UInt8, null_sink()).with_byte_swap(3))
            .unwrap();
        assert_eq!(src.transfer_bounds().unit, 24);

        assert!(src.remove_connection("c"));
        assert_eq!(src.transfer_bounds().unit, 8);
    }

    #[test]
    fn test_invalid_connection_type_rejected() {
        let src = source();
        let err = src.set_connection_type("peer").unwrap_err();
        assert!(matches!(err, NetSourceError::InvalidConnectionType(_)));
        assert_eq!(src.connection_type(), ConnectionType::Server);
        assert!(!src.shared.reopen_requested.load(Ordering::Acquire));
    }

    #[test]
    fn test_identity_setters_request_reopen_on_change_only() {
        let src = source();
        src.set_port(0);
        src.set_connection_type("server").unwrap();
        assert!(!src.shared.reopen_requested.load(Ordering::Acquire));

        src.set_connection_type("client").unwrap();
        assert!(src.shared.reopen_requested.swap(false, Ordering::AcqRel));

        src.set_ip_address("10.1.1.1");
        assert!(src.shared.reopen_requested.swap(false, Ordering::AcqRel));

        src.set_port(4000);
        assert!(src.shared.reopen_requested.load(Ordering::Acquire));
    }

    #[test]
    fn test_start_stop_cycle() {
        let src = source();
        src.start().unwrap();
        src.start().unwrap();
        assert!(src.is_running());

        src.stop().unwrap();
        assert!(!src.is_running());
        assert_eq!(src.state(), WorkerState::Stopped);

        src.start().unwrap();
        assert!(src.is_running());
        src.stop().unwrap();
        src.stop().unwrap();
    }

    #[test]
    fn test_huge_max_bytes_starts_and_stops() {
        let src = source();
        src.set_max_bytes(1 << 62);
        src.start().unwrap();
        assert!(src.is_running());
        src.stop().unwrap();
        assert_eq!(src.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_thresholds_near_usize_max() {
        let src = source();
        src.set_byte_swap(3);
        src.set_max_bytes(usize::MAX);
        src.set_min_bytes(usize::MAX - 15);
        let bounds = src.transfer_bounds();
        assert_eq!(bounds.unit, 24);
        assert_eq!(bounds.max_bytes % 24, 0);
        assert_eq!(bounds.min_bytes, bounds.max_bytes);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = SourceConfig::default();
        config.max_bytes = 0;
        assert!(NetworkSource::new(config).is_err());
    }
}

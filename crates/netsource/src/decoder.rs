//! Per-connection swap, decode and delivery of flushed byte spans.

use crate::byte_swap;
use crate::registry::Connection;
use crate::sample::{SampleData, decode};
use crate::sink::{SamplePacket, SampleTime};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

/// Monotonic wall-clock source for packet timestamps.
///
/// Seeded from the system clock once at stream start and advanced with a
/// monotonic timer, so timestamps never go backwards within a stream.
#[derive(Debug, Clone, Copy)]
pub struct SampleClock {
    epoch_secs: f64,
    started: Instant,
}

impl SampleClock {
    pub fn start() -> Self {
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            epoch_secs,
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> SampleTime {
        SampleTime::from_secs_f64(self.epoch_secs + self.started.elapsed().as_secs_f64())
    }
}

/// Turns flushed byte spans into packets for every connection.
#[derive(Debug)]
pub struct SampleDecoder {
    stream_id: Arc<str>,
    warned: HashSet<(String, usize)>,
}

impl SampleDecoder {
    pub fn new(stream_id: impl Into<Arc<str>>) -> Self {
        Self {
            stream_id: stream_id.into(),
            warned: HashSet::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Delivers `bytes` to every connection in `connections`.
    ///
    /// Each connection swaps with its own override, or `byte_swap` when it
    /// has none. Connections resolving to the same swap width share one
    /// swapped copy. Returns the number of packets pushed.
    pub fn push_all(
        &mut self,
        connections: &[Arc<Connection>],
        bytes: &[u8],
        byte_swap: u16,
        time: SampleTime,
    ) -> usize {
        let mut swapped: HashMap<usize, Vec<u8>> = HashMap::new();

        for conn in connections {
            let kind = conn.kind();
            let data = if kind.is_opaque() {
                decode(kind, bytes)
            } else {
                let width = byte_swap::effective_width(
                    conn.byte_swap().unwrap_or(byte_swap),
                    conn.bytes_per_sample(),
                );
                if width > 1 {
                    self.warn_on_mismatch(conn, width);
                    let view = swapped
                        .entry(width)
                        .or_insert_with(|| byte_swap::swapped(bytes, width));
                    decode(kind, view)
                } else {
                    decode(kind, bytes)
                }
            };

            self.deliver(conn, data, bytes.len(), time);
        }

        connections.len()
    }

    /// Sends an empty end-of-stream packet to every connection.
    pub fn push_end_of_stream(&self, connections: &[Arc<Connection>], time: SampleTime) -> usize {
        for conn in connections {
            self.deliver(conn, SampleData::empty(conn.kind()), 0, time);
        }
        connections.len()
    }

    fn deliver(&self, conn: &Connection, data: SampleData, bytes: usize, time: SampleTime) {
        let samples = data.len();
        let packet = SamplePacket {
            stream_id: Arc::clone(&self.stream_id),
            kind: conn.kind(),
            end_of_stream: data.is_empty(),
            data,
            time,
        };

        trace!(
            connection = conn.name(),
            bytes,
            samples,
            eos = packet.end_of_stream,
            "Pushing packet"
        );
        conn.record_delivery(bytes, samples);
        conn.destination().push_packet(packet);
    }

    fn warn_on_mismatch(&mut self, conn: &Connection, width: usize) {
        let bytes_per_sample = conn.bytes_per_sample();
        if width == bytes_per_sample {
            return;
        }
        if self.warned.insert((conn.name().to_string(), width)) {
            warn!(
                connection = conn.name(),
                kind = %conn.kind(),
                swap_width = width,
                bytes_per_sample,
                "Byte swap width does not match sample width"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleKind;
    use crate::sink::{FnSink, MockPacketSink, PacketSink};
    use parking_lot::Mutex;

    fn collector() -> (Arc<Mutex<Vec<SamplePacket>>>, Arc<dyn PacketSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&seen);
        let sink: Arc<dyn PacketSink> =
            Arc::new(FnSink(move |p: SamplePacket| inner.lock().push(p)));
        (seen, sink)
    }

    fn conns(list: Vec<Connection>) -> Vec<Arc<Connection>> {
        list.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SampleClock::start();
        let a = clock.now().as_secs_f64();
        let b = clock.now().as_secs_f64();
        assert!(b >= a);
        assert!(a > 1_000_000_000.0);
    }

    #[test]
    fn test_short_swap_natural_width() {
        let (seen, sink) = collector();
        let set = conns(vec![Connection::new("s", SampleKind::Int16, sink)]);
        let mut decoder = SampleDecoder::new("testing");

        decoder.push_all(&set, &[0x01, 0x00], 1, SampleTime::default());
        decoder.push_all(&set, &[0x01, 0x00], 0, SampleTime::default());

        let packets = seen.lock();
        assert_eq!(packets[0].data, SampleData::Int16(vec![i16::from_ne_bytes([0x00, 0x01])]));
        assert_eq!(packets[1].data, SampleData::Int16(vec![i16::from_ne_bytes([0x01, 0x00])]));
        assert_eq!(&*packets[0].stream_id, "testing");
    }

    #[test]
    fn test_override_takes_precedence() {
        let (seen, sink) = collector();
        let set = conns(vec![
            Connection::new("raw", SampleKind::UInt8, Arc::clone(&sink)).with_byte_swap(0),
            Connection::new("grp", SampleKind::UInt8, sink).with_byte_swap(4),
        ]);
        let mut decoder = SampleDecoder::new("s");
        decoder.push_all(&set, &[1, 2, 3, 4, 5], 2, SampleTime::default());

        let packets = seen.lock();
        assert_eq!(packets[0].data, SampleData::UInt8(vec![1, 2, 3, 4, 5]));
        assert_eq!(packets[1].data, SampleData::UInt8(vec![4, 3, 2, 1, 5]));
    }

    #[test]
    fn test_opaque_is_never_swapped() {
        let (seen, sink) = collector();
        let set = conns(vec![Connection::new("x", SampleKind::Xml, sink)]);
        let mut decoder = SampleDecoder::new("s");
        decoder.push_all(&set, b"<a/>", 4, SampleTime::default());
        assert_eq!(seen.lock()[0].data, SampleData::Opaque(b"<a/>".to_vec()));
    }

    #[test]
    fn test_every_connection_gets_same_range() {
        let (seen, sink) = collector();
        let set = conns(vec![
            Connection::new("a", SampleKind::UInt8, Arc::clone(&sink)),
            Connection::new("b", SampleKind::UInt16, Arc::clone(&sink)),
            Connection::new("c", SampleKind::Float64, sink),
        ]);
        let mut decoder = SampleDecoder::new("s");
        let bytes: Vec<u8> = (0..16).collect();
        assert_eq!(decoder.push_all(&set, &bytes, 0, SampleTime::default()), 3);

        let packets = seen.lock();
        assert_eq!(packets[0].data.len(), 16);
        assert_eq!(packets[1].data.len(), 8);
        assert_eq!(packets[2].data.len(), 2);
        assert!(packets.iter().all(|p| !p.end_of_stream));
        assert_eq!(set[1].stat().bytes, 16);
        assert_eq!(set[1].stat().samples, 8);
    }

    #[test]
    fn test_mismatch_warning_recorded_once() {
        let (_seen, sink) = collector();
        let set = conns(vec![Connection::new("f", SampleKind::Float32, sink).with_byte_swap(2)]);
        let mut decoder = SampleDecoder::new("s");
        decoder.push_all(&set, &[0; 8], 0, SampleTime::default());
        decoder.push_all(&set, &[0; 8], 0, SampleTime::default());
        assert_eq!(decoder.warned.len(), 1);
        assert!(decoder.warned.contains(&("f".to_string(), 2)));
    }

    #[test]
    fn test_end_of_stream_marker() {
        let mut mock = MockPacketSink::new();
        mock.expect_push_packet()
            .withf(|p| p.end_of_stream && p.data.is_empty() && p.kind == SampleKind::Float64)
            .times(1)
            .return_const(());

        let set = conns(vec![Connection::new("d", SampleKind::Float64, Arc::new(mock))]);
        let decoder = SampleDecoder::new("s");
        assert_eq!(decoder.push_end_of_stream(&set, SampleTime::default()), 1);
        assert_eq!(set[0].stat().packets, 1);
    }

    #[test]
    fn test_short_span_decodes_to_eos() {
        let mut mock = MockPacketSink::new();
        mock.expect_push_packet()
            .withf(|p| p.end_of_stream)
            .times(1)
            .return_const(());

        let set = conns(vec![Connection::new("l", SampleKind::Int64, Arc::new(mock))]);
        let mut decoder = SampleDecoder::new("s");
        decoder.push_all(&set, &[1, 2, 3], 0, SampleTime::default());
    }
}

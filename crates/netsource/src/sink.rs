//! Packet destinations.
//!
//! A [`PacketSink`] is the narrow interface to whatever sits downstream of the
//! source: a framework output port, a channel, or a test collector.

use crate::sample::{SampleData, SampleKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Wall-clock time attached to a packet, split like a precision UTC stamp.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleTime {
    /// Whole seconds since the Unix epoch.
    pub whole_secs: u64,
    /// Fractional part in `[0, 1)`.
    pub frac_secs: f64,
}

impl SampleTime {
    pub fn from_secs_f64(secs: f64) -> Self {
        let secs = secs.max(0.0);
        let whole = secs.trunc();
        Self {
            whole_secs: whole as u64,
            frac_secs: secs - whole,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.whole_secs as f64 + self.frac_secs
    }
}

/// One delivery to a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePacket {
    /// Stream identifier, fixed for the lifetime of a source.
    pub stream_id: Arc<str>,
    /// Declared kind of the receiving connection.
    pub kind: SampleKind,
    /// Decoded samples, or the raw span for opaque kinds.
    pub data: SampleData,
    /// Set when `data` is empty.
    pub end_of_stream: bool,
    pub time: SampleTime,
}

/// Receives packets from the streaming worker.
///
/// Called from the worker thread; implementations must not block for long.
#[cfg_attr(test, mockall::automock)]
pub trait PacketSink: Send + Sync {
    fn push_packet(&self, packet: SamplePacket);
}

/// Forwards packets into a tokio unbounded channel.
///
/// Sending never blocks, so async consumers can sit behind a synchronous
/// worker thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SamplePacket>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SamplePacket>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SamplePacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PacketSink for ChannelSink {
    fn push_packet(&self, packet: SamplePacket) {
        if self.tx.send(packet).is_err() {
            debug!("Packet receiver dropped, discarding packet");
        }
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> PacketSink for FnSink<F>
where
    F: Fn(SamplePacket) + Send + Sync,
{
    fn push_packet(&self, packet: SamplePacket) {
        (self.0)(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> SamplePacket {
        SamplePacket {
            stream_id: Arc::from("test"),
            kind: SampleKind::UInt8,
            data: SampleData::UInt8(vec![1, 2, 3]),
            end_of_stream: false,
            time: SampleTime::default(),
        }
    }

    #[test]
    fn test_sample_time_split() {
        let t = SampleTime::from_secs_f64(12.25);
        assert_eq!(t.whole_secs, 12);
        assert!((t.frac_secs - 0.25).abs() < 1e-9);
        assert!((t.as_secs_f64() - 12.25).abs() < 1e-9);
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.push_packet(packet());
        let received = rx.try_recv().unwrap();
        assert_eq!(received.data.len(), 3);
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.push_packet(packet());
    }

    #[test]
    fn test_fn_sink() {
        let seen = std::sync::Mutex::new(0usize);
        let sink = FnSink(|p: SamplePacket| *seen.lock().unwrap() += p.data.len());
        sink.push_packet(packet());
        sink.push_packet(packet());
        assert_eq!(*seen.lock().unwrap(), 6);
    }
}

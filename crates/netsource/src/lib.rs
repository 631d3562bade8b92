//! Network Source
//!
//! Bridges a raw TCP byte stream into typed sample packets. A background
//! worker serves or connects a socket, accumulates received bytes, flushes
//! aligned spans once configured thresholds are reached, and fans every span
//! out to the registered output connections after optional byte swapping and
//! native-order decoding.

pub mod alignment;
pub mod byte_swap;
pub mod config;
pub mod decoder;
pub mod error;
pub mod registry;
pub mod sample;
pub mod sink;
pub mod socket;
pub mod source;
pub mod stats;
mod worker;

pub use alignment::{BASE_ALIGNMENT, TransferBounds, alignment_unit};
pub use config::{ConnectionConfig, ConnectionType, SourceConfig, TimingConfig};
pub use decoder::{SampleClock, SampleDecoder};
pub use error::*;
pub use registry::{Connection, ConnectionRegistry, ConnectionSnapshot, ConnectionStat};
pub use sample::{SampleData, SampleKind};
pub use sink::{ChannelSink, FnSink, PacketSink, SamplePacket, SampleTime};
pub use socket::{Endpoint, ReadOutcome, SocketManager};
pub use source::NetworkSource;
pub use stats::{SourceStats, ThroughputMeter, WorkerState};

//! Sample element kinds and native-order decoding.

use crate::error::NetSourceError;
use byteorder::{ByteOrder, NativeEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element kind declared for an output connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SampleKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// Opaque text payload, delivered undecoded.
    String,
    /// Opaque structured (XML) payload, delivered undecoded.
    Xml,
    /// Opaque file payload, delivered undecoded.
    File,
}

impl SampleKind {
    /// All supported kinds, numeric first.
    pub const ALL: [SampleKind; 13] = [
        SampleKind::Int8,
        SampleKind::UInt8,
        SampleKind::Int16,
        SampleKind::UInt16,
        SampleKind::Int32,
        SampleKind::UInt32,
        SampleKind::Int64,
        SampleKind::UInt64,
        SampleKind::Float32,
        SampleKind::Float64,
        SampleKind::String,
        SampleKind::Xml,
        SampleKind::File,
    ];

    /// Natural width of one element. Opaque kinds count single bytes.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleKind::Int8 | SampleKind::UInt8 => 1,
            SampleKind::Int16 | SampleKind::UInt16 => 2,
            SampleKind::Int32 | SampleKind::UInt32 | SampleKind::Float32 => 4,
            SampleKind::Int64 | SampleKind::UInt64 | SampleKind::Float64 => 8,
            SampleKind::String | SampleKind::Xml | SampleKind::File => 1,
        }
    }

    /// Opaque kinds are forwarded as raw bytes without swapping.
    pub fn is_opaque(&self) -> bool {
        matches!(self, SampleKind::String | SampleKind::Xml | SampleKind::File)
    }

    /// Canonical port type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Int8 => "char",
            SampleKind::UInt8 => "octet",
            SampleKind::Int16 => "short",
            SampleKind::UInt16 => "ushort",
            SampleKind::Int32 => "long",
            SampleKind::UInt32 => "ulong",
            SampleKind::Int64 => "longlong",
            SampleKind::UInt64 => "ulonglong",
            SampleKind::Float32 => "float",
            SampleKind::Float64 => "double",
            SampleKind::String => "string",
            SampleKind::Xml => "xml",
            SampleKind::File => "file",
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts port type names (`dataShort`, `short`), fixed-width aliases
/// (`i16`, `int16`) in any letter case.
impl FromStr for SampleKind {
    type Err = NetSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("data").unwrap_or(lower.as_str());

        let kind = match name {
            "char" | "i8" | "int8" => SampleKind::Int8,
            "octet" | "u8" | "uint8" => SampleKind::UInt8,
            "short" | "i16" | "int16" => SampleKind::Int16,
            "ushort" | "u16" | "uint16" => SampleKind::UInt16,
            "long" | "i32" | "int32" => SampleKind::Int32,
            "ulong" | "u32" | "uint32" => SampleKind::UInt32,
            "longlong" | "i64" | "int64" => SampleKind::Int64,
            "ulonglong" | "u64" | "uint64" => SampleKind::UInt64,
            "float" | "f32" | "float32" => SampleKind::Float32,
            "double" | "f64" | "float64" => SampleKind::Float64,
            "string" => SampleKind::String,
            "xml" => SampleKind::Xml,
            "file" => SampleKind::File,
            _ => return Err(NetSourceError::UnsupportedSampleKind(s.to_string())),
        };

        Ok(kind)
    }
}

impl TryFrom<String> for SampleKind {
    type Error = NetSourceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SampleKind> for String {
    fn from(kind: SampleKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A decoded run of samples.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    /// Undecoded payload of an opaque kind.
    Opaque(Vec<u8>),
}

impl SampleData {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            SampleData::Int8(v) => v.len(),
            SampleData::UInt8(v) => v.len(),
            SampleData::Int16(v) => v.len(),
            SampleData::UInt16(v) => v.len(),
            SampleData::Int32(v) => v.len(),
            SampleData::UInt32(v) => v.len(),
            SampleData::Int64(v) => v.len(),
            SampleData::UInt64(v) => v.len(),
            SampleData::Float32(v) => v.len(),
            SampleData::Float64(v) => v.len(),
            SampleData::Opaque(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty run of the given kind, used as the end-of-stream marker.
    pub fn empty(kind: SampleKind) -> Self {
        decode(kind, &[])
    }
}

fn read_native<T: Default + Clone>(
    bytes: &[u8],
    width: usize,
    read_into: fn(&[u8], &mut [T]),
) -> Vec<T> {
    let count = bytes.len() / width;
    let mut out = vec![T::default(); count];
    read_into(&bytes[..count * width], &mut out);
    out
}

/// Reinterprets `bytes` as native-order elements of `kind`.
///
/// Trailing bytes that do not form a complete element are dropped. Opaque
/// kinds return the span unchanged.
pub fn decode(kind: SampleKind, bytes: &[u8]) -> SampleData {
    match kind {
        SampleKind::Int8 => SampleData::Int8(bytes.iter().map(|b| *b as i8).collect()),
        SampleKind::UInt8 => SampleData::UInt8(bytes.to_vec()),
        SampleKind::Int16 => SampleData::Int16(read_native(bytes, 2, NativeEndian::read_i16_into)),
        SampleKind::UInt16 => {
            SampleData::UInt16(read_native(bytes, 2, NativeEndian::read_u16_into))
        }
        SampleKind::Int32 => SampleData::Int32(read_native(bytes, 4, NativeEndian::read_i32_into)),
        SampleKind::UInt32 => {
            SampleData::UInt32(read_native(bytes, 4, NativeEndian::read_u32_into))
        }
        SampleKind::Int64 => SampleData::Int64(read_native(bytes, 8, NativeEndian::read_i64_into)),
        SampleKind::UInt64 => {
            SampleData::UInt64(read_native(bytes, 8, NativeEndian::read_u64_into))
        }
        SampleKind::Float32 => {
            SampleData::Float32(read_native(bytes, 4, NativeEndian::read_f32_into))
        }
        SampleKind::Float64 => {
            SampleData::Float64(read_native(bytes, 8, NativeEndian::read_f64_into))
        }
        SampleKind::String | SampleKind::Xml | SampleKind::File => {
            SampleData::Opaque(bytes.to_vec())
        }
    }
}

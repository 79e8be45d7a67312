//! Error taxonomy for framing, field decoding, schema loading and the bridge pipelines.
//!
//! A closed pipe is deliberately absent here: it is routine and travels as
//! [`Delivery::StreamClosed`](crate::bridge::sink::Delivery) / [`SourceEvent::StreamClosed`](crate::bridge::source::SourceEvent).

use std::path::PathBuf;

/// Framing errors. Once one is returned the stream is not resynchronised.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("truncated {context}: expected {expected} bytes, got {got}")]
    Truncated {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("length mismatch in message 0x{message_type_id:08x}: declared {declared} bytes, structure needs {actual}")]
    LengthMismatch {
        message_type_id: u32,
        declared: u32,
        actual: u64,
    },
    #[error("malformed package length {length_bytes} for package 0x{package_type_id:08x} (header alone is 12 bytes)")]
    MalformedPackageLength {
        package_type_id: u32,
        length_bytes: u16,
    },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a field decode stopped relative to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overrun {
    /// A field of `width_bits` started with fewer bits left.
    FieldPastEnd { width_bits: u32 },
    /// The layout ended with payload bits still unread.
    UndecodedTail,
}

/// Per-package decode failures; callers may skip the package and continue.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown package type 0x{0:08x}")]
    UnknownPackageType(u32),
    #[error("field overrun in package 0x{package_type_id:08x} at bit {bit_offset} of {payload_bits}: {kind:?}")]
    FieldOverrun {
        package_type_id: u32,
        bit_offset: usize,
        payload_bits: usize,
        kind: Overrun,
    },
    #[error("package 0x{package_type_id:08x}: unbounded field {index} is not the last field")]
    UnboundedNotLast { package_type_id: u32, index: usize },
}

/// Schema/table problems; fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("schema {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("schema parse error: {0}")]
    Parse(String),
    #[error("duplicate {kind} definition: {name}")]
    Duplicate { kind: &'static str, name: String },
    #[error("duplicate {kind} id 0x{id:08x} ({name})")]
    DuplicateId {
        kind: &'static str,
        id: u32,
        name: String,
    },
    #[error("message {message} references unknown package {package}")]
    UnknownPackage { message: String, package: String },
    #[error("role {role} subscribes to unknown message {message}")]
    UnknownMessage { role: String, message: String },
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("message {0} has no destination endpoint")]
    MissingDestination(String),
    #[error("package {package}: field {index} has invalid width {width} (1..=64 bits)")]
    InvalidWidth {
        package: String,
        index: usize,
        width: u32,
    },
    #[error("package {package}: field {index} repeats zero times")]
    ZeroRepetition { package: String, index: usize },
    #[error("package {package}: unbounded field {index} must be the last field")]
    UnboundedNotLast { package: String, index: usize },
    #[error("invalid time increment {value} in {scope}")]
    InvalidIncrement { scope: String, value: f64 },
}

/// Errors surfaced by the capture/replay pipelines.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("network: {context}: {source}")]
    Network {
        context: String,
        source: std::io::Error,
    },
    #[error("pcap: {0}")]
    Pcap(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("interrupted")]
    Interrupted,
}

impl BridgeError {
    pub fn network(context: impl Into<String>, source: std::io::Error) -> Self {
        BridgeError::Network {
            context: context.into(),
            source,
        }
    }
}

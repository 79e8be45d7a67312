//! Capture/replay bridge between the network, PCAP files and binary TDM streams.
//!
//! - [`ingest`] (`mi`): live capture or PCAP replay → file or named pipe.
//! - [`egress`] (`mo`): file or named pipe → UDP multicast or PCAP file.
//!
//! Both directions run one pipeline per process, driven by a [`Session`] that carries the
//! running count and the shutdown flag.

pub mod egress;
pub mod fifo;
pub mod ingest;
pub mod session;
pub mod sink;
pub mod source;

pub use session::{Pacer, Session, Summary};

use crate::schema::DEFAULT_TDM_PORT;

/// UDP source port used for emitted datagrams.
pub const DEFAULT_SOURCE_PORT: u16 = 55501;
/// Multicast TTL of emitted datagrams.
pub const DEFAULT_TTL: u8 = 4;

/// Runtime options shared by both directions. The fallback destination for unlisted message
/// types lives in [`crate::schema::EndpointTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// UDP destination port carrying TDMs.
    pub tdm_port: u16,
    pub source_port: u16,
    pub ttl: u8,
    /// Added to the MDID before endpoint lookup. Message bytes are never changed.
    pub mdid_offset: u32,
    /// Replay without pacing.
    pub quick: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            tdm_port: DEFAULT_TDM_PORT,
            source_port: DEFAULT_SOURCE_PORT,
            ttl: DEFAULT_TTL,
            mdid_offset: 0,
            quick: false,
        }
    }
}

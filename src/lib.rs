//! # TmNShark: TmNS Data Message codec and capture/replay bridge
//!
//! Framing, schema-driven decoding and network bridging for TmNS Data Messages (TDMs): a
//! big-endian binary format carried over UDP multicast or stored in PCAP/binary files.
//!
//! ## Wire format
//!
//! ```text
//! message header (24 bytes)
//!   ver<<4 | adf_words : u8   reserved : u8   flags : u16
//!   message_type_id (MDID) : u32
//!   sequence_number : u32
//!   length_bytes : u32        (header + ADF + packages)
//!   seconds : u32   nanoseconds : u32
//! ADF (adf_words * 4 bytes)
//! packages:
//!   package_type_id (PDID) : u32
//!   length_bytes : u16   reserved : u8   status_flags : u8
//!   time_delta : u32
//!   payload (length_bytes - 12 bytes, bit packed MSB first)
//! ```
//!
//! ## Layers
//!
//! - [`reader`]: byte stream → [`Message`]s, or the minimal 16-byte-prefix framing used by egress
//! - [`decode`]: package payload + field layout → named, timestamped samples
//! - [`parser`] / [`schema`]: schema table file → [`DecoderTable`] and [`EndpointTable`]
//! - [`frame`]: decode every package of a message, separating rejected packages
//! - [`bridge`]: ingest (network/PCAP → file/pipe) and egress (file/pipe → network/PCAP)
//!
//! ## Usage
//!
//! ```no_run
//! use tmnshark::{decode_message, MessageReader, SchemaTables};
//!
//! let tables = SchemaTables::load("flight.tdl".as_ref())?;
//! let file = std::fs::File::open("tmns.bin")?;
//! for msg in MessageReader::new(std::io::BufReader::new(file)) {
//!     let result = decode_message(&tables.decoders, &msg?);
//!     println!("{} packages decoded", result.packages.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod ast;
pub mod bridge;
pub mod capture;
pub mod decode;
pub mod dump;
pub mod error;
pub mod frame;
pub mod message;
pub mod net;
pub mod parser;
pub mod pcap;
pub mod reader;
pub mod schema;

pub use ast::SchemaDocument;
pub use bridge::{BridgeConfig, Session, Summary};
pub use decode::{DecodedSample, DecoderTable, FieldSpec, Measurements, PackageLayout, Repetition};
pub use error::{BridgeError, ConfigError, DecodeError, ProtocolError};
pub use frame::{decode_message, MessageDecodeResult};
pub use message::{Message, MessageHeader, Package, PackageHeader, RawMessage, Timestamp};
pub use parser::parse;
pub use reader::{read_message, read_package, read_raw_message, MessageReader};
pub use schema::{EndpointBinding, EndpointTable, SchemaTables};

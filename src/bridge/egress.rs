//! Egress (`mo`): file or named pipe of messages → UDP datagrams on the network or in a PCAP file.
//!
//! ```text
//! Idle → OpenSource → [ReadHeaderPrefix → ReadTail → LookupEndpoint → Emit]*
//!                      └─ SourceClosed → RecreateSource → OpenSource
//! ```
//! Shutdown is the only terminal transition for a pipe; a file also ends at end of stream.

use crate::bridge::source::{SourceEvent, TdmSource};
use crate::bridge::{BridgeConfig, Pacer, Session, Summary};
use crate::error::BridgeError;
use crate::message::RawMessage;
use crate::net;
use crate::pcap::PcapWriter;
use crate::reader::MessageReader;
use crate::schema::EndpointTable;
use byteorder::{BigEndian, ByteOrder};
use std::fs::File;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::path::Path;
use std::time::Duration;

/// One message ready to leave: its destination, message timestamp and unmodified bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub message_type_id: u32,
    pub destination: SocketAddrV4,
    pub timestamp: Duration,
    pub payload: Vec<u8>,
}

/// Destination lookup with the configured MDID offset. The message bytes are not touched.
pub fn route(message: RawMessage, endpoints: &EndpointTable, config: &BridgeConfig) -> OutboundPacket {
    let lookup_id = message.message_type_id.wrapping_add(config.mdid_offset);
    let destination = endpoints.resolve(lookup_id);
    OutboundPacket {
        message_type_id: message.message_type_id,
        destination,
        timestamp: message_time(&message.bytes),
        payload: message.bytes,
    }
}

fn message_time(bytes: &[u8]) -> Duration {
    if bytes.len() < 24 {
        return Duration::ZERO;
    }
    let secs = BigEndian::read_u32(&bytes[16..20]) as u64;
    let nanos = BigEndian::read_u32(&bytes[20..24]) as u64;
    Duration::from_secs(secs) + Duration::from_nanos(nanos)
}

/// Log once that lookups are shifted.
pub fn warn_if_offset(config: &BridgeConfig) {
    if config.mdid_offset != 0 {
        tracing::warn!(
            offset = config.mdid_offset,
            "MDID lookup offset in use; endpoints are looked up as MDID + offset"
        );
    }
}

pub trait Emitter {
    fn emit(&mut self, packet: &OutboundPacket) -> Result<(), BridgeError>;

    fn flush(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Sends each message as one UDP datagram.
pub struct UdpEmitter {
    socket: UdpSocket,
}

impl UdpEmitter {
    pub fn bind(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.source_port);
        let socket = UdpSocket::bind(addr).map_err(|e| BridgeError::network(format!("bind {}", addr), e))?;
        socket
            .set_multicast_ttl_v4(config.ttl as u32)
            .map_err(|e| BridgeError::network("set multicast ttl", e))?;
        tracing::info!(source = %addr, ttl = config.ttl, "udp output ready");
        Ok(UdpEmitter { socket })
    }
}

impl Emitter for UdpEmitter {
    fn emit(&mut self, packet: &OutboundPacket) -> Result<(), BridgeError> {
        self.socket
            .send_to(&packet.payload, packet.destination)
            .map_err(|e| BridgeError::network(format!("send to {}", packet.destination), e))?;
        Ok(())
    }
}

/// Appends each message as an Ethernet/IPv4/UDP frame to a PCAP file.
pub struct PcapEmitter {
    writer: PcapWriter<File>,
    source: SocketAddrV4,
    ttl: u8,
}

impl PcapEmitter {
    pub fn append(path: &Path, config: &BridgeConfig) -> Result<Self, BridgeError> {
        let writer = PcapWriter::append(path)?;
        tracing::info!(pcap = %path.display(), "pcap output ready");
        Ok(PcapEmitter {
            writer,
            source: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.source_port),
            ttl: config.ttl,
        })
    }
}

impl Emitter for PcapEmitter {
    fn emit(&mut self, packet: &OutboundPacket) -> Result<(), BridgeError> {
        let frame = net::build_udp_frame(self.source, packet.destination, self.ttl, &packet.payload).ok_or_else(|| {
            BridgeError::Pcap(format!(
                "message 0x{:08x} of {} bytes does not fit in one datagram",
                packet.message_type_id,
                packet.payload.len()
            ))
        })?;
        self.writer.write_frame(packet.timestamp, &frame)
    }

    fn flush(&mut self) -> Result<(), BridgeError> {
        self.writer.flush()
    }
}

/// Collects packets in memory.
#[derive(Debug, Default)]
pub struct VecEmitter {
    pub packets: Vec<OutboundPacket>,
}

impl Emitter for VecEmitter {
    fn emit(&mut self, packet: &OutboundPacket) -> Result<(), BridgeError> {
        self.packets.push(packet.clone());
        Ok(())
    }
}

/// Stream messages from `source` to `emitter` until end of stream or shutdown, recreating a
/// closed pipe source.
pub fn run_stream(
    source: &mut dyn TdmSource,
    emitter: &mut dyn Emitter,
    endpoints: &EndpointTable,
    config: &BridgeConfig,
    session: &mut Session,
) -> Result<Summary, BridgeError> {
    warn_if_offset(config);
    while !session.is_shutdown() {
        match source.next_event()? {
            SourceEvent::Message(m) => {
                let packet = route(m, endpoints, config);
                emitter.emit(&packet)?;
                session.record();
                tracing::debug!(
                    mdid = format_args!("0x{:08x}", packet.message_type_id),
                    dst = %packet.destination,
                    len = packet.payload.len(),
                    count = session.count(),
                    "emitted"
                );
            }
            SourceEvent::EndOfStream => break,
            SourceEvent::StreamClosed => {
                tracing::warn!(count = session.count(), "writer disconnected; recreating pipe");
                session.record_restart();
                match source.reopen(session) {
                    Ok(()) => {}
                    Err(BridgeError::Interrupted) => break,
                    Err(e) => return Err(e),
                }
            }
        }
    }
    emitter.flush()?;
    let summary = Summary::from(&*session);
    tracing::info!(total = summary.messages, restarts = summary.restarts, "output finished");
    Ok(summary)
}

/// Read a whole binary file and build every outbound packet up front. Each message is fully
/// framed first, so a malformed file fails before anything is sent; the packets carry the
/// file's bytes for each message as they are.
pub fn build_replay_batch(path: &Path, endpoints: &EndpointTable, config: &BridgeConfig) -> Result<Vec<OutboundPacket>, BridgeError> {
    let bytes = std::fs::read(path)?;
    let mut batch = Vec::new();
    let mut reader = MessageReader::new(&bytes[..]);
    while let Some(message) = reader.next() {
        let message = message?;
        let span = reader.last_offset() as usize..reader.position() as usize;
        let raw = RawMessage {
            message_type_id: message.message_type_id(),
            length_bytes: message.length_bytes(),
            bytes: bytes[span].to_vec(),
        };
        batch.push(route(raw, endpoints, config));
    }
    tracing::info!(file = %path.display(), messages = batch.len(), "replay batch built");
    Ok(batch)
}

/// Emit a prepared batch, paced by message timestamps unless `config.quick`.
pub fn replay_batch(
    batch: &[OutboundPacket],
    emitter: &mut dyn Emitter,
    config: &BridgeConfig,
    session: &mut Session,
) -> Result<Summary, BridgeError> {
    warn_if_offset(config);
    let mut pacer = Pacer::new(config.quick);
    for packet in batch {
        if !pacer.wait(packet.timestamp, session) {
            break;
        }
        emitter.emit(packet)?;
        session.record();
    }
    emitter.flush()?;
    let summary = Summary::from(&*session);
    tracing::info!(total = summary.messages, interrupted = summary.interrupted, "replay finished");
    Ok(summary)
}

//! PCAP/PCAPNG input (UDP datagram extraction) and classic libpcap output.

use crate::error::BridgeError;
use crate::net::{self, LINKTYPE_ETHERNET};
use byteorder::{LittleEndian, WriteBytesExt};
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const PCAP_MAGIC_USEC: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_NSEC: u32 = 0xa1b2_3c4d;
const READER_BUFFER: usize = 1 << 20;
const SNAPLEN: u32 = 262_144;

/// One UDP datagram found in a capture file.
#[derive(Debug, Clone, Copy)]
pub struct CapturedDatagram<'a> {
    /// Capture timestamp since the Unix epoch.
    pub timestamp: Duration,
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub payload: &'a [u8],
}

/// Walk every UDP datagram in a PCAP or PCAPNG file, in file order.
/// Returns the number of frames read (UDP or not).
pub fn for_each_datagram<F>(path: &Path, f: F) -> Result<u64, BridgeError>
where
    F: FnMut(CapturedDatagram<'_>) -> Result<(), BridgeError>,
{
    let mut magic = [0u8; 4];
    {
        let mut file = File::open(path)?;
        let n = file.read(&mut magic)?;
        if n < magic.len() {
            return Err(BridgeError::Pcap(format!("{}: file too short", path.display())));
        }
    }
    let file = File::open(path)?;
    if magic == PCAPNG_MAGIC {
        datagrams_pcapng(file, f)
    } else {
        datagrams_legacy(file, f)
    }
}

/// Legacy libpcap reader (microsecond or nanosecond resolution).
pub fn datagrams_legacy<R, F>(file: R, mut f: F) -> Result<u64, BridgeError>
where
    R: Read,
    F: FnMut(CapturedDatagram<'_>) -> Result<(), BridgeError>,
{
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(READER_BUFFER, file)
        .map_err(|e| BridgeError::Pcap(format!("pcap header: {:?}", e)))?;
    let mut linktype = Linktype(LINKTYPE_ETHERNET as i32);
    let mut nanos = false;
    let mut frames = 0u64;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => {
                        linktype = h.network;
                        nanos = h.magic_number == PCAP_MAGIC_NSEC || h.magic_number == PCAP_MAGIC_NSEC.swap_bytes();
                    }
                    PcapBlockOwned::Legacy(b) => {
                        frames += 1;
                        let sub = if nanos { b.ts_usec as u64 } else { b.ts_usec as u64 * 1_000 };
                        let timestamp = Duration::from_secs(b.ts_sec as u64) + Duration::from_nanos(sub);
                        if let Some(v) = net::udp_from_linktype(linktype.0 as u32, b.data) {
                            f(CapturedDatagram {
                                timestamp,
                                source: v.source,
                                destination: v.destination,
                                payload: v.payload,
                            })?;
                        }
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| BridgeError::Pcap(format!("pcap refill error: {:?}", e)))?;
            }
            Err(e) => return Err(BridgeError::Pcap(format!("pcap read error: {:?}", e))),
        }
    }
    Ok(frames)
}

/// Per-interface parameters from an Interface Description Block.
#[derive(Debug, Clone, Copy)]
struct NgInterface {
    linktype: Linktype,
    /// Timestamp units per second (`if_tsresol`).
    resolution: u64,
    /// Seconds added to every timestamp (`if_tsoffset`).
    offset: i64,
}

impl NgInterface {
    fn timestamp(&self, ts_high: u32, ts_low: u32) -> Duration {
        let (secs, frac) = pcap_parser::pcapng::build_ts(ts_high, ts_low, 0, self.resolution);
        let nanos = (frac as u128 * 1_000_000_000 / self.resolution as u128) as u64;
        let secs = (secs as i64).saturating_add(self.offset).max(0) as u64;
        Duration::from_secs(secs) + Duration::from_nanos(nanos)
    }
}

/// PCAPNG reader. Enhanced packet timestamps use the `if_tsresol`/`if_tsoffset` of their
/// interface; interface ids restart with every section.
pub fn datagrams_pcapng<R, F>(file: R, mut f: F) -> Result<u64, BridgeError>
where
    R: Read,
    F: FnMut(CapturedDatagram<'_>) -> Result<(), BridgeError>,
{
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(READER_BUFFER, file)
        .map_err(|e| BridgeError::Pcap(format!("pcapng header: {:?}", e)))?;
    let mut interfaces: Vec<NgInterface> = Vec::new();
    let mut frames = 0u64;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    let packet = match &b {
                        PcapNgBlock::SectionHeader(_) => {
                            interfaces.clear();
                            None
                        }
                        PcapNgBlock::InterfaceDescription(idb) => {
                            let resolution = idb.ts_resolution().filter(|r| *r > 0).ok_or_else(|| {
                                BridgeError::Pcap(format!(
                                    "interface {}: invalid if_tsresol 0x{:02x}",
                                    interfaces.len(),
                                    idb.if_tsresol
                                ))
                            })?;
                            interfaces.push(NgInterface {
                                linktype: idb.linktype,
                                resolution,
                                offset: idb.ts_offset(),
                            });
                            None
                        }
                        PcapNgBlock::EnhancedPacket(epb) => {
                            let iface = interfaces.get(epb.if_id as usize).ok_or_else(|| {
                                BridgeError::Pcap(format!("packet refers to unknown interface {}", epb.if_id))
                            })?;
                            Some((iface.linktype, iface.timestamp(epb.ts_high, epb.ts_low), epb.packet_data()))
                        }
                        PcapNgBlock::SimplePacket(spb) => {
                            let lt = interfaces
                                .first()
                                .map(|i| i.linktype)
                                .unwrap_or(Linktype(LINKTYPE_ETHERNET as i32));
                            Some((lt, Duration::ZERO, spb.packet_data()))
                        }
                        _ => None,
                    };
                    if let Some((lt, timestamp, frame)) = packet {
                        frames += 1;
                        if let Some(v) = net::udp_from_linktype(lt.0 as u32, frame) {
                            f(CapturedDatagram {
                                timestamp,
                                source: v.source,
                                destination: v.destination,
                                payload: v.payload,
                            })?;
                        }
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| BridgeError::Pcap(format!("pcapng refill error: {:?}", e)))?;
            }
            Err(e) => return Err(BridgeError::Pcap(format!("pcapng read error: {:?}", e))),
        }
    }
    Ok(frames)
}

/// Classic libpcap writer: little-endian, microsecond timestamps, Ethernet link type.
pub struct PcapWriter<W: Write> {
    out: W,
    packets: u64,
}

impl<W: Write> PcapWriter<W> {
    /// Write the global header and return the writer.
    pub fn new(mut out: W) -> Result<Self, BridgeError> {
        write_global_header(&mut out)?;
        Ok(PcapWriter { out, packets: 0 })
    }

    /// Wrap a sink that already holds a global header.
    pub fn resume(out: W) -> Self {
        PcapWriter { out, packets: 0 }
    }

    pub fn write_frame(&mut self, timestamp: Duration, frame: &[u8]) -> Result<(), BridgeError> {
        let caplen = frame.len().min(SNAPLEN as usize);
        let mut rec = Vec::with_capacity(16 + caplen);
        rec.write_u32::<LittleEndian>(timestamp.as_secs() as u32)?;
        rec.write_u32::<LittleEndian>(timestamp.subsec_micros())?;
        rec.write_u32::<LittleEndian>(caplen as u32)?;
        rec.write_u32::<LittleEndian>(frame.len() as u32)?;
        rec.extend_from_slice(&frame[..caplen]);
        self.out.write_all(&rec)?;
        self.packets += 1;
        Ok(())
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn flush(&mut self) -> Result<(), BridgeError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl PcapWriter<File> {
    /// Open `path` for appending, writing the global header only when the file is new or empty.
    pub fn append(path: &Path) -> Result<Self, BridgeError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            PcapWriter::new(file)
        } else {
            Ok(PcapWriter::resume(file))
        }
    }
}

fn write_global_header<W: Write>(out: &mut W) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(PCAP_MAGIC_USEC)?;
    out.write_u16::<LittleEndian>(2)?;
    out.write_u16::<LittleEndian>(4)?;
    out.write_i32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(SNAPLEN)?;
    out.write_u32::<LittleEndian>(LINKTYPE_ETHERNET)?;
    Ok(())
}

//! Link/IPv4/UDP handling: extract UDP datagrams from captured frames, and build
//! Ethernet/IPv4/UDP frames around TDM payloads for PCAP output.

use byteorder::{BigEndian, ByteOrder};
use std::net::{Ipv4Addr, SocketAddrV4};

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;
pub const LINKTYPE_LINUX_SLL: u32 = 113;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;
const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const ETHERNET_HEADER_LEN: usize = 14;

/// A UDP datagram located inside a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpView<'a> {
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub payload: &'a [u8],
}

/// Extract the UDP datagram from a captured frame, using linktype and IPv4/UDP length fields.
/// Ethernet padding in short frames is excluded.
pub fn udp_from_linktype(linktype: u32, frame: &[u8]) -> Option<UdpView<'_>> {
    let l3 = match linktype {
        LINKTYPE_ETHERNET => ethernet_l3(frame)?,
        LINKTYPE_RAW => frame,
        LINKTYPE_LINUX_SLL => linux_sll_l3(frame)?,
        _ => return None,
    };
    ipv4_udp(l3)
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return None;
    }
    let mut off = 12usize;
    let mut ethertype = BigEndian::read_u16(&frame[off..off + 2]);
    off += 2;
    // 802.1Q / 802.1ad tags
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        if frame.len() < off + 4 {
            return None;
        }
        ethertype = BigEndian::read_u16(&frame[off + 2..off + 4]);
        off += 4;
    }
    match ethertype {
        ETHERTYPE_IPV4 => Some(&frame[off..]),
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    // SLL v1: 16-byte header, protocol at bytes 14..16
    if frame.len() < 16 {
        return None;
    }
    match BigEndian::read_u16(&frame[14..16]) {
        ETHERTYPE_IPV4 => Some(&frame[16..]),
        _ => None,
    }
}

/// Parse an IPv4 packet carrying UDP. Fragments other than the first are ignored.
pub fn ipv4_udp(l3: &[u8]) -> Option<UdpView<'_>> {
    if l3.len() < IPV4_HEADER_LEN || l3[0] >> 4 != 4 {
        return None;
    }
    let ihl = (l3[0] & 0x0f) as usize * 4;
    if ihl < IPV4_HEADER_LEN || l3.len() < ihl {
        return None;
    }
    let total_len = BigEndian::read_u16(&l3[2..4]) as usize;
    if total_len < ihl {
        return None;
    }
    let frag_offset = BigEndian::read_u16(&l3[6..8]) & 0x1fff;
    if frag_offset != 0 || l3[9] != IPPROTO_UDP {
        return None;
    }
    let l3 = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    let udp = &l3[ihl..];
    if udp.len() < UDP_HEADER_LEN {
        return None;
    }
    let udp_len = BigEndian::read_u16(&udp[4..6]) as usize;
    if udp_len < UDP_HEADER_LEN || udp.len() < udp_len {
        return None;
    }
    let src_ip = Ipv4Addr::new(l3[12], l3[13], l3[14], l3[15]);
    let dst_ip = Ipv4Addr::new(l3[16], l3[17], l3[18], l3[19]);
    Some(UdpView {
        source: SocketAddrV4::new(src_ip, BigEndian::read_u16(&udp[0..2])),
        destination: SocketAddrV4::new(dst_ip, BigEndian::read_u16(&udp[2..4])),
        payload: &udp[UDP_HEADER_LEN..udp_len],
    })
}

/// Ethernet MAC for an IPv4 destination: RFC 1112 mapping for multicast, broadcast otherwise.
pub fn destination_mac(ip: Ipv4Addr) -> [u8; 6] {
    if ip.is_multicast() {
        let o = ip.octets();
        [0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3]]
    } else {
        [0xff; 6]
    }
}

/// RFC 1071 ones' complement checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for c in &mut chunks {
        sum += BigEndian::read_u16(c) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Largest UDP payload that fits in one IPv4 datagram.
pub const MAX_UDP_PAYLOAD: usize = 65535 - IPV4_HEADER_LEN - UDP_HEADER_LEN;

/// Build an Ethernet/IPv4/UDP frame (DF set, UDP checksum omitted). `None` if the payload is
/// too large for one datagram.
pub fn build_udp_frame(
    source: SocketAddrV4,
    destination: SocketAddrV4,
    ttl: u8,
    payload: &[u8],
) -> Option<Vec<u8>> {
    if payload.len() > MAX_UDP_PAYLOAD {
        return None;
    }
    let udp_len = UDP_HEADER_LEN + payload.len();
    let ip_len = IPV4_HEADER_LEN + udp_len;
    let mut f = Vec::with_capacity(ETHERNET_HEADER_LEN + ip_len);

    f.extend_from_slice(&destination_mac(*destination.ip()));
    f.extend_from_slice(&[0u8; 6]);
    f.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    let ip_start = f.len();
    f.push(0x45);
    f.push(0);
    f.extend_from_slice(&(ip_len as u16).to_be_bytes());
    f.extend_from_slice(&[0, 0]); // identification
    f.extend_from_slice(&0x4000u16.to_be_bytes()); // DF
    f.push(ttl);
    f.push(IPPROTO_UDP);
    f.extend_from_slice(&[0, 0]); // checksum placeholder
    f.extend_from_slice(&source.ip().octets());
    f.extend_from_slice(&destination.ip().octets());
    let csum = internet_checksum(&f[ip_start..ip_start + IPV4_HEADER_LEN]);
    f[ip_start + 10..ip_start + 12].copy_from_slice(&csum.to_be_bytes());

    f.extend_from_slice(&source.port().to_be_bytes());
    f.extend_from_slice(&destination.port().to_be_bytes());
    f.extend_from_slice(&(udp_len as u16).to_be_bytes());
    f.extend_from_slice(&[0, 0]);
    f.extend_from_slice(payload);
    Some(f)
}

//! Live capture sources: a multicast UDP listener and a Linux `AF_PACKET` sniffer.
//!
//! Both return after a short receive timeout so callers can poll their shutdown flag.

use crate::error::BridgeError;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// Receive timeout used by every live source.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

const MAX_DATAGRAM: usize = 65_536;

/// A live source of TDM datagram payloads.
pub trait PacketSource {
    /// Next matching payload, or `Ok(None)` when the poll interval elapsed without one.
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, BridgeError>;
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}

/// UDP socket bound to the TDM port that has joined a set of multicast groups.
pub struct UdpListener {
    socket: UdpSocket,
    groups: Vec<Ipv4Addr>,
    interface: Ipv4Addr,
    buf: Vec<u8>,
}

impl UdpListener {
    /// Bind `0.0.0.0:port` and join each group on `interface` (`0.0.0.0` lets the kernel choose).
    pub fn bind(port: u16, groups: &[Ipv4Addr], interface: Ipv4Addr) -> Result<Self, BridgeError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = UdpSocket::bind(addr).map_err(|e| BridgeError::network(format!("bind {}", addr), e))?;
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|e| BridgeError::network("set read timeout", e))?;
        let mut joined = Vec::with_capacity(groups.len());
        for group in groups {
            socket
                .join_multicast_v4(group, &interface)
                .map_err(|e| BridgeError::network(format!("join {} on {}", group, interface), e))?;
            tracing::info!(%group, %interface, port, "joined multicast group");
            joined.push(*group);
        }
        Ok(UdpListener {
            socket,
            groups: joined,
            interface,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, BridgeError> {
        self.socket
            .local_addr()
            .map_err(|e| BridgeError::network("local address", e))
    }

    pub fn groups(&self) -> &[Ipv4Addr] {
        &self.groups
    }
}

impl PacketSource for UdpListener {
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((n, _)) => Ok(Some(self.buf[..n].to_vec())),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(BridgeError::network("udp receive", e)),
        }
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        for group in &self.groups {
            if let Err(e) = self.socket.leave_multicast_v4(group, &self.interface) {
                tracing::debug!(%group, error = %e, "leave multicast group failed");
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use self::sniffer::Sniffer;

#[cfg(target_os = "linux")]
mod sniffer {
    use super::{is_timeout, PacketSource, MAX_DATAGRAM, POLL_INTERVAL};
    use crate::error::BridgeError;
    use crate::net::{self, LINKTYPE_ETHERNET};
    use nix::sys::socket::{self, sockopt, AddressFamily, SockFlag, SockProtocol, SockType};
    use nix::sys::time::TimeVal;
    use std::ffi::OsString;
    use std::fs::File;
    use std::io::Read;

    /// Raw `AF_PACKET` sniffer keeping UDP datagrams sent to one destination port.
    /// Needs `CAP_NET_RAW`.
    pub struct Sniffer {
        socket: File,
        port: u16,
        buf: Vec<u8>,
    }

    impl Sniffer {
        /// Open a sniffer on all interfaces, or on `interface` only.
        pub fn open(interface: Option<&str>, port: u16) -> Result<Self, BridgeError> {
            let fd = socket::socket(
                AddressFamily::Packet,
                SockType::Raw,
                SockFlag::SOCK_CLOEXEC,
                SockProtocol::EthAll,
            )
            .map_err(|e| BridgeError::network("open packet socket", e.into()))?;
            if let Some(name) = interface {
                socket::setsockopt(&fd, sockopt::BindToDevice, &OsString::from(name))
                    .map_err(|e| BridgeError::network(format!("bind to device {}", name), e.into()))?;
            }
            let timeout = TimeVal::new(0, POLL_INTERVAL.as_micros() as _);
            socket::setsockopt(&fd, sockopt::ReceiveTimeout, &timeout)
                .map_err(|e| BridgeError::network("set receive timeout", e.into()))?;
            tracing::info!(interface = interface.unwrap_or("any"), port, "sniffing");
            Ok(Sniffer {
                socket: File::from(fd),
                port,
                buf: vec![0u8; MAX_DATAGRAM + 64],
            })
        }
    }

    impl PacketSource for Sniffer {
        fn next_payload(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
            loop {
                let n = match self.socket.read(&mut self.buf) {
                    Ok(n) => n,
                    Err(e) if is_timeout(&e) => return Ok(None),
                    Err(e) => return Err(BridgeError::network("packet receive", e)),
                };
                if let Some(v) = net::udp_from_linktype(LINKTYPE_ETHERNET, &self.buf[..n]) {
                    if v.destination.port() == self.port {
                        return Ok(Some(v.payload.to_vec()));
                    }
                }
            }
        }
    }
}

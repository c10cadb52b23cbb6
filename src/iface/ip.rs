//! Contracts with the layers around the transport engines
//!
//! The engines never touch a device or a routing table directly. They are
//! handed an [`IpLayer`] for transmission and route lookup, a
//! [`BufferPool`](crate::buf::BufferPool) for transmit buffers, and a
//! [`SocketDemux`] that claims received UDP datagrams.

use crate::buf::PacketBuf;
use crate::error::Result;

/// Interface number
pub type IfNbr = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpAddr {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl IpAddr {
    pub fn octets(&self) -> &[u8] {
        match self {
            IpAddr::V4(a) => a,
            IpAddr::V6(a) => a,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, IpAddr::V4(_))
    }

    pub fn as_v4(&self) -> Option<[u8; 4]> {
        match self {
            IpAddr::V4(a) => Some(*a),
            IpAddr::V6(_) => None,
        }
    }

    pub fn is_multicast(&self) -> bool {
        match self {
            IpAddr::V4(a) => a[0] & 0xF0 == 0xE0,
            IpAddr::V6(a) => a[0] == 0xFF,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.octets().iter().all(|&b| b == 0)
    }

    /// 255.255.255.255
    pub fn is_limited_broadcast(&self) -> bool {
        matches!(self, IpAddr::V4([255, 255, 255, 255]))
    }
}

impl std::fmt::Display for IpAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpAddr::V4(a) => write!(f, "{}.{}.{}.{}", a[0], a[1], a[2], a[3]),
            IpAddr::V6(a) => {
                for (i, pair) in a.chunks(2).enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{:x}", u16::from_be_bytes([pair[0], pair[1]]))?;
                }
                Ok(())
            }
        }
    }
}

/// Transport protocol an MTU is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Icmpv4,
    UdpV4,
    UdpV6,
}

/// Outcome of a route lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub if_nbr: IfNbr,
    pub src: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4TxOptions {
    pub tos: u8,
    pub ttl: u8,
    pub dont_fragment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6TxOptions {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub hop_limit: u8,
}

/// The IP layer as seen from ICMP and UDP
///
/// `tx_ipv4` / `tx_ipv6` take ownership of the buffer whether they succeed or
/// not; a failed transmit discards it.
pub trait IpLayer: Send + Sync {
    fn tx_ipv4(&self, buf: PacketBuf, src: [u8; 4], dst: [u8; 4], opts: Ipv4TxOptions)
        -> Result<()>;

    fn tx_ipv6(
        &self,
        buf: PacketBuf,
        src: [u8; 16],
        dst: [u8; 16],
        opts: Ipv6TxOptions,
    ) -> Result<()>;

    /// Interface and source address used to reach `dst`
    fn source_for(&self, dst: &IpAddr) -> Option<Route>;

    /// Largest transport message the interface carries for `protocol`
    fn mtu(&self, if_nbr: IfNbr, protocol: Protocol) -> usize;

    /// Octets lower layers need in front of a transport message
    fn tx_header_room(&self, if_nbr: IfNbr) -> usize;
}

/// The socket layer as seen from UDP
pub trait SocketDemux: Send + Sync {
    /// Hand a validated datagram to its listener. An unclaimed datagram is
    /// returned to the caller.
    fn deliver(&self, buf: PacketBuf) -> std::result::Result<(), PacketBuf>;
}

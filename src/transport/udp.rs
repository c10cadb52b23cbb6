//! UDP (User Datagram Protocol) engine
//!
//! Receive validates ports, length and checksum, strips the header and hands
//! the datagram to the socket layer; an unclaimed datagram is answered with
//! ICMP port unreachable. Transmit builds one datagram per call over IPv4 or
//! IPv6; there is no application-level fragmentation.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::buf::{BufFlags, BufferPool, PacketBuf};
use crate::config::UdpConfig;
use crate::error::{Discard, NetError, Result};
use crate::iface::ip::{
    IpAddr, IpLayer, Ipv4TxOptions, Ipv6TxOptions, Protocol, Route, SocketDemux,
};
use crate::network::checksum::{self, ipv4_pseudo_header, ipv6_pseudo_header, CHECKSUM_NONE};
use crate::network::icmp::{DestUnreachableCode, IcmpKind};
use crate::network::icmpv4::Icmpv4;
use crate::network::ipv4::protocol;
use crate::stats::UdpStats;

/// UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;
/// Largest value the length field can carry
pub const UDP_MAX_LEN: usize = u16::MAX as usize;

/// UDP packet header structure
///
/// Represents the standard 8-byte UDP header as defined in RFC 768
#[derive(Debug, Clone, Copy)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16, // Length of UDP header and data
    pub checksum: u16,
}

impl UdpHeader {
    /// Parse UDP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid UDP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < UDP_HEADER_LEN {
            return None;
        }

        Some(UdpHeader {
            src_port: BigEndian::read_u16(&data[0..2]),
            dst_port: BigEndian::read_u16(&data[2..4]),
            length: BigEndian::read_u16(&data[4..6]),
            checksum: BigEndian::read_u16(&data[6..8]),
        })
    }

    /// Convert UDP header to bytes
    pub fn to_bytes(&self) -> [u8; UDP_HEADER_LEN] {
        let mut bytes = [0u8; UDP_HEADER_LEN];
        BigEndian::write_u16(&mut bytes[0..2], self.src_port);
        BigEndian::write_u16(&mut bytes[2..4], self.dst_port);
        BigEndian::write_u16(&mut bytes[4..6], self.length);
        BigEndian::write_u16(&mut bytes[6..8], self.checksum);
        bytes
    }
}

/// Checksum pseudo-header for either IP version
enum PseudoHeader {
    V4([u8; 12]),
    V6([u8; 40]),
}

impl PseudoHeader {
    fn new(src: &IpAddr, dst: &IpAddr, len: usize) -> Option<Self> {
        match (src, dst) {
            (IpAddr::V4(s), IpAddr::V4(d)) => Some(PseudoHeader::V4(ipv4_pseudo_header(
                *s,
                *d,
                protocol::UDP,
                len as u16,
            ))),
            (IpAddr::V6(s), IpAddr::V6(d)) => Some(PseudoHeader::V6(ipv6_pseudo_header(
                *s,
                *d,
                protocol::UDP,
                len as u32,
            ))),
            _ => None,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            PseudoHeader::V4(b) => b,
            PseudoHeader::V6(b) => b,
        }
    }
}

/// Outcome of [`Udp::rx`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpRx {
    /// A socket took the datagram
    Delivered,
    /// No socket listens on the destination port
    Unclaimed,
    Discarded(Discard),
}

/// Per-datagram transmit options
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    /// TOS (IPv4) or traffic class (IPv6)
    pub tos: u8,
    /// TTL / hop limit; the configured default when None
    pub ttl: Option<u8>,
    pub dont_fragment: bool,
    /// Send without a checksum. Ignored for IPv6, where it is mandatory.
    pub no_checksum: bool,
    pub flow_label: u32,
}

pub struct Udp {
    ip: Arc<dyn IpLayer>,
    pool: Arc<dyn BufferPool>,
    icmp: Arc<Icmpv4>,
    sockets: Arc<dyn SocketDemux>,
    config: UdpConfig,
    stats: UdpStats,
}

impl Udp {
    pub fn new(
        ip: Arc<dyn IpLayer>,
        pool: Arc<dyn BufferPool>,
        icmp: Arc<Icmpv4>,
        sockets: Arc<dyn SocketDemux>,
        config: UdpConfig,
    ) -> Self {
        Udp {
            ip,
            pool,
            icmp,
            sockets,
            config,
            stats: UdpStats::default(),
        }
    }

    pub fn stats(&self) -> &UdpStats {
        &self.stats
    }

    /// Process a received datagram. The buffer is consumed.
    pub fn rx(&self, mut buf: PacketBuf) -> UdpRx {
        self.stats.rx_datagrams.inc();

        if let Err(reason) = self.validate(&mut buf) {
            self.stats.discard(reason);
            log::debug!("udp rx from {} discarded: {}", buf.meta.ip_src, reason);
            return UdpRx::Discarded(reason);
        }
        log::trace!(
            "udp rx {}:{} -> port {} len={}",
            buf.meta.ip_src,
            buf.meta.src_port,
            buf.meta.dst_port,
            buf.total_len()
        );

        let buf = match self.sockets.deliver(buf) {
            Ok(()) => {
                self.stats.rx_delivered.inc();
                return UdpRx::Delivered;
            }
            Err(buf) => buf,
        };

        self.stats.rx_unclaimed.inc();
        log::debug!("udp port {} unclaimed", buf.meta.dst_port);
        if self.config.port_unreachable && !buf.meta.is_ipv6() {
            let kind = IcmpKind::DestUnreachable(DestUnreachableCode::Port);
            if let Err(err) = self.icmp.tx_error(&buf, kind, 0) {
                log::debug!("no port unreachable for {}: {}", buf.meta.ip_src, err);
            }
        }
        UdpRx::Unclaimed
    }

    fn validate(&self, buf: &mut PacketBuf) -> std::result::Result<(), Discard> {
        let msg_len = buf.message_len();
        let hdr = UdpHeader::from_bytes(buf.head().message()).ok_or(if msg_len < UDP_HEADER_LEN {
            Discard::InvalidLength { len: msg_len }
        } else {
            Discard::Truncated
        })?;

        if hdr.src_port == 0 || hdr.dst_port == 0 {
            return Err(Discard::InvalidPort);
        }

        let len = hdr.length as usize;
        if len < UDP_HEADER_LEN || len > UDP_MAX_LEN || len != msg_len {
            return Err(Discard::InvalidLength { len });
        }

        let ipv6 = buf.meta.is_ipv6();
        if hdr.checksum == CHECKSUM_NONE {
            if ipv6 || !self.config.rx_accept_no_checksum {
                return Err(Discard::MissingChecksum);
            }
            self.stats.rx_no_checksum.inc();
        } else if !cfg!(feature = "udp-checksum-offload")
            && !buf.meta.flags.contains(BufFlags::CHECKSUM_VALID)
        {
            let pseudo = PseudoHeader::new(&buf.meta.ip_src, &buf.meta.ip_dst, len)
                .ok_or(Discard::InvalidChecksum)?;
            if !checksum::verify(pseudo.as_bytes(), buf.message_chunks()) {
                return Err(Discard::InvalidChecksum);
            }
            buf.meta.flags |= BufFlags::CHECKSUM_VALID;
        }

        buf.head_mut().set_header_len(UDP_HEADER_LEN);
        buf.tail_mut().iter_mut().for_each(|b| b.clear_header());
        buf.meta.src_port = hdr.src_port;
        buf.meta.dst_port = hdr.dst_port;
        Ok(())
    }

    /// Send `data` from `src_port` to `dst`:`dst_port` over IPv4
    pub fn send_v4(
        &self,
        src_port: u16,
        dst: [u8; 4],
        dst_port: u16,
        data: &[u8],
        opts: TxOptions,
    ) -> Result<()> {
        let dst = IpAddr::V4(dst);
        let route = self.ip.source_for(&dst).ok_or(NetError::NoSourceAddress)?;
        if !route.src.is_ipv4() {
            return Err(NetError::NoSourceAddress);
        }
        self.tx(route, dst, src_port, dst_port, data, opts)
    }

    /// Send `data` from `src_port` to `dst`:`dst_port` over IPv6
    pub fn send_v6(
        &self,
        src_port: u16,
        dst: [u8; 16],
        dst_port: u16,
        data: &[u8],
        opts: TxOptions,
    ) -> Result<()> {
        let dst = IpAddr::V6(dst);
        let route = self.ip.source_for(&dst).ok_or(NetError::NoSourceAddress)?;
        if route.src.is_ipv4() {
            return Err(NetError::NoSourceAddress);
        }
        self.tx(route, dst, src_port, dst_port, data, opts)
    }

    fn tx(
        &self,
        route: Route,
        dst: IpAddr,
        src_port: u16,
        dst_port: u16,
        data: &[u8],
        opts: TxOptions,
    ) -> Result<()> {
        if src_port == 0 || dst_port == 0 {
            return Err(NetError::InvalidArgument("port zero is reserved"));
        }
        let ipv6 = !dst.is_ipv4();
        let proto = if ipv6 { Protocol::UdpV6 } else { Protocol::UdpV4 };

        let room = self.ip.tx_header_room(route.if_nbr);
        let max = self
            .ip
            .mtu(route.if_nbr, proto)
            .min(self.pool.max_size(room))
            .min(UDP_MAX_LEN)
            .saturating_sub(UDP_HEADER_LEN);
        if data.len() > max {
            return Err(NetError::MtuExceeded {
                len: data.len(),
                max,
            });
        }

        let len = UDP_HEADER_LEN + data.len();
        let mut buf = self.pool.acquire(route.if_nbr, len, room)?;
        {
            let msg = buf.head_mut().message_mut();
            let hdr = UdpHeader {
                src_port,
                dst_port,
                length: len as u16,
                checksum: CHECKSUM_NONE,
            };
            msg[..UDP_HEADER_LEN].copy_from_slice(&hdr.to_bytes());
            msg[UDP_HEADER_LEN..].copy_from_slice(data);

            let wanted = ipv6 || (self.config.tx_checksum && !opts.no_checksum);
            if wanted && !cfg!(feature = "udp-checksum-offload") {
                let pseudo = PseudoHeader::new(&route.src, &dst, len)
                    .ok_or(NetError::NoSourceAddress)?;
                let ck = checksum::compute(pseudo.as_bytes(), [&msg[..]]);
                BigEndian::write_u16(&mut msg[6..8], ck);
            }
        }
        buf.head_mut().set_header_len(UDP_HEADER_LEN);
        buf.meta.ip_protocol = protocol::UDP;
        buf.meta.ip_src = route.src;
        buf.meta.ip_dst = dst;
        buf.meta.src_port = src_port;
        buf.meta.dst_port = dst_port;

        let ttl = opts.ttl.unwrap_or(self.config.default_ttl);
        let result = match (route.src, dst) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => self.ip.tx_ipv4(
                buf,
                src,
                dst,
                Ipv4TxOptions {
                    tos: opts.tos,
                    ttl,
                    dont_fragment: opts.dont_fragment,
                },
            ),
            (IpAddr::V6(src), IpAddr::V6(dst)) => self.ip.tx_ipv6(
                buf,
                src,
                dst,
                Ipv6TxOptions {
                    traffic_class: opts.tos,
                    flow_label: opts.flow_label,
                    hop_limit: ttl,
                },
            ),
            _ => Err(NetError::NoSourceAddress),
        };

        match result {
            Ok(()) => {
                self.stats.tx_datagrams.inc();
                Ok(())
            }
            Err(err) => {
                self.stats.tx_failed.inc();
                log::warn!("udp transmit to {}:{} failed: {}", dst, dst_port, err);
                Err(err)
            }
        }
    }
}

/// Copy a received datagram's payload into `out`.
///
/// When `out` is too small the prefix that fits is copied and
/// [`NetError::RxOverflow`] reports both lengths.
pub fn rx_app_data(buf: &PacketBuf, out: &mut [u8]) -> Result<usize> {
    let available = buf.total_len();
    let mut copied = 0;
    for chunk in buf.payload_chunks() {
        let n = chunk.len().min(out.len() - copied);
        out[copied..copied + n].copy_from_slice(&chunk[..n]);
        copied += n;
        if copied == out.len() {
            break;
        }
    }
    if copied < available {
        return Err(NetError::RxOverflow { copied, available });
    }
    Ok(copied)
}

pub struct UdpUtils {}

impl UdpUtils {
    /// Build a UDP datagram, optionally checksummed over the pseudo-header
    pub fn build_datagram(
        src_ip: &IpAddr,
        dst_ip: &IpAddr,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
        with_checksum: bool,
    ) -> Vec<u8> {
        let len = UDP_HEADER_LEN + payload.len();
        let header = UdpHeader {
            src_port,
            dst_port,
            length: len as u16,
            checksum: CHECKSUM_NONE,
        };

        let mut packet = Vec::with_capacity(len);
        packet.extend_from_slice(&header.to_bytes());
        packet.extend_from_slice(payload);

        if with_checksum {
            if let Some(pseudo) = PseudoHeader::new(src_ip, dst_ip, len) {
                let ck = checksum::compute(pseudo.as_bytes(), [&packet[..]]);
                BigEndian::write_u16(&mut packet[6..8], ck);
            }
        }
        packet
    }
}

//! IP layer over a Linux TUN device
//!
//! A deliberately small [`IpLayer`]: one interface, one IPv4 address with a
//! prefix and an optional IPv6 address, everything reachable through the
//! device. Outgoing messages get a fresh IP header and go straight to the
//! device; there is no fragmentation.

use std::sync::atomic::{AtomicU16, Ordering};

use byteorder::{BigEndian, ByteOrder};
use tun_tap::{Iface, Mode};

use crate::buf::{BufFlags, PacketBuf, IPV6_HEADER_LEN};
use crate::error::{NetError, Result};
use crate::iface::ip::{IfNbr, IpAddr, IpLayer, Ipv4TxOptions, Ipv6TxOptions, Protocol, Route};
use crate::network::ipv4::{flags, Ipv4Header, IPV4_HEADER_LEN};

pub const TUN_IF_NBR: IfNbr = 1;
const DEFAULT_MTU: usize = 1500;

pub struct TunIpLayer {
    iface: Iface,
    addr: [u8; 4],
    prefix: u8,
    addr_v6: Option<[u8; 16]>,
    mtu: usize,
    ip_id: AtomicU16,
}

impl TunIpLayer {
    /// Open `name` in TUN mode without packet information
    pub fn new(name: &str, addr: [u8; 4], prefix: u8) -> Result<Self> {
        let iface = Iface::without_packet_info(name, Mode::Tun)?;
        log::info!("opened {} as {}/{}", iface.name(), IpAddr::V4(addr), prefix);
        Ok(TunIpLayer {
            iface,
            addr,
            prefix: prefix.min(32),
            addr_v6: None,
            mtu: DEFAULT_MTU,
            ip_id: AtomicU16::new(1),
        })
    }

    pub fn with_ipv6(mut self, addr: [u8; 16]) -> Self {
        self.addr_v6 = Some(addr);
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn name(&self) -> &str {
        self.iface.name()
    }

    fn host_mask(&self) -> u32 {
        u32::MAX.checked_shr(self.prefix as u32).unwrap_or(0)
    }

    fn is_broadcast(&self, dst: [u8; 4]) -> bool {
        let mask = self.host_mask();
        let dst = u32::from_be_bytes(dst);
        dst == u32::MAX
            || (mask != 0 && dst & !mask == u32::from_be_bytes(self.addr) & !mask && dst & mask == mask)
    }

    /// Read one datagram from the device.
    ///
    /// Returns None for datagrams that are malformed or not addressed to
    /// this host.
    pub fn recv(&self, block_size: usize) -> Result<Option<PacketBuf>> {
        let mut frame = vec![0u8; self.mtu + IPV6_HEADER_LEN];
        let n = self.iface.recv(&mut frame)?;
        let frame = &frame[..n];

        match frame.first().map(|b| b >> 4) {
            Some(4) => Ok(self.accept_ipv4(frame, block_size)),
            Some(6) => Ok(self.accept_ipv6(frame, block_size)),
            _ => {
                log::debug!("dropping non-IP frame of {} octets", n);
                Ok(None)
            }
        }
    }

    fn accept_ipv4(&self, frame: &[u8], block_size: usize) -> Option<PacketBuf> {
        let header = Ipv4Header::from_bytes(frame)?;
        if let Err(reason) = header.validate() {
            log::debug!("dropping IPv4 datagram: {}", reason);
            return None;
        }
        if header.fragment_offset() != 0 || header.more_fragments() {
            log::debug!("dropping IPv4 fragment, reassembly not supported");
            return None;
        }
        let broadcast = self.is_broadcast(header.dst_addr);
        let multicast = header.dst_addr[0] & 0xF0 == 0xE0;
        if header.dst_addr != self.addr && !broadcast && !multicast {
            return None;
        }
        let flags = if broadcast {
            BufFlags::RX_BROADCAST
        } else {
            BufFlags::empty()
        };
        PacketBuf::from_ipv4_datagram(frame, block_size, TUN_IF_NBR, flags)
    }

    fn accept_ipv6(&self, frame: &[u8], block_size: usize) -> Option<PacketBuf> {
        let ours = self.addr_v6?;
        let buf = PacketBuf::from_ipv6_datagram(frame, block_size, TUN_IF_NBR, BufFlags::empty())?;
        let dst = buf.meta.ip_dst;
        if dst != IpAddr::V6(ours) && !dst.is_multicast() {
            return None;
        }
        Some(buf)
    }
}

impl IpLayer for TunIpLayer {
    fn tx_ipv4(&self, buf: PacketBuf, src: [u8; 4], dst: [u8; 4], opts: Ipv4TxOptions) -> Result<()> {
        let len = IPV4_HEADER_LEN + buf.message_len();
        if len > self.mtu {
            return Err(NetError::MtuExceeded {
                len,
                max: self.mtu,
            });
        }
        let frag = if opts.dont_fragment {
            flags::DONT_FRAGMENT
        } else {
            0
        };
        let mut header = Ipv4Header::new(
            opts.tos,
            len as u16,
            self.ip_id.fetch_add(1, Ordering::Relaxed),
            frag,
            opts.ttl,
            buf.meta.ip_protocol,
            src,
            dst,
        );
        header.update_checksum();

        let mut frame = Vec::with_capacity(len);
        frame.extend_from_slice(&header.to_bytes());
        buf.message_chunks().for_each(|c| frame.extend_from_slice(c));
        self.iface
            .send(&frame)
            .map_err(|e| NetError::Transmit(e.to_string()))?;
        Ok(())
    }

    fn tx_ipv6(&self, buf: PacketBuf, src: [u8; 16], dst: [u8; 16], opts: Ipv6TxOptions) -> Result<()> {
        let payload_len = buf.message_len();
        let len = IPV6_HEADER_LEN + payload_len;
        if len > self.mtu {
            return Err(NetError::MtuExceeded {
                len,
                max: self.mtu,
            });
        }

        let mut header = [0u8; IPV6_HEADER_LEN];
        let vtf = (6u32 << 28) | ((opts.traffic_class as u32) << 20) | (opts.flow_label & 0x000F_FFFF);
        BigEndian::write_u32(&mut header[0..4], vtf);
        BigEndian::write_u16(&mut header[4..6], payload_len as u16);
        header[6] = buf.meta.ip_protocol;
        header[7] = opts.hop_limit;
        header[8..24].copy_from_slice(&src);
        header[24..40].copy_from_slice(&dst);

        let mut frame = Vec::with_capacity(len);
        frame.extend_from_slice(&header);
        buf.message_chunks().for_each(|c| frame.extend_from_slice(c));
        self.iface
            .send(&frame)
            .map_err(|e| NetError::Transmit(e.to_string()))?;
        Ok(())
    }

    fn source_for(&self, dst: &IpAddr) -> Option<Route> {
        let src = match dst {
            IpAddr::V4(_) => IpAddr::V4(self.addr),
            IpAddr::V6(_) => IpAddr::V6(self.addr_v6?),
        };
        Some(Route {
            if_nbr: TUN_IF_NBR,
            src,
        })
    }

    fn mtu(&self, _if_nbr: IfNbr, protocol: Protocol) -> usize {
        match protocol {
            Protocol::Icmpv4 | Protocol::UdpV4 => self.mtu.saturating_sub(IPV4_HEADER_LEN),
            Protocol::UdpV6 => self.mtu.saturating_sub(IPV6_HEADER_LEN),
        }
    }

    fn tx_header_room(&self, _if_nbr: IfNbr) -> usize {
        IPV6_HEADER_LEN
    }
}

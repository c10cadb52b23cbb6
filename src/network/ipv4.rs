//! IPv4 header handling
//!
//! The transport engines only read IPv4 headers that the IP layer has already
//! validated, so this module is mostly about the fields ICMP and UDP consume:
//! addresses, TOS, fragmentation word and protocol. Serialization and the
//! header checksum are used by the TUN binding and by tests to build datagrams.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Discard;
use crate::network::checksum::checksum;

pub const IPV4_HEADER_LEN: usize = 20;
const IPV4_VERSION: u8 = 4;
const DEFAULT_IHL: u8 = 5; // 5 * 4 = 20 bytes (standard header length)
const DEFAULT_TTL: u8 = 64;

/// IPv4 packet header structure
///
/// Represents the standard 20-byte IPv4 header as defined in RFC 791
#[derive(Debug, Clone)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // Internet Header Length
    pub tos: u8, // Type of Service
    pub total_len: u16,
    pub id: u16,
    pub flags_frag_offset: u16, // Flags and Fragment Offset
    pub ttl: u8,                // Time to Live
    pub protocol: u8,           // Next Protocol
    pub checksum: u16,
    pub src_addr: [u8; 4], // Source IP Address
    pub dst_addr: [u8; 4], // Destination IP Address
}

impl Ipv4Header {
    /// Create a new IPv4 header. The checksum is left at zero; call
    /// [`update_checksum`](Self::update_checksum) once all fields are final.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tos: u8,
        total_len: u16,
        id: u16,
        flags_frag_offset: u16,
        ttl: u8,
        protocol: u8,
        src_addr: [u8; 4],
        dst_addr: [u8; 4],
    ) -> Self {
        Ipv4Header {
            version: IPV4_VERSION,
            ihl: DEFAULT_IHL,
            tos,
            total_len,
            id,
            flags_frag_offset,
            ttl,
            protocol,
            checksum: 0,
            src_addr,
            dst_addr,
        }
    }

    /// Create a header with TOS 0, TTL 64 and no fragmentation
    pub fn new_simple(
        protocol: u8,
        src_addr: [u8; 4],
        dst_addr: [u8; 4],
        payload_len: u16,
    ) -> Self {
        Self::new(
            0,
            IPV4_HEADER_LEN as u16 + payload_len,
            0,
            0,
            DEFAULT_TTL,
            protocol,
            src_addr,
            dst_addr,
        )
    }

    /// Parse IPv4 header from byte slice
    ///
    /// Returns None if the data is too short or if the version field is not 4.
    /// Options are not parsed; `header_len()` reports their extent.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_LEN {
            return None;
        }

        let version = (data[0] & 0xF0) >> 4;
        if version != IPV4_VERSION {
            return None;
        }

        let mut src_addr = [0u8; 4];
        let mut dst_addr = [0u8; 4];
        src_addr.copy_from_slice(&data[12..16]);
        dst_addr.copy_from_slice(&data[16..20]);

        Some(Ipv4Header {
            version,
            ihl: data[0] & 0x0F,
            tos: data[1],
            total_len: BigEndian::read_u16(&data[2..4]),
            id: BigEndian::read_u16(&data[4..6]),
            flags_frag_offset: BigEndian::read_u16(&data[6..8]),
            ttl: data[8],
            protocol: data[9],
            checksum: BigEndian::read_u16(&data[10..12]),
            src_addr,
            dst_addr,
        })
    }

    /// Recalculate the checksum field after modifying header fields
    pub fn update_checksum(&mut self) {
        self.checksum = Ipv4Utils::calculate_checksum(self);
    }

    /// Serialize the header to a 20-byte array ready for transmission
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut bytes = [0u8; IPV4_HEADER_LEN];
        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        BigEndian::write_u16(&mut bytes[2..4], self.total_len);
        BigEndian::write_u16(&mut bytes[4..6], self.id);
        BigEndian::write_u16(&mut bytes[6..8], self.flags_frag_offset);
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        BigEndian::write_u16(&mut bytes[10..12], self.checksum);
        bytes[12..16].copy_from_slice(&self.src_addr);
        bytes[16..20].copy_from_slice(&self.dst_addr);

        bytes
    }

    /// Get the header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    /// Total length minus header length, zero for a malformed header
    pub fn payload_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(self.header_len())
    }

    pub fn fragment_offset(&self) -> u16 {
        flags::fragment_offset(self.flags_frag_offset)
    }

    pub fn more_fragments(&self) -> bool {
        self.flags_frag_offset & flags::MORE_FRAGMENTS != 0
    }

    /// Check the fields a receiver relies on
    pub fn validate(&self) -> Result<(), Discard> {
        let hdr_len = self.header_len();
        if self.ihl < DEFAULT_IHL || (self.total_len as usize) < hdr_len {
            return Err(Discard::InvalidLength {
                len: self.total_len as usize,
            });
        }
        // options are not serialized, so only option-less headers can be rechecked
        if self.ihl == DEFAULT_IHL && !Ipv4Utils::validate_checksum(self) {
            return Err(Discard::InvalidChecksum);
        }
        Ok(())
    }
}

/// IPv4 protocol constants
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// IPv4 flags constants
pub mod flags {
    pub const DONT_FRAGMENT: u16 = 0x4000;
    pub const MORE_FRAGMENTS: u16 = 0x2000;
    pub const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

    pub fn fragment_offset(flags_frag_offset: u16) -> u16 {
        flags_frag_offset & FRAGMENT_OFFSET_MASK
    }
}

/// Classful address checks used when deciding whether a source may be
/// answered with an ICMP error.
pub mod addr {
    pub const THIS_HOST: [u8; 4] = [0, 0, 0, 0];

    /// Host-part mask for class A, B and C addresses; None for class D and E
    pub fn class_host_mask(addr: [u8; 4]) -> Option<u32> {
        match addr[0] {
            0x00..=0x7F => Some(0x00FF_FFFF),
            0x80..=0xBF => Some(0x0000_FFFF),
            0xC0..=0xDF => Some(0x0000_00FF),
            _ => None,
        }
    }

    /// False for "this host", for a class A/B/C host wildcard and for
    /// class D/E addresses.
    pub fn is_valid_host_source(addr: [u8; 4]) -> bool {
        if addr == THIS_HOST {
            return false;
        }
        match class_host_mask(addr) {
            Some(mask) => u32::from_be_bytes(addr) & mask != 0,
            None => false,
        }
    }

    pub fn is_multicast(addr: [u8; 4]) -> bool {
        addr[0] & 0xF0 == 0xE0
    }
}

pub struct Ipv4Utils {}

impl Ipv4Utils {
    /// Calculate IPv4 header checksum
    ///
    /// The checksum field is treated as zero during calculation.
    pub fn calculate_checksum(header: &Ipv4Header) -> u16 {
        let mut header_bytes = header.to_bytes();
        header_bytes[10] = 0;
        header_bytes[11] = 0;
        checksum(&header_bytes)
    }

    /// Returns true if the header checksum is valid
    pub fn validate_checksum(header: &Ipv4Header) -> bool {
        Self::calculate_checksum(header) == header.checksum
    }

    /// Create a complete IPv4 packet with payload
    ///
    /// The total length and checksum fields are filled in from the payload.
    pub fn create_packet_with_payload(header: &Ipv4Header, payload: &[u8]) -> Vec<u8> {
        let mut header = header.clone();
        header.ihl = DEFAULT_IHL;
        header.total_len = (IPV4_HEADER_LEN + payload.len()) as u16;
        header.update_checksum();
        let mut packet = Vec::with_capacity(header.total_len as usize);
        packet.extend_from_slice(&header.to_bytes());
        packet.extend_from_slice(payload);
        packet
    }
}

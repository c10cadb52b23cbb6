//! Internet checksum (RFC 1071)
//!
//! The sum runs over a pseudo-header followed by any number of byte chunks,
//! so a message split across a buffer chain is summed exactly as if it were
//! contiguous: an odd trailing octet in one chunk pairs with the first octet
//! of the next.

use byteorder::{BigEndian, ByteOrder};

/// Checksum field value meaning "no checksum" in UDP
pub const CHECKSUM_NONE: u16 = 0x0000;
/// One's-complement negative zero, sent in place of a computed zero
pub const CHECKSUM_NEG_ZERO: u16 = 0xFFFF;

/// Running one's-complement sum
#[derive(Debug, Clone, Default)]
pub struct OnesComplement {
    sum: u64,
    pending: Option<u8>,
}

impl OnesComplement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&mut self, mut data: &[u8]) {
        if let Some(hi) = self.pending.take() {
            match data.split_first() {
                Some((&lo, rest)) => {
                    self.sum += u16::from_be_bytes([hi, lo]) as u64;
                    data = rest;
                }
                None => {
                    self.pending = Some(hi);
                    return;
                }
            }
        }

        let mut chunks = data.chunks_exact(2);
        for chunk in &mut chunks {
            self.sum += BigEndian::read_u16(chunk) as u64;
        }
        if let [last] = chunks.remainder() {
            self.pending = Some(*last);
        }
    }

    /// Folded sum, not complemented
    pub fn fold(&self) -> u16 {
        let mut sum = self.sum;
        if let Some(hi) = self.pending {
            // pad the odd octet with a zero
            sum += (hi as u64) << 8;
        }
        while (sum >> 16) > 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        sum as u16
    }

    /// Complemented checksum value
    pub fn finish(&self) -> u16 {
        !self.fold()
    }
}

/// Calculate Internet checksum over a single contiguous slice
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = OnesComplement::new();
    sum.add_bytes(data);
    sum.finish()
}

/// Checksum to place in an outgoing header.
///
/// The checksum field must be zero in the chunks while computing. A result
/// of positive zero is sent as negative zero, since zero on the wire means
/// "no checksum".
pub fn compute<'a, I>(pseudo_header: &[u8], chunks: I) -> u16
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut sum = OnesComplement::new();
    sum.add_bytes(pseudo_header);
    for chunk in chunks {
        sum.add_bytes(chunk);
    }
    match sum.finish() {
        CHECKSUM_NONE => CHECKSUM_NEG_ZERO,
        ck => ck,
    }
}

/// Verify a received message, checksum field included as received.
pub fn verify<'a, I>(pseudo_header: &[u8], chunks: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut sum = OnesComplement::new();
    sum.add_bytes(pseudo_header);
    for chunk in chunks {
        sum.add_bytes(chunk);
    }
    sum.fold() == 0xFFFF
}

/// IPv4 pseudo-header: src(4) + dst(4) + zero(1) + protocol(1) + length(2)
pub fn ipv4_pseudo_header(src: [u8; 4], dst: [u8; 4], protocol: u8, len: u16) -> [u8; 12] {
    let mut hdr = [0u8; 12];
    hdr[0..4].copy_from_slice(&src);
    hdr[4..8].copy_from_slice(&dst);
    hdr[9] = protocol;
    BigEndian::write_u16(&mut hdr[10..12], len);
    hdr
}

/// IPv6 pseudo-header: src(16) + dst(16) + length(4) + zero(3) + next header(1)
pub fn ipv6_pseudo_header(src: [u8; 16], dst: [u8; 16], next_header: u8, len: u32) -> [u8; 40] {
    let mut hdr = [0u8; 40];
    hdr[0..16].copy_from_slice(&src);
    hdr[16..32].copy_from_slice(&dst);
    BigEndian::write_u32(&mut hdr[32..36], len);
    hdr[39] = next_header;
    hdr
}

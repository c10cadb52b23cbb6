//! Chained packet buffers
//!
//! A [`PacketBuf`] is an owned chain of fixed-capacity [`Block`]s plus the
//! per-packet metadata the IP layer fills in on receive. Each block tracks
//! two windows into its storage:
//!
//! ```text
//! |<- ip hdr ->|<-------- proto (transport message share) -------->|
//!              |<- hdr ->|<------------ data (payload) ----------->|
//!          proto_ix   data_ix                         data_ix + data_len
//! ```
//!
//! The transport header only ever lives in the head block, so `proto_hdr_len`
//! is zero everywhere else. Ownership is single: the layer holding the
//! `PacketBuf` owns the whole chain, and dropping it returns the pool lease.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};

use crate::config::PoolConfig;
use crate::error::{NetError, Result};
use crate::iface::ip::{IfNbr, IpAddr};
use crate::network::ipv4::Ipv4Header;

/// IPv6 fixed header length
pub const IPV6_HEADER_LEN: usize = 40;

bitflags! {
    /// Per-packet flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufFlags: u16 {
        /// Received as a link-layer or IP broadcast
        const RX_BROADCAST = 1 << 0;
        /// Carries an IPv6 datagram
        const IPV6 = 1 << 1;
        /// Transport checksum already validated (in software or by offload)
        const CHECKSUM_VALID = 1 << 2;
    }
}

/// Metadata shared by every block of a chain
#[derive(Debug, Clone)]
pub struct PacketMeta {
    pub if_nbr: IfNbr,
    pub flags: BufFlags,
    /// Offset of the IP header inside the head block
    pub ip_hdr_ix: usize,
    pub ip_hdr_len: usize,
    pub ip_src: IpAddr,
    pub ip_dst: IpAddr,
    pub ip_tos: u8,
    pub ip_ttl: u8,
    /// Flags and fragment offset word of an IPv4 header
    pub ip_flags_frag: u16,
    /// IP protocol / IPv6 next header of the transport message
    pub ip_protocol: u8,
    /// Length of the IP payload, i.e. of the transport message
    pub ip_datagram_len: usize,
    pub src_port: u16,
    pub dst_port: u16,
}

impl PacketMeta {
    pub fn new(if_nbr: IfNbr) -> Self {
        PacketMeta {
            if_nbr,
            flags: BufFlags::empty(),
            ip_hdr_ix: 0,
            ip_hdr_len: 0,
            ip_src: IpAddr::V4([0; 4]),
            ip_dst: IpAddr::V4([0; 4]),
            ip_tos: 0,
            ip_ttl: 0,
            ip_flags_frag: 0,
            ip_protocol: 0,
            ip_datagram_len: 0,
            src_port: 0,
            dst_port: 0,
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.flags.contains(BufFlags::IPV6)
    }
}

/// One fixed-capacity storage block of a chain
#[derive(Debug, Clone)]
pub struct Block {
    storage: Box<[u8]>,
    data_ix: usize,
    data_len: usize,
    proto_ix: usize,
    proto_len: usize,
    proto_hdr_len: usize,
}

impl Block {
    pub fn with_capacity(capacity: usize) -> Self {
        Block {
            storage: vec![0u8; capacity].into_boxed_slice(),
            data_ix: 0,
            data_len: 0,
            proto_ix: 0,
            proto_len: 0,
            proto_hdr_len: 0,
        }
    }

    /// Block holding `bytes`, with both windows starting at `proto_ix`
    fn from_slice(bytes: &[u8], capacity: usize, proto_ix: usize) -> Self {
        let mut block = Block::with_capacity(capacity.max(bytes.len()));
        block.storage[..bytes.len()].copy_from_slice(bytes);
        block.proto_ix = proto_ix;
        block.proto_len = bytes.len() - proto_ix;
        block.data_ix = proto_ix;
        block.data_len = block.proto_len;
        block
    }

    /// Replace the contents with `bytes` at the start of storage, exposed
    /// as message and payload. Panics if `bytes` exceeds the capacity.
    pub fn fill_message(&mut self, bytes: &[u8]) {
        self.storage[..bytes.len()].copy_from_slice(bytes);
        self.proto_ix = 0;
        self.proto_len = bytes.len();
        self.proto_hdr_len = 0;
        self.data_ix = 0;
        self.data_len = bytes.len();
    }

    pub fn data_ix(&self) -> usize {
        self.data_ix
    }

    pub fn data_len(&self) -> usize {
        self.data_len
    }

    pub fn proto_ix(&self) -> usize {
        self.proto_ix
    }

    pub fn proto_len(&self) -> usize {
        self.proto_len
    }

    pub fn proto_hdr_len(&self) -> usize {
        self.proto_hdr_len
    }

    /// Payload window
    pub fn data(&self) -> &[u8] {
        &self.storage[self.data_ix..self.data_ix + self.data_len]
    }

    /// This block's share of the transport message, header included
    pub fn message(&self) -> &[u8] {
        &self.storage[self.proto_ix..self.proto_ix + self.proto_len]
    }

    pub fn message_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.proto_ix..self.proto_ix + self.proto_len]
    }

    /// Mark the first `hdr_len` octets of the message as the transport
    /// header and expose the rest as payload.
    pub fn set_header_len(&mut self, hdr_len: usize) {
        let hdr_len = hdr_len.min(self.proto_len);
        self.proto_hdr_len = hdr_len;
        self.data_ix = self.proto_ix + hdr_len;
        self.data_len = self.proto_len - hdr_len;
    }

    /// Expose the whole message share as payload; used for continuation blocks.
    pub fn clear_header(&mut self) {
        self.set_header_len(0);
    }

    /// Hide the payload entirely; the message window is left intact.
    pub fn clear_data(&mut self) {
        self.data_ix = self.proto_ix + self.proto_hdr_len;
        self.data_len = 0;
    }
}

/// Pool accounting token; dropping it frees the pool slot
#[derive(Debug)]
struct Lease(Arc<AtomicUsize>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An owned chain of blocks making up one packet
#[derive(Debug)]
pub struct PacketBuf {
    blocks: Vec<Block>,
    pub meta: PacketMeta,
    // held for its Drop
    _lease: Option<Lease>,
}

impl PacketBuf {
    /// Build a chain from pre-filled blocks. `blocks` must not be empty.
    pub fn from_blocks(blocks: Vec<Block>, meta: PacketMeta) -> Self {
        debug_assert!(!blocks.is_empty());
        PacketBuf {
            blocks,
            meta,
            _lease: None,
        }
    }

    /// Split a received IPv4 datagram over blocks of `block_size` octets.
    ///
    /// Returns None when the bytes do not hold a well-formed IPv4 header or
    /// when the header does not fit in the first block.
    pub fn from_ipv4_datagram(
        bytes: &[u8],
        block_size: usize,
        if_nbr: IfNbr,
        flags: BufFlags,
    ) -> Option<Self> {
        let header = Ipv4Header::from_bytes(bytes)?;
        let hdr_len = header.header_len();
        let total_len = header.total_len as usize;
        if hdr_len < 20 || total_len < hdr_len || total_len > bytes.len() {
            return None;
        }
        let bytes = &bytes[..total_len];
        if block_size <= hdr_len && total_len > hdr_len {
            return None;
        }

        let mut meta = PacketMeta::new(if_nbr);
        meta.flags = flags - BufFlags::IPV6;
        meta.ip_hdr_ix = 0;
        meta.ip_hdr_len = hdr_len;
        meta.ip_src = IpAddr::V4(header.src_addr);
        meta.ip_dst = IpAddr::V4(header.dst_addr);
        meta.ip_tos = header.tos;
        meta.ip_ttl = header.ttl;
        meta.ip_flags_frag = header.flags_frag_offset;
        meta.ip_protocol = header.protocol;
        meta.ip_datagram_len = total_len - hdr_len;

        Some(Self::split(bytes, hdr_len, block_size, meta))
    }

    /// Split a received IPv6 datagram (no extension headers) over blocks.
    pub fn from_ipv6_datagram(
        bytes: &[u8],
        block_size: usize,
        if_nbr: IfNbr,
        flags: BufFlags,
    ) -> Option<Self> {
        if bytes.len() < IPV6_HEADER_LEN || bytes[0] >> 4 != 6 {
            return None;
        }
        let payload_len = BigEndian::read_u16(&bytes[4..6]) as usize;
        let total_len = IPV6_HEADER_LEN + payload_len;
        if total_len > bytes.len() || (block_size <= IPV6_HEADER_LEN && payload_len > 0) {
            return None;
        }
        let bytes = &bytes[..total_len];

        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src.copy_from_slice(&bytes[8..24]);
        dst.copy_from_slice(&bytes[24..40]);

        let mut meta = PacketMeta::new(if_nbr);
        meta.flags = flags | BufFlags::IPV6;
        meta.ip_hdr_ix = 0;
        meta.ip_hdr_len = IPV6_HEADER_LEN;
        meta.ip_src = IpAddr::V6(src);
        meta.ip_dst = IpAddr::V6(dst);
        meta.ip_tos = ((BigEndian::read_u16(&bytes[0..2]) >> 4) & 0xFF) as u8;
        meta.ip_ttl = bytes[7];
        meta.ip_protocol = bytes[6];
        meta.ip_datagram_len = payload_len;

        Some(Self::split(bytes, IPV6_HEADER_LEN, block_size, meta))
    }

    fn split(bytes: &[u8], hdr_len: usize, block_size: usize, meta: PacketMeta) -> Self {
        let head_end = bytes.len().min(block_size.max(hdr_len));
        let mut blocks = vec![Block::from_slice(&bytes[..head_end], block_size, hdr_len)];
        for chunk in bytes[head_end..].chunks(block_size) {
            blocks.push(Block::from_slice(chunk, block_size, 0));
        }
        Self::from_blocks(blocks, meta)
    }

    pub fn head(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn head_mut(&mut self) -> &mut Block {
        &mut self.blocks[0]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    /// Continuation blocks after the head
    pub fn tail_mut(&mut self) -> &mut [Block] {
        &mut self.blocks[1..]
    }

    /// Payload octets across the whole chain
    pub fn total_len(&self) -> usize {
        self.blocks.iter().map(|b| b.data_len).sum()
    }

    /// Transport message octets across the whole chain
    pub fn message_len(&self) -> usize {
        self.blocks.iter().map(|b| b.proto_len).sum()
    }

    pub fn payload_chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.blocks.iter().map(Block::data)
    }

    pub fn message_chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.blocks.iter().map(Block::message)
    }

    pub fn payload_bytes(&self) -> Vec<u8> {
        self.payload_chunks().flatten().copied().collect()
    }

    pub fn message_bytes(&self) -> Vec<u8> {
        self.message_chunks().flatten().copied().collect()
    }

    /// Copy transport message octets starting at `offset` into `out`,
    /// returning how many were copied.
    pub fn copy_message(&self, mut offset: usize, out: &mut [u8]) -> usize {
        let mut copied = 0;
        for chunk in self.message_chunks() {
            if copied == out.len() {
                break;
            }
            if offset >= chunk.len() {
                offset -= chunk.len();
                continue;
            }
            let chunk = &chunk[offset..];
            offset = 0;
            let n = chunk.len().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
        }
        copied
    }

    /// The IP header as received, if still present in the head block
    pub fn ip_header(&self) -> Option<&[u8]> {
        let start = self.meta.ip_hdr_ix;
        self.blocks[0]
            .storage
            .get(start..start + self.meta.ip_hdr_len)
            .filter(|hdr| !hdr.is_empty())
    }
}

/// Source of transmit buffers
pub trait BufferPool: Send + Sync {
    /// Lease a buffer whose `size`-octet transport message starts at
    /// `header_ix`, leaving `header_ix` octets of room for lower layers.
    fn acquire(&self, if_nbr: IfNbr, size: usize, header_ix: usize) -> Result<PacketBuf>;

    /// Largest message a single buffer can hold after `header_ix` octets of room
    fn max_size(&self, header_ix: usize) -> usize;
}

/// Heap-backed pool with a cap on outstanding buffers
#[derive(Debug)]
pub struct HeapPool {
    block_size: usize,
    max_buffers: usize,
    outstanding: Arc<AtomicUsize>,
}

impl HeapPool {
    pub fn new(block_size: usize, max_buffers: usize) -> Self {
        HeapPool {
            block_size,
            max_buffers,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.block_size, config.max_buffers)
    }

    /// Buffers leased and not yet dropped
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl BufferPool for HeapPool {
    fn acquire(&self, if_nbr: IfNbr, size: usize, header_ix: usize) -> Result<PacketBuf> {
        let capacity = self.max_size(header_ix);
        if size > capacity {
            return Err(NetError::BufferTooSmall {
                requested: size,
                capacity,
            });
        }

        let max = self.max_buffers;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < max {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map_err(|_| NetError::BufferExhausted)?;
        let lease = Lease(self.outstanding.clone());

        let mut block = Block::with_capacity(self.block_size);
        block.proto_ix = header_ix;
        block.proto_len = size;
        block.data_ix = header_ix;
        block.data_len = size;

        Ok(PacketBuf {
            blocks: vec![block],
            meta: PacketMeta::new(if_nbr),
            _lease: Some(lease),
        })
    }

    fn max_size(&self, header_ix: usize) -> usize {
        self.block_size.saturating_sub(header_ix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ipv4::{protocol, Ipv4Utils};

    fn udp_datagram(payload_len: usize) -> Vec<u8> {
        let header = Ipv4Header::new_simple(protocol::UDP, [10, 0, 0, 1], [10, 0, 0, 2], 0);
        let payload: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
        Ipv4Utils::create_packet_with_payload(&header, &payload)
    }

    #[test]
    fn single_block_datagram_windows() {
        let bytes = udp_datagram(12);
        let buf = PacketBuf::from_ipv4_datagram(&bytes, 256, 3, BufFlags::empty()).unwrap();
        assert_eq!(buf.blocks().len(), 1);
        assert_eq!(buf.meta.if_nbr, 3);
        assert_eq!(buf.meta.ip_datagram_len, 12);
        assert_eq!(buf.head().proto_ix(), 20);
        assert_eq!(buf.total_len(), 12);
        assert_eq!(buf.ip_header().unwrap(), &bytes[..20]);
    }

    #[test]
    fn datagram_is_split_over_chain() {
        let bytes = udp_datagram(100);
        let buf = PacketBuf::from_ipv4_datagram(&bytes, 48, 0, BufFlags::empty()).unwrap();
        // 120 octets: 48 in the head (20 of them IP header), then 48 + 24
        assert_eq!(buf.blocks().len(), 3);
        assert_eq!(buf.head().proto_len(), 28);
        assert_eq!(buf.blocks()[2].proto_len(), 24);
        assert_eq!(buf.total_len(), 100);
        assert_eq!(buf.message_bytes(), bytes[20..].to_vec());
    }

    #[test]
    fn link_padding_is_dropped() {
        let mut bytes = udp_datagram(4);
        bytes.extend_from_slice(&[0xAA; 10]);
        let buf = PacketBuf::from_ipv4_datagram(&bytes, 256, 0, BufFlags::empty()).unwrap();
        assert_eq!(buf.message_len(), 4);
    }

    #[test]
    fn short_datagram_is_rejected() {
        let bytes = udp_datagram(8);
        assert!(PacketBuf::from_ipv4_datagram(&bytes[..24], 256, 0, BufFlags::empty()).is_none());
    }

    #[test]
    fn copy_message_crosses_blocks() {
        let bytes = udp_datagram(100);
        let buf = PacketBuf::from_ipv4_datagram(&bytes, 48, 0, BufFlags::empty()).unwrap();
        let mut out = [0u8; 30];
        assert_eq!(buf.copy_message(20, &mut out), 30);
        assert_eq!(&out[..], &bytes[40..70]);

        let mut tail = [0u8; 16];
        assert_eq!(buf.copy_message(90, &mut tail), 10);
    }

    #[test]
    fn header_len_moves_data_window() {
        let bytes = udp_datagram(16);
        let mut buf = PacketBuf::from_ipv4_datagram(&bytes, 256, 0, BufFlags::empty()).unwrap();
        buf.head_mut().set_header_len(8);
        assert_eq!(buf.head().data_ix(), 28);
        assert_eq!(buf.total_len(), 8);
        buf.head_mut().clear_data();
        assert_eq!(buf.total_len(), 0);
        assert_eq!(buf.message_len(), 16);
    }

    #[test]
    fn ipv6_datagram_metadata() {
        let mut bytes = vec![0u8; IPV6_HEADER_LEN + 8];
        bytes[0] = 0x60;
        BigEndian::write_u16(&mut bytes[4..6], 8);
        bytes[6] = 17;
        bytes[7] = 255;
        bytes[23] = 1;
        bytes[39] = 2;
        let buf = PacketBuf::from_ipv6_datagram(&bytes, 256, 0, BufFlags::empty()).unwrap();
        assert!(buf.meta.is_ipv6());
        assert_eq!(buf.meta.ip_protocol, 17);
        assert_eq!(buf.meta.ip_datagram_len, 8);
        assert_eq!(buf.head().proto_ix(), IPV6_HEADER_LEN);
    }

    #[test]
    fn pool_leases_are_returned_on_drop() {
        let pool = HeapPool::new(128, 2);
        let a = pool.acquire(0, 64, 40).unwrap();
        let b = pool.acquire(0, 64, 40).unwrap();
        assert!(matches!(pool.acquire(0, 8, 0), Err(NetError::BufferExhausted)));
        assert_eq!(pool.outstanding(), 2);
        drop(a);
        assert_eq!(pool.outstanding(), 1);
        drop(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn pool_rejects_oversized_request() {
        let pool = HeapPool::new(128, 2);
        let err = pool.acquire(0, 100, 40).unwrap_err();
        assert!(matches!(
            err,
            NetError::BufferTooSmall {
                requested: 100,
                capacity: 88
            }
        ));
        assert_eq!(pool.outstanding(), 0);
    }
}

//! ICMPv4 engine
//!
//! Receive: validate a message handed up by the IP layer, classify it as a
//! request, reply or error, and dispatch it (answer requests, route echo
//! replies to the [`EchoTracker`], count errors). Malformed messages are
//! counted and dropped, never reported to the caller as errors.
//!
//! Transmit: echo, timestamp and address-mask requests, replies to received
//! requests, and error messages about datagrams received by other layers.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};

use crate::buf::{BufFlags, BufferPool, PacketBuf};
use crate::config::IcmpConfig;
use crate::error::{Discard, NetError, Result, SuppressReason};
use crate::iface::ip::{IpAddr, IpLayer, Ipv4TxOptions, Protocol};
use crate::network::checksum::{self, OnesComplement};
use crate::network::echo::{EchoReply, EchoTracker};
use crate::network::icmp::{
    is_error_type, IcmpHeader, IcmpKind, MsgClass, RequestKind,
    ICMP_ERROR_DATA_MIN, ICMP_HEADER_LEN, ICMP_HEADER_LEN_ERROR, ICMP_TYPE_ADDR_MASK_REPLY,
    ICMP_TYPE_ADDR_MASK_REQUEST, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST,
    ICMP_TYPE_TIMESTAMP_REPLY, ICMP_TYPE_TIMESTAMP_REQUEST,
};
use crate::network::ipv4::{addr, flags, protocol};
use crate::stats::IcmpStats;

const MS_PER_DAY: u128 = 86_400_000;

/// Timestamp field offsets inside a timestamp message
const TS_ORIGINATE: usize = 8;
const TS_RECEIVE: usize = 12;
const TS_TRANSMIT: usize = 16;

/// Outcome of [`Icmpv4::rx`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpRx {
    Accepted(IcmpKind),
    Discarded(Discard),
}

/// Milliseconds since midnight UT, the unit of ICMP timestamps
pub fn ms_since_midnight_ut() -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_millis() % MS_PER_DAY) as u32
}

pub struct Icmpv4 {
    ip: Arc<dyn IpLayer>,
    pool: Arc<dyn BufferPool>,
    tracker: Arc<EchoTracker>,
    config: IcmpConfig,
    stats: IcmpStats,
    clock: fn() -> u32,
}

impl Icmpv4 {
    pub fn new(
        ip: Arc<dyn IpLayer>,
        pool: Arc<dyn BufferPool>,
        tracker: Arc<EchoTracker>,
        config: IcmpConfig,
    ) -> Self {
        Icmpv4 {
            ip,
            pool,
            tracker,
            config: config.normalize(),
            stats: IcmpStats::default(),
            clock: ms_since_midnight_ut,
        }
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: fn() -> u32) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> &IcmpStats {
        &self.stats
    }

    pub fn tracker(&self) -> &Arc<EchoTracker> {
        &self.tracker
    }

    /// Process a received ICMP message. The buffer is consumed.
    pub fn rx(&self, mut buf: PacketBuf) -> IcmpRx {
        let rx_time = (self.clock)();
        self.stats.rx_msgs.inc();

        let kind = match self.validate(&mut buf) {
            Ok(kind) => kind,
            Err(reason) => return self.discard(reason),
        };
        log::trace!(
            "icmp rx {:?} from {} len={}",
            kind,
            buf.meta.ip_src,
            buf.message_len()
        );

        match kind.class() {
            MsgClass::Request => {
                self.stats.rx_requests.inc();
                let enabled = match kind {
                    IcmpKind::EchoRequest => self.config.echo_reply,
                    IcmpKind::TimestampRequest => self.config.timestamp_reply,
                    _ => false,
                };
                if !enabled {
                    return self.discard(Discard::ReplyDisabled);
                }
                if let Err(err) = self.tx_reply(&buf, kind, rx_time) {
                    log::warn!("icmp reply to {} failed: {}", buf.meta.ip_src, err);
                }
            }
            MsgClass::Reply => {
                self.stats.rx_replies.inc();
                if kind != IcmpKind::EchoReply {
                    return self.discard(Discard::ReplyUnsupported);
                }
                let Some(hdr) = IcmpHeader::from_bytes(buf.head().message()) else {
                    return self.discard(Discard::Truncated);
                };
                let data = buf.payload_bytes();
                if self
                    .tracker
                    .on_echo_reply(hdr.identifier(), hdr.sequence(), &data)
                    .is_err()
                {
                    return self.discard(Discard::ReplyUnmatched);
                }
            }
            MsgClass::Error => {
                self.stats.rx_errors.inc();
                log::debug!(
                    "icmp error {:?} from {} (not raised to upper layers)",
                    kind,
                    buf.meta.ip_src
                );
            }
        }

        IcmpRx::Accepted(kind)
    }

    fn discard(&self, reason: Discard) -> IcmpRx {
        self.stats.discard(reason);
        log::debug!("icmp rx discarded: {}", reason);
        IcmpRx::Discarded(reason)
    }

    /// Validate a received message and set its windows: the payload window
    /// covers the echo data, and is empty for every other type.
    fn validate(&self, buf: &mut PacketBuf) -> std::result::Result<IcmpKind, Discard> {
        if buf.meta.is_ipv6() {
            return Err(Discard::UnsupportedProtocol(buf.meta.ip_protocol));
        }
        if buf.meta.flags.contains(BufFlags::RX_BROADCAST) || buf.meta.ip_dst.is_limited_broadcast()
        {
            return Err(Discard::RxBroadcast);
        }
        if buf.meta.ip_dst.is_multicast() {
            return Err(Discard::RxMulticast);
        }

        let msg_len = buf.message_len();
        let hdr = IcmpHeader::from_bytes(buf.head().message()).ok_or(if msg_len < ICMP_HEADER_LEN {
            Discard::InvalidLength { len: msg_len }
        } else {
            Discard::Truncated
        })?;
        let kind = IcmpKind::classify(hdr.msg_type, hdr.msg_code)?;

        let (min, max) = kind.len_bounds();
        if msg_len < min || max.is_some_and(|max| msg_len > max) {
            return Err(Discard::InvalidLength { len: msg_len });
        }
        let hdr_len = kind.header_len();
        if buf.head().proto_len() < hdr_len {
            return Err(Discard::Truncated);
        }

        if matches!(kind, IcmpKind::ParameterProblem(_)) {
            Self::validate_pointer(buf, hdr.pointer(), msg_len)?;
        }

        if !cfg!(feature = "icmp-checksum-offload")
            && !buf.meta.flags.contains(BufFlags::CHECKSUM_VALID)
        {
            if !checksum::verify(&[], buf.message_chunks()) {
                return Err(Discard::InvalidChecksum);
            }
            buf.meta.flags |= BufFlags::CHECKSUM_VALID;
        }

        buf.head_mut().set_header_len(hdr_len);
        if kind.carries_data() {
            buf.tail_mut().iter_mut().for_each(|b| b.clear_header());
        } else {
            buf.blocks_mut().iter_mut().for_each(|b| b.clear_data());
        }
        Ok(kind)
    }

    /// The pointer indexes the ICMP message. It must land past the error
    /// header and inside the embedded IP header; pointers into the embedded
    /// transport header are not supported.
    fn validate_pointer(
        buf: &PacketBuf,
        ptr: u8,
        msg_len: usize,
    ) -> std::result::Result<(), Discard> {
        let ptr_ix = ptr as usize;
        if ptr_ix < ICMP_HEADER_LEN_ERROR || ptr_ix >= msg_len {
            return Err(Discard::InvalidPointer(ptr));
        }
        let mut vhl = [0u8; 1];
        if buf.copy_message(ICMP_HEADER_LEN_ERROR, &mut vhl) != 1 {
            return Err(Discard::InvalidPointer(ptr));
        }
        let embedded_hdr_len = (vhl[0] & 0x0F) as usize * 4;
        if ptr_ix >= ICMP_HEADER_LEN_ERROR + embedded_hdr_len {
            return Err(Discard::InvalidPointer(ptr));
        }
        Ok(())
    }

    /// Answer a validated request with source and destination swapped
    fn tx_reply(&self, req: &PacketBuf, kind: IcmpKind, rx_time: u32) -> Result<()> {
        let (src, dst) = match (req.meta.ip_dst.as_v4(), req.meta.ip_src.as_v4()) {
            (Some(src), Some(dst)) => (src, dst),
            _ => return Err(NetError::NoSourceAddress),
        };
        let reply_type = match kind {
            IcmpKind::EchoRequest => ICMP_TYPE_ECHO_REPLY,
            IcmpKind::TimestampRequest => ICMP_TYPE_TIMESTAMP_REPLY,
            _ => return Err(NetError::InvalidArgument("not a request")),
        };

        let if_nbr = req.meta.if_nbr;
        let room = self.ip.tx_header_room(if_nbr);
        let max = self
            .ip
            .mtu(if_nbr, Protocol::Icmpv4)
            .min(self.pool.max_size(room));
        let msg_len = req.message_len();
        let reply_len = if kind.carries_data() {
            msg_len.min(max)
        } else if msg_len > max {
            return Err(NetError::MtuExceeded { len: msg_len, max });
        } else {
            msg_len
        };
        if reply_len < msg_len {
            log::debug!("echo reply truncated from {} to {}", msg_len, reply_len);
        }

        let mut buf = self.pool.acquire(if_nbr, reply_len, room)?;
        {
            let msg = buf.head_mut().message_mut();
            req.copy_message(0, msg);
            msg[0] = reply_type;
            if reply_type == ICMP_TYPE_TIMESTAMP_REPLY {
                BigEndian::write_u32(&mut msg[TS_RECEIVE..TS_RECEIVE + 4], rx_time);
                BigEndian::write_u32(&mut msg[TS_TRANSMIT..TS_TRANSMIT + 4], (self.clock)());
            }
            install_checksum(msg);
        }

        let opts = Ipv4TxOptions {
            tos: req.meta.ip_tos,
            ttl: self.config.default_ttl,
            dont_fragment: false,
        };
        self.transmit(buf, src, dst, opts)?;
        self.stats.tx_replies.inc();
        Ok(())
    }

    /// Send a request with the next global sequence number, returning it
    pub fn tx_request(&self, kind: RequestKind, dst: [u8; 4], id: u16, data: &[u8]) -> Result<u16> {
        let sequence = self.tracker.next_sequence();
        self.tx_request_seq(kind, dst, id, sequence, data)?;
        Ok(sequence)
    }

    fn tx_request_seq(
        &self,
        kind: RequestKind,
        dst: [u8; 4],
        id: u16,
        sequence: u16,
        data: &[u8],
    ) -> Result<()> {
        if kind != RequestKind::Echo && !data.is_empty() {
            return Err(NetError::InvalidArgument(
                "timestamp and address-mask requests carry no data",
            ));
        }
        let route = self
            .ip
            .source_for(&IpAddr::V4(dst))
            .ok_or(NetError::NoSourceAddress)?;
        let src = route.src.as_v4().ok_or(NetError::NoSourceAddress)?;

        let hdr_len = kind.header_len();
        let len = hdr_len + data.len();
        let max = self.ip.mtu(route.if_nbr, Protocol::Icmpv4);
        if len > max {
            return Err(NetError::MtuExceeded { len, max });
        }

        let room = self.ip.tx_header_room(route.if_nbr);
        let mut buf = self.pool.acquire(route.if_nbr, len, room)?;
        {
            let msg = buf.head_mut().message_mut();
            msg[..hdr_len].fill(0);
            let mut hdr = IcmpHeader::new(kind.msg_type(), 0);
            hdr.set_identifier(id);
            hdr.set_sequence(sequence);
            hdr.write(msg);
            if kind == RequestKind::Timestamp {
                BigEndian::write_u32(&mut msg[TS_ORIGINATE..TS_ORIGINATE + 4], (self.clock)());
            }
            msg[hdr_len..].copy_from_slice(data);
            install_checksum(msg);
        }

        let opts = Ipv4TxOptions {
            tos: 0,
            ttl: self.config.default_ttl,
            dont_fragment: false,
        };
        self.transmit(buf, src, dst, opts)?;
        self.stats.tx_requests.inc();
        log::info!(
            "icmp {:?} request id={} seq={} to {}",
            kind,
            id,
            sequence,
            IpAddr::V4(dst)
        );
        Ok(())
    }

    /// Ping `dst` and block until the reply or `timeout`
    pub fn echo_request(
        &self,
        dst: [u8; 4],
        id: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<EchoReply> {
        self.tracker.send_echo_request(id, data, timeout, |sequence| {
            self.tx_request_seq(RequestKind::Echo, dst, id, sequence, data)
        })
    }

    /// Report a problem with `offending`, a datagram received by this host,
    /// back to its source. `pointer` is only used for Parameter Problem.
    pub fn tx_error(&self, offending: &PacketBuf, kind: IcmpKind, pointer: u8) -> Result<()> {
        if kind.class() != MsgClass::Error {
            return Err(NetError::InvalidArgument("not an ICMP error type"));
        }
        if let Err(reason) = Self::error_allowed(offending) {
            self.stats.tx_suppressed.inc();
            log::debug!(
                "icmp {:?} to {} suppressed: {}",
                kind,
                offending.meta.ip_src,
                reason
            );
            return Err(NetError::ErrorSuppressed(reason));
        }

        let ip_hdr = offending
            .ip_header()
            .ok_or(NetError::InvalidArgument("offending datagram has no IP header"))?;
        let dst = offending
            .meta
            .ip_src
            .as_v4()
            .ok_or(NetError::InvalidArgument("ICMPv4 error for a non-IPv4 datagram"))?;
        let route = self
            .ip
            .source_for(&IpAddr::V4(dst))
            .ok_or(NetError::NoSourceAddress)?;
        let src = route.src.as_v4().ok_or(NetError::NoSourceAddress)?;

        let room = self.ip.tx_header_room(route.if_nbr);
        let max = self
            .ip
            .mtu(route.if_nbr, Protocol::Icmpv4)
            .min(self.pool.max_size(room));
        let body_avail = offending.message_len();
        let fixed = ICMP_HEADER_LEN_ERROR + ip_hdr.len();
        let body_min = body_avail.min(ICMP_ERROR_DATA_MIN);
        if fixed + body_min > max {
            return Err(NetError::MtuExceeded {
                len: fixed + body_min,
                max,
            });
        }
        let body_len = body_avail
            .min(self.config.error_data_octets)
            .min(max - fixed);

        let mut buf = self.pool.acquire(route.if_nbr, fixed + body_len, room)?;
        {
            let msg = buf.head_mut().message_mut();
            let mut hdr = IcmpHeader::new(kind.msg_type(), kind.code());
            if matches!(kind, IcmpKind::ParameterProblem(_)) {
                hdr.set_pointer(pointer);
            }
            hdr.write(msg);
            msg[ICMP_HEADER_LEN_ERROR..fixed].copy_from_slice(ip_hdr);
            offending.copy_message(0, &mut msg[fixed..]);
            install_checksum(msg);
        }

        let opts = Ipv4TxOptions {
            tos: 0,
            ttl: self.config.default_ttl,
            dont_fragment: false,
        };
        self.transmit(buf, src, dst, opts)?;
        self.stats.tx_errors.inc();
        log::debug!("icmp {:?} sent to {}", kind, IpAddr::V4(dst));
        Ok(())
    }

    /// Rules under which no ICMP error may be generated (RFC 1122 3.2.2)
    fn error_allowed(offending: &PacketBuf) -> std::result::Result<(), SuppressReason> {
        let meta = &offending.meta;
        if meta.flags.contains(BufFlags::RX_BROADCAST) || meta.ip_dst.is_limited_broadcast() {
            return Err(SuppressReason::Broadcast);
        }
        if meta.ip_dst.is_multicast() {
            return Err(SuppressReason::Multicast);
        }
        match meta.ip_src.as_v4() {
            Some(src) if addr::is_valid_host_source(src) => {}
            _ => return Err(SuppressReason::InvalidSource),
        }
        if flags::fragment_offset(meta.ip_flags_frag) != 0 {
            return Err(SuppressReason::NonInitialFragment);
        }
        if meta.ip_protocol == protocol::ICMP {
            let mut msg_type = [0u8; 1];
            if offending.copy_message(0, &mut msg_type) != 1 {
                return Err(SuppressReason::UnsupportedType);
            }
            match msg_type[0] {
                t if is_error_type(t) => return Err(SuppressReason::ErrorForError),
                ICMP_TYPE_ECHO_REPLY
                | ICMP_TYPE_ECHO_REQUEST
                | ICMP_TYPE_TIMESTAMP_REQUEST
                | ICMP_TYPE_TIMESTAMP_REPLY
                | ICMP_TYPE_ADDR_MASK_REQUEST
                | ICMP_TYPE_ADDR_MASK_REPLY => {}
                _ => return Err(SuppressReason::UnsupportedType),
            }
        }
        Ok(())
    }

    fn transmit(&self, mut buf: PacketBuf, src: [u8; 4], dst: [u8; 4], opts: Ipv4TxOptions) -> Result<()> {
        buf.meta.ip_protocol = protocol::ICMP;
        buf.meta.ip_src = IpAddr::V4(src);
        buf.meta.ip_dst = IpAddr::V4(dst);
        match self.ip.tx_ipv4(buf, src, dst, opts) {
            Ok(()) => {
                self.stats.tx_msgs.inc();
                Ok(())
            }
            Err(err) => {
                self.stats.tx_failed.inc();
                log::warn!("icmp transmit to {} failed: {}", IpAddr::V4(dst), err);
                Err(err)
            }
        }
    }
}

/// Compute the checksum over a complete message and store it at octets 2..4
fn install_checksum(msg: &mut [u8]) {
    msg[2] = 0;
    msg[3] = 0;
    if cfg!(feature = "icmp-checksum-offload") {
        return;
    }
    let mut sum = OnesComplement::new();
    sum.add_bytes(msg);
    BigEndian::write_u16(&mut msg[2..4], sum.finish());
}

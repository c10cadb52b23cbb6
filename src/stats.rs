//! Protocol statistics counters
//!
//! Counters are plain atomics so the engines can bump them from any thread
//! without taking the ICMP lock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Discard;

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// ICMPv4 receive/transmit counters
#[derive(Debug, Default)]
pub struct IcmpStats {
    pub rx_msgs: Counter,
    pub rx_requests: Counter,
    pub rx_replies: Counter,
    pub rx_errors: Counter,
    pub rx_discards: Counter,
    pub rx_inv_broadcast: Counter,
    pub rx_inv_multicast: Counter,
    pub rx_inv_type: Counter,
    pub rx_inv_code: Counter,
    pub rx_inv_len: Counter,
    pub rx_inv_ptr: Counter,
    pub rx_inv_checksum: Counter,
    pub rx_inv_echo_reply: Counter,
    pub tx_msgs: Counter,
    pub tx_requests: Counter,
    pub tx_replies: Counter,
    pub tx_errors: Counter,
    pub tx_suppressed: Counter,
    pub tx_failed: Counter,
}

/// Point-in-time copy of [`IcmpStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IcmpStatsSnapshot {
    pub rx_msgs: u64,
    pub rx_requests: u64,
    pub rx_replies: u64,
    pub rx_errors: u64,
    pub rx_discards: u64,
    pub rx_inv_checksum: u64,
    pub rx_inv_echo_reply: u64,
    pub tx_msgs: u64,
    pub tx_requests: u64,
    pub tx_replies: u64,
    pub tx_errors: u64,
    pub tx_suppressed: u64,
    pub tx_failed: u64,
}

impl IcmpStats {
    /// Count a discarded packet under its reason
    pub fn discard(&self, reason: Discard) {
        self.rx_discards.inc();
        match reason {
            Discard::RxBroadcast => self.rx_inv_broadcast.inc(),
            Discard::RxMulticast => self.rx_inv_multicast.inc(),
            Discard::InvalidType(_) | Discard::ReplyUnsupported => self.rx_inv_type.inc(),
            Discard::InvalidCode { .. } => self.rx_inv_code.inc(),
            Discard::InvalidLength { .. } | Discard::Truncated => self.rx_inv_len.inc(),
            Discard::InvalidPointer(_) => self.rx_inv_ptr.inc(),
            Discard::InvalidChecksum => self.rx_inv_checksum.inc(),
            Discard::ReplyUnmatched => self.rx_inv_echo_reply.inc(),
            _ => {}
        }
    }

    pub fn snapshot(&self) -> IcmpStatsSnapshot {
        IcmpStatsSnapshot {
            rx_msgs: self.rx_msgs.get(),
            rx_requests: self.rx_requests.get(),
            rx_replies: self.rx_replies.get(),
            rx_errors: self.rx_errors.get(),
            rx_discards: self.rx_discards.get(),
            rx_inv_checksum: self.rx_inv_checksum.get(),
            rx_inv_echo_reply: self.rx_inv_echo_reply.get(),
            tx_msgs: self.tx_msgs.get(),
            tx_requests: self.tx_requests.get(),
            tx_replies: self.tx_replies.get(),
            tx_errors: self.tx_errors.get(),
            tx_suppressed: self.tx_suppressed.get(),
            tx_failed: self.tx_failed.get(),
        }
    }
}

/// UDP receive/transmit counters
#[derive(Debug, Default)]
pub struct UdpStats {
    pub rx_datagrams: Counter,
    pub rx_delivered: Counter,
    pub rx_unclaimed: Counter,
    pub rx_discards: Counter,
    pub rx_inv_port: Counter,
    pub rx_inv_len: Counter,
    pub rx_inv_checksum: Counter,
    /// Zero-checksum datagrams accepted
    pub rx_no_checksum: Counter,
    /// Zero-checksum datagrams refused
    pub rx_inv_no_checksum: Counter,
    pub tx_datagrams: Counter,
    pub tx_failed: Counter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpStatsSnapshot {
    pub rx_datagrams: u64,
    pub rx_delivered: u64,
    pub rx_unclaimed: u64,
    pub rx_discards: u64,
    pub rx_inv_port: u64,
    pub rx_inv_len: u64,
    pub rx_inv_checksum: u64,
    pub rx_no_checksum: u64,
    pub rx_inv_no_checksum: u64,
    pub tx_datagrams: u64,
    pub tx_failed: u64,
}

impl UdpStats {
    pub fn discard(&self, reason: Discard) {
        self.rx_discards.inc();
        match reason {
            Discard::InvalidPort => self.rx_inv_port.inc(),
            Discard::InvalidLength { .. } | Discard::Truncated => self.rx_inv_len.inc(),
            Discard::InvalidChecksum => self.rx_inv_checksum.inc(),
            Discard::MissingChecksum => self.rx_inv_no_checksum.inc(),
            _ => {}
        }
    }

    pub fn snapshot(&self) -> UdpStatsSnapshot {
        UdpStatsSnapshot {
            rx_datagrams: self.rx_datagrams.get(),
            rx_delivered: self.rx_delivered.get(),
            rx_unclaimed: self.rx_unclaimed.get(),
            rx_discards: self.rx_discards.get(),
            rx_inv_port: self.rx_inv_port.get(),
            rx_inv_len: self.rx_inv_len.get(),
            rx_inv_checksum: self.rx_inv_checksum.get(),
            rx_no_checksum: self.rx_no_checksum.get(),
            rx_inv_no_checksum: self.rx_inv_no_checksum.get(),
            tx_datagrams: self.tx_datagrams.get(),
            tx_failed: self.tx_failed.get(),
        }
    }
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use parking_lot::Mutex;

use toy_transport::buf::{BufFlags, HeapPool, PacketBuf};
use toy_transport::config::StackConfig;
use toy_transport::iface::{IfNbr, IpAddr, IpLayer, Ipv4TxOptions, Ipv6TxOptions, Protocol, Route};
use toy_transport::network::checksum::checksum;
use toy_transport::network::ipv4::{Ipv4Header, Ipv4Utils};
use toy_transport::{NetError, NetStack, Result};

pub const LOCAL: [u8; 4] = [10, 0, 0, 2];
pub const PEER: [u8; 4] = [10, 0, 0, 1];
pub const LOCAL_V6: [u8; 16] = [0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
pub const PEER_V6: [u8; 16] = [0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
pub const BLOCK_SIZE: usize = 1536;

/// A message handed to the mock IP layer
#[derive(Debug, Clone)]
pub struct Sent {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    pub tos: u8,
    pub ttl: u8,
    pub message: Vec<u8>,
}

pub struct MockIp {
    tx: Mutex<mpsc::Sender<Sent>>,
    fail: AtomicBool,
    mtu: usize,
}

impl MockIp {
    pub fn new(mtu: usize) -> (Arc<Self>, mpsc::Receiver<Sent>) {
        let (tx, rx) = mpsc::channel();
        let ip = Arc::new(MockIp {
            tx: Mutex::new(tx),
            fail: AtomicBool::new(false),
            mtu,
        });
        (ip, rx)
    }

    /// Make every transmit fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, sent: Sent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NetError::Transmit("link down".into()));
        }
        self.tx
            .lock()
            .send(sent)
            .map_err(|e| NetError::Transmit(e.to_string()))
    }
}

impl IpLayer for MockIp {
    fn tx_ipv4(&self, buf: PacketBuf, src: [u8; 4], dst: [u8; 4], opts: Ipv4TxOptions) -> Result<()> {
        self.record(Sent {
            src: IpAddr::V4(src),
            dst: IpAddr::V4(dst),
            protocol: buf.meta.ip_protocol,
            tos: opts.tos,
            ttl: opts.ttl,
            message: buf.message_bytes(),
        })
    }

    fn tx_ipv6(&self, buf: PacketBuf, src: [u8; 16], dst: [u8; 16], opts: Ipv6TxOptions) -> Result<()> {
        self.record(Sent {
            src: IpAddr::V6(src),
            dst: IpAddr::V6(dst),
            protocol: buf.meta.ip_protocol,
            tos: opts.traffic_class,
            ttl: opts.hop_limit,
            message: buf.message_bytes(),
        })
    }

    fn source_for(&self, dst: &IpAddr) -> Option<Route> {
        let src = match dst {
            IpAddr::V4([0, 0, 0, 0]) => return None,
            IpAddr::V4(_) => IpAddr::V4(LOCAL),
            IpAddr::V6(_) => IpAddr::V6(LOCAL_V6),
        };
        Some(Route { if_nbr: 0, src })
    }

    fn mtu(&self, _if_nbr: IfNbr, _protocol: Protocol) -> usize {
        self.mtu
    }

    fn tx_header_room(&self, _if_nbr: IfNbr) -> usize {
        40
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Harness {
    pub stack: Arc<NetStack>,
    pub ip: Arc<MockIp>,
    pub sent: mpsc::Receiver<Sent>,
    pub pool: Arc<HeapPool>,
}

pub fn harness_with(config: StackConfig, mtu: usize) -> Harness {
    init_logger();
    let (ip, sent) = MockIp::new(mtu);
    let pool = Arc::new(HeapPool::new(BLOCK_SIZE, 16));
    let stack = Arc::new(NetStack::new(ip.clone(), pool.clone(), &config));
    Harness {
        stack,
        ip,
        sent,
        pool,
    }
}

pub fn harness() -> Harness {
    harness_with(StackConfig::default(), 1480)
}

impl Harness {
    pub fn drain(&self) -> Vec<Sent> {
        self.sent.try_iter().collect()
    }
}

/// Wrap `payload` in an IPv4 datagram and split it like a receive path would
pub fn ipv4_datagram(
    protocol: u8,
    src: [u8; 4],
    dst: [u8; 4],
    payload: &[u8],
    flags_frag_offset: u16,
) -> Vec<u8> {
    let mut header = Ipv4Header::new_simple(protocol, src, dst, 0);
    header.flags_frag_offset = flags_frag_offset;
    header.tos = 0x10;
    Ipv4Utils::create_packet_with_payload(&header, payload)
}

pub fn rx_buf(bytes: &[u8], flags: BufFlags, block_size: usize) -> PacketBuf {
    PacketBuf::from_ipv4_datagram(bytes, block_size, 0, flags).expect("well-formed datagram")
}

/// ICMP message with a valid checksum
pub fn icmp_message(msg_type: u8, code: u8, rest: [u8; 4], data: &[u8]) -> Vec<u8> {
    let mut msg = vec![msg_type, code, 0, 0];
    msg.extend_from_slice(&rest);
    msg.extend_from_slice(data);
    let ck = checksum(&msg);
    msg[2..4].copy_from_slice(&ck.to_be_bytes());
    msg
}

pub fn id_seq(id: u16, seq: u16) -> [u8; 4] {
    let mut rest = [0u8; 4];
    rest[0..2].copy_from_slice(&id.to_be_bytes());
    rest[2..4].copy_from_slice(&seq.to_be_bytes());
    rest
}

/// IPv6 datagram carrying `payload` with next header `next`
pub fn ipv6_datagram(next: u8, src: [u8; 16], dst: [u8; 16], payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 40];
    bytes[0] = 0x60;
    bytes[4..6].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    bytes[6] = next;
    bytes[7] = 64;
    bytes[8..24].copy_from_slice(&src);
    bytes[24..40].copy_from_slice(&dst);
    bytes.extend_from_slice(payload);
    bytes
}

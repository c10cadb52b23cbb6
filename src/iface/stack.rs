//! Protocol dispatch
//!
//! [`NetStack`] wires the engines to one IP layer and buffer pool and routes
//! received datagrams to ICMP or UDP by protocol number. It owns the
//! [`EchoTracker`]; the tracker lives exactly as long as the stack.

use std::sync::Arc;
use std::time::Duration;

use crate::buf::{BufferPool, PacketBuf};
use crate::config::StackConfig;
use crate::error::{NetError, Result};
use crate::iface::ip::{IpAddr, IpLayer};
use crate::network::echo::{EchoReply, EchoTracker};
use crate::network::icmpv4::{IcmpRx, Icmpv4};
use crate::network::ipv4::protocol;
use crate::socket::UdpSocketTable;
use crate::transport::udp::{TxOptions, Udp, UdpRx};

/// Where [`NetStack::input`] sent a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Icmp(IcmpRx),
    Udp(UdpRx),
    Unsupported(u8),
}

pub struct NetStack {
    icmp: Arc<Icmpv4>,
    udp: Udp,
    sockets: Arc<UdpSocketTable>,
}

impl NetStack {
    pub fn new(ip: Arc<dyn IpLayer>, pool: Arc<dyn BufferPool>, config: &StackConfig) -> Self {
        let tracker = Arc::new(EchoTracker::new());
        let icmp = Arc::new(Icmpv4::new(
            ip.clone(),
            pool.clone(),
            tracker,
            config.icmp.clone(),
        ));
        let sockets = Arc::new(UdpSocketTable::with_queue_limit(config.udp.socket_queue_len));
        let udp = Udp::new(ip, pool, icmp.clone(), sockets.clone(), config.udp.clone());
        NetStack { icmp, udp, sockets }
    }

    /// Hand a received datagram to its transport engine
    pub fn input(&self, buf: PacketBuf) -> Dispatch {
        let proto = buf.meta.ip_protocol;
        match (proto, buf.meta.is_ipv6()) {
            (protocol::ICMP, false) => Dispatch::Icmp(self.icmp.rx(buf)),
            (protocol::UDP, _) => Dispatch::Udp(self.udp.rx(buf)),
            _ => {
                log::debug!("protocol {} from {} not handled", proto, buf.meta.ip_src);
                Dispatch::Unsupported(proto)
            }
        }
    }

    /// Ping an IPv4 host and wait for the reply
    pub fn ping(&self, dst: [u8; 4], id: u16, data: &[u8], timeout: Duration) -> Result<EchoReply> {
        self.icmp.echo_request(dst, id, data, timeout)
    }

    /// Send from a bound local port
    pub fn send_to(&self, src_port: u16, dst: IpAddr, dst_port: u16, data: &[u8]) -> Result<()> {
        if !self.sockets.is_bound(src_port) {
            return Err(NetError::InvalidArgument("source port not bound"));
        }
        let opts = TxOptions::default();
        match dst {
            IpAddr::V4(dst) => self.udp.send_v4(src_port, dst, dst_port, data, opts),
            IpAddr::V6(dst) => self.udp.send_v6(src_port, dst, dst_port, data, opts),
        }
    }

    pub fn icmp(&self) -> &Icmpv4 {
        &self.icmp
    }

    pub fn udp(&self) -> &Udp {
        &self.udp
    }

    pub fn sockets(&self) -> &UdpSocketTable {
        &self.sockets
    }
}

//! ICMPv4 and UDP transport engines for a small TCP/IP stack
//!
//! This library provides:
//! - Internet checksum over chained packet buffers
//! - ICMPv4 request, reply and error handling with echo correlation
//! - UDP receive, demultiplexing and transmit over IPv4 and IPv6
//! - A reference IP layer on a Linux TUN device

pub mod buf;
pub mod config;
pub mod error;
pub mod iface;
pub mod network;
pub mod socket;
pub mod stats;
pub mod transport;

// Re-export commonly used types
pub use buf::{BufFlags, BufferPool, HeapPool, PacketBuf};
pub use config::StackConfig;
pub use error::{Discard, NetError, Result};
pub use iface::{IpAddr, IpLayer, NetStack, SocketDemux, TunIpLayer};
pub use network::icmp::{IcmpHeader, IcmpKind, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
pub use network::{EchoReply, EchoTracker, Icmpv4, Ipv4Header};
pub use socket::UdpSocketTable;
pub use transport::{Udp, UdpHeader};

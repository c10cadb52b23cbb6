//! Network layer protocols
//!
//! - IPv4: header view used by the transport engines
//! - ICMP: wire format, echo correlation and the ICMPv4 engine
//! - checksum: the Internet checksum shared by ICMP and UDP

pub mod checksum;
pub mod echo;
pub mod icmp;
pub mod icmpv4;
pub mod ipv4;

pub use checksum::checksum;
pub use echo::{EchoReply, EchoTracker};
pub use icmp::{IcmpHeader, IcmpKind, RequestKind, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
pub use icmpv4::{IcmpRx, Icmpv4};
pub use ipv4::{flags, protocol, Ipv4Header};

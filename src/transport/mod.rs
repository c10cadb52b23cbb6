//! Transport layer protocols
//!
//! - UDP: User Datagram Protocol over IPv4 and IPv6

pub mod udp;

pub use udp::{rx_app_data, TxOptions, Udp, UdpHeader, UdpRx, UdpUtils};

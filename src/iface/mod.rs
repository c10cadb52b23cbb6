//! Interface side of the transport engines
//!
//! - `ip`: the IP layer and socket layer contracts
//! - `stack`: protocol dispatch over one IP layer
//! - `tun`: a reference IP layer on a Linux TUN device

pub mod ip;
pub mod stack;
pub mod tun;

pub use ip::*;
pub use stack::{Dispatch, NetStack};
pub use tun::TunIpLayer;

//! Stack configuration
//!
//! Runtime knobs for the ICMP and UDP engines and the reference heap pool.
//! Every field has a default, so an empty TOML document is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// Minimum number of octets of the offending datagram an ICMP error carries
pub const MIN_ERROR_DATA_OCTETS: usize = 8;
pub const DEFAULT_SOCKET_QUEUE_LEN: usize = 32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub icmp: IcmpConfig,
    pub udp: UdpConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcmpConfig {
    /// TTL for replies, requests and error messages
    pub default_ttl: u8,
    /// Octets of the offending datagram's body copied into error messages
    pub error_data_octets: usize,
    /// Answer echo requests
    pub echo_reply: bool,
    /// Answer timestamp requests
    pub timestamp_reply: bool,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        IcmpConfig {
            default_ttl: 64,
            error_data_octets: MIN_ERROR_DATA_OCTETS,
            echo_reply: true,
            timestamp_reply: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Accept IPv4 datagrams whose checksum field is zero
    pub rx_accept_no_checksum: bool,
    /// Generate checksums on transmit unless the caller opts out
    pub tx_checksum: bool,
    /// TTL / hop limit used when the caller does not pick one
    pub default_ttl: u8,
    /// Answer unclaimed datagrams with ICMP port unreachable
    pub port_unreachable: bool,
    /// Datagrams a bound socket holds before new arrivals are dropped
    pub socket_queue_len: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            rx_accept_no_checksum: true,
            tx_checksum: true,
            default_ttl: 64,
            port_unreachable: true,
            socket_queue_len: DEFAULT_SOCKET_QUEUE_LEN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of each buffer block in octets
    pub block_size: usize,
    /// Maximum number of buffers leased at once
    pub max_buffers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            block_size: 1536,
            max_buffers: 64,
        }
    }
}

impl StackConfig {
    /// Parse a configuration from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut config: StackConfig =
            toml::from_str(s).map_err(|e| NetError::Config(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn normalize(&mut self) {
        self.icmp = self.icmp.clone().normalize();
    }
}

impl IcmpConfig {
    /// Clamp fields to the values the protocol requires
    pub fn normalize(mut self) -> Self {
        if self.error_data_octets < MIN_ERROR_DATA_OCTETS {
            log::warn!(
                "icmp.error_data_octets {} below minimum, using {}",
                self.error_data_octets,
                MIN_ERROR_DATA_OCTETS
            );
            self.error_data_octets = MIN_ERROR_DATA_OCTETS;
        }
        self
    }
}

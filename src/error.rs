//! Error types shared by the ICMP and UDP engines
//!
//! Only resource, policy and timeout failures are surfaced as [`NetError`].
//! Malformed received packets never propagate: they are counted and dropped,
//! and the reason is described by [`Discard`].

use std::fmt;

use thiserror::Error;

/// Why the engine refused to build an ICMP error message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The offending packet arrived as a link-layer or IP broadcast
    Broadcast,
    /// The offending packet was addressed to a multicast group
    Multicast,
    /// The offending packet is a fragment other than the first one
    NonInitialFragment,
    /// The offending packet's source is "this host", a wildcard or an invalid class
    InvalidSource,
    /// The offending packet is itself an ICMP error message
    ErrorForError,
    /// The offending packet carries an ICMP type we do not report on
    UnsupportedType,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuppressReason::Broadcast => "packet received via broadcast",
            SuppressReason::Multicast => "packet addressed to multicast group",
            SuppressReason::NonInitialFragment => "non-initial fragment",
            SuppressReason::InvalidSource => "invalid source address",
            SuppressReason::ErrorForError => "packet is an ICMP error",
            SuppressReason::UnsupportedType => "unsupported ICMP type",
        };
        f.write_str(s)
    }
}

/// Errors propagated to the caller of a transmit or receive-copy operation
#[derive(Debug, Error)]
pub enum NetError {
    /// The buffer pool has no free buffers left
    #[error("buffer pool exhausted")]
    BufferExhausted,

    /// The requested size does not fit in a single pool buffer
    #[error("requested {requested} octets, buffer holds at most {capacity}")]
    BufferTooSmall { requested: usize, capacity: usize },

    /// No route or source address exists for the destination
    #[error("no source address for destination")]
    NoSourceAddress,

    /// Payload larger than the interface allows
    #[error("message of {len} octets exceeds maximum of {max}")]
    MtuExceeded { len: usize, max: usize },

    /// Caller supplied an argument the protocol does not permit
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Generating an ICMP error is forbidden for this packet
    #[error("ICMP error suppressed: {0}")]
    ErrorSuppressed(SuppressReason),

    /// The IP layer refused or failed to transmit
    #[error("transmit failed: {0}")]
    Transmit(String),

    /// No echo reply arrived before the deadline
    #[error("echo request {sequence} timed out")]
    EchoTimeout { sequence: u16 },

    /// An echo reply matched no outstanding request
    #[error("echo reply id={id} seq={sequence} matches no request")]
    EchoNoMatch { id: u16, sequence: u16 },

    /// The application buffer was too small; a prefix was copied
    #[error("datagram of {available} octets truncated to {copied}")]
    RxOverflow { copied: usize, available: usize },

    /// Device I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using NetError
pub type Result<T> = std::result::Result<T, NetError>;

/// Reason a received packet was silently dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    RxBroadcast,
    RxMulticast,
    InvalidType(u8),
    InvalidCode { msg_type: u8, code: u8 },
    InvalidLength { len: usize },
    InvalidPointer(u8),
    InvalidChecksum,
    InvalidPort,
    MissingChecksum,
    ReplyUnmatched,
    ReplyUnsupported,
    ReplyDisabled,
    Truncated,
    UnsupportedProtocol(u8),
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discard::RxBroadcast => write!(f, "received via broadcast"),
            Discard::RxMulticast => write!(f, "addressed to multicast group"),
            Discard::InvalidType(t) => write!(f, "invalid type {}", t),
            Discard::InvalidCode { msg_type, code } => {
                write!(f, "invalid code {} for type {}", code, msg_type)
            }
            Discard::InvalidLength { len } => write!(f, "invalid length {}", len),
            Discard::InvalidPointer(p) => write!(f, "invalid parameter-problem pointer {}", p),
            Discard::InvalidChecksum => write!(f, "checksum mismatch"),
            Discard::InvalidPort => write!(f, "reserved port zero"),
            Discard::MissingChecksum => write!(f, "checksum absent"),
            Discard::ReplyUnmatched => write!(f, "reply matches no request"),
            Discard::ReplyUnsupported => write!(f, "reply type has no consumer"),
            Discard::ReplyDisabled => write!(f, "replies disabled by configuration"),
            Discard::Truncated => write!(f, "header not contained in first buffer"),
            Discard::UnsupportedProtocol(p) => write!(f, "unsupported protocol {}", p),
        }
    }
}

//! ICMPv4 wire format
//!
//! Message type and code constants, the supported (type, code) table, and the
//! fixed 8-octet header view. Classification of a received message into an
//! [`IcmpKind`] is a single exhaustive match, so adding a message type forces
//! every dispatch site to handle it.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Discard;

/// Minimum ICMP header length in bytes
pub const ICMP_HEADER_LEN: usize = 8;
pub const ICMP_HEADER_LEN_ECHO: usize = 8;
pub const ICMP_HEADER_LEN_ERROR: usize = 8;
pub const ICMP_HEADER_LEN_TIMESTAMP: usize = 20;
pub const ICMP_HEADER_LEN_ADDR_MASK: usize = 12;

/// Octets of the offending datagram's body every error carries (RFC 1122 3.2.2)
pub const ICMP_ERROR_DATA_MIN: usize = 8;
/// Minimum IPv4 header embedded in an error message
pub const ICMP_ERROR_IP_HDR_MIN: usize = 20;
pub const ICMP_ERROR_LEN_MIN: usize = ICMP_HEADER_LEN_ERROR + ICMP_ERROR_IP_HDR_MIN + ICMP_ERROR_DATA_MIN;

/// ICMP message types
pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_TYPE_SOURCE_QUENCH: u8 = 4;
pub const ICMP_TYPE_REDIRECT: u8 = 5;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
pub const ICMP_TYPE_TIME_EXCEEDED: u8 = 11;
pub const ICMP_TYPE_PARAMETER_PROBLEM: u8 = 12;
pub const ICMP_TYPE_TIMESTAMP_REQUEST: u8 = 13;
pub const ICMP_TYPE_TIMESTAMP_REPLY: u8 = 14;
pub const ICMP_TYPE_ADDR_MASK_REQUEST: u8 = 17;
pub const ICMP_TYPE_ADDR_MASK_REPLY: u8 = 18;

macro_rules! icmp_code_enum {
    ($(#[$attr:meta])* $name:ident { $($(#[$vattr:meta])* $variant:ident = $value:literal,)* }) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vattr])* $variant,)*
        }

        impl $name {
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($value => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $value,)*
                }
            }
        }
    };
}

icmp_code_enum! {
    /// Destination Unreachable codes accepted on receive
    DestUnreachableCode {
        Net = 0,
        Host = 1,
        Protocol = 2,
        Port = 3,
        FragmentationNeeded = 4,
        SourceRouteFailed = 5,
        NetUnknown = 6,
        HostUnknown = 7,
        HostIsolated = 8,
        NetTos = 11,
        HostTos = 12,
    }
}

icmp_code_enum! {
    TimeExceededCode {
        Ttl = 0,
        FragmentReassembly = 1,
    }
}

icmp_code_enum! {
    ParameterProblemCode {
        /// The pointer field locates the bad octet
        Pointer = 0,
        OptionMissing = 1,
    }
}

/// Request / Reply / Error classification of a validated message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgClass {
    Request,
    Reply,
    Error,
}

/// A supported ICMPv4 (type, code) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpKind {
    EchoReply,
    DestUnreachable(DestUnreachableCode),
    EchoRequest,
    TimeExceeded(TimeExceededCode),
    ParameterProblem(ParameterProblemCode),
    TimestampRequest,
    TimestampReply,
    AddressMaskReply,
}

impl IcmpKind {
    /// Map a received (type, code) pair onto the supported table
    pub fn classify(msg_type: u8, code: u8) -> Result<Self, Discard> {
        let bad_code = Discard::InvalidCode { msg_type, code };
        let only_zero = |kind: IcmpKind| if code == 0 { Ok(kind) } else { Err(bad_code) };
        match msg_type {
            ICMP_TYPE_ECHO_REPLY => only_zero(IcmpKind::EchoReply),
            ICMP_TYPE_ECHO_REQUEST => only_zero(IcmpKind::EchoRequest),
            ICMP_TYPE_TIMESTAMP_REQUEST => only_zero(IcmpKind::TimestampRequest),
            ICMP_TYPE_TIMESTAMP_REPLY => only_zero(IcmpKind::TimestampReply),
            ICMP_TYPE_ADDR_MASK_REPLY => only_zero(IcmpKind::AddressMaskReply),
            ICMP_TYPE_DEST_UNREACHABLE => DestUnreachableCode::from_code(code)
                .map(IcmpKind::DestUnreachable)
                .ok_or(bad_code),
            ICMP_TYPE_TIME_EXCEEDED => TimeExceededCode::from_code(code)
                .map(IcmpKind::TimeExceeded)
                .ok_or(bad_code),
            ICMP_TYPE_PARAMETER_PROBLEM => ParameterProblemCode::from_code(code)
                .map(IcmpKind::ParameterProblem)
                .ok_or(bad_code),
            _ => Err(Discard::InvalidType(msg_type)),
        }
    }

    pub fn msg_type(&self) -> u8 {
        match self {
            IcmpKind::EchoReply => ICMP_TYPE_ECHO_REPLY,
            IcmpKind::DestUnreachable(_) => ICMP_TYPE_DEST_UNREACHABLE,
            IcmpKind::EchoRequest => ICMP_TYPE_ECHO_REQUEST,
            IcmpKind::TimeExceeded(_) => ICMP_TYPE_TIME_EXCEEDED,
            IcmpKind::ParameterProblem(_) => ICMP_TYPE_PARAMETER_PROBLEM,
            IcmpKind::TimestampRequest => ICMP_TYPE_TIMESTAMP_REQUEST,
            IcmpKind::TimestampReply => ICMP_TYPE_TIMESTAMP_REPLY,
            IcmpKind::AddressMaskReply => ICMP_TYPE_ADDR_MASK_REPLY,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            IcmpKind::DestUnreachable(c) => c.code(),
            IcmpKind::TimeExceeded(c) => c.code(),
            IcmpKind::ParameterProblem(c) => c.code(),
            _ => 0,
        }
    }

    pub fn class(&self) -> MsgClass {
        match self {
            IcmpKind::EchoRequest | IcmpKind::TimestampRequest => MsgClass::Request,
            IcmpKind::EchoReply | IcmpKind::TimestampReply | IcmpKind::AddressMaskReply => {
                MsgClass::Reply
            }
            IcmpKind::DestUnreachable(_)
            | IcmpKind::TimeExceeded(_)
            | IcmpKind::ParameterProblem(_) => MsgClass::Error,
        }
    }

    pub fn header_len(&self) -> usize {
        match self {
            IcmpKind::EchoRequest | IcmpKind::EchoReply => ICMP_HEADER_LEN_ECHO,
            IcmpKind::TimestampRequest | IcmpKind::TimestampReply => ICMP_HEADER_LEN_TIMESTAMP,
            IcmpKind::AddressMaskReply => ICMP_HEADER_LEN_ADDR_MASK,
            IcmpKind::DestUnreachable(_)
            | IcmpKind::TimeExceeded(_)
            | IcmpKind::ParameterProblem(_) => ICMP_HEADER_LEN_ERROR,
        }
    }

    /// Minimum and (optional) maximum message length
    pub fn len_bounds(&self) -> (usize, Option<usize>) {
        match self {
            IcmpKind::EchoRequest | IcmpKind::EchoReply => (ICMP_HEADER_LEN_ECHO, None),
            IcmpKind::TimestampRequest | IcmpKind::TimestampReply => {
                (ICMP_HEADER_LEN_TIMESTAMP, Some(ICMP_HEADER_LEN_TIMESTAMP))
            }
            IcmpKind::AddressMaskReply => {
                (ICMP_HEADER_LEN_ADDR_MASK, Some(ICMP_HEADER_LEN_ADDR_MASK))
            }
            IcmpKind::DestUnreachable(_)
            | IcmpKind::TimeExceeded(_)
            | IcmpKind::ParameterProblem(_) => (ICMP_ERROR_LEN_MIN, None),
        }
    }

    /// Only echo messages surface a payload past the header
    pub fn carries_data(&self) -> bool {
        matches!(self, IcmpKind::EchoRequest | IcmpKind::EchoReply)
    }
}

/// Requests this host can originate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Echo,
    Timestamp,
    AddressMask,
}

impl RequestKind {
    pub fn msg_type(&self) -> u8 {
        match self {
            RequestKind::Echo => ICMP_TYPE_ECHO_REQUEST,
            RequestKind::Timestamp => ICMP_TYPE_TIMESTAMP_REQUEST,
            RequestKind::AddressMask => ICMP_TYPE_ADDR_MASK_REQUEST,
        }
    }

    pub fn header_len(&self) -> usize {
        match self {
            RequestKind::Echo => ICMP_HEADER_LEN_ECHO,
            RequestKind::Timestamp => ICMP_HEADER_LEN_TIMESTAMP,
            RequestKind::AddressMask => ICMP_HEADER_LEN_ADDR_MASK,
        }
    }
}

/// Whether a raw ICMP type denotes an error message
pub fn is_error_type(msg_type: u8) -> bool {
    matches!(
        msg_type,
        ICMP_TYPE_DEST_UNREACHABLE
            | ICMP_TYPE_SOURCE_QUENCH
            | ICMP_TYPE_REDIRECT
            | ICMP_TYPE_TIME_EXCEEDED
            | ICMP_TYPE_PARAMETER_PROBLEM
    )
}

/// ICMP packet header structure
///
/// Represents the standard 8-byte ICMP header as defined in RFC 792
#[derive(Debug, Clone, Copy)]
pub struct IcmpHeader {
    pub msg_type: u8,  // ICMP message type
    pub msg_code: u8,  // ICMP message code
    pub checksum: u16, // ICMP checksum
    pub rest: [u8; 4], // identifier/sequence, pointer, or unused
}

impl IcmpHeader {
    pub fn new(msg_type: u8, msg_code: u8) -> Self {
        IcmpHeader {
            msg_type,
            msg_code,
            checksum: 0,
            rest: [0; 4],
        }
    }

    /// Parse ICMP header from byte slice
    ///
    /// Returns None if the data is too short to contain a valid ICMP header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return None;
        }

        let mut rest = [0u8; 4];
        rest.copy_from_slice(&data[4..8]);
        Some(IcmpHeader {
            msg_type: data[0],
            msg_code: data[1],
            checksum: BigEndian::read_u16(&data[2..4]),
            rest,
        })
    }

    /// Convert ICMP header to bytes
    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut bytes = [0u8; ICMP_HEADER_LEN];
        bytes[0] = self.msg_type;
        bytes[1] = self.msg_code;
        BigEndian::write_u16(&mut bytes[2..4], self.checksum);
        bytes[4..8].copy_from_slice(&self.rest);
        bytes
    }

    /// Write into the first 8 octets of `out`
    pub fn write(&self, out: &mut [u8]) {
        out[..ICMP_HEADER_LEN].copy_from_slice(&self.to_bytes());
    }

    /// Get the identifier field for Echo/Timestamp/Address-Mask messages
    pub fn identifier(&self) -> u16 {
        BigEndian::read_u16(&self.rest[0..2])
    }

    /// Get the sequence number field for Echo/Timestamp/Address-Mask messages
    pub fn sequence(&self) -> u16 {
        BigEndian::read_u16(&self.rest[2..4])
    }

    pub fn set_identifier(&mut self, id: u16) {
        BigEndian::write_u16(&mut self.rest[0..2], id);
    }

    pub fn set_sequence(&mut self, seq: u16) {
        BigEndian::write_u16(&mut self.rest[2..4], seq);
    }

    /// Parameter Problem pointer octet
    pub fn pointer(&self) -> u8 {
        self.rest[0]
    }

    pub fn set_pointer(&mut self, ptr: u8) {
        self.rest[0] = ptr;
    }
}

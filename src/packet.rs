// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IPv4 and UDP wire formats.
//!
//! Parsing and building are explicit serialize/parse steps over byte slices;
//! nothing reinterprets packet memory in place, so there are no alignment or
//! endianness hazards. All multi-byte fields are big-endian on the wire.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::checksum::{internet_checksum, udp_checksum, CHECKSUM_OK};

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_IGMP: u8 = 2;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

pub const IPV4_VERSION: u8 = 4;
pub const IPV4_HEADER_MIN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

/// Largest frame the stack sends or accepts from the link layer
pub const FRAME_BUFFER_SIZE: usize = 1600;

pub const IP_TTL_DEFAULT: u8 = 64;
pub const IP_TTL_MULTICAST: u8 = 1;
pub const IP_TOS_ROUTINE: u8 = 0;
pub const IP_IDENTIFICATION_DEFAULT: u16 = 0;

// Flag bits within the 3-bit flags field
const IP_FLAG_DF: u8 = 0b010;
const IP_FLAG_MF: u8 = 0b001;

/// Errors that can occur while parsing inbound packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid IP version: expected 4, got {0}")]
    InvalidIpVersion(u8),

    #[error("IP header length too small: {0} dwords")]
    IpHeaderTooSmall(u8),

    #[error("IP header checksum failed")]
    IpChecksumMismatch,

    #[error("UDP checksum failed")]
    UdpChecksumMismatch,

    #[error("fragmented packet")]
    FragmentedPacket,

    #[error("packet shorter than its total length field: {total_length} > {actual}")]
    TruncatedPacket { total_length: usize, actual: usize },
}

/// Parsed IPv4 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8, // header length in 32-bit words
    pub dscp: u8,
    pub ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
}

impl Ipv4Header {
    /// A packet is fragmented if the More Fragments flag is set or the
    /// fragment offset is non-zero.
    pub fn is_fragmented(&self) -> bool {
        (self.flags & IP_FLAG_MF) != 0 || self.fragment_offset != 0
    }

    /// Header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }
}

/// Parse an IPv4 header from the start of `data`.
///
/// With `validate_checksum` set, the header checksum is verified using the
/// whole-buffer property: a correct header sums to [`CHECKSUM_OK`].
pub fn parse_ipv4(data: &[u8], validate_checksum: bool) -> Result<Ipv4Header, ParseError> {
    if data.len() < IPV4_HEADER_MIN {
        return Err(ParseError::PacketTooShort {
            expected: IPV4_HEADER_MIN,
            actual: data.len(),
        });
    }

    let version = data[0] >> 4;
    if version != IPV4_VERSION {
        return Err(ParseError::InvalidIpVersion(version));
    }

    let ihl = data[0] & 0x0F;
    if ihl < 5 {
        return Err(ParseError::IpHeaderTooSmall(ihl));
    }

    let header_len = (ihl as usize) * 4;
    if data.len() < header_len {
        return Err(ParseError::PacketTooShort {
            expected: header_len,
            actual: data.len(),
        });
    }

    if validate_checksum && internet_checksum(&data[..header_len]) != CHECKSUM_OK {
        return Err(ParseError::IpChecksumMismatch);
    }

    let flags_and_offset = u16::from_be_bytes([data[6], data[7]]);

    Ok(Ipv4Header {
        version,
        ihl,
        dscp: data[1] >> 2,
        ecn: data[1] & 0x03,
        total_length: u16::from_be_bytes([data[2], data[3]]),
        identification: u16::from_be_bytes([data[4], data[5]]),
        flags: (flags_and_offset >> 13) as u8,
        fragment_offset: flags_and_offset & 0x1FFF,
        ttl: data[8],
        protocol: data[9],
        checksum: u16::from_be_bytes([data[10], data[11]]),
        src_ip: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        dst_ip: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
    })
}

/// Build a 20-byte IPv4 header for an outbound packet.
///
/// IHL is always 5 (no options), DF is set, and the TTL is 1 for multicast
/// destinations and 64 otherwise. `total_length` covers header plus payload.
pub fn build_ipv4_header(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: u8,
    total_length: u16,
) -> [u8; IPV4_HEADER_MIN] {
    let mut header = [0u8; IPV4_HEADER_MIN];

    header[0] = (IPV4_VERSION << 4) | 5;
    header[1] = IP_TOS_ROUTINE;
    header[2..4].copy_from_slice(&total_length.to_be_bytes());
    header[4..6].copy_from_slice(&IP_IDENTIFICATION_DEFAULT.to_be_bytes());
    let flags_and_offset = (IP_FLAG_DF as u16) << 13;
    header[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
    header[8] = if destination.is_multicast() {
        IP_TTL_MULTICAST
    } else {
        IP_TTL_DEFAULT
    };
    header[9] = protocol;
    header[12..16].copy_from_slice(&source.octets());
    header[16..20].copy_from_slice(&destination.octets());

    let csum = internet_checksum(&header);
    header[10..12].copy_from_slice(&csum.to_be_bytes());

    header
}

/// Parsed UDP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

/// Parse a UDP header from the start of `data`
pub fn parse_udp(data: &[u8]) -> Result<UdpHeader, ParseError> {
    if data.len() < UDP_HEADER_LEN {
        return Err(ParseError::PacketTooShort {
            expected: UDP_HEADER_LEN,
            actual: data.len(),
        });
    }

    Ok(UdpHeader {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        length: u16::from_be_bytes([data[4], data[5]]),
        checksum: u16::from_be_bytes([data[6], data[7]]),
    })
}

/// Build a complete UDP segment (header + payload) with a pseudo-header
/// checksum. A computed checksum of zero is transmitted as 0xFFFF, since
/// zero on the wire means "no checksum".
pub fn build_udp_segment(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let length = (UDP_HEADER_LEN + payload.len()) as u16;
    let mut segment = Vec::with_capacity(length as usize);

    segment.extend_from_slice(&src_port.to_be_bytes());
    segment.extend_from_slice(&dst_port.to_be_bytes());
    segment.extend_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(&[0, 0]);
    segment.extend_from_slice(payload);

    let mut csum = udp_checksum(source, destination, &segment);
    if csum == 0 {
        csum = 0xFFFF;
    }
    segment[6..8].copy_from_slice(&csum.to_be_bytes());

    segment
}

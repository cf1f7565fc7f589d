//! Layered header parsing: Ethernet -> IPv4 -> TCP.
//!
//! Each stage reads through the bounded view and returns `None` when the bytes
//! are not there or the layer is not the one the metadata policy cares about.
//! Variable header lengths (IHL, TCP data offset) are carried as explicit
//! fields so later offsets are always derived from validated values.

use crate::packet::PacketView;
use crate::policy::{METADATA_ADDR, METADATA_PORT};

pub const ETH_P_IP: u16 = 0x0800;
pub const IPPROTO_TCP: u8 = 6;

const ETH_HDR_LEN: usize = 14;
const IPV4_MIN_HDR_LEN: usize = 20;
const TCP_MIN_HDR_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHdr {
    pub ether_type: u16,
}

impl EthHdr {
    pub const LEN: usize = ETH_HDR_LEN;

    #[inline(always)]
    pub fn parse<P: PacketView>(packet: &P) -> Option<Self> {
        let raw = packet.load::<ETH_HDR_LEN>(0)?;
        Some(Self {
            ether_type: u16::from_be_bytes([raw[12], raw[13]]),
        })
    }

    #[inline(always)]
    pub fn is_ipv4(&self) -> bool {
        self.ether_type == ETH_P_IP
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Hdr {
    pub protocol: u8,
    /// Host-order source address.
    pub src_addr: u32,
    /// Host-order destination address.
    pub dst_addr: u32,
    /// Header length in bytes (IHL * 4), options included.
    pub header_len: usize,
}

impl Ipv4Hdr {
    /// Fixed part of the header; options follow when IHL > 5.
    pub const MIN_LEN: usize = IPV4_MIN_HDR_LEN;

    #[inline(always)]
    pub fn parse<P: PacketView>(packet: &P, offset: usize) -> Option<Self> {
        let raw = packet.load::<IPV4_MIN_HDR_LEN>(offset)?;
        Some(Self {
            protocol: raw[9],
            src_addr: u32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]),
            dst_addr: u32::from_be_bytes([raw[16], raw[17], raw[18], raw[19]]),
            header_len: ((raw[0] & 0x0f) as usize) * 4,
        })
    }

    #[inline(always)]
    pub fn is_metadata_destination(&self) -> bool {
        self.dst_addr == METADATA_ADDR
    }

    #[inline(always)]
    pub fn is_tcp(&self) -> bool {
        self.protocol == IPPROTO_TCP
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHdr {
    pub src_port: u16,
    pub dst_port: u16,
    /// Header length in 32-bit words.
    pub data_offset: u8,
}

impl TcpHdr {
    pub const MIN_LEN: usize = TCP_MIN_HDR_LEN;

    #[inline(always)]
    pub fn parse<P: PacketView>(packet: &P, offset: usize) -> Option<Self> {
        let raw = packet.load::<TCP_MIN_HDR_LEN>(offset)?;
        Some(Self {
            src_port: u16::from_be_bytes([raw[0], raw[1]]),
            dst_port: u16::from_be_bytes([raw[2], raw[3]]),
            data_offset: raw[12] >> 4,
        })
    }

    #[inline(always)]
    pub fn header_len(&self) -> usize {
        (self.data_offset as usize) * 4
    }

    #[inline(always)]
    pub fn is_metadata_port(&self) -> bool {
        self.dst_port == METADATA_PORT
    }
}

/// A TCP segment addressed to the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataSegment {
    pub src_addr: u32,
    pub tcp: TcpHdr,
    /// Offset of the TCP header from the start of the frame.
    pub tcp_offset: usize,
}

impl MetadataSegment {
    /// Offset of the TCP payload, or `None` when the data offset is smaller
    /// than the fixed header and no payload can be located.
    #[inline(always)]
    pub fn payload_offset(&self) -> Option<usize> {
        let header_len = self.tcp.header_len();
        if header_len < TcpHdr::MIN_LEN {
            return None;
        }
        Some(self.tcp_offset + header_len)
    }
}

/// Run the header stages in order. Returns `None` (pass-through) as soon as a
/// stage is truncated or does not match the metadata service.
///
/// The destination address is checked before the protocol and before the
/// variable-offset TCP parse so non-metadata traffic costs two fixed reads.
#[inline(always)]
pub fn parse_metadata_segment<P: PacketView>(packet: &P) -> Option<MetadataSegment> {
    let eth = EthHdr::parse(packet)?;
    if !eth.is_ipv4() {
        return None;
    }

    let ip = Ipv4Hdr::parse(packet, EthHdr::LEN)?;
    if !ip.is_metadata_destination() {
        return None;
    }
    if !ip.is_tcp() {
        return None;
    }
    // IHL < 5 leaves the TCP header location undefined
    if ip.header_len < Ipv4Hdr::MIN_LEN {
        return None;
    }

    let tcp_offset = EthHdr::LEN + ip.header_len;
    let tcp = TcpHdr::parse(packet, tcp_offset)?;
    if !tcp.is_metadata_port() {
        return None;
    }

    Some(MetadataSegment {
        src_addr: ip.src_addr,
        tcp,
        tcp_offset,
    })
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Shared fixtures for the stack integration tests: a stack over one end of
//! a frame pipe, with the far end kept for injecting inbound traffic and
//! observing what the stack puts on the wire.
#![allow(dead_code)]

use std::net::Ipv4Addr;

use multicast_host::checksum::internet_checksum;
use multicast_host::link::{PipeLink, ETHERNET_HEADER_LEN};
use multicast_host::logging::Logger;
use multicast_host::packet::{build_ipv4_header, parse_ipv4, Ipv4Header};
use multicast_host::timer::TickTimer;
use multicast_host::{NetConfig, NetworkLayer};

pub const HOST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
pub const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const ROUTER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

/// A stack under test plus the far end of its link
pub struct TestStack {
    pub net: NetworkLayer,
    pub peer: PipeLink,
}

/// Stack with the usual 192.168.1.10/24 identity and a seeded timer
pub fn configured_stack(seed: u64) -> TestStack {
    stack_with_config(NetConfig::configured(HOST_IP, NETMASK, GATEWAY), seed)
}

/// Stack still in the DHCP bootstrap window (no IP)
pub fn bootstrap_stack(seed: u64) -> TestStack {
    stack_with_config(NetConfig::new(), seed)
}

pub fn stack_with_config(config: NetConfig, seed: u64) -> TestStack {
    let (link, peer) = PipeLink::pair();
    let net = NetworkLayer::new(
        config,
        Box::new(link),
        Box::new(TickTimer::with_seed(seed)),
        Logger::null(),
    );
    TestStack { net, peer }
}

/// Build an 8-byte IGMP message with a correct checksum
pub fn igmp_message(msg_type: u8, max_resp_time: u8, group: Ipv4Addr) -> Vec<u8> {
    let mut message = vec![msg_type, max_resp_time, 0, 0];
    message.extend_from_slice(&group.octets());
    let checksum = internet_checksum(&message);
    message[2..4].copy_from_slice(&checksum.to_be_bytes());
    message
}

/// Build a complete IPv4 datagram around `payload`
pub fn ipv4_datagram(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: u8,
    payload: &[u8],
) -> Vec<u8> {
    let total = 20 + payload.len();
    let mut datagram = build_ipv4_header(source, destination, protocol, total as u16).to_vec();
    datagram.extend_from_slice(payload);
    datagram
}

/// Rewrite the flags/fragment-offset field of a built datagram and fix up
/// the header checksum
pub fn set_fragmentation(datagram: &mut [u8], more_fragments: bool, offset: u16) {
    let mut flags_and_offset = offset & 0x1FFF;
    if more_fragments {
        flags_and_offset |= 1 << 13;
    }
    datagram[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
    datagram[10..12].copy_from_slice(&[0, 0]);
    let checksum = internet_checksum(&datagram[..20]);
    datagram[10..12].copy_from_slice(&checksum.to_be_bytes());
}

impl TestStack {
    /// Inject an inbound IPv4 datagram, as if a peer on the link sent it
    pub fn inject(&mut self, datagram: &[u8]) {
        use multicast_host::link::LinkLayer;
        self.peer.send(HOST_IP, datagram);
    }

    /// Inject an IGMP message wrapped in IPv4
    pub fn inject_igmp(&mut self, sender: Ipv4Addr, ip_destination: Ipv4Addr, message: &[u8]) {
        let datagram = ipv4_datagram(sender, ip_destination, 2, message);
        self.inject(&datagram);
    }

    /// Next outbound datagram as (header, payload), if any
    pub fn outbound(&mut self) -> Option<(Ipv4Header, Vec<u8>)> {
        let frame = self.peer.receive_raw()?;
        let datagram = &frame[ETHERNET_HEADER_LEN..];
        let header = parse_ipv4(datagram, true).expect("stack emitted a parseable header");
        let payload = datagram[header.header_len()..header.total_length as usize].to_vec();
        Some((header, payload))
    }

    /// Drain and count outbound datagrams
    pub fn drain_outbound(&mut self) -> Vec<(Ipv4Header, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(entry) = self.outbound() {
            out.push(entry);
        }
        out
    }
}

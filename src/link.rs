// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Link layer seam.
//!
//! The dispatcher talks to an injected [`LinkLayer`]: frames handed to
//! `send` are complete IPv4 datagrams plus the next-hop address the link
//! needs for Ethernet addressing, and `receive` yields IPv4 datagrams with
//! the Ethernet framing already stripped.
//!
//! [`PipeLink`] is the provided in-process implementation: a pair of
//! endpoints joined by two queues, carrying real Ethernet framing so the
//! IANA multicast MAC mapping is exercised end to end. It stands in for a
//! NIC driver plus ARP in tests and demos.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::addr::MacAddress;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Ethernet frame transmission and reception
pub trait LinkLayer {
    /// Send an IPv4 datagram toward `next_hop`. Returns false if the frame
    /// could not be queued.
    fn send(&mut self, next_hop: Ipv4Addr, datagram: &[u8]) -> bool;

    /// Receive the next pending IPv4 datagram into `buffer`, returning its
    /// length, or `None` when nothing is pending.
    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize>;
}

type FrameQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// In-process link: one endpoint of a bidirectional frame pipe.
///
/// Outbound datagrams are wrapped in an Ethernet header whose destination
/// MAC is derived from the next-hop (IANA mapping for multicast, broadcast
/// MAC for 255.255.255.255, a locally-administered stand-in for unicast,
/// since there is no ARP here). Inbound frames are checked for the IPv4
/// EtherType and unwrapped.
pub struct PipeLink {
    local_mac: MacAddress,
    tx: FrameQueue,
    rx: FrameQueue,
}

impl PipeLink {
    /// Create two connected endpoints
    pub fn pair() -> (PipeLink, PipeLink) {
        let a_to_b: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));

        let a = PipeLink {
            local_mac: MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x0A]),
            tx: Arc::clone(&a_to_b),
            rx: Arc::clone(&b_to_a),
        };
        let b = PipeLink {
            local_mac: MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x0B]),
            tx: b_to_a,
            rx: a_to_b,
        };
        (a, b)
    }

    /// Pop the next raw Ethernet frame without unwrapping, for tests that
    /// assert on the framing itself.
    pub fn receive_raw(&mut self) -> Option<Vec<u8>> {
        self.rx.lock().unwrap().pop_front()
    }

    /// Push a raw Ethernet frame into this endpoint's receive side
    pub fn inject_raw(&mut self, frame: Vec<u8>) {
        self.rx.lock().unwrap().push_back(frame);
    }

    fn destination_mac(next_hop: Ipv4Addr) -> MacAddress {
        if next_hop.is_broadcast() {
            MacAddress::BROADCAST
        } else if let Some(mac) = MacAddress::from_multicast_ip(next_hop) {
            mac
        } else {
            // No ARP on a pipe: map unicast next-hops to a stable
            // locally-administered address
            let ip = next_hop.octets();
            MacAddress::new([0x02, 0x00, ip[0], ip[1], ip[2], ip[3]])
        }
    }
}

impl LinkLayer for PipeLink {
    fn send(&mut self, next_hop: Ipv4Addr, datagram: &[u8]) -> bool {
        let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + datagram.len());
        frame.extend_from_slice(&Self::destination_mac(next_hop).octets());
        frame.extend_from_slice(&self.local_mac.octets());
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame.extend_from_slice(datagram);

        self.tx.lock().unwrap().push_back(frame);
        true
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
        loop {
            let frame = self.rx.lock().unwrap().pop_front()?;
            if frame.len() <= ETHERNET_HEADER_LEN {
                continue;
            }
            let ether_type = u16::from_be_bytes([frame[12], frame[13]]);
            if ether_type != ETHERTYPE_IPV4 {
                continue;
            }
            let datagram = &frame[ETHERNET_HEADER_LEN..];
            if datagram.len() > buffer.len() {
                continue;
            }
            buffer[..datagram.len()].copy_from_slice(datagram);
            return Some(datagram.len());
        }
    }
}

/// Wrap an IPv4 datagram in an Ethernet frame addressed to `destination`,
/// for tests that hand-craft inbound traffic.
pub fn wrap_ethernet(destination: MacAddress, source: MacAddress, datagram: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + datagram.len());
    frame.extend_from_slice(&destination.octets());
    frame.extend_from_slice(&source.octets());
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    frame.extend_from_slice(datagram);
    frame
}

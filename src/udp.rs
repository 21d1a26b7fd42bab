// SPDX-License-Identifier: Apache-2.0 OR MIT
//! UDP endpoints with the multicast subscription surface.
//!
//! A [`UdpConnection`] is either actively opened (bound to one foreign
//! address and port, the "connected" shape) or passively opened (a listener
//! on a local port). Only passive endpoints may subscribe to a multicast
//! group; the subscription is announced to the network layer, which drives
//! IGMP.
//!
//! Inbound delivery is a fan-out: the transport loop dequeues datagrams from
//! [`crate::NetworkLayer::receive`] and offers each one to its endpoints via
//! [`UdpConnection::packet_received`], which applies the match rules and
//! queues accepted payloads for [`UdpConnection::recv_from`]. Receiving is
//! non-blocking; waiting for data is the caller's concern.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::addr::Ipv4AddrExt;
use crate::checksum::{udp_checksum, CHECKSUM_OK};
use crate::config::NetConfig;
use crate::logging::{Facility, Logger};
use crate::network::NetworkLayer;
use crate::packet::{
    build_udp_segment, parse_udp, ParseError, FRAME_BUFFER_SIZE, IPPROTO_UDP, IPV4_HEADER_MIN,
    UDP_HEADER_LEN,
};
use crate::{log_debug, log_notice};

/// Errors surfaced by the UDP endpoint API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UdpError {
    #[error("endpoint is closed")]
    NotOpen,

    #[error("send on a passively-opened endpoint requires send_to")]
    NotConnected,

    #[error("{0} is not a joinable multicast group")]
    NotMulticast(Ipv4Addr),

    #[error("multicast join on an actively-opened endpoint")]
    ActiveOpen,

    #[error("broadcast destination but broadcasts are not allowed")]
    BroadcastNotAllowed,

    #[error("payload does not fit in a frame")]
    PayloadTooLarge,

    #[error("network layer could not send")]
    SendFailed,
}

/// A received datagram with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: Ipv4Addr,
    pub source_port: u16,
}

/// UDP endpoint
pub struct UdpConnection {
    own_port: u16,
    foreign_ip: Ipv4Addr,
    foreign_port: u16,
    open: bool,
    active_open: bool,
    broadcasts_allowed: bool,
    multicast_group: Option<Ipv4Addr>,
    rx_queue: VecDeque<Datagram>,
    logger: Logger,
}

impl UdpConnection {
    /// Actively-opened endpoint bound to one foreign address and port
    pub fn connect_to(
        foreign_ip: Ipv4Addr,
        foreign_port: u16,
        own_port: u16,
        logger: Logger,
    ) -> Self {
        Self {
            own_port,
            foreign_ip,
            foreign_port,
            open: true,
            active_open: true,
            broadcasts_allowed: false,
            multicast_group: None,
            rx_queue: VecDeque::new(),
            logger,
        }
    }

    /// Passively-opened endpoint listening on `own_port`
    pub fn listen_on(own_port: u16, logger: Logger) -> Self {
        Self {
            own_port,
            foreign_ip: Ipv4Addr::UNSPECIFIED,
            foreign_port: 0,
            open: true,
            active_open: false,
            broadcasts_allowed: false,
            multicast_group: None,
            rx_queue: VecDeque::new(),
            logger,
        }
    }

    pub fn own_port(&self) -> u16 {
        self.own_port
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    /// Allow sending to and receiving from broadcast addresses
    pub fn set_broadcast_option(&mut self, allowed: bool) {
        self.broadcasts_allowed = allowed;
    }

    /// Endpoint is subscribed to a multicast group
    pub fn is_multicast_connection(&self) -> bool {
        self.multicast_group
            .is_some_and(|g| g.is_set() && g.is_multicast())
    }

    /// Subscribe to a multicast group and announce it via IGMP.
    ///
    /// Fails on actively-opened endpoints and on non-multicast addresses.
    /// A second join replaces the previous subscription only after an
    /// explicit leave; joining while subscribed re-announces the same group
    /// at the IGMP layer, which treats it as a no-op.
    pub fn join_multicast_group(
        &mut self,
        group: Ipv4Addr,
        net: &mut NetworkLayer,
    ) -> Result<(), UdpError> {
        if !group.is_set() || !group.is_multicast() {
            return Err(UdpError::NotMulticast(group));
        }

        if self.active_open {
            // Multicast reception needs the passive constructor
            return Err(UdpError::ActiveOpen);
        }

        self.multicast_group = Some(group);
        log_notice!(
            self.logger,
            Facility::Udp,
            "port {} subscribed to {}",
            self.own_port,
            group
        );

        net.notify_join_group(group);
        Ok(())
    }

    /// Drop the multicast subscription if it matches `group` and announce
    /// the leave via IGMP. Leaving an unsubscribed group succeeds silently.
    pub fn leave_multicast_group(&mut self, group: Ipv4Addr, net: &mut NetworkLayer) {
        if self.multicast_group == Some(group) {
            net.notify_leave_group(group);
            self.multicast_group = None;
            log_notice!(
                self.logger,
                Facility::Udp,
                "port {} unsubscribed from {}",
                self.own_port,
                group
            );
        }
    }

    /// Send to the connected foreign address (active endpoints only)
    pub fn send(&mut self, payload: &[u8], net: &mut NetworkLayer) -> Result<usize, UdpError> {
        if !self.open {
            return Err(UdpError::NotOpen);
        }
        if !self.active_open {
            return Err(UdpError::NotConnected);
        }
        self.send_segment(payload, self.foreign_ip, self.foreign_port, net)
    }

    /// Send to an explicit destination. On an actively-opened endpoint the
    /// destination is ignored in favor of the connected address.
    pub fn send_to(
        &mut self,
        payload: &[u8],
        destination: Ipv4Addr,
        destination_port: u16,
        net: &mut NetworkLayer,
    ) -> Result<usize, UdpError> {
        if !self.open {
            return Err(UdpError::NotOpen);
        }
        if self.active_open {
            return self.send_segment(payload, self.foreign_ip, self.foreign_port, net);
        }
        self.send_segment(payload, destination, destination_port, net)
    }

    fn send_segment(
        &mut self,
        payload: &[u8],
        destination: Ipv4Addr,
        destination_port: u16,
        net: &mut NetworkLayer,
    ) -> Result<usize, UdpError> {
        if payload.is_empty()
            || IPV4_HEADER_MIN + UDP_HEADER_LEN + payload.len() > FRAME_BUFFER_SIZE
        {
            return Err(UdpError::PayloadTooLarge);
        }

        if !self.broadcasts_allowed
            && (destination.is_broadcast() || destination == net.config().broadcast_address())
        {
            return Err(UdpError::BroadcastNotAllowed);
        }

        let segment = build_udp_segment(
            net.config().ip_address(),
            destination,
            self.own_port,
            destination_port,
            payload,
        );

        if net.send(destination, &segment, IPPROTO_UDP) {
            Ok(payload.len())
        } else {
            Err(UdpError::SendFailed)
        }
    }

    /// Dequeue the next received datagram, or `None` when empty
    pub fn recv_from(&mut self) -> Option<Datagram> {
        self.rx_queue.pop_front()
    }

    pub fn has_data(&self) -> bool {
        !self.rx_queue.is_empty()
    }

    /// Offer an inbound datagram to this endpoint.
    ///
    /// Returns `Ok(true)` when the datagram was accepted and queued,
    /// `Ok(false)` when it is not for this endpoint, and an error when it
    /// was for this endpoint but malformed.
    ///
    /// A datagram addressed to receiver IP `r` is accepted iff one of:
    /// - `r` is multicast, this endpoint is subscribed, and `r` equals the
    ///   subscribed group;
    /// - the endpoint is actively opened and sender address and port match
    ///   the connected foreign pair;
    /// - the endpoint is passively opened, `r` is a link or subnet
    ///   broadcast, and broadcasts are allowed;
    /// - the endpoint is passively opened and `r` is unicast to this host.
    ///
    /// In every case the destination port must equal this endpoint's port.
    pub fn packet_received(
        &mut self,
        packet: &[u8],
        sender: Ipv4Addr,
        receiver: Ipv4Addr,
        protocol: u8,
        config: &NetConfig,
    ) -> Result<bool, ParseError> {
        if protocol != IPPROTO_UDP || !self.open {
            return Ok(false);
        }

        if packet.len() <= UDP_HEADER_LEN {
            return Err(ParseError::PacketTooShort {
                expected: UDP_HEADER_LEN + 1,
                actual: packet.len(),
            });
        }

        let header = parse_udp(packet).expect("length checked above");

        if self.own_port != header.dst_port {
            return Ok(false);
        }

        let for_this_connection = if receiver.is_multicast() {
            self.is_multicast_connection() && self.multicast_group == Some(receiver)
        } else if self.active_open {
            self.foreign_port == header.src_port && self.foreign_ip == sender
        } else if receiver.is_broadcast() || receiver == config.broadcast_address() {
            self.broadcasts_allowed
        } else {
            // Unicast to this host on our port
            true
        };

        if !for_this_connection {
            return Ok(false);
        }

        let segment_length = header.length as usize;
        if packet.len() < segment_length || segment_length <= UDP_HEADER_LEN {
            return Err(ParseError::TruncatedPacket {
                total_length: segment_length,
                actual: packet.len(),
            });
        }

        // Zero on the wire means the sender skipped the checksum
        if header.checksum != 0
            && udp_checksum(sender, receiver, &packet[..segment_length]) != CHECKSUM_OK
        {
            return Err(ParseError::UdpChecksumMismatch);
        }

        log_debug!(
            self.logger,
            Facility::Udp,
            "datagram from {}:{} queued on port {}",
            sender,
            header.src_port,
            self.own_port
        );

        self.rx_queue.push_back(Datagram {
            payload: packet[UDP_HEADER_LEN..segment_length].to_vec(),
            source: sender,
            source_port: header.src_port,
        });

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(port: u16) -> UdpConnection {
        UdpConnection::listen_on(port, Logger::null())
    }

    fn segment(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        // Checksum left at zero: accepted without validation
        let length = (UDP_HEADER_LEN + payload.len()) as u16;
        let mut segment = Vec::new();
        segment.extend_from_slice(&src_port.to_be_bytes());
        segment.extend_from_slice(&dst_port.to_be_bytes());
        segment.extend_from_slice(&length.to_be_bytes());
        segment.extend_from_slice(&[0, 0]);
        segment.extend_from_slice(payload);
        segment
    }

    fn home_config() -> NetConfig {
        NetConfig::configured(
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(192, 168, 1, 1),
        )
    }

    #[test]
    fn test_wrong_port_is_not_mine() {
        let mut conn = listener(5000);
        let accepted = conn
            .packet_received(
                &segment(1234, 5001, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(192, 168, 1, 10),
                IPPROTO_UDP,
                &home_config(),
            )
            .unwrap();
        assert!(!accepted);
        assert!(!conn.has_data());
    }

    #[test]
    fn test_passive_accepts_unicast() {
        let mut conn = listener(5000);
        let accepted = conn
            .packet_received(
                &segment(1234, 5000, b"hello"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(192, 168, 1, 10),
                IPPROTO_UDP,
                &home_config(),
            )
            .unwrap();
        assert!(accepted);

        let datagram = conn.recv_from().unwrap();
        assert_eq!(datagram.payload, b"hello");
        assert_eq!(datagram.source, Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(datagram.source_port, 1234);
    }

    #[test]
    fn test_broadcast_needs_opt_in() {
        let config = home_config();
        let mut conn = listener(5000);

        let accepted = conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::BROADCAST,
                IPPROTO_UDP,
                &config,
            )
            .unwrap();
        assert!(!accepted);

        conn.set_broadcast_option(true);
        let accepted = conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::BROADCAST,
                IPPROTO_UDP,
                &config,
            )
            .unwrap();
        assert!(accepted);

        // Subnet broadcast counts as broadcast too
        let accepted = conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(192, 168, 1, 255),
                IPPROTO_UDP,
                &config,
            )
            .unwrap();
        assert!(accepted);
    }

    #[test]
    fn test_active_matches_connected_peer_only() {
        let mut conn = UdpConnection::connect_to(
            Ipv4Addr::new(192, 168, 1, 20),
            7000,
            5000,
            Logger::null(),
        );
        let config = home_config();
        let receiver = Ipv4Addr::new(192, 168, 1, 10);

        // Right peer, right port
        assert!(conn
            .packet_received(
                &segment(7000, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                receiver,
                IPPROTO_UDP,
                &config,
            )
            .unwrap());

        // Wrong source port
        assert!(!conn
            .packet_received(
                &segment(7001, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                receiver,
                IPPROTO_UDP,
                &config,
            )
            .unwrap());

        // Wrong sender address
        assert!(!conn
            .packet_received(
                &segment(7000, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 21),
                receiver,
                IPPROTO_UDP,
                &config,
            )
            .unwrap());
    }

    #[test]
    fn test_multicast_requires_matching_subscription() {
        let mut conn = listener(5000);
        conn.multicast_group = Some(Ipv4Addr::new(239, 1, 2, 3));
        let config = home_config();

        assert!(conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(239, 1, 2, 3),
                IPPROTO_UDP,
                &config,
            )
            .unwrap());

        // Another group is not delivered, even though it is multicast
        assert!(!conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(239, 9, 9, 9),
                IPPROTO_UDP,
                &config,
            )
            .unwrap());
    }

    #[test]
    fn test_multicast_not_delivered_without_subscription() {
        let mut conn = listener(5000);
        assert!(!conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(239, 1, 2, 3),
                IPPROTO_UDP,
                &home_config(),
            )
            .unwrap());
    }

    #[test]
    fn test_checksum_validated_when_present() {
        let src = Ipv4Addr::new(192, 168, 1, 20);
        let dst = Ipv4Addr::new(192, 168, 1, 10);
        let mut conn = listener(5000);
        let config = home_config();

        // Correct checksum accepted
        let good = build_udp_segment(src, dst, 1234, 5000, b"data");
        assert!(conn
            .packet_received(&good, src, dst, IPPROTO_UDP, &config)
            .unwrap());

        // Corrupted checksum rejected
        let mut bad = build_udp_segment(src, dst, 1234, 5000, b"data");
        bad[6] ^= 0xFF;
        assert_eq!(
            conn.packet_received(&bad, src, dst, IPPROTO_UDP, &config),
            Err(ParseError::UdpChecksumMismatch)
        );

        // Zero checksum skips validation
        let zero = segment(1234, 5000, b"data");
        assert!(conn
            .packet_received(&zero, src, dst, IPPROTO_UDP, &config)
            .unwrap());
    }

    #[test]
    fn test_truncated_segment_is_an_error() {
        let mut conn = listener(5000);
        let mut seg = segment(1234, 5000, b"full payload");
        seg.truncate(12); // shorter than the length field claims
        let result = conn.packet_received(
            &seg,
            Ipv4Addr::new(192, 168, 1, 20),
            Ipv4Addr::new(192, 168, 1, 10),
            IPPROTO_UDP,
            &home_config(),
        );
        assert!(matches!(result, Err(ParseError::TruncatedPacket { .. })));
    }

    #[test]
    fn test_other_protocol_is_not_mine() {
        let mut conn = listener(5000);
        let accepted = conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(192, 168, 1, 10),
                6, // TCP
                &home_config(),
            )
            .unwrap();
        assert!(!accepted);
    }

    #[test]
    fn test_closed_endpoint_accepts_nothing() {
        let mut conn = listener(5000);
        conn.close();
        assert!(!conn.is_open());
        let accepted = conn
            .packet_received(
                &segment(1234, 5000, b"x"),
                Ipv4Addr::new(192, 168, 1, 20),
                Ipv4Addr::new(192, 168, 1, 10),
                IPPROTO_UDP,
                &home_config(),
            )
            .unwrap();
        assert!(!accepted);
    }
}

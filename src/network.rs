// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IPv4 network layer: inbound dispatch and outbound send.
//!
//! [`NetworkLayer::process`] drains the link layer, parses and validates each
//! IPv4 datagram, applies the destination acceptance rules (including the
//! no-local-IP bootstrap window DHCP depends on), rejects fragments, and
//! demultiplexes by protocol: ICMP is queued for its handler, IGMP is
//! dispatched synchronously into the owned [`IgmpHandler`], and everything
//! else lands in the generic receive queue for the transport layer.
//!
//! The outbound path composes a 20-byte header and resolves the next hop:
//! multicast and on-subnet destinations go direct, everything else through
//! the route cache or the default gateway. Routing failures synthesize a
//! destination-unreachable notification through the injected
//! [`IcmpNotifier`] and fail the send.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use crate::addr::Ipv4AddrExt;
use crate::config::NetConfig;
use crate::link::LinkLayer;
use crate::logging::{Facility, Logger};
use crate::packet::{
    build_ipv4_header, parse_ipv4, ParseError, FRAME_BUFFER_SIZE, IPPROTO_ICMP, IPPROTO_IGMP,
    IPV4_HEADER_MIN,
};
use crate::protocols::igmp::IgmpHandler;
use crate::timer::DeadlineService;
use crate::{log_debug, log_warning};

/// ICMP destination unreachable, code "net unreachable"
pub const ICMP_CODE_DEST_NET_UNREACH: u8 = 0;

/// Per-datagram metadata handed to protocol consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPacketMeta {
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

/// Collaborator notified when an outbound packet cannot be routed.
///
/// Gets the fully-built packet that failed, the way a real ICMP handler
/// would quote it in a destination-unreachable message.
pub trait IcmpNotifier {
    fn destination_unreachable(&mut self, code: u8, packet: &[u8]);
}

/// Default notifier that drops all notifications
pub struct NullIcmpNotifier;

impl IcmpNotifier for NullIcmpNotifier {
    fn destination_unreachable(&mut self, _code: u8, _packet: &[u8]) {}
}

/// Host-route cache mapping destinations to gateways
#[derive(Debug, Default)]
pub struct RouteCache {
    routes: HashMap<Ipv4Addr, Ipv4Addr>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, destination: Ipv4Addr, gateway: Ipv4Addr) {
        self.routes.insert(destination, gateway);
    }

    pub fn lookup(&self, destination: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes.get(&destination).copied()
    }
}

/// Outbound send capability.
///
/// Holds everything the send path needs - configuration, link, route cache
/// and the ICMP collaborator - separate from the inbound state so that the
/// IGMP handler can borrow it while the network layer drives dispatch.
pub struct Ipv4Tx {
    config: NetConfig,
    link: Box<dyn LinkLayer>,
    routes: RouteCache,
    icmp: Box<dyn IcmpNotifier>,
    logger: Logger,
}

impl Ipv4Tx {
    /// Snapshot view of the network identity
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut NetConfig {
        &mut self.config
    }

    fn receive_frame(&mut self, buffer: &mut [u8]) -> Option<usize> {
        self.link.receive(buffer)
    }

    /// Compose an IPv4 packet around `payload` and hand it to the link
    /// layer. Returns false when the packet cannot be built, routed or
    /// transmitted; routing failures also notify the ICMP collaborator.
    pub fn send(&mut self, destination: Ipv4Addr, payload: &[u8], protocol: u8) -> bool {
        let packet_length = IPV4_HEADER_MIN + payload.len();
        if payload.is_empty() || packet_length > FRAME_BUFFER_SIZE {
            return false;
        }

        let own = self.config.ip_address();

        let mut packet = Vec::with_capacity(packet_length);
        packet.extend_from_slice(&build_ipv4_header(
            own,
            destination,
            protocol,
            packet_length as u16,
        ));
        packet.extend_from_slice(payload);

        // Without a local IP only broadcasts may leave (DHCP discover)
        if own.is_null() && !destination.is_broadcast() {
            self.icmp
                .destination_unreachable(ICMP_CODE_DEST_NET_UNREACH, &packet);
            return false;
        }

        let next_hop = if destination.is_multicast()
            || own.on_same_network(destination, self.config.net_mask())
        {
            destination
        } else if let Some(gateway) = self.routes.lookup(destination) {
            gateway
        } else {
            let gateway = self.config.default_gateway();
            if gateway.is_null() {
                log_debug!(
                    self.logger,
                    Facility::Network,
                    "no route to {}, reporting unreachable",
                    destination
                );
                self.icmp
                    .destination_unreachable(ICMP_CODE_DEST_NET_UNREACH, &packet);
                return false;
            }
            gateway
        };

        self.link.send(next_hop, &packet)
    }
}

type PacketQueue = VecDeque<(Vec<u8>, NetworkPacketMeta)>;

/// IPv4 dispatcher. Owns the IGMP handler for its lifetime.
pub struct NetworkLayer {
    tx: Ipv4Tx,
    igmp: IgmpHandler,
    rx_queue: PacketQueue,
    icmp_queue: PacketQueue,
    icmp_raw_queue: Option<PacketQueue>,
    logger: Logger,
}

impl NetworkLayer {
    pub fn new(
        config: NetConfig,
        link: Box<dyn LinkLayer>,
        timers: Box<dyn DeadlineService>,
        logger: Logger,
    ) -> Self {
        let mut igmp = IgmpHandler::new(timers, logger.clone());
        igmp.initialize();

        Self {
            tx: Ipv4Tx {
                config,
                link,
                routes: RouteCache::new(),
                icmp: Box::new(NullIcmpNotifier),
                logger: logger.clone(),
            },
            igmp,
            rx_queue: VecDeque::new(),
            icmp_queue: VecDeque::new(),
            icmp_raw_queue: None,
            logger,
        }
    }

    /// Replace the ICMP collaborator
    pub fn set_icmp_notifier(&mut self, notifier: Box<dyn IcmpNotifier>) {
        self.tx.icmp = notifier;
    }

    pub fn config(&self) -> &NetConfig {
        self.tx.config()
    }

    pub fn config_mut(&mut self) -> &mut NetConfig {
        self.tx.config_mut()
    }

    /// Inspect the IGMP handler (memberships, scheduled report)
    pub fn igmp(&self) -> &IgmpHandler {
        &self.igmp
    }

    pub fn add_route(&mut self, destination: Ipv4Addr, gateway: Ipv4Addr) {
        self.tx.routes.add_route(destination, gateway);
    }

    /// Gateway that would carry traffic to `destination`: a cached host
    /// route if present, the default gateway otherwise.
    pub fn gateway_for(&self, destination: Ipv4Addr) -> Ipv4Addr {
        self.tx
            .routes
            .lookup(destination)
            .unwrap_or_else(|| self.tx.config.default_gateway())
    }

    /// Drain the link layer, dispatching every acceptable datagram, then
    /// deliver any expired IGMP deadlines. Runs to completion on the
    /// caller's thread.
    pub fn process(&mut self) {
        let mut buffer = [0u8; FRAME_BUFFER_SIZE];

        while let Some(length) = self.tx.receive_frame(&mut buffer) {
            self.dispatch(&buffer[..length]);
        }

        self.igmp.deliver_deadlines(&mut self.tx);
    }

    /// Advance the IGMP deadline clock by `ticks`; expiries are delivered on
    /// the next [`process`](Self::process) call.
    pub fn advance_ticks(&mut self, ticks: u32) {
        self.igmp.advance_ticks(ticks);
    }

    fn dispatch(&mut self, frame: &[u8]) {
        if let Err(e) = self.try_dispatch(frame) {
            log_warning!(self.logger, Facility::Network, "dropped inbound packet: {}", e);
        }
    }

    /// Parse, accept and demultiplex one inbound frame. `Ok` covers both
    /// delivery and the silent drops (wrong destination, nothing past the
    /// header); malformed and fragmented packets come back as errors for the
    /// caller to log.
    fn try_dispatch(&mut self, frame: &[u8]) -> Result<(), ParseError> {
        // A header-only datagram carries nothing to dispatch
        if frame.len() <= IPV4_HEADER_MIN {
            return Ok(());
        }

        let header = parse_ipv4(frame, true)?;

        let header_len = header.header_len();
        if frame.len() <= header_len {
            return Ok(());
        }

        let destination = header.dst_ip;
        let own = self.tx.config.ip_address();
        let accepted = if own.is_set() {
            destination == own
                || destination.is_broadcast()
                || destination.is_multicast()
                || destination == self.tx.config.broadcast_address()
        } else {
            // No IP yet (DHCP bootstrap): unicast cannot be matched, only
            // broadcast and multicast pass
            destination.is_broadcast() || destination.is_multicast()
        };
        if !accepted {
            return Ok(());
        }

        // Only whole, unfragmented datagrams are handled
        if header.is_fragmented() {
            return Err(ParseError::FragmentedPacket);
        }

        let total_length = header.total_length as usize;
        if frame.len() < total_length {
            return Err(ParseError::TruncatedPacket {
                total_length,
                actual: frame.len(),
            });
        }
        if total_length <= header_len {
            return Ok(());
        }

        // Ignore link padding beyond the IP total length
        let payload = &frame[header_len..total_length];
        let meta = NetworkPacketMeta {
            protocol: header.protocol,
            source: header.src_ip,
            destination,
        };

        match header.protocol {
            IPPROTO_ICMP => {
                if let Some(raw_queue) = self.icmp_raw_queue.as_mut() {
                    raw_queue.push_back((payload.to_vec(), meta));
                }
                self.icmp_queue.push_back((payload.to_vec(), meta));
            }
            IPPROTO_IGMP => {
                // Synchronous dispatch; nothing is queued for IGMP
                self.igmp.process_packet(payload, header.src_ip);
            }
            _ => {
                self.rx_queue.push_back((payload.to_vec(), meta));
            }
        }

        Ok(())
    }

    /// Send `payload` as an IPv4 packet to `destination`
    pub fn send(&mut self, destination: Ipv4Addr, payload: &[u8], protocol: u8) -> bool {
        self.tx.send(destination, payload, protocol)
    }

    /// UDP endpoints announce a group membership through here
    pub fn notify_join_group(&mut self, group: Ipv4Addr) {
        self.igmp.join_group(group, &mut self.tx);
    }

    /// UDP endpoints retract a group membership through here
    pub fn notify_leave_group(&mut self, group: Ipv4Addr) {
        self.igmp.leave_group(group, &mut self.tx);
    }

    /// Dequeue the next non-ICMP, non-IGMP datagram for the transport layer
    pub fn receive(&mut self) -> Option<(Vec<u8>, NetworkPacketMeta)> {
        self.rx_queue.pop_front()
    }

    /// Dequeue the next ICMP payload for the ICMP handler
    pub fn dequeue_icmp(&mut self) -> Option<(Vec<u8>, NetworkPacketMeta)> {
        self.icmp_queue.pop_front()
    }

    /// Enable or disable the secondary raw ICMP queue. Disabling discards
    /// anything still queued.
    pub fn enable_receive_icmp(&mut self, enable: bool) {
        if enable {
            if self.icmp_raw_queue.is_none() {
                self.icmp_raw_queue = Some(VecDeque::new());
            }
        } else {
            self.icmp_raw_queue = None;
        }
    }

    /// Dequeue from the secondary raw ICMP queue, if enabled
    pub fn receive_icmp(&mut self) -> Option<(Vec<u8>, NetworkPacketMeta)> {
        self.icmp_raw_queue.as_mut()?.pop_front()
    }
}

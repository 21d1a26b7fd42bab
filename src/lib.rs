// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Host-side IPv4 multicast stack core.
//!
//! This crate implements the receiving half of IPv4 multicast for a
//! cooperative, single-threaded network stack:
//!
//! - **IGMPv2 host state machine** ([`protocols::igmp`]): group join/leave
//!   bookkeeping, unsolicited membership reports, randomized responses to
//!   membership queries, and leave-group notification (RFC 2236, host side
//!   only).
//! - **IPv4 dispatcher** ([`network`]): inbound parse/accept/demultiplex and
//!   outbound header composition with next-hop selection.
//! - **UDP endpoint** ([`udp`]): the multicast-subscription surface that
//!   drives IGMP, plus the inbound datagram match rules.
//!
//! The stack never spawns threads and takes no locks: `NetworkLayer::process`
//! runs to completion on the caller's thread, and IGMP deadlines are
//! delivered at that same cooperative point via [`timer::DeadlineService`].
//! The link layer and the ICMP error path are injected collaborators, so the
//! whole stack can run over an in-process [`link::PipeLink`] pair for tests
//! and demos.

pub mod addr;
pub mod checksum;
pub mod config;
pub mod link;
#[macro_use]
pub mod logging;
pub mod network;
pub mod packet;
pub mod protocols;
pub mod timer;
pub mod udp;
pub mod validation;

pub use addr::{Ipv4AddrExt, MacAddress};
pub use config::NetConfig;
pub use logging::{Facility, Logger, Severity};
pub use network::{NetworkLayer, NetworkPacketMeta};
pub use protocols::igmp::IgmpHandler;
pub use timer::{DeadlineService, TickTimer};
pub use udp::UdpConnection;

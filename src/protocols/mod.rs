// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Protocol implementations.
//!
//! Currently only the IGMPv2 host side lives here; ICMP and TCP are external
//! collaborators of the dispatcher, and UDP has its own top-level module
//! because it carries the socket surface as well as the wire format.

pub mod igmp;

/// Common trait for protocol packet builders
pub trait PacketBuilder {
    /// Build a packet for transmission, checksum filled in
    fn build(&self) -> Vec<u8>;
}

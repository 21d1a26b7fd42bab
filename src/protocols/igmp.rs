// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMPv2 host-side state machine (RFC 2236).
//!
//! This module implements the participant role of IGMPv2: announcing group
//! membership so upstream routers forward multicast onto the link, and
//! answering membership queries to keep that forwarding state alive. The
//! querier role is out of scope.
//!
//! ## Behavior
//!
//! - **Join**: record the membership and immediately emit an unsolicited
//!   V2 Membership Report destined to the group itself.
//! - **Query**: pick one reportable group (queries for 224.0.0.0/24 and for
//!   groups we have not joined are ignored), then schedule a single report
//!   after a uniformly random delay in `[0, Max Response Time)`. While a
//!   report is armed, further queries are ignored.
//! - **Leave**: emit a Leave Group message to 224.0.0.2, cancel the armed
//!   report if it names the leaving group, drop the membership.
//!
//! ## IGMP Message Types
//!
//! | Type | Value | Handling |
//! |------|-------|----------|
//! | Membership Query | 0x11 | schedule a report |
//! | V1 Membership Report | 0x12 | ignored |
//! | V2 Membership Report | 0x16 | ignored (hosts do not suppress on peers) |
//! | Leave Group | 0x17 | ignored |

use std::net::Ipv4Addr;

use crate::addr::{Ipv4AddrExt, ALL_ROUTERS_GROUP};
use crate::checksum::{internet_checksum, CHECKSUM_OK};
use crate::logging::{Facility, Logger};
use crate::network::Ipv4Tx;
use crate::packet::IPPROTO_IGMP;
use crate::protocols::PacketBuilder;
use crate::timer::{msec_to_ticks, DeadlineHandle, DeadlineService};
use crate::{log_debug, log_error, log_info, log_notice, log_warning};

// IGMP message types
pub const IGMP_MEMBERSHIP_QUERY: u8 = 0x11;
pub const IGMP_V1_MEMBERSHIP_REPORT: u8 = 0x12;
pub const IGMP_V2_MEMBERSHIP_REPORT: u8 = 0x16;
pub const IGMP_LEAVE_GROUP: u8 = 0x17;

/// Wire size of every IGMPv2 message
pub const IGMP_MESSAGE_LEN: usize = 8;

/// Default Max Response Time substituted for a raw value of 0, in tenths of
/// a second (RFC 2236: 10 seconds)
pub const IGMP_MAX_RESPONSE_DELAY_DEFAULT: u8 = 100;

/// Parsed IGMPv2 message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgmpHeader {
    /// Message type
    pub msg_type: u8,
    /// Max response time in 1/10 s - only meaningful for queries
    pub max_resp_time: u8,
    /// Checksum as received
    pub checksum: u16,
    /// Group address, 0.0.0.0 for a General Query
    pub group: Ipv4Addr,
}

impl IgmpHeader {
    /// Parse an IGMP header from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < IGMP_MESSAGE_LEN {
            return None;
        }

        Some(Self {
            msg_type: data[0],
            max_resp_time: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            group: Ipv4Addr::new(data[4], data[5], data[6], data[7]),
        })
    }

    /// Check if this is a General Query (group = 0.0.0.0)
    pub fn is_general_query(&self) -> bool {
        self.msg_type == IGMP_MEMBERSHIP_QUERY && self.group.is_null()
    }

    /// Check if this is a Group-Specific Query
    pub fn is_group_specific_query(&self) -> bool {
        self.msg_type == IGMP_MEMBERSHIP_QUERY && self.group.is_set()
    }

    pub fn type_name(&self) -> &'static str {
        match self.msg_type {
            IGMP_MEMBERSHIP_QUERY => "Membership Query",
            IGMP_V1_MEMBERSHIP_REPORT => "V1 Membership Report",
            IGMP_V2_MEMBERSHIP_REPORT => "V2 Membership Report",
            IGMP_LEAVE_GROUP => "Leave Group",
            _ => "Unknown",
        }
    }
}

fn build_message(msg_type: u8, group: Ipv4Addr) -> Vec<u8> {
    let mut packet = Vec::with_capacity(IGMP_MESSAGE_LEN);

    packet.push(msg_type);
    packet.push(0); // max response time is 0 for reports and leaves
    packet.extend_from_slice(&[0, 0]); // checksum placeholder
    packet.extend_from_slice(&group.octets());

    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());

    packet
}

/// Builder for V2 Membership Report messages
#[derive(Debug)]
pub struct IgmpReportBuilder {
    /// Group address being reported
    pub group: Ipv4Addr,
}

impl IgmpReportBuilder {
    pub fn new(group: Ipv4Addr) -> Self {
        Self { group }
    }
}

impl PacketBuilder for IgmpReportBuilder {
    fn build(&self) -> Vec<u8> {
        build_message(IGMP_V2_MEMBERSHIP_REPORT, self.group)
    }
}

/// Builder for Leave Group messages
#[derive(Debug)]
pub struct IgmpLeaveBuilder {
    /// Group address being left
    pub group: Ipv4Addr,
}

impl IgmpLeaveBuilder {
    pub fn new(group: Ipv4Addr) -> Self {
        Self { group }
    }
}

impl PacketBuilder for IgmpLeaveBuilder {
    fn build(&self) -> Vec<u8> {
        build_message(IGMP_LEAVE_GROUP, self.group)
    }
}

/// One joined multicast group
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupMembership {
    group: Ipv4Addr,
}

/// The single report the handler may have scheduled in response to a query
#[derive(Debug)]
struct ScheduledReport {
    group: Ipv4Addr,
    handle: DeadlineHandle,
}

/// IGMPv2 host state machine.
///
/// Owns the set of joined groups and at most one scheduled report. The
/// deadline service is constructor-injected; outbound sends go through the
/// [`Ipv4Tx`] capability passed into each operation, so the handler holds no
/// reference back into the network layer that owns it.
///
/// Joined groups keep join order: a General Query is answered for the first
/// reportable group in that order.
pub struct IgmpHandler {
    joined: Vec<GroupMembership>,
    scheduled: Option<ScheduledReport>,
    timers: Box<dyn DeadlineService>,
    logger: Logger,
}

impl IgmpHandler {
    pub fn new(timers: Box<dyn DeadlineService>, logger: Logger) -> Self {
        Self {
            joined: Vec::new(),
            scheduled: None,
            timers,
            logger,
        }
    }

    /// Establish clean state. Idempotent; cancels any scheduled report and
    /// drops all memberships.
    pub fn initialize(&mut self) -> bool {
        if let Some(report) = self.scheduled.take() {
            self.timers.cancel(report.handle);
        }
        self.joined.clear();
        log_debug!(self.logger, Facility::Igmp, "initialized");
        true
    }

    /// Whether `group` is currently joined
    pub fn is_member(&self, group: Ipv4Addr) -> bool {
        self.joined.iter().any(|m| m.group == group)
    }

    /// Joined groups in join order
    pub fn joined_groups(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.joined.iter().map(|m| m.group)
    }

    /// Group a report is currently scheduled for, if any
    pub fn scheduled_group(&self) -> Option<Ipv4Addr> {
        self.scheduled.as_ref().map(|r| r.group)
    }

    /// Join a multicast group and emit an unsolicited membership report.
    ///
    /// Groups in 224.0.0.0/24 are link-local and never announced; joining
    /// one warns and records nothing. Joining an already-joined group is a
    /// no-op. Send failures are logged, never surfaced.
    pub fn join_group(&mut self, group: Ipv4Addr, tx: &mut Ipv4Tx) {
        if !group.is_multicast() {
            log_warning!(
                self.logger,
                Facility::Igmp,
                "join: {} is not a multicast address",
                group
            );
            return;
        }

        if group.is_link_local_multicast() {
            log_warning!(
                self.logger,
                Facility::Igmp,
                "join: {} is link-local, not announced",
                group
            );
            return;
        }

        if self.is_member(group) {
            log_debug!(self.logger, Facility::Igmp, "join: already member of {}", group);
            return;
        }

        self.joined.push(GroupMembership { group });
        log_notice!(self.logger, Facility::Igmp, "joined group {}", group);

        self.send_membership_report(group, true, tx);
    }

    /// Leave a multicast group: emit a Leave Group message to 224.0.0.2,
    /// cancel the scheduled report if it names this group, and drop the
    /// membership. Leaving a group that was never joined is a no-op.
    pub fn leave_group(&mut self, group: Ipv4Addr, tx: &mut Ipv4Tx) {
        if !group.is_multicast() {
            log_warning!(
                self.logger,
                Facility::Igmp,
                "leave: {} is not a multicast address",
                group
            );
            return;
        }

        if !self.is_member(group) {
            log_debug!(self.logger, Facility::Igmp, "leave: not a member of {}", group);
            return;
        }

        self.send_leave_group(group, tx);

        if self.scheduled.as_ref().is_some_and(|r| r.group == group) {
            let report = self.scheduled.take().expect("checked above");
            log_debug!(
                self.logger,
                Facility::Igmp,
                "leaving {}, cancelling its scheduled report",
                group
            );
            self.timers.cancel(report.handle);
        }

        self.joined.retain(|m| m.group != group);
        log_notice!(self.logger, Facility::Igmp, "left group {}", group);
    }

    /// Entry point for inbound IP protocol 2 payloads.
    ///
    /// Short and bad-checksum messages are dropped silently (warn log only);
    /// peers' reports and leaves are ignored. Nothing is sent from here: a
    /// query only arms a deadline, and the report goes out when it fires.
    pub fn process_packet(&mut self, payload: &[u8], sender: Ipv4Addr) {
        if payload.len() < IGMP_MESSAGE_LEN {
            log_warning!(self.logger, Facility::Igmp, "packet too short from {}", sender);
            return;
        }

        if internet_checksum(payload) != CHECKSUM_OK {
            log_warning!(self.logger, Facility::Igmp, "invalid checksum from {}", sender);
            return;
        }

        let header = IgmpHeader::parse(payload).expect("length checked above");

        match header.msg_type {
            IGMP_MEMBERSHIP_QUERY => self.handle_query(&header),
            IGMP_V2_MEMBERSHIP_REPORT | IGMP_LEAVE_GROUP => {
                log_debug!(
                    self.logger,
                    Facility::Igmp,
                    "received {} from {} (ignoring)",
                    header.type_name(),
                    sender
                );
            }
            other => {
                log_warning!(
                    self.logger,
                    Facility::Igmp,
                    "unknown IGMP type {:#04x} from {}",
                    other,
                    sender
                );
            }
        }
    }

    /// Advance the deadline service's clock
    pub fn advance_ticks(&mut self, ticks: u32) {
        self.timers.advance(ticks);
    }

    /// Deliver any expired deadlines: the cooperative point where a scheduled
    /// report actually fires. A deadline whose report was cancelled in the
    /// meantime produces no emission.
    pub fn deliver_deadlines(&mut self, tx: &mut Ipv4Tx) {
        while let Some(handle) = self.timers.poll_expired() {
            self.on_deadline_expired(handle, tx);
        }
    }

    fn on_deadline_expired(&mut self, handle: DeadlineHandle, tx: &mut Ipv4Tx) {
        // A fired handle that no longer matches the armed report was
        // cancelled after expiry; emit nothing.
        match self.scheduled.take() {
            Some(report) if report.handle == handle => {
                if report.group.is_set() && report.group.is_multicast() {
                    log_debug!(
                        self.logger,
                        Facility::Igmp,
                        "deadline fired, sending scheduled report for {}",
                        report.group
                    );
                    self.send_membership_report(report.group, false, tx);
                }
            }
            other => {
                self.scheduled = other;
                log_debug!(self.logger, Facility::Igmp, "stale deadline ignored");
            }
        }
    }

    fn handle_query(&mut self, header: &IgmpHeader) {
        let mut max_resp_tenths = header.max_resp_time;
        if max_resp_tenths == 0 {
            // RFC 2236: a raw value of 0 means the 10 second default
            max_resp_tenths = IGMP_MAX_RESPONSE_DELAY_DEFAULT;
        }
        let max_resp_ms = max_resp_tenths as u32 * 100;

        log_debug!(
            self.logger,
            Facility::Igmp,
            "query for {}, max response {} ms",
            if header.group.is_null() {
                "ALL".to_string()
            } else {
                header.group.to_string()
            },
            max_resp_ms
        );

        if self.scheduled.is_some() {
            log_debug!(
                self.logger,
                Facility::Igmp,
                "report already scheduled, ignoring query"
            );
            return;
        }

        let candidate = if header.group.is_null() {
            // General Query: first joined group that may be reported
            match self
                .joined
                .iter()
                .map(|m| m.group)
                .find(|g| !g.is_link_local_multicast())
            {
                Some(group) => group,
                None => {
                    log_debug!(self.logger, Facility::Igmp, "no reportable groups joined");
                    return;
                }
            }
        } else {
            // Group-Specific Query
            if header.group.is_link_local_multicast() {
                log_debug!(
                    self.logger,
                    Facility::Igmp,
                    "query for link-local {} skipped",
                    header.group
                );
                return;
            }
            if !self.is_member(header.group) {
                log_debug!(self.logger, Facility::Igmp, "not a member of {}", header.group);
                return;
            }
            header.group
        };

        let mut delay_ms = 0u32;
        if max_resp_ms > 0 {
            delay_ms = self.timers.random_u32() % max_resp_ms;
            // Hold the delay at or above the timer resolution
            if delay_ms < 10 && max_resp_ms >= 10 {
                delay_ms = 10;
            } else if delay_ms == 0 {
                delay_ms = 1;
            }
        }

        let mut delay_ticks = msec_to_ticks(delay_ms);
        if delay_ticks == 0 && delay_ms > 0 {
            delay_ticks = 1;
        }

        match self.timers.arm_after(delay_ticks) {
            Some(handle) => {
                log_debug!(
                    self.logger,
                    Facility::Igmp,
                    "scheduling report for {} in {} ms ({} ticks)",
                    candidate,
                    delay_ms,
                    delay_ticks
                );
                self.scheduled = Some(ScheduledReport {
                    group: candidate,
                    handle,
                });
            }
            None => {
                log_error!(
                    self.logger,
                    Facility::Igmp,
                    "failed to arm report deadline for {}",
                    candidate
                );
            }
        }
    }

    fn send_membership_report(&mut self, group: Ipv4Addr, unsolicited: bool, tx: &mut Ipv4Tx) {
        if !tx.config().ip_address().is_set() {
            log_warning!(
                self.logger,
                Facility::Igmp,
                "cannot send report for {}, no local IP",
                group
            );
            return;
        }

        let packet = IgmpReportBuilder::new(group).build();

        // Destination of a report is the group itself; the network layer
        // sets the multicast TTL of 1.
        if tx.send(group, &packet, IPPROTO_IGMP) {
            log_info!(
                self.logger,
                Facility::Igmp,
                "sent membership report for {} (unsolicited: {})",
                group,
                unsolicited
            );
        } else {
            log_error!(
                self.logger,
                Facility::Igmp,
                "failed to send membership report for {}",
                group
            );
        }
    }

    fn send_leave_group(&mut self, group: Ipv4Addr, tx: &mut Ipv4Tx) {
        if !tx.config().ip_address().is_set() {
            log_warning!(
                self.logger,
                Facility::Igmp,
                "cannot send leave for {}, no local IP",
                group
            );
            return;
        }

        let packet = IgmpLeaveBuilder::new(group).build();

        if tx.send(ALL_ROUTERS_GROUP, &packet, IPPROTO_IGMP) {
            log_info!(self.logger, Facility::Igmp, "sent leave group for {}", group);
        } else {
            log_error!(self.logger, Facility::Igmp, "failed to send leave group for {}", group);
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Address sanity checks shared by config parsing and the stack surface.
//!
//! Errors are plain strings naming the offending field, so callers can wrap
//! them in whatever error type fits their layer.

use std::net::Ipv4Addr;

use crate::addr::Ipv4AddrExt;

/// Result type for validation functions
pub type ValidationResult = Result<(), String>;

/// Validate that `addr` can name a single host on the link - an identity the
/// stack may claim for itself, or a next hop it can forward through.
///
/// Rules out the unassigned address, group and broadcast destinations.
/// `what` names the field being checked ("ip", "gateway") for the error text.
pub fn validate_host_address(addr: Ipv4Addr, what: &str) -> ValidationResult {
    if addr.is_null() {
        return Err(format!("{} is unset (0.0.0.0)", what));
    }
    if addr.is_multicast() {
        return Err(format!(
            "{} is {}, a multicast group rather than a host",
            what, addr
        ));
    }
    if addr.is_broadcast() {
        return Err(format!("{} is the link broadcast address", what));
    }
    Ok(())
}

/// Validate that an IPv4 address is a routable multicast group.
///
/// Rejects non-multicast addresses and the 224.0.0.0/24 link-local block,
/// which is never announced via IGMP.
pub fn validate_multicast_group(addr: Ipv4Addr, what: &str) -> ValidationResult {
    if !addr.is_multicast() {
        return Err(format!(
            "{} must be a multicast address (224.0.0.0/4), got {}",
            what, addr
        ));
    }
    if addr.is_link_local_multicast() {
        return Err(format!(
            "{} must not be in the link-local block 224.0.0.0/24, got {}",
            what, addr
        ));
    }
    Ok(())
}

/// Validate that a netmask has contiguous leading one bits.
pub fn validate_netmask(mask: Ipv4Addr) -> ValidationResult {
    let bits = u32::from(mask);
    // A valid mask inverted and incremented must be a power of two (or zero)
    let inverted = !bits;
    if inverted & inverted.wrapping_add(1) != 0 {
        return Err(format!("netmask {} is not contiguous", mask));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_addresses() {
        assert!(validate_host_address("10.0.0.1".parse().unwrap(), "ip").is_ok());
        assert!(validate_host_address("192.168.1.1".parse().unwrap(), "gateway").is_ok());
    }

    #[test]
    fn test_host_address_rejects_unset() {
        let err = validate_host_address(Ipv4Addr::UNSPECIFIED, "ip").unwrap_err();
        assert!(err.contains("ip"));
        assert!(err.contains("unset"));
    }

    #[test]
    fn test_host_address_rejects_multicast() {
        let err = validate_host_address("239.1.1.1".parse().unwrap(), "gateway").unwrap_err();
        assert!(err.contains("gateway"));
        assert!(err.contains("multicast group"));
    }

    #[test]
    fn test_host_address_rejects_broadcast() {
        let err = validate_host_address(Ipv4Addr::BROADCAST, "ip").unwrap_err();
        assert!(err.contains("broadcast"));
    }

    #[test]
    fn test_validate_multicast_group() {
        assert!(validate_multicast_group("239.1.2.3".parse().unwrap(), "group").is_ok());
        assert!(validate_multicast_group("224.1.0.0".parse().unwrap(), "group").is_ok());

        let result = validate_multicast_group("10.0.0.1".parse().unwrap(), "group");
        assert!(result.unwrap_err().contains("multicast"));

        let result = validate_multicast_group("224.0.0.5".parse().unwrap(), "group");
        assert!(result.unwrap_err().contains("link-local"));
    }

    #[test]
    fn test_validate_netmask() {
        assert!(validate_netmask("255.255.255.0".parse().unwrap()).is_ok());
        assert!(validate_netmask("255.255.0.0".parse().unwrap()).is_ok());
        assert!(validate_netmask("255.255.255.255".parse().unwrap()).is_ok());
        assert!(validate_netmask("0.0.0.0".parse().unwrap()).is_ok());
        assert!(validate_netmask("255.0.255.0".parse().unwrap()).is_err());
        assert!(validate_netmask("0.255.255.0".parse().unwrap()).is_err());
    }
}

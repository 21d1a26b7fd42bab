// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Network identity configuration.
//!
//! [`NetConfig`] is the runtime view: the stack's own address, netmask and
//! default gateway, mutated only through the setters (the seam a DHCP client
//! would use) and snapshot-read by the dispatcher and IGMP. An unspecified
//! address means "not yet configured" - the DHCP bootstrap window in which
//! the dispatcher only accepts broadcast and multicast destinations.
//!
//! [`StaticConfig`] is the JSON5 on-disk form the demo binary loads, with
//! comments and trailing commas allowed.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::addr::Ipv4AddrExt;
use crate::validation::{validate_host_address, validate_netmask};

/// Runtime network identity, snapshot-read by the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    ip: Ipv4Addr,
    netmask: Ipv4Addr,
    gateway: Ipv4Addr,
}

impl NetConfig {
    /// Unconfigured identity (the DHCP bootstrap state)
    pub fn new() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Fully configured identity
    pub fn configured(ip: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        Self { ip, netmask, gateway }
    }

    pub fn ip_address(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn net_mask(&self) -> Ipv4Addr {
        self.netmask
    }

    pub fn default_gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Subnet broadcast address: network part all-ones in the host part.
    /// While unconfigured this degenerates to 255.255.255.255.
    pub fn broadcast_address(&self) -> Ipv4Addr {
        let ip = u32::from(self.ip);
        let mask = u32::from(self.netmask);
        Ipv4Addr::from((ip & mask) | !mask)
    }

    pub fn is_configured(&self) -> bool {
        self.ip.is_set()
    }

    /// Assign address and netmask (DHCP seam)
    pub fn set_address(&mut self, ip: Ipv4Addr, netmask: Ipv4Addr) {
        self.ip = ip;
        self.netmask = netmask;
    }

    /// Assign the default gateway (DHCP seam)
    pub fn set_default_gateway(&mut self, gateway: Ipv4Addr) {
        self.gateway = gateway;
    }

    /// Drop the identity, returning to the bootstrap state
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors loading or validating a static configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Static network configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticConfig {
    /// Own IPv4 address
    pub ip: Ipv4Addr,

    /// Subnet mask
    pub netmask: Ipv4Addr,

    /// Default gateway; omit for a gateway-less link
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
}

impl StaticConfig {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: StaticConfig =
            json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_host_address(self.ip, "ip").map_err(ConfigError::Invalid)?;
        validate_netmask(self.netmask).map_err(ConfigError::Invalid)?;
        if let Some(gateway) = self.gateway {
            validate_host_address(gateway, "gateway").map_err(ConfigError::Invalid)?;
            if !self.ip.on_same_network(gateway, self.netmask) {
                return Err(ConfigError::Invalid(format!(
                    "gateway {} is not on subnet {}/{}",
                    gateway, self.ip, self.netmask
                )));
            }
        }
        Ok(())
    }

    /// Convert to the runtime form
    pub fn to_net_config(&self) -> NetConfig {
        NetConfig::configured(
            self.ip,
            self.netmask,
            self.gateway.unwrap_or(Ipv4Addr::UNSPECIFIED),
        )
    }
}

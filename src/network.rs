// Copyright 2017 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Canonical network configuration.
//!
//! Every datasource ends up describing the host network with this versioned
//! document, whatever format its provider used. Rendering it into OS-native
//! files is left to other tools; the document serializes to JSON as-is.

use anyhow::{anyhow, Context, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

pub mod cache;
pub mod interfaces;
pub mod network_data;

pub use self::cache::NetworkConfigCache;
pub use self::interfaces::{FallbackNic, KnownMacs, MacResolver, SystemInterfaces};
pub use self::network_data::NetworkData;

/// Schema version of [`NetworkConfig`] documents.
pub const NETWORK_CONFIG_VERSION: u8 = 1;

/// Try to parse an IP+netmask pair into a CIDR network.
pub fn try_parse_cidr(address: IpAddr, netmask: IpAddr) -> Result<IpNetwork> {
    let prefix = ipnetwork::ip_mask_to_prefix(netmask)?;
    IpNetwork::new(address, prefix).context("failed to parse network")
}

/// Versioned network configuration document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub version: u8,
    pub config: Vec<NetworkEntry>,
}

impl NetworkConfig {
    pub fn new(config: Vec<NetworkEntry>) -> Self {
        NetworkConfig {
            version: NETWORK_CONFIG_VERSION,
            config,
        }
    }

    /// Single interface doing DHCPv4, optionally with extra subnets.
    pub fn fallback(nic: &str, extra_subnets: Vec<Subnet>) -> Self {
        let mut subnets = vec![Subnet::Dhcp4];
        subnets.extend(extra_subnets);
        NetworkConfig::new(vec![NetworkEntry::Physical(PhysicalInterface {
            name: nic.to_string(),
            mac_address: None,
            mtu: None,
            subnets,
        })])
    }

    /// Names of all interface entries, in document order.
    #[cfg(test)]
    pub fn interface_names(&self) -> Vec<&str> {
        self.config
            .iter()
            .filter_map(NetworkEntry::interface_name)
            .collect()
    }

    #[cfg(test)]
    pub fn nameservers(&self) -> Vec<&str> {
        self.config
            .iter()
            .filter_map(|entry| match entry {
                NetworkEntry::Nameserver(ns) => Some(ns.address.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// One entry of the `config` sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NetworkEntry {
    Physical(PhysicalInterface),
    Bond(BondInterface),
    Vlan(VlanInterface),
    Nameserver(Nameserver),
}

impl NetworkEntry {
    #[cfg(test)]
    pub fn interface_name(&self) -> Option<&str> {
        match self {
            NetworkEntry::Physical(iface) => Some(&iface.name),
            NetworkEntry::Bond(bond) => Some(&bond.name),
            NetworkEntry::Vlan(vlan) => Some(&vlan.name),
            NetworkEntry::Nameserver(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalInterface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
}

/// Aggregation of several interfaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondInterface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    pub bond_interfaces: Vec<String>,
    /// Free-form `bond_*` attributes (mode, miimon, hash policy...).
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
}

/// 802.1Q child of another interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanInterface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    pub vlan_link: String,
    pub vlan_id: u16,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nameserver {
    pub address: String,
}

/// Addressing method of an interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Subnet {
    #[serde(rename = "dhcp4")]
    Dhcp4,
    #[serde(rename = "dhcp6")]
    Dhcp6,
    #[serde(rename = "ipv6_slaac")]
    Ipv6Slaac,
    #[serde(rename = "ipv6_dhcpv6-stateless")]
    Ipv6DhcpStateless,
    #[serde(rename = "static")]
    Static(StaticSubnet),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSubnet {
    pub address: String,
    /// Dotted netmask or prefix length, as provided by the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<bool>,
}

impl StaticSubnet {
    /// Parse address and netmask into a CIDR network.
    ///
    /// The netmask may be a dotted mask (IPv4 or IPv6) or a prefix length;
    /// a missing netmask means a host address.
    pub fn cidr(&self) -> Result<IpNetwork> {
        let address: IpAddr = self
            .address
            .parse()
            .with_context(|| format!("invalid IP address '{}'", self.address))?;
        match self.netmask.as_deref() {
            None => Ok(IpNetwork::from(address)),
            Some(mask) => {
                if let Ok(prefix) = mask.parse::<u8>() {
                    return IpNetwork::new(address, prefix)
                        .with_context(|| format!("invalid prefix length '{mask}'"));
                }
                let mask: IpAddr = mask
                    .parse()
                    .map_err(|_| anyhow!("invalid netmask '{}'", mask))?;
                try_parse_cidr(address, mask)
            }
        }
    }
}

/// Static route; the destination is given either by netmask or by prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub gateway: String,
}

/// Provider-specific network descriptions understood by the normalizer.
#[derive(Clone, Debug, PartialEq)]
pub enum NetworkDescription {
    /// OpenStack-style `links`/`networks`/`services` document.
    NetworkData(NetworkData),
    /// No structured description: DHCPv4 on the fallback interface, plus
    /// the given extra subnets.
    Fallback(Vec<Subnet>),
}

impl NetworkDescription {
    /// Convert into the canonical document.
    ///
    /// The MAC oracle and the fallback NIC probe are only queried by the
    /// variant which needs them.
    pub fn normalize(
        &self,
        macs: &dyn MacResolver,
        nics: &dyn FallbackNic,
    ) -> Result<NetworkConfig> {
        match self {
            NetworkDescription::NetworkData(data) => network_data::convert(data, macs),
            NetworkDescription::Fallback(extra) => {
                let nic = nics
                    .find_fallback_nic()?
                    .ok_or_else(|| anyhow!("no fallback network interface found"))?;
                Ok(NetworkConfig::fallback(&nic, extra.clone()))
            }
        }
    }
}

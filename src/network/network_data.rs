// Copyright 2024 The metaseed Authors
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

//! OpenStack `network_data.json` conversion.
//!
//! Links become interface entries (physical, bond or vlan), networks become
//! their subnets and DNS services become nameserver entries.

use anyhow::Result;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use slog_scope::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::interfaces::{normalize_mac, MacResolver};
use super::{
    BondInterface, Nameserver, NetworkConfig, NetworkEntry, PhysicalInterface, Route, StaticSubnet,
    Subnet, VlanInterface,
};
use crate::errors::SourceError;

/// Link types rendered as plain physical interfaces.
const PHYSICAL_TYPES: &[&str] = &["ethernet", "vif", "ovs", "phy", "bridge", "tap"];

/// OpenStack network metadata format for `network_data.json`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetworkData {
    #[serde(default)]
    pub links: Vec<NetworkLink>,
    #[serde(default)]
    pub networks: Vec<NetworkDefinition>,
    #[serde(default)]
    pub services: Vec<NetworkService>,
}

/// Network link (interface definition).
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetworkLink {
    pub id: String,
    /// Interface name hint, preferred over MAC lookup.
    pub name: Option<String>,
    /// One of the physical types, "bond" or "vlan".
    #[serde(rename = "type")]
    pub link_type: String,
    pub ethernet_mac_address: Option<String>,
    pub mtu: Option<u32>,
    pub vif_id: Option<String>,
    /// Member link ids, for bonds.
    #[serde(default)]
    pub bond_links: Vec<String>,
    /// Parent link id, for vlans.
    pub vlan_link: Option<String>,
    pub vlan_id: Option<u16>,
    pub vlan_mac_address: Option<String>,
    /// Remaining attributes, including the `bond_*` parameters.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// IP configuration attached to a link.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NetworkDefinition {
    #[serde(default)]
    pub id: String,
    /// "ipv4", "ipv6", "ipv4_dhcp", "ipv6_dhcp", ...
    #[serde(rename = "type")]
    pub network_type: String,
    /// Id of the link this network is configured on.
    pub link: String,
    pub ip_address: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    #[serde(default)]
    pub routes: Vec<OpenStackRoute>,
    pub network_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct NetworkService {
    #[serde(rename = "type")]
    pub service_type: String,
    pub address: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct OpenStackRoute {
    pub network: String,
    pub netmask: String,
    pub gateway: String,
}

/// Lazily loaded MAC table; the oracle is queried at most once.
struct MacTable<'a> {
    resolver: &'a dyn MacResolver,
    table: Option<HashMap<String, String>>,
}

impl<'a> MacTable<'a> {
    fn lookup(&mut self, mac: &str) -> Result<Option<String>> {
        if self.table.is_none() {
            self.table = Some(self.resolver.interfaces_by_mac()?);
        }
        Ok(self
            .table
            .as_ref()
            .and_then(|t| t.get(&normalize_mac(mac)).cloned()))
    }
}

/// Convert a `network_data.json` document into the canonical form.
///
/// Interface entries follow the order of `links`; links neither carrying a
/// network nor referenced by a bond or vlan are left out. Nameserver
/// entries follow, in input order.
pub fn convert(data: &NetworkData, macs: &dyn MacResolver) -> Result<NetworkConfig> {
    let links: HashMap<&str, &NetworkLink> =
        data.links.iter().map(|l| (l.id.as_str(), l)).collect();

    for link in &data.links {
        let kind = link.link_type.as_str();
        if !PHYSICAL_TYPES.contains(&kind) && kind != "bond" && kind != "vlan" {
            return Err(SourceError::UnsupportedLink(link.link_type.clone()).into());
        }
    }

    let mut subnets: HashMap<&str, Vec<Subnet>> = HashMap::new();
    for network in &data.networks {
        if !links.contains_key(network.link.as_str()) {
            return Err(SourceError::UnresolvableLink(format!(
                "network '{}' references unknown link '{}'",
                network.id, network.link
            ))
            .into());
        }
        subnets
            .entry(network.link.as_str())
            .or_default()
            .push(subnet_for(network)?);
    }

    // Links needed by bonds and vlans are emitted even without networks.
    let mut referenced: HashSet<&str> = HashSet::new();
    for link in &data.links {
        let parents = link
            .bond_links
            .iter()
            .map(String::as_str)
            .chain(link.vlan_link.as_deref());
        for parent in parents {
            if !links.contains_key(parent) {
                return Err(SourceError::UnresolvableLink(format!(
                    "link '{}' references unknown link '{}'",
                    link.id, parent
                ))
                .into());
            }
            referenced.insert(parent);
        }
    }

    let emitted: Vec<&NetworkLink> = data
        .links
        .iter()
        .filter(|l| subnets.contains_key(l.id.as_str()) || referenced.contains(l.id.as_str()))
        .collect();

    // Resolve names: physical links first, then bonds, then vlans, so that
    // parents are always named before their children.
    let mut mac_table = MacTable {
        resolver: macs,
        table: None,
    };
    let mut names: HashMap<&str, String> = HashMap::new();
    for link in emitted.iter().filter(|l| is_physical(l)) {
        let name = physical_name(link, &mut mac_table)?;
        names.insert(link.id.as_str(), name);
    }
    let mut bond_index = 0;
    for link in emitted.iter().filter(|l| l.link_type == "bond") {
        let name = match &link.name {
            Some(name) => name.clone(),
            None => format!("bond{bond_index}"),
        };
        bond_index += 1;
        names.insert(link.id.as_str(), name);
    }
    for link in emitted.iter().filter(|l| l.link_type == "vlan") {
        let parent = link.vlan_link.as_deref().unwrap_or_default();
        let parent_name = name_of(&names, parent)?;
        let vlan_id = link.vlan_id.ok_or_else(|| {
            SourceError::UnresolvableLink(format!("vlan link '{}' has no vlan_id", link.id))
        })?;
        let name = match &link.name {
            Some(name) => name.clone(),
            None => format!("{parent_name}.{vlan_id}"),
        };
        names.insert(link.id.as_str(), name);
    }

    let mut seen = HashSet::new();
    let mut config = Vec::with_capacity(emitted.len() + data.services.len());
    for link in emitted {
        let name = name_of(&names, &link.id)?;
        if !seen.insert(name.clone()) {
            return Err(SourceError::DuplicateInterface(name).into());
        }
        let link_subnets = subnets.remove(link.id.as_str()).unwrap_or_default();
        let mac_address = link.ethernet_mac_address.as_deref().map(normalize_mac);
        let entry = match link.link_type.as_str() {
            "bond" => NetworkEntry::Bond(BondInterface {
                name,
                mac_address,
                mtu: link.mtu,
                bond_interfaces: link
                    .bond_links
                    .iter()
                    .map(|id| name_of(&names, id))
                    .collect::<Result<_>>()?,
                params: link
                    .extra
                    .iter()
                    .filter(|(k, _)| k.starts_with("bond"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                subnets: link_subnets,
            }),
            "vlan" => NetworkEntry::Vlan(VlanInterface {
                name,
                mac_address: link
                    .vlan_mac_address
                    .as_deref()
                    .map(normalize_mac)
                    .or(mac_address),
                mtu: link.mtu,
                vlan_link: name_of(&names, link.vlan_link.as_deref().unwrap_or_default())?,
                vlan_id: link.vlan_id.unwrap_or_default(),
                subnets: link_subnets,
            }),
            _ => NetworkEntry::Physical(PhysicalInterface {
                name,
                mac_address,
                mtu: link.mtu,
                subnets: link_subnets,
            }),
        };
        config.push(entry);
    }

    for service in &data.services {
        if service.service_type == "dns" {
            config.push(NetworkEntry::Nameserver(Nameserver {
                address: service.address.clone(),
            }));
        } else {
            debug!("ignoring network service of type '{}'", service.service_type);
        }
    }

    Ok(NetworkConfig::new(config))
}

fn name_of(names: &HashMap<&str, String>, id: &str) -> Result<String> {
    names.get(id).cloned().ok_or_else(|| {
        SourceError::UnresolvableLink(format!("link '{id}' could not be named")).into()
    })
}

fn is_physical(link: &NetworkLink) -> bool {
    PHYSICAL_TYPES.contains(&link.link_type.as_str())
}

/// Name a physical link, from its name hint or through its MAC address.
fn physical_name(link: &NetworkLink, macs: &mut MacTable) -> Result<String> {
    if let Some(name) = &link.name {
        return Ok(name.clone());
    }
    let mac = link.ethernet_mac_address.as_deref().ok_or_else(|| {
        SourceError::UnresolvableLink(format!(
            "link '{}' has neither a name nor a MAC address",
            link.id
        ))
    })?;
    match macs.lookup(mac)? {
        Some(name) => Ok(name),
        None => {
            warn!("no local interface found with MAC address {}", mac);
            Err(SourceError::UnresolvableLink(format!(
                "no interface with MAC address '{}' for link '{}'",
                mac, link.id
            ))
            .into())
        }
    }
}

fn subnet_for(network: &NetworkDefinition) -> Result<Subnet> {
    let subnet = match network.network_type.as_str() {
        "ipv4_dhcp" => Subnet::Dhcp4,
        "ipv6_dhcp" | "ipv6_dhcpv6-stateful" => Subnet::Dhcp6,
        "ipv6_slaac" => Subnet::Ipv6Slaac,
        "ipv6_dhcpv6-stateless" => Subnet::Ipv6DhcpStateless,
        "ipv4" | "ipv6" => Subnet::Static(static_subnet(network)?),
        other => return Err(SourceError::UnsupportedNetwork(other.to_string()).into()),
    };
    Ok(subnet)
}

fn static_subnet(network: &NetworkDefinition) -> Result<StaticSubnet> {
    let raw = network.ip_address.as_deref().ok_or_else(|| {
        SourceError::InvalidAddress(format!("network '{}' has no ip_address", network.id))
    })?;

    // Addresses may carry their prefix inline, e.g. "fd00::5/64".
    let (address, netmask) = match (raw.split_once('/'), &network.netmask) {
        (Some(_), None) => {
            let net: IpNetwork = raw
                .parse()
                .map_err(|_| SourceError::InvalidAddress(raw.to_string()))?;
            (net.ip().to_string(), Some(net.prefix().to_string()))
        }
        _ => (raw.to_string(), network.netmask.clone()),
    };

    let is_v6 = network.network_type == "ipv6";
    let subnet = StaticSubnet {
        address,
        netmask,
        gateway: network.gateway.clone(),
        routes: network
            .routes
            .iter()
            .map(|r| Route {
                network: r.network.clone(),
                netmask: Some(r.netmask.clone()),
                prefix: None,
                gateway: r.gateway.clone(),
            })
            .collect(),
        ipv4: (!is_v6).then_some(true),
        ipv6: is_v6.then_some(true),
    };
    subnet.cidr().map_err(|e| {
        SourceError::InvalidAddress(format!(
            "network '{}': {} ({:#})",
            network.id, subnet.address, e
        ))
    })?;
    Ok(subnet)
}

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

//! Host network interface discovery.

use anyhow::Result;
use pnet_base::MacAddr;
use std::collections::HashMap;
use std::str::FromStr;

/// Oracle mapping hardware addresses to interface names.
pub trait MacResolver {
    /// Return a map from lowercase MAC address to interface name.
    fn interfaces_by_mac(&self) -> Result<HashMap<String, String>>;
}

/// Probe choosing the interface to configure when nothing else is known.
pub trait FallbackNic {
    fn find_fallback_nic(&self) -> Result<Option<String>>;
}

/// Normalize a MAC address to lowercase colon-separated form.
///
/// Unparsable input is only lowercased, so that comparisons stay
/// case-insensitive.
pub fn normalize_mac(mac: &str) -> String {
    match MacAddr::from_str(mac.trim()) {
        Ok(addr) => addr.to_string(),
        Err(_) => mac.trim().to_lowercase(),
    }
}

/// Fixed MAC table, overriding system lookups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnownMacs(HashMap<String, String>);

impl KnownMacs {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        KnownMacs(
            entries
                .into_iter()
                .map(|(mac, name)| (normalize_mac(mac.as_ref()), name.into()))
                .collect(),
        )
    }
}

impl MacResolver for KnownMacs {
    fn interfaces_by_mac(&self) -> Result<HashMap<String, String>> {
        Ok(self.0.clone())
    }
}

/// Live interfaces, as reported by the kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemInterfaces;

impl SystemInterfaces {
    /// Non-loopback interfaces with a usable hardware address.
    fn candidates() -> Vec<(String, MacAddr)> {
        pnet_datalink::interfaces()
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .filter_map(|iface| match iface.mac {
                Some(mac) if mac != MacAddr::zero() => Some((iface.name, mac)),
                _ => None,
            })
            .collect()
    }
}

impl MacResolver for SystemInterfaces {
    fn interfaces_by_mac(&self) -> Result<HashMap<String, String>> {
        Ok(Self::candidates()
            .into_iter()
            .map(|(name, mac)| (mac.to_string(), name))
            .collect())
    }
}

impl FallbackNic for SystemInterfaces {
    fn find_fallback_nic(&self) -> Result<Option<String>> {
        let names = Self::candidates().into_iter().map(|(name, _)| name);
        Ok(pick_fallback(names))
    }
}

/// Prefer `eth0`, otherwise the first interface in name order.
pub(crate) fn pick_fallback(names: impl IntoIterator<Item = String>) -> Option<String> {
    let mut names: Vec<String> = names.into_iter().collect();
    if names.iter().any(|n| n == "eth0") {
        return Some("eth0".to_string());
    }
    names.sort();
    names.into_iter().next()
}

/// Fixed fallback interface name.
#[cfg(test)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticNic(pub Option<String>);

#[cfg(test)]
impl FallbackNic for StaticNic {
    fn find_fallback_nic(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

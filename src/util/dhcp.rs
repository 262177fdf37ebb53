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

//! DHCP lease lookup, used to wait for an ephemeral network link.

use anyhow::{anyhow, Context, Result};
use slog_scope::{debug, trace};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use super::key_lookup;
use crate::retry;

/// Collaborator making a network link usable before fetching metadata.
pub trait EphemeralNetwork {
    fn bring_up(&self, nic: &str) -> Result<()>;
}

/// Wait for systemd-networkd to acquire a DHCP lease on the interface.
#[derive(Clone, Debug)]
pub struct NetworkdLease {
    leases_dir: PathBuf,
    retry: retry::Retry,
}

impl Default for NetworkdLease {
    fn default() -> Self {
        NetworkdLease {
            leases_dir: PathBuf::from("/run/systemd/netif/leases"),
            retry: retry::Retry::new()
                .initial_backoff(Duration::from_millis(50))
                .max_backoff(Duration::from_millis(500))
                .max_retries(60),
        }
    }
}

impl NetworkdLease {
    #[cfg(test)]
    fn with_dir(leases_dir: impl Into<PathBuf>, retry: retry::Retry) -> Self {
        NetworkdLease {
            leases_dir: leases_dir.into(),
            retry,
        }
    }

    /// Wait for a lease file carrying `key` for the given interface index.
    pub fn lease_key_lookup(&self, ifindex: u32, key: &str) -> Result<String> {
        let lease_path = self.leases_dir.join(ifindex.to_string());
        self.retry.clone().retry(|_| {
            trace!("looking at lease file {:?}", lease_path);
            if lease_path.exists() {
                debug!("found lease file - {:?}", lease_path);
                let lease = File::open(&lease_path)
                    .with_context(|| format!("failed to open lease file ({lease_path:?})"))?;

                if let Some(v) = key_lookup('=', key, lease)? {
                    return Ok(v);
                }

                debug!(
                    "failed to get value from existing lease file '{:?}'",
                    lease_path
                );
            }
            Err(anyhow!("failed to retrieve lease {} for interface #{}", key, ifindex))
        })
    }
}

impl EphemeralNetwork for NetworkdLease {
    fn bring_up(&self, nic: &str) -> Result<()> {
        let interface = pnet_datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == nic)
            .ok_or_else(|| anyhow!("network interface '{}' not found", nic))?;
        trace!("waiting for DHCP lease on {:?}", interface);

        let address = self.lease_key_lookup(interface.index, "ADDRESS")?;
        debug!("interface {} has DHCP address {}", nic, address);
        Ok(())
    }
}

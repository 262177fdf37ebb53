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

//! Metadata fetcher for Scaleway.
//!
//! The metadata API specification follows the instance one described
//! [their docs](https://www.scaleway.com/en/developers/api/instance/#path-instances-get-an-instance)
//!
//! User-data and vendor-data are served by the same link-local endpoint,
//! which may require requests to come from a privileged source; the local
//! address of those requests is configurable.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use slog_scope::{debug, info, warn};

use crate::config::ScalewayConfig;
use crate::network::{
    FallbackNic, NetworkConfig, NetworkConfigCache, NetworkDescription, Route, StaticSubnet,
    Subnet, SystemInterfaces,
};
use crate::providers::DataSource;
use crate::retry;
use crate::util::{cmdline_has_token, EphemeralNetwork, HostEvidence, NetworkdLease, SystemEvidence};

#[cfg(test)]
mod mock_tests;

/// Marker path present on Scaleway images.
const MARKER_PATH: &str = "/var/run/scaleway";

const STATE_URL: &str = "http://169.254.42.42/state";

/// Tag prefix carrying an SSH key, with spaces encoded as underscores.
const AUTHORIZED_KEY_TAG: &str = "AUTHORIZED_KEY=";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct ScalewaySSHPublicKey {
    key: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct ScalewayIPv4Public {
    address: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct ScalewayIPv6 {
    address: String,
    gateway: Option<String>,
    netmask: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct ScalewayLocation {
    zone_id: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct ScalewayInstanceMetadata {
    id: String,
    hostname: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    ssh_public_keys: Vec<ScalewaySSHPublicKey>,
    commercial_type: Option<String>,
    location: Option<ScalewayLocation>,
    private_ip: Option<String>,
    public_ip: Option<ScalewayIPv4Public>,
    ipv6: Option<ScalewayIPv6>,
}

impl ScalewayInstanceMetadata {
    /// Keys from the structured list, then keys encoded in tags.
    fn public_ssh_keys(&self) -> Vec<String> {
        let structured = self.ssh_public_keys.iter().map(|k| k.key.clone());
        let tagged = self
            .tags
            .iter()
            .filter_map(|tag| tag.strip_prefix(AUTHORIZED_KEY_TAG))
            .map(|key| key.replace('_', " "));
        structured.chain(tagged).collect()
    }

    /// Static IPv6 subnet with its default route, when fully described.
    fn ipv6_subnet(&self) -> Option<Subnet> {
        let ipv6 = self.ipv6.as_ref()?;
        match (&ipv6.gateway, &ipv6.netmask) {
            (Some(gateway), Some(netmask)) => Some(Subnet::Static(StaticSubnet {
                address: ipv6.address.clone(),
                netmask: Some(netmask.clone()),
                routes: vec![Route {
                    network: "::".to_string(),
                    netmask: None,
                    prefix: Some("0".to_string()),
                    gateway: gateway.clone(),
                }],
                ..Default::default()
            })),
            _ => {
                warn!("incomplete IPv6 metadata, configuring IPv4 only");
                None
            }
        }
    }
}

pub struct ScalewayDatasource {
    config: ScalewayConfig,
    /// Client for the instance metadata document.
    client: retry::Client,
    /// Client for user-data and vendor-data, bound to the source address.
    data_client: retry::Client,
    evidence: Box<dyn SystemEvidence>,
    ephemeral: Box<dyn EphemeralNetwork>,
    nics: Box<dyn FallbackNic>,
    metadata: Option<ScalewayInstanceMetadata>,
    userdata_raw: Option<Vec<u8>>,
    vendordata_raw: Option<Vec<u8>>,
    network: NetworkConfigCache,
}

impl ScalewayDatasource {
    pub fn try_new(config: ScalewayConfig) -> Result<Self> {
        Self::with_collaborators(
            config,
            Box::new(HostEvidence::default()),
            Box::new(NetworkdLease::default()),
            Box::new(SystemInterfaces),
        )
    }

    pub fn with_collaborators(
        config: ScalewayConfig,
        evidence: Box<dyn SystemEvidence>,
        ephemeral: Box<dyn EphemeralNetwork>,
        nics: Box<dyn FallbackNic>,
    ) -> Result<Self> {
        let client = retry::Client::try_with_transport(Some(config.timeout()), None)?
            .max_retries(config.retries)
            .max_elapsed(Some(config.max_wait()))
            .return_on_404(true);
        let data_client =
            retry::Client::try_with_transport(Some(config.timeout()), Some(config.source_address))?
                .max_retries(config.retries)
                .max_elapsed(Some(config.max_wait()))
                .return_on_404(true);

        Ok(ScalewayDatasource {
            config,
            client,
            data_client,
            evidence,
            ephemeral,
            nics,
            metadata: None,
            userdata_raw: None,
            vendordata_raw: None,
            network: NetworkConfigCache::default(),
        })
    }

    fn fetch_metadata(&self) -> Result<ScalewayInstanceMetadata> {
        self.client
            .get(self.config.metadata_url.clone())
            .send_json()?
            .ok_or_else(|| anyhow!("metadata not found at {}", self.config.metadata_url))
    }

    /// Fetch an optional payload; any failure means absence.
    fn fetch_optional(&self, url: &str, what: &str) -> Option<Vec<u8>> {
        match self.data_client.get(url.to_string()).send() {
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                info!("no {} available", what);
                None
            }
            Err(e) => {
                warn!("failed to fetch {}: {:#}", what, e);
                None
            }
        }
    }

    fn network_description(&self) -> NetworkDescription {
        let extra = self
            .metadata
            .as_ref()
            .and_then(ScalewayInstanceMetadata::ipv6_subnet);
        NetworkDescription::Fallback(extra.into_iter().collect())
    }
}

impl DataSource for ScalewayDatasource {
    fn name(&self) -> &'static str {
        "scaleway"
    }

    fn detect(&self) -> bool {
        match self.evidence.dmi_field("system-manufacturer") {
            Ok(vendor) if vendor == "Scaleway" => return true,
            Ok(_) => {}
            Err(e) => debug!("no DMI evidence: {:#}", e),
        }

        if self.evidence.path_exists(Path::new(MARKER_PATH)) {
            return true;
        }

        match self.evidence.kernel_cmdline() {
            Ok(cmdline) => cmdline_has_token(&cmdline, "scaleway"),
            Err(e) => {
                debug!("no kernel cmdline evidence: {:#}", e);
                false
            }
        }
    }

    fn get_data(&mut self) -> Result<bool> {
        if !self.detect() {
            return Ok(false);
        }

        let nic = match self.nics.find_fallback_nic()? {
            Some(nic) => nic,
            None => {
                warn!("no network interface available to reach the metadata service");
                return Ok(false);
            }
        };
        if let Err(e) = self.ephemeral.bring_up(&nic) {
            warn!("failed to set up network on {}: {:#}", nic, e);
            return Ok(false);
        }

        let metadata = self
            .fetch_metadata()
            .context("failed to fetch Scaleway metadata")?;
        let userdata = self.fetch_optional(&self.config.userdata_url, "user-data");
        let vendordata = self.fetch_optional(&self.config.vendordata_url, "vendor-data");

        self.metadata = Some(metadata);
        self.userdata_raw = userdata;
        self.vendordata_raw = vendordata;
        // Previously derived network config may not match the new metadata.
        if self.network.cached().is_some() {
            self.network.invalidate();
        }
        Ok(true)
    }

    fn instance_id(&self) -> Option<String> {
        self.metadata.as_ref().map(|m| m.id.clone())
    }

    fn hostname(&self) -> Option<String> {
        self.metadata.as_ref().map(|m| m.hostname.clone())
    }

    fn availability_zone(&self) -> Option<String> {
        None
    }

    fn region(&self) -> Option<String> {
        None
    }

    fn public_ssh_keys(&self) -> Vec<String> {
        self.metadata
            .as_ref()
            .map(ScalewayInstanceMetadata::public_ssh_keys)
            .unwrap_or_default()
    }

    fn userdata_raw(&self) -> Option<&[u8]> {
        self.userdata_raw.as_deref()
    }

    fn vendordata_raw(&self) -> Option<&[u8]> {
        self.vendordata_raw.as_deref()
    }

    fn network_config(&mut self) -> Result<NetworkConfig> {
        let description = self.network_description();
        let nics = self.nics.as_ref();
        self.network
            .get_or_compute(|| description.normalize(&SystemInterfaces, nics))
    }

    fn boot_checkin(&self) -> Result<()> {
        self.client
            .patch(
                STATE_URL.to_string(),
                Some(r#"{"state_detail":"booted"}"#.into()),
            )
            .dispatch()?;
        Ok(())
    }

    fn extra_attributes(&self) -> Vec<(String, String)> {
        let data = match &self.metadata {
            Some(data) => data,
            None => return vec![],
        };

        let mut attrs = vec![];
        if let Some(ref instance_type) = data.commercial_type {
            attrs.push(("SCALEWAY_INSTANCE_TYPE".to_string(), instance_type.clone()));
        }
        if let Some(ref location) = data.location {
            attrs.push(("SCALEWAY_ZONE_ID".to_string(), location.zone_id.clone()));
        }
        if let Some(ref ip) = data.private_ip {
            attrs.push(("SCALEWAY_IPV4_PRIVATE".to_string(), ip.clone()));
        }
        if let Some(ref ip) = data.public_ip {
            attrs.push(("SCALEWAY_IPV4_PUBLIC".to_string(), ip.address.clone()));
        }
        if let Some(ref ip) = data.ipv6 {
            attrs.push(("SCALEWAY_IPV6_PUBLIC".to_string(), ip.address.clone()));
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::interfaces::StaticNic;
    use crate::util::testing::LogCapture;
    use crate::util::StaticEvidence;
    use serde_json::json;
    use std::cell::Cell;
    use std::path::PathBuf;
    use std::rc::Rc;

    pub(crate) struct FakeEphemeral(pub bool);

    impl EphemeralNetwork for FakeEphemeral {
        fn bring_up(&self, nic: &str) -> Result<()> {
            if self.0 {
                Ok(())
            } else {
                Err(anyhow!("no lease on {}", nic))
            }
        }
    }

    /// Fallback probe counting its invocations.
    struct CountingNic(Rc<Cell<usize>>);

    impl FallbackNic for CountingNic {
        fn find_fallback_nic(&self) -> Result<Option<String>> {
            self.0.set(self.0.get() + 1);
            Ok(Some("ens2".to_string()))
        }
    }

    fn datasource(evidence: StaticEvidence) -> ScalewayDatasource {
        ScalewayDatasource::with_collaborators(
            ScalewayConfig::default(),
            Box::new(evidence),
            Box::new(FakeEphemeral(true)),
            Box::new(StaticNic(Some("ens2".to_string()))),
        )
        .unwrap()
    }

    fn metadata(value: serde_json::Value) -> ScalewayInstanceMetadata {
        serde_json::from_value(value).unwrap()
    }

    fn dhcp_only() -> serde_json::Value {
        json!({
            "version": 1,
            "config": [{
                "type": "physical",
                "name": "ens2",
                "mtu": null,
                "subnets": [{"type": "dhcp4"}],
            }],
        })
    }

    #[test]
    fn test_not_detected() {
        let ds = datasource(StaticEvidence {
            dmi: maplit::hashmap! {
                "system-manufacturer".to_string() => "Whatever".to_string(),
            },
            cmdline: Some("BOOT_IMAGE=/vmlinuz-3.11.0-26-generic".to_string()),
            ..Default::default()
        });
        assert!(!ds.detect());
    }

    #[test]
    fn test_detect_dmi() {
        let ds = datasource(StaticEvidence {
            dmi: maplit::hashmap! {
                "system-manufacturer".to_string() => "Scaleway".to_string(),
            },
            ..Default::default()
        });
        assert!(ds.detect());
    }

    #[test]
    fn test_detect_marker_path() {
        let ds = datasource(StaticEvidence {
            paths: vec![PathBuf::from("/var/run/scaleway")],
            ..Default::default()
        });
        assert!(ds.detect());
    }

    #[test]
    fn test_detect_cmdline() {
        let ds = datasource(StaticEvidence {
            cmdline: Some("initrd=initrd showopts scaleway nousb".to_string()),
            ..Default::default()
        });
        assert!(ds.detect());
    }

    #[test]
    fn test_detect_without_evidence() {
        // Every check failing to read is simply no evidence.
        let ds = datasource(StaticEvidence::default());
        assert!(!ds.detect());
    }

    #[test]
    fn test_ssh_keys_empty() {
        let mut ds = datasource(StaticEvidence::default());
        assert!(ds.public_ssh_keys().is_empty());
        ds.metadata = Some(metadata(json!({
            "id": "i", "hostname": "h", "tags": [], "ssh_public_keys": []
        })));
        assert!(ds.public_ssh_keys().is_empty());
    }

    #[test]
    fn test_ssh_keys_only_tags() {
        let mut ds = datasource(StaticEvidence::default());
        ds.metadata = Some(metadata(json!({
            "id": "i", "hostname": "h",
            "tags": [
                "AUTHORIZED_KEY=ssh-rsa_AAAAB3NzaC1yc2EAAAADAQABDDDDD",
                "AUTHORIZED_KEY=ssh-rsa_AAAAB3NzaC1yc2EAAAADAQABCCCCC",
                "environment=production",
            ],
            "ssh_public_keys": []
        })));
        assert_eq!(
            ds.public_ssh_keys(),
            vec![
                "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABDDDDD",
                "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABCCCCC",
            ]
        );
    }

    #[test]
    fn test_ssh_keys_only_conf() {
        let mut ds = datasource(StaticEvidence::default());
        ds.metadata = Some(metadata(json!({
            "id": "i", "hostname": "h", "tags": [],
            "ssh_public_keys": [
                {"key": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABA",
                 "fingerprint": "2048 06:ae:...  login (RSA)"},
                {"key": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABCCCCC",
                 "fingerprint": "2048 06:ff:...  login2 (RSA)"}
            ]
        })));
        assert_eq!(
            ds.public_ssh_keys(),
            vec![
                "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABA",
                "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABCCCCC",
            ]
        );
    }

    #[test]
    fn test_ssh_keys_both() {
        let mut ds = datasource(StaticEvidence::default());
        ds.metadata = Some(metadata(json!({
            "id": "i", "hostname": "h",
            "tags": ["AUTHORIZED_KEY=ssh-rsa_AAAAB3NzaC1yc2EAAAADAQABDDDDD"],
            "ssh_public_keys": [
                {"key": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABA"},
                {"key": "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABCCCCC"}
            ]
        })));
        let mut keys = ds.public_ssh_keys();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABA",
                "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABCCCCC",
                "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABDDDDD",
            ]
        );
    }

    #[test]
    fn test_network_config_ok() {
        let mut ds = datasource(StaticEvidence::default());
        ds.metadata = Some(metadata(json!({"id": "i", "hostname": "h", "ipv6": null})));
        let cfg = ds.network_config().unwrap();
        assert_eq!(serde_json::to_value(cfg).unwrap(), dhcp_only());
    }

    #[test]
    fn test_network_config_ipv6_ok() {
        let mut ds = datasource(StaticEvidence::default());
        ds.metadata = Some(metadata(json!({
            "id": "i", "hostname": "h",
            "ipv6": {
                "address": "2000:abc:4444:9876::42:999",
                "gateway": "2000:abc:4444:9876::42:000",
                "netmask": "127"
            }
        })));
        let cfg = ds.network_config().unwrap();
        let expected = json!({
            "version": 1,
            "config": [{
                "type": "physical",
                "name": "ens2",
                "mtu": null,
                "subnets": [
                    {"type": "dhcp4"},
                    {
                        "type": "static",
                        "address": "2000:abc:4444:9876::42:999",
                        "netmask": "127",
                        "routes": [{
                            "gateway": "2000:abc:4444:9876::42:000",
                            "network": "::",
                            "prefix": "0",
                        }],
                    },
                ],
            }],
        });
        assert_eq!(serde_json::to_value(cfg).unwrap(), expected);
    }

    #[test]
    fn test_network_config_existing() {
        let mut ds = datasource(StaticEvidence::default());
        let existing = NetworkConfig::new(vec![]);
        ds.network = NetworkConfigCache::Computed(existing.clone());
        assert_eq!(ds.network_config().unwrap(), existing);
    }

    #[test]
    fn test_network_config_computed_once() {
        let probes = Rc::new(Cell::new(0));
        let mut ds = ScalewayDatasource::with_collaborators(
            ScalewayConfig::default(),
            Box::new(StaticEvidence::default()),
            Box::new(FakeEphemeral(true)),
            Box::new(CountingNic(probes.clone())),
        )
        .unwrap();

        let first = ds.network_config().unwrap();
        let second = ds.network_config().unwrap();
        assert_eq!(first, second);
        assert_eq!(serde_json::to_value(first).unwrap(), dhcp_only());
        assert_eq!(probes.get(), 1);
    }

    #[test]
    fn test_network_config_cached_none() {
        let capture = LogCapture::default();
        let mut ds = datasource(StaticEvidence::default());
        ds.metadata = Some(metadata(json!({"id": "i", "hostname": "h"})));
        ds.network = NetworkConfigCache::Invalidated;

        let cfg = slog_scope::scope(&capture.logger(), || ds.network_config()).unwrap();
        assert_eq!(serde_json::to_value(cfg).unwrap(), dhcp_only());
        assert_eq!(
            capture.warnings(),
            vec!["Found None as cached network config, resetting to unset".to_string()]
        );
    }

    #[test]
    fn test_network_config_no_nic() {
        let mut ds = ScalewayDatasource::with_collaborators(
            ScalewayConfig::default(),
            Box::new(StaticEvidence::default()),
            Box::new(FakeEphemeral(true)),
            Box::new(StaticNic(None)),
        )
        .unwrap();
        ds.network_config().unwrap_err();
        assert_eq!(ds.network, NetworkConfigCache::Unset);
    }

    #[test]
    fn test_attributes() {
        let mut ds = datasource(StaticEvidence::default());
        ds.metadata = Some(metadata(json!({
            "commercial_type": "GP1-M",
            "hostname": "frontend-0",
            "id": "11111111-1111-1111-1111-111111111111",
            "ipv6": {"address": "2001:db8::1"},
            "location": {"zone_id": "par1"},
            "private_ip": "10.0.0.2",
            "public_ip": {"address": "93.184.216.34"},
            "ssh_public_keys": []
        })));

        let want = maplit::btreemap! {
            "METASEED_INSTANCE_ID".to_string() => "11111111-1111-1111-1111-111111111111".to_string(),
            "METASEED_HOSTNAME".to_string() => "frontend-0".to_string(),
            "METASEED_SCALEWAY_INSTANCE_TYPE".to_string() => "GP1-M".to_string(),
            "METASEED_SCALEWAY_IPV4_PRIVATE".to_string() => "10.0.0.2".to_string(),
            "METASEED_SCALEWAY_IPV4_PUBLIC".to_string() => "93.184.216.34".to_string(),
            "METASEED_SCALEWAY_IPV6_PUBLIC".to_string() => "2001:db8::1".to_string(),
            "METASEED_SCALEWAY_ZONE_ID".to_string() => "par1".to_string(),
        };
        assert_eq!(ds.attributes(), want);
    }
}

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

//! Datasource configuration file.
//!
//! ```yaml
//! datasource:
//!   Scaleway:
//!     retries: 3
//!     source_address: 0.0.0.0
//!   ConfigDrive:
//!     seed_dir: /var/lib/seed/config_drive
//!     known_macs:
//!       "fa:16:3e:69:b0:58": eth0
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration; every field is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub datasource: DatasourceConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DatasourceConfig {
    #[serde(rename = "Scaleway")]
    pub scaleway: ScalewayConfig,
    #[serde(rename = "ConfigDrive")]
    pub configdrive: ConfigDriveConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScalewayConfig {
    pub metadata_url: String,
    pub userdata_url: String,
    pub vendordata_url: String,
    /// Retries per request.
    pub retries: u8,
    /// Per-request timeout, in seconds.
    pub timeout: u64,
    /// Overall retry deadline per request, in seconds.
    pub max_wait: u64,
    /// Local address user-data and vendor-data requests are sent from.
    pub source_address: IpAddr,
}

impl Default for ScalewayConfig {
    fn default() -> Self {
        ScalewayConfig {
            metadata_url: "http://169.254.42.42/conf?format=json".to_string(),
            userdata_url: "http://169.254.42.42/user_data/cloud-init".to_string(),
            vendordata_url: "http://169.254.42.42/vendor_data/cloud-init".to_string(),
            retries: 5,
            timeout: 10,
            max_wait: 60,
            source_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl ScalewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigDriveConfig {
    /// Already-mounted seed directory; devices are probed when unset.
    pub seed_dir: Option<PathBuf>,
    /// MAC address to interface name table, used instead of the live
    /// interfaces when naming network devices.
    pub known_macs: Option<BTreeMap<String, String>>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg, Config::default());
        let scw = &cfg.datasource.scaleway;
        assert_eq!(scw.metadata_url, "http://169.254.42.42/conf?format=json");
        assert_eq!(scw.retries, 5);
        assert_eq!(scw.timeout(), Duration::from_secs(10));
        assert_eq!(scw.max_wait(), Duration::from_secs(60));
        assert_eq!(scw.source_address, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(cfg.datasource.configdrive.seed_dir, None);
        assert_eq!(cfg.datasource.configdrive.known_macs, None);
    }

    #[test]
    fn test_partial_override() {
        let cfg = Config::parse(
            r#"
datasource:
  Scaleway:
    retries: 2
    source_address: 10.0.0.5
  ConfigDrive:
    seed_dir: /var/lib/seed
"#,
        )
        .unwrap();
        let scw = &cfg.datasource.scaleway;
        assert_eq!(scw.retries, 2);
        assert_eq!(scw.timeout, 10);
        assert_eq!(scw.source_address, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(
            cfg.datasource.configdrive.seed_dir,
            Some(PathBuf::from("/var/lib/seed"))
        );
    }

    #[test]
    fn test_configdrive_known_macs() {
        let cfg = Config::parse(
            r#"
datasource:
  ConfigDrive:
    known_macs:
      "FA:16:3E:69:B0:58": enp0s1
      "fa:16:3e:d4:57:ad": enp0s2
"#,
        )
        .unwrap();
        let macs = cfg.datasource.configdrive.known_macs.unwrap();
        assert_eq!(macs.len(), 2);
        assert_eq!(macs["FA:16:3E:69:B0:58"], "enp0s1");
        assert_eq!(cfg.datasource.configdrive.seed_dir, None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Config::parse("datasource:\n  Scaleway:\n    retry: 2\n").unwrap_err();
        Config::parse("datasources: {}\n").unwrap_err();
    }

    #[test]
    fn test_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metaseed.yaml");
        std::fs::write(&path, "datasource:\n  Scaleway:\n    timeout: 3\n").unwrap();
        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.datasource.scaleway.timeout(), Duration::from_secs(3));

        Config::from_file(&tmp.path().join("missing.yaml")).unwrap_err();
    }
}

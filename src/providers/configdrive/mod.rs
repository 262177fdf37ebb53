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

//! Config-drive datasource.
//!
//! A config-drive is a small vfat or iso9660 filesystem labelled
//! `config-2`, attached by OpenStack-like platforms. It is either found
//! on a block device and mounted read-only for the duration of the read,
//! or provided as an already unpacked seed directory.
//! reference: https://docs.openstack.org/nova/latest/user/metadata.html

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use slog_scope::{debug, error, info, warn};
use tempfile::TempDir;

use crate::config::ConfigDriveConfig;
use crate::errors::SourceError;
use crate::network::{
    FallbackNic, KnownMacs, MacResolver, NetworkConfig, NetworkConfigCache, NetworkDescription,
    SystemInterfaces,
};
use crate::providers::DataSource;
use crate::util::{Blkid, DeviceProbe};

pub mod devices;
pub mod seed;

pub use self::seed::{read_config_drive, ConfigDriveSeed};


/// Config-drive mounted read-only on a private temporary directory.
#[derive(Debug)]
struct MountedDrive {
    temp_dir: TempDir,
}

impl MountedDrive {
    fn try_new(device: &str, fstype: &str) -> Result<Self> {
        let target = tempfile::Builder::new()
            .prefix("metaseed-")
            .tempdir()
            .context("failed to create temporary directory")?;
        crate::util::mount_ro(Path::new(device), target.path(), fstype, 3)?;
        Ok(MountedDrive { temp_dir: target })
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Drop for MountedDrive {
    fn drop(&mut self) {
        if let Err(e) = crate::util::unmount(self.temp_dir.path(), 3) {
            error!("failed to cleanup config-drive: {:?}", e);
        }
    }
}

pub struct ConfigDriveDatasource {
    config: ConfigDriveConfig,
    probe: Box<dyn DeviceProbe>,
    macs: Box<dyn MacResolver>,
    nics: Box<dyn FallbackNic>,
    seed: Option<ConfigDriveSeed>,
    network: NetworkConfigCache,
}

impl ConfigDriveDatasource {
    /// Datasource probing the host; a configured MAC table replaces the
    /// live interfaces when naming network devices.
    pub fn new(config: ConfigDriveConfig) -> Self {
        let macs: Box<dyn MacResolver> = match &config.known_macs {
            Some(table) => Box::new(KnownMacs::new(table)),
            None => Box::new(SystemInterfaces),
        };
        Self::with_collaborators(config, Box::new(Blkid), macs, Box::new(SystemInterfaces))
    }

    pub fn with_collaborators(
        config: ConfigDriveConfig,
        probe: Box<dyn DeviceProbe>,
        macs: Box<dyn MacResolver>,
        nics: Box<dyn FallbackNic>,
    ) -> Self {
        ConfigDriveDatasource {
            config,
            probe,
            macs,
            nics,
            seed: None,
            network: NetworkConfigCache::default(),
        }
    }

    /// Resolve a symbolic block-device name to a device path.
    fn device_name_to_device(&self, name: &str) -> Option<String> {
        let empty = serde_json::Map::new();
        let ec2 = self.seed.as_ref().map_or(&empty, |s| &s.ec2_metadata);
        devices::device_name_to_device(self.probe.as_ref(), ec2, name)
    }

    fn seed_dir(&self) -> Option<&PathBuf> {
        self.config.seed_dir.as_ref().filter(|dir| dir.is_dir())
    }

    /// Read the configured seed directory, if any.
    fn read_seed_dir(&self) -> Result<Option<(ConfigDriveSeed, String)>> {
        let dir = match self.seed_dir() {
            Some(dir) => dir,
            None => return Ok(None),
        };
        match read_config_drive(dir) {
            Ok(seed) => Ok(Some((seed, dir.display().to_string()))),
            Err(e)
                if matches!(
                    e.downcast_ref::<SourceError>(),
                    Some(SourceError::NonReadable(_))
                ) =>
            {
                debug!("seed directory {} not usable: {:#}", dir.display(), e);
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| {
                format!("failed to read config-drive seed {}", dir.display())
            }),
        }
    }

    /// Mount and read each candidate device in turn.
    fn read_devices(&self) -> Result<Option<(ConfigDriveSeed, String)>> {
        for device in devices::find_candidate_devs(self.probe.as_ref())? {
            match self.read_device(&device) {
                Ok(seed) => return Ok(Some((seed, device))),
                Err(e) => match e.downcast_ref::<SourceError>() {
                    Some(SourceError::BrokenMetadata { .. }) => {
                        warn!("broken config-drive on {}: {:#}", device, e)
                    }
                    _ => debug!("no config-drive on {}: {:#}", device, e),
                },
            }
        }
        Ok(None)
    }

    fn read_device(&self, device: &str) -> Result<ConfigDriveSeed> {
        let fstype = self
            .probe
            .fs_type(device)?
            .ok_or_else(|| SourceError::NonReadable(format!("{device}: unknown filesystem")))?;
        let drive = MountedDrive::try_new(device, &fstype)?;
        read_config_drive(drive.path())
    }

    fn metadata_str(&self, key: &str) -> Option<String> {
        self.seed
            .as_ref()
            .and_then(|s| s.metadata.get(key))
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn network_description(&self) -> NetworkDescription {
        match self.seed.as_ref().and_then(|s| s.network_data.clone()) {
            Some(data) => NetworkDescription::NetworkData(data),
            None => NetworkDescription::Fallback(vec![]),
        }
    }
}

impl DataSource for ConfigDriveDatasource {
    fn name(&self) -> &'static str {
        "configdrive"
    }

    fn detect(&self) -> bool {
        if self.seed_dir().is_some() {
            return true;
        }
        match devices::find_candidate_devs(self.probe.as_ref()) {
            Ok(devs) => !devs.is_empty(),
            Err(e) => {
                debug!("config-drive device probing failed: {:#}", e);
                false
            }
        }
    }

    fn get_data(&mut self) -> Result<bool> {
        let found = match self.read_seed_dir()? {
            Some(found) => Some(found),
            None => self.read_devices()?,
        };
        let (seed, source) = match found {
            Some(found) => found,
            None => return Ok(false),
        };

        info!("read config-drive {} from {}", seed.version, source);
        self.seed = Some(seed);
        if self.network.cached().is_some() {
            self.network.invalidate();
        }
        Ok(true)
    }

    fn instance_id(&self) -> Option<String> {
        self.metadata_str("instance-id")
    }

    fn hostname(&self) -> Option<String> {
        self.metadata_str("local-hostname")
    }

    fn availability_zone(&self) -> Option<String> {
        self.metadata_str("availability_zone")
    }

    fn region(&self) -> Option<String> {
        None
    }

    fn public_ssh_keys(&self) -> Vec<String> {
        self.seed
            .as_ref()
            .and_then(|s| s.metadata.get("public_keys"))
            .and_then(Value::as_object)
            .map(|keys| {
                keys.values()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn userdata_raw(&self) -> Option<&[u8]> {
        self.seed.as_ref().and_then(|s| s.userdata.as_deref())
    }

    fn vendordata_raw(&self) -> Option<&[u8]> {
        self.seed.as_ref().and_then(|s| s.vendordata.as_deref())
    }

    fn random_seed(&self) -> Option<&[u8]> {
        self.seed.as_ref().and_then(|s| s.random_seed.as_deref())
    }

    fn network_config(&mut self) -> Result<NetworkConfig> {
        let description = self.network_description();
        let macs = self.macs.as_ref();
        let nics = self.nics.as_ref();
        self.network
            .get_or_compute(|| description.normalize(macs, nics))
    }

    fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.seed
            .as_ref()
            .map(|s| s.files.clone())
            .unwrap_or_default()
    }

    fn extra_attributes(&self) -> Vec<(String, String)> {
        let ec2 = match &self.seed {
            Some(seed) => &seed.ec2_metadata,
            None => return vec![],
        };

        let fields = [
            ("instance-type", "CONFIGDRIVE_INSTANCE_TYPE"),
            ("local-ipv4", "CONFIGDRIVE_IPV4_LOCAL"),
            ("public-ipv4", "CONFIGDRIVE_IPV4_PUBLIC"),
        ];
        let mut attrs: Vec<(String, String)> = fields
            .iter()
            .filter_map(|(key, attr)| {
                ec2.get(*key)
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
                    .map(|v| (attr.to_string(), v.to_string()))
            })
            .collect();

        // block devices that resolve on this host
        let devices = [
            ("root", "CONFIGDRIVE_DEVICE_ROOT"),
            ("swap", "CONFIGDRIVE_DEVICE_SWAP"),
            ("ephemeral0", "CONFIGDRIVE_DEVICE_EPHEMERAL0"),
        ];
        for (name, attr) in devices {
            if let Some(device) = self.device_name_to_device(name) {
                attrs.push((attr.to_string(), device));
            }
        }
        attrs
    }
}

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

//! `fetch` CLI sub-command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};

use crate::config::Config;
use crate::metadata;

/// Fetch metadata and write the requested outputs
#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("provider-group").args(["cmdline", "provider"]).required(true)))]
pub struct CliFetch {
    /// The name of the datasource
    #[arg(long, value_name = "name")]
    provider: Option<String>,
    /// Read the datasource from the kernel cmdline
    #[arg(long)]
    cmdline: bool,
    /// The file into which the metadata attributes are written
    #[arg(long = "attributes", value_name = "path")]
    attributes_file: Option<PathBuf>,
    /// The file into which the hostname should be written
    #[arg(long = "hostname", value_name = "path")]
    hostname_file: Option<PathBuf>,
    /// The file into which the network configuration is written
    #[arg(long = "network-config", value_name = "path")]
    network_config_file: Option<PathBuf>,
    /// The file into which the user-data is written
    #[arg(long = "user-data", value_name = "path")]
    userdata_file: Option<PathBuf>,
    /// The file into which the vendor-data is written
    #[arg(long = "vendor-data", value_name = "path")]
    vendordata_file: Option<PathBuf>,
    /// The file into which SSH public keys are written
    #[arg(long = "ssh-keys", value_name = "path")]
    ssh_keys_file: Option<PathBuf>,
    /// The file into which the provider's random seed is written
    #[arg(long = "random-seed", value_name = "path")]
    random_seed_file: Option<PathBuf>,
    /// The directory under which injected files are written
    #[arg(long = "files-root", value_name = "path")]
    files_root: Option<PathBuf>,
    /// Check-in this instance boot with the cloud provider
    #[arg(long)]
    check_in: bool,
}

impl CliFetch {
    fn has_action(&self) -> bool {
        self.attributes_file.is_some()
            || self.hostname_file.is_some()
            || self.network_config_file.is_some()
            || self.userdata_file.is_some()
            || self.vendordata_file.is_some()
            || self.ssh_keys_file.is_some()
            || self.random_seed_file.is_some()
            || self.files_root.is_some()
            || self.check_in
    }

    /// Run the `fetch` sub-command.
    pub(crate) fn run(self, config: &Config) -> Result<()> {
        let provider = super::get_provider(self.provider.as_deref())?;

        if !self.has_action() {
            slog_scope::warn!("fetch: no action specified");
        }

        let mut source = metadata::fetch_metadata(&provider, config)
            .context("fetching metadata from provider")?;

        if let Some(ref path) = self.attributes_file {
            source
                .write_attributes(path)
                .context("writing metadata attributes")?;
        }
        if let Some(ref path) = self.hostname_file {
            source.write_hostname(path).context("writing hostname")?;
        }
        if let Some(ref path) = self.network_config_file {
            source
                .write_network_config(path)
                .context("writing network configuration")?;
        }
        if let Some(ref path) = self.userdata_file {
            source.write_userdata(path).context("writing user-data")?;
        }
        if let Some(ref path) = self.vendordata_file {
            source.write_vendordata(path).context("writing vendor-data")?;
        }
        if let Some(ref path) = self.ssh_keys_file {
            source.write_public_keys(path).context("writing ssh keys")?;
        }
        if let Some(ref path) = self.random_seed_file {
            source
                .write_random_seed(path)
                .context("writing random seed")?;
        }
        if let Some(ref root) = self.files_root {
            source.write_files(root).context("writing injected files")?;
        }

        // perform boot check-in.
        if self.check_in {
            source
                .boot_checkin()
                .context("checking-in instance boot to cloud provider")?;
        }

        Ok(())
    }
}

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

//! Block device enumeration.

use anyhow::{bail, Context, Result};
use slog_scope::trace;
use std::path::Path;
use std::process::Command;

/// Device discovery collaborator.
pub trait DeviceProbe {
    /// Devices matching a `blkid -t` style criterion, e.g. `LABEL=config-2`
    /// or `TYPE=vfat`.
    fn find_devs_with(&self, criteria: &str) -> Result<Vec<String>>;
    fn path_exists(&self, path: &Path) -> bool;
    fn is_partition(&self, device: &str) -> bool;
    /// Filesystem type of a device, if recognized.
    fn fs_type(&self, device: &str) -> Result<Option<String>>;
}

/// Host probe backed by `blkid` and sysfs.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blkid;

impl DeviceProbe for Blkid {
    fn find_devs_with(&self, criteria: &str) -> Result<Vec<String>> {
        let output = Command::new("blkid")
            .args(["--cache-file", "/dev/null", "-t", criteria, "-o", "device"])
            .output()
            .context("failed to run blkid")?;
        trace!("blkid -t {}: {:?}", criteria, output.status);

        // blkid exits with 2 when nothing matches.
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()),
            Some(2) => Ok(vec![]),
            _ => bail!(
                "blkid failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_partition(&self, device: &str) -> bool {
        let name = device.trim_start_matches("/dev/");
        Path::new("/sys/class/block")
            .join(name)
            .join("partition")
            .exists()
    }

    fn fs_type(&self, device: &str) -> Result<Option<String>> {
        let output = Command::new("blkid")
            .args(["--cache-file", "/dev/null", "-o", "value", "-s", "TYPE", device])
            .output()
            .context("failed to run blkid")?;
        if !output.status.success() {
            return Ok(None);
        }
        let fstype = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!fstype.is_empty()).then_some(fstype))
    }
}

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

//! Static platform evidence: firmware strings, marker paths, kernel cmdline.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Read-only access to host evidence used for platform detection.
///
/// Every accessor may fail when the underlying facility is missing; callers
/// treat failures as "no evidence".
pub trait SystemEvidence {
    /// DMI field, by its dmidecode keyword (e.g. `system-manufacturer`).
    fn dmi_field(&self, key: &str) -> Result<String>;
    fn path_exists(&self, path: &Path) -> bool;
    fn kernel_cmdline(&self) -> Result<String>;
}

/// Map dmidecode keywords to sysfs attribute names.
fn dmi_sysfs_attribute(key: &str) -> Option<&'static str> {
    let attr = match key {
        "baseboard-asset-tag" => "board_asset_tag",
        "baseboard-manufacturer" => "board_vendor",
        "baseboard-product-name" => "board_name",
        "bios-vendor" => "bios_vendor",
        "chassis-asset-tag" => "chassis_asset_tag",
        "system-manufacturer" => "sys_vendor",
        "system-product-name" => "product_name",
        "system-serial-number" => "product_serial",
        "system-uuid" => "product_uuid",
        _ => return None,
    };
    Some(attr)
}

/// Evidence gathered from the running host.
#[derive(Clone, Debug)]
pub struct HostEvidence {
    dmi_dir: PathBuf,
    cmdline_path: PathBuf,
}

impl Default for HostEvidence {
    fn default() -> Self {
        HostEvidence {
            dmi_dir: PathBuf::from("/sys/class/dmi/id"),
            cmdline_path: PathBuf::from("/proc/cmdline"),
        }
    }
}

impl HostEvidence {
    #[cfg(test)]
    pub fn with_paths(dmi_dir: impl Into<PathBuf>, cmdline_path: impl Into<PathBuf>) -> Self {
        HostEvidence {
            dmi_dir: dmi_dir.into(),
            cmdline_path: cmdline_path.into(),
        }
    }
}

impl SystemEvidence for HostEvidence {
    fn dmi_field(&self, key: &str) -> Result<String> {
        let attr = match dmi_sysfs_attribute(key) {
            Some(attr) => attr,
            None => bail!("unknown DMI field '{}'", key),
        };
        let path = self.dmi_dir.join(attr);
        let value = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read DMI field {}", path.display()))?;
        Ok(value.trim().to_string())
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn kernel_cmdline(&self) -> Result<String> {
        std::fs::read_to_string(&self.cmdline_path).with_context(|| {
            format!(
                "failed to read kernel cmdline ({})",
                self.cmdline_path.display()
            )
        })
    }
}

/// Fixed evidence, for tests.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub struct StaticEvidence {
    pub dmi: std::collections::HashMap<String, String>,
    pub paths: Vec<PathBuf>,
    pub cmdline: Option<String>,
}

#[cfg(test)]
impl SystemEvidence for StaticEvidence {
    fn dmi_field(&self, key: &str) -> Result<String> {
        self.dmi
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no DMI field '{}'", key))
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    fn kernel_cmdline(&self) -> Result<String> {
        self.cmdline
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no kernel cmdline"))
    }
}

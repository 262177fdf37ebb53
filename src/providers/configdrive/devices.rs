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

//! Config-drive device discovery and block-device name resolution.

use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value};
use slog_scope::trace;

use crate::util::DeviceProbe;

/// Filesystem labels of a config-drive.
const LABELS: &[&str] = &["config-2", "CONFIG-2"];

/// Filesystem types a config-drive may be formatted with.
const FS_TYPES: &[&str] = &["vfat", "iso9660"];

/// Prefixes tried, in order, in place of `sd` in a device name.
const DEVICE_REMAPS: &[&str] = &["vd", "xvd", "vtb"];

/// Devices that may hold a config-drive, most likely first.
///
/// Labelled devices come first. Devices only matched by filesystem type
/// are kept when they are whole disks.
pub fn find_candidate_devs(probe: &dyn DeviceProbe) -> Result<Vec<String>> {
    let mut by_fstype = vec![];
    for fs_type in FS_TYPES {
        by_fstype.extend(probe.find_devs_with(&format!("TYPE={fs_type}"))?);
    }
    let mut by_label = vec![];
    for label in LABELS {
        by_label.extend(probe.find_devs_with(&format!("LABEL={label}"))?);
    }
    by_fstype.sort_unstable_by(|a, b| b.cmp(a));
    by_label.sort_unstable_by(|a, b| b.cmp(a));

    let mut candidates = by_label.clone();
    for dev in by_fstype {
        if !candidates.contains(&dev) {
            candidates.push(dev);
        }
    }
    candidates.retain(|dev| by_label.contains(dev) || !probe.is_partition(dev));
    trace!("config-drive candidates: {:?}", candidates);
    Ok(candidates)
}

/// Resolve a symbolic block-device name (`ami`, `root`, `swap`,
/// `ephemeral0`...) to a device path.
///
/// The EC2 `block-device-mapping` is looked up first, then filesystem
/// labels.
pub fn device_name_to_device(
    probe: &dyn DeviceProbe,
    ec2_metadata: &Map<String, Value>,
    name: &str,
) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let mut names = vec![name];
    match name {
        "root" => names.insert(0, "ami"),
        "ami" => names.push("root"),
        _ => {}
    }

    let mapping = ec2_metadata
        .get("block-device-mapping")
        .and_then(Value::as_object);
    if let Some(mapping) = mapping {
        for n in &names {
            let found = mapping
                .get(*n)
                .and_then(Value::as_str)
                .and_then(|dev| validate_device_name(probe, dev));
            if found.is_some() {
                return found;
            }
        }
    }

    for n in &names {
        let criteria = if *n == "swap" {
            "TYPE=swap".to_string()
        } else {
            format!("LABEL={n}")
        };
        let first = match probe.find_devs_with(&criteria) {
            Ok(devs) => devs.into_iter().next(),
            Err(e) => {
                trace!("device lookup for {} failed: {:#}", criteria, e);
                None
            }
        };
        if let Some(found) = first.and_then(|dev| validate_device_name(probe, &dev)) {
            return Some(found);
        }
    }
    None
}

/// Absolute path of an existing device, preferring the paravirtualized
/// equivalents of `sd*` names and falling back to the name as given.
fn validate_device_name(probe: &dyn DeviceProbe, device: &str) -> Option<String> {
    if device.is_empty() {
        return None;
    }
    let device = if device.starts_with('/') {
        device.to_string()
    } else {
        format!("/dev/{device}")
    };

    let base = device.rsplit('/').next().unwrap_or_default();
    if let Some(suffix) = base.strip_prefix("sd") {
        let remapped = DEVICE_REMAPS
            .iter()
            .map(|prefix| format!("/dev/{prefix}{suffix}"))
            .find(|remapped| probe.path_exists(Path::new(remapped)));
        if remapped.is_some() {
            return remapped;
        }
    }

    probe.path_exists(Path::new(&device)).then_some(device)
}

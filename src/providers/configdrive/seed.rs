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

//! Config-drive seed directory reader.
//!
//! A config-drive carries two metadata namespaces: `openstack/<version>/`
//! with `meta_data.json`, `user_data`, `vendor_data.json` and
//! `network_data.json`, and the EC2-compatible `ec2/latest/meta-data.json`.
//! Injected files live under `openstack/content/` and are referenced by
//! the `files` manifest of the OpenStack metadata.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use slog_scope::{debug, trace};

use crate::errors::SourceError;
use crate::network::NetworkData;

/// OpenStack metadata versions understood, oldest first.
pub const OS_VERSIONS: &[&str] = &[
    "2012-08-10",
    "2013-04-04",
    "2013-10-17",
    "2015-10-15",
    "2016-06-30",
    "2016-10-06",
    "2017-02-22",
    "2018-08-27",
];

const OS_LATEST: &str = "latest";

/// Everything read from a config-drive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigDriveSeed {
    /// OpenStack metadata version the data was read from.
    pub version: String,
    /// OpenStack metadata, with `instance-id` and `local-hostname` projected.
    pub metadata: Map<String, Value>,
    pub ec2_metadata: Map<String, Value>,
    pub userdata: Option<Vec<u8>>,
    pub vendordata: Option<Vec<u8>>,
    pub network_data: Option<NetworkData>,
    /// Injected files, keyed by destination path.
    pub files: BTreeMap<String, Vec<u8>>,
    pub random_seed: Option<Vec<u8>>,
}

/// Entry of the `files` manifest.
#[derive(Debug, Deserialize)]
struct FileEntry {
    path: String,
    #[serde(default)]
    content_path: String,
}

/// Read a config-drive rooted at `base`.
pub fn read_config_drive(base: &Path) -> Result<ConfigDriveSeed> {
    if !base.is_dir() {
        return Err(SourceError::NonReadable(format!("{}: not a directory", base.display())).into());
    }

    let version = find_working_version(base);
    debug!("reading config-drive {} (version {})", base.display(), version);
    let os_dir = base.join("openstack").join(&version);

    let mut metadata: Map<String, Value> = match read_optional(&os_dir.join("meta_data.json"))? {
        Some(raw) => parse_json(&os_dir.join("meta_data.json"), &raw)?,
        None => {
            return Err(SourceError::NonReadable(format!(
                "missing mandatory path: {}",
                os_dir.join("meta_data.json").display()
            ))
            .into())
        }
    };
    let userdata = read_optional(&os_dir.join("user_data"))?;
    let vendordata = read_optional(&os_dir.join("vendor_data.json"))?;
    let network_data = match read_optional(&os_dir.join("network_data.json"))? {
        Some(raw) => Some(parse_json(&os_dir.join("network_data.json"), &raw)?),
        None => None,
    };

    let ec2_path = base.join("ec2").join(OS_LATEST).join("meta-data.json");
    let ec2_metadata = match read_optional(&ec2_path)? {
        Some(raw) => parse_json(&ec2_path, &raw)?,
        None => Map::new(),
    };

    let files = read_injected_files(base, &metadata)?;

    let random_seed = match metadata.get("random_seed") {
        Some(Value::String(encoded)) => Some(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| SourceError::broken("metadata random_seed entry", e))?,
        ),
        _ => None,
    };

    for (target, source) in [("instance-id", "uuid"), ("local-hostname", "hostname")] {
        if let Some(value) = metadata.get(source).cloned() {
            metadata.insert(target.to_string(), value);
        }
    }

    Ok(ConfigDriveSeed {
        version,
        metadata,
        ec2_metadata,
        userdata,
        vendordata,
        network_data,
        files,
        random_seed,
    })
}

/// Newest known version present under `openstack/`, else `latest`.
fn find_working_version(base: &Path) -> String {
    let available: Vec<String> = match fs::read_dir(base.join("openstack")) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            trace!("cannot list openstack versions: {}", e);
            vec![]
        }
    };
    OS_VERSIONS
        .iter()
        .rev()
        .find(|v| available.iter().any(|a| a == *v))
        .map_or_else(|| OS_LATEST.to_string(), |v| v.to_string())
}

/// Read a file, reporting a missing one as `None`.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SourceError::NonReadable(format!("{}: {}", path.display(), e)).into()),
    }
}

fn parse_json<T: DeserializeOwned>(path: &Path, raw: &[u8]) -> Result<T> {
    serde_json::from_slice(raw).map_err(|e| SourceError::broken(path.display(), e).into())
}

/// Resolve the `files` manifest against `openstack/content/`.
fn read_injected_files(base: &Path, metadata: &Map<String, Value>) -> Result<BTreeMap<String, Vec<u8>>> {
    let entries: Vec<FileEntry> = match metadata.get("files") {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| SourceError::broken("files manifest", e))?,
    };

    let mut files = BTreeMap::new();
    for entry in entries {
        let pieces: Vec<&str> = entry
            .content_path
            .split('/')
            .filter(|p| !p.is_empty() && *p != ".")
            .collect();
        if pieces.contains(&"..") {
            return Err(SourceError::broken(
                format!("file {}", entry.path),
                format!("content path '{}' escapes the drive", entry.content_path),
            )
            .into());
        }
        if pieces.is_empty() {
            return Err(SourceError::broken(
                format!("file {}", entry.path),
                "no valid content path",
            )
            .into());
        }
        let content: PathBuf = pieces
            .iter()
            .fold(base.join("openstack"), |acc, p| acc.join(p));
        let data = fs::read(&content).map_err(|e| {
            SourceError::broken(format!("provided file {}", content.display()), e)
        })?;
        files.insert(entry.path, data);
    }
    Ok(files)
}

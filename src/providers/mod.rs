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

//! Datasources
//!
//! These are the datasources which metaseed knows how to acquire metadata
//! from. Internally, they handle the ins and outs of each provider's metadata
//! service or seed volume, and externally, they expose everything through
//! the [`DataSource`] trait.
//!
//! To add a datasource, put a `pub mod datasource;` line in this file,
//! implement `DataSource` for it, and then add a match line in the
//! `datasource()` function in metadata.rs.

pub mod configdrive;
pub mod scaleway;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use openssh_keys::PublicKey;
use slog_scope::{debug, warn};
use tempfile::NamedTempFile;

use crate::network::NetworkConfig;

/// Attribute keys prefix.
pub const ATTRIBUTES_PREFIX: &str = "METASEED";

/// Write `contents` to `path` atomically.
///
/// Data lands in a temporary file next to the target first, which then
/// replaces the target in a single rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write temporary file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Join an absolute destination path under `root`, refusing to escape it.
fn destination_under(root: &Path, dest: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(dest).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                bail!("refusing to write injected file outside root: '{}'", dest)
            }
        }
    }
    if out == root {
        bail!("invalid injected file path '{}'", dest);
    }
    Ok(out)
}

/// Metadata acquisition strategy of one cloud provider.
///
/// `get_data` must be called first; accessors report absent values until
/// it returned `true`.
pub trait DataSource {
    /// Name used to select this datasource.
    fn name(&self) -> &'static str;

    /// Cheap platform detection, without network access.
    fn detect(&self) -> bool;

    /// Acquire metadata, user-data and vendor-data.
    ///
    /// Returns `false` when the platform is not detected or the source is
    /// not reachable, leaving the datasource state untouched.
    fn get_data(&mut self) -> Result<bool>;

    fn instance_id(&self) -> Option<String>;
    fn hostname(&self) -> Option<String>;
    fn availability_zone(&self) -> Option<String>;
    fn region(&self) -> Option<String>;
    fn public_ssh_keys(&self) -> Vec<String>;
    fn userdata_raw(&self) -> Option<&[u8]>;
    fn vendordata_raw(&self) -> Option<&[u8]>;

    /// Canonical network configuration, computed at most once.
    fn network_config(&mut self) -> Result<NetworkConfig>;

    fn boot_checkin(&self) -> Result<()> {
        warn!("boot check-in requested, but not supported on this platform");
        Ok(())
    }

    /// Files injected by the provider, keyed by destination path.
    fn files(&self) -> BTreeMap<String, Vec<u8>> {
        BTreeMap::new()
    }

    /// Seed material for the kernel entropy pool.
    fn random_seed(&self) -> Option<&[u8]> {
        None
    }

    /// Provider-specific attributes, without the common prefix.
    fn extra_attributes(&self) -> Vec<(String, String)> {
        vec![]
    }

    /// Flat `METASEED_*` attributes.
    fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        let fields = [
            ("INSTANCE_ID", self.instance_id()),
            ("HOSTNAME", self.hostname()),
            ("AVAILABILITY_ZONE", self.availability_zone()),
            ("REGION", self.region()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                attrs.insert(format!("{ATTRIBUTES_PREFIX}_{key}"), value);
            }
        }
        for (key, value) in self.extra_attributes() {
            attrs.insert(format!("{ATTRIBUTES_PREFIX}_{key}"), value);
        }
        attrs
    }

    fn write_attributes(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (k, v) in self.attributes() {
            out.push_str(&format!("{k}={v}\n"));
        }
        write_atomic(path, out.as_bytes()).context("failed to write attributes")
    }

    fn write_hostname(&self, path: &Path) -> Result<()> {
        match self.hostname() {
            Some(hostname) => write_atomic(path, format!("{hostname}\n").as_bytes())
                .context("failed to write hostname"),
            None => {
                warn!("no hostname available, not writing {}", path.display());
                Ok(())
            }
        }
    }

    fn write_network_config(&mut self, path: &Path) -> Result<()> {
        let cfg = self.network_config()?;
        let mut out =
            serde_json::to_vec_pretty(&cfg).context("failed to serialize network config")?;
        out.push(b'\n');
        write_atomic(path, &out).context("failed to write network config")
    }

    fn write_userdata(&self, path: &Path) -> Result<()> {
        match self.userdata_raw() {
            Some(data) => write_atomic(path, data).context("failed to write user-data"),
            None => {
                warn!("no user-data available, not writing {}", path.display());
                Ok(())
            }
        }
    }

    fn write_vendordata(&self, path: &Path) -> Result<()> {
        match self.vendordata_raw() {
            Some(data) => write_atomic(path, data).context("failed to write vendor-data"),
            None => {
                warn!("no vendor-data available, not writing {}", path.display());
                Ok(())
            }
        }
    }

    fn write_random_seed(&self, path: &Path) -> Result<()> {
        match self.random_seed() {
            Some(seed) => write_atomic(path, seed).context("failed to write random seed"),
            None => {
                warn!("no random seed available, not writing {}", path.display());
                Ok(())
            }
        }
    }

    /// Write validated public keys, one per line.
    fn write_public_keys(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for key in self.public_ssh_keys() {
            match PublicKey::parse(&key) {
                Ok(parsed) => {
                    out.push_str(&parsed.to_string());
                    out.push('\n');
                }
                Err(e) => warn!("skipping invalid SSH public key: {}", e),
            }
        }
        write_atomic(path, out.as_bytes()).context("failed to write SSH public keys")
    }

    /// Materialize injected files under `root`.
    fn write_files(&self, root: &Path) -> Result<()> {
        for (dest, contents) in self.files() {
            let path = destination_under(root, &dest)?;
            write_atomic(&path, &contents)
                .with_context(|| format!("failed to write injected file '{dest}'"))?;
        }
        Ok(())
    }
}

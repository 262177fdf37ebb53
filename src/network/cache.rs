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

//! Memoization of the derived network configuration.

use anyhow::Result;
use slog_scope::warn;

use super::NetworkConfig;

/// Three-state cache for a datasource network configuration.
///
/// Distinguishes "never computed" from "computed" and from a stored
/// "absent" marker, which is discarded and recomputed on next access.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NetworkConfigCache {
    #[default]
    Unset,
    Invalidated,
    Computed(NetworkConfig),
}

impl NetworkConfigCache {
    /// Return the cached configuration, computing and storing it if needed.
    ///
    /// A failed computation leaves the cache unset.
    pub fn get_or_compute<F>(&mut self, compute: F) -> Result<NetworkConfig>
    where
        F: FnOnce() -> Result<NetworkConfig>,
    {
        if let NetworkConfigCache::Invalidated = self {
            warn!("Found None as cached network config, resetting to unset");
            *self = NetworkConfigCache::Unset;
        }
        if let NetworkConfigCache::Computed(cfg) = self {
            return Ok(cfg.clone());
        }

        let cfg = compute()?;
        *self = NetworkConfigCache::Computed(cfg.clone());
        Ok(cfg)
    }

    pub fn invalidate(&mut self) {
        *self = NetworkConfigCache::Invalidated;
    }

    pub fn cached(&self) -> Option<&NetworkConfig> {
        match self {
            NetworkConfigCache::Computed(cfg) => Some(cfg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::LogCapture;
    use anyhow::bail;

    #[test]
    fn test_compute_once() {
        let mut cache = NetworkConfigCache::default();
        let mut calls = 0;
        for _ in 0..3 {
            let cfg = cache
                .get_or_compute(|| {
                    calls += 1;
                    Ok(NetworkConfig::fallback("eth0", vec![]))
                })
                .unwrap();
            assert_eq!(cfg.interface_names(), vec!["eth0"]);
        }
        assert_eq!(calls, 1);
        assert!(cache.cached().is_some());
    }

    #[test]
    fn test_failed_compute_stays_unset() {
        let mut cache = NetworkConfigCache::default();
        cache.get_or_compute(|| bail!("boom")).unwrap_err();
        assert_eq!(cache, NetworkConfigCache::Unset);
    }

    #[test]
    fn test_invalidated_warns_and_recomputes() {
        let capture = LogCapture::default();
        let mut cache = NetworkConfigCache::Invalidated;

        let cfg = slog_scope::scope(&capture.logger(), || {
            cache.get_or_compute(|| Ok(NetworkConfig::fallback("ens2", vec![])))
        })
        .unwrap();

        assert_eq!(cfg.interface_names(), vec!["ens2"]);
        assert_eq!(
            capture.warnings(),
            vec!["Found None as cached network config, resetting to unset".to_string()]
        );

        // Subsequent accesses are served from the cache without warnings.
        slog_scope::scope(&capture.logger(), || {
            cache.get_or_compute(|| bail!("not recomputed")).unwrap();
        });
        assert_eq!(capture.warnings().len(), 1);
    }
}

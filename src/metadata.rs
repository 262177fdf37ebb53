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

use anyhow::{bail, Result};

use crate::config::Config;
use crate::providers::configdrive::ConfigDriveDatasource;
use crate::providers::scaleway::ScalewayDatasource;
use crate::providers::DataSource;

macro_rules! box_result {
    ($exp:expr) => {
        Ok(Box::new($exp))
    };
}

/// Datasource names accepted by `fetch_metadata`.
pub const DATASOURCES: &[&str] = &["configdrive", "scaleway"];

/// Build the datasource for the configured provider, without fetching
/// anything yet.
pub fn datasource(provider: &str, config: &Config) -> Result<Box<dyn DataSource>> {
    match provider {
        "configdrive" => box_result!(ConfigDriveDatasource::new(
            config.datasource.configdrive.clone()
        )),
        "scaleway" => box_result!(ScalewayDatasource::try_new(
            config.datasource.scaleway.clone()
        )?),
        _ => bail!(
            "unknown provider '{}', expected one of: {}",
            provider,
            DATASOURCES.join(", ")
        ),
    }
}

/// `fetch_metadata` is the generic, top-level function used by the CLI to
/// fetch metadata. The configured provider is passed in and this function
/// dispatches the acquisition to the matching datasource.
pub fn fetch_metadata(provider: &str, config: &Config) -> Result<Box<dyn DataSource>> {
    let mut source = datasource(provider, config)?;
    if !source.get_data()? {
        bail!("no metadata found for provider '{}'", provider);
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        let err = datasource("nimbus", &Config::default()).err().unwrap();
        assert_eq!(
            err.to_string(),
            "unknown provider 'nimbus', expected one of: configdrive, scaleway"
        );
    }

    #[test]
    fn test_known_providers() {
        for name in DATASOURCES {
            let source = datasource(name, &Config::default()).unwrap();
            assert_eq!(source.name(), *name);
        }
    }
}

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

//! `detect` CLI sub-command.

use anyhow::Result;
use clap::{ArgGroup, Parser};
use slog_scope::info;

use crate::config::Config;
use crate::metadata;

/// Check whether the instance runs on the given platform
#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("provider-group").args(["cmdline", "provider"]).required(true)))]
pub struct CliDetect {
    /// The name of the datasource
    #[arg(long, value_name = "name")]
    provider: Option<String>,
    /// Read the datasource from the kernel cmdline
    #[arg(long)]
    cmdline: bool,
}

impl CliDetect {
    /// Run the `detect` sub-command, returning whether the platform matched.
    pub(crate) fn run(self, config: &Config) -> Result<bool> {
        let provider = super::get_provider(self.provider.as_deref())?;
        let source = metadata::datasource(&provider, config)?;
        let detected = source.detect();
        info!("datasource '{}' detected: {}", source.name(), detected);
        Ok(detected)
    }
}

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

//! Command-line arguments parsing.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use slog_scope::trace;

use crate::config::Config;

mod detect;
mod fetch;

/// Path to kernel command-line (requires procfs mount).
const CMDLINE_PATH: &str = "/proc/cmdline";

#[derive(Debug, Parser)]
#[command(name = "metaseed", version, propagate_version = true)]
pub(crate) struct CliConfig {
    /// Datasource configuration file (YAML)
    #[arg(long, global = true, value_name = "path")]
    config: Option<PathBuf>,
    /// Increase logging verbosity, can be repeated
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    cmd: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    Fetch(fetch::CliFetch),
    Detect(detect::CliDetect),
}

impl CliConfig {
    /// Logging level selected by the verbosity flags.
    pub fn log_level(&self) -> slog::Level {
        match self.verbose {
            0 => slog::Level::Warning,
            1 => slog::Level::Info,
            2 => slog::Level::Debug,
            _ => slog::Level::Trace,
        }
    }

    /// Run the relevant CLI sub-command.
    ///
    /// Returns whether the command succeeded in its own terms, e.g. whether
    /// the platform was detected.
    pub fn run(self) -> Result<bool> {
        let config = match self.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        trace!("datasource configuration - {:?}", config);

        match self.cmd {
            CliCommand::Fetch(cmd) => cmd.run(&config).map(|_| true),
            CliCommand::Detect(cmd) => cmd.run(&config),
        }
    }
}

/// Parse command-line arguments into CLI configuration.
pub(crate) fn parse_args(argv: impl IntoIterator<Item = String>) -> Result<CliConfig> {
    let cfg = match CliConfig::try_parse_from(argv) {
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => e.exit(),
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayVersion => e.exit(),
        v => v,
    }?;
    Ok(cfg)
}

/// Return specified provider or parse provider ID from kargs.
fn get_provider(provider: Option<&str>) -> Result<String> {
    match provider {
        Some(p) => Ok(p.to_string()),
        None => crate::util::get_provider(CMDLINE_PATH),
    }
}

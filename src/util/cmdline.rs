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

//! Kernel cmdline parsing - utility functions
//!
//! This is not a complete cmdline parser: it extracts just a few values,
//! without handling separator quoting/escaping, lists of values or merging
//! of repeated flags.

use anyhow::{bail, Context, Result};
use slog_scope::trace;

/// Provider key.
const CMDLINE_PROVIDER_FLAG: &str = "metaseed.provider";

/// Get provider value from cmdline file.
pub fn get_provider(fpath: &str) -> Result<String> {
    let content = std::fs::read_to_string(fpath)
        .with_context(|| format!("Failed to read cmdline file ({fpath})"))?;

    match find_flag_value(CMDLINE_PROVIDER_FLAG, &content) {
        Some(provider) => {
            trace!("found '{}' flag: {}", CMDLINE_PROVIDER_FLAG, provider);
            Ok(provider)
        }
        None => bail!(
            "Couldn't find flag '{}' in cmdline file ({})",
            CMDLINE_PROVIDER_FLAG,
            fpath
        ),
    }
}

/// Check whether cmdline contains `token` as a standalone element.
pub fn cmdline_has_token(cmdline: &str, token: &str) -> bool {
    cmdline.split_whitespace().any(|s| s == token)
}

// Find value of flag in cmdline string.
fn find_flag_value(flagname: &str, cmdline: &str) -> Option<String> {
    // split the contents into elements and keep key-value tuples only.
    let params: Vec<(&str, &str)> = cmdline
        .split(' ')
        .filter_map(|s| s.split_once('='))
        .collect();

    for (key, val) in params {
        if key != flagname {
            continue;
        }
        let bare_val = val.trim();
        if !bare_val.is_empty() {
            return Some(bare_val.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_find_flag() {
        let flagname = "metaseed.provider";
        let tests = vec![
            ("", None),
            ("foo=bar", None),
            ("metaseed.provider", None),
            ("metaseed.provider=", None),
            ("metaseed.provider=\t", None),
            ("metaseed.provider=scaleway", Some("scaleway".to_string())),
            ("metaseed.provider=\tscaleway", Some("scaleway".to_string())),
            ("metaseed.provider=scaleway\n", Some("scaleway".to_string())),
            (
                "foo=bar metaseed.provider=configdrive",
                Some("configdrive".to_string()),
            ),
            (
                "metaseed.provider=configdrive foo=bar",
                Some("configdrive".to_string()),
            ),
        ];
        for (tcase, tres) in tests {
            let res = find_flag_value(flagname, tcase);
            assert_eq!(res, tres, "failed testcase: '{tcase}'");
        }
    }

    #[test]
    fn test_cmdline_has_token() {
        let tests = vec![
            ("", false),
            ("scaleway", true),
            ("ro quiet scaleway\n", true),
            ("metaseed.provider=scaleway", false),
            ("scalewayfoo root=/dev/sda1", false),
        ];
        for (tcase, tres) in tests {
            let res = cmdline_has_token(tcase, "scaleway");
            assert_eq!(res, tres, "failed testcase: '{tcase}'");
        }
    }

    #[test]
    fn test_get_provider() {
        let mut cmdline = tempfile::NamedTempFile::new().unwrap();
        writeln!(cmdline, "BOOT_IMAGE=/vmlinuz ro metaseed.provider=scaleway").unwrap();
        let fpath = cmdline.path().to_str().unwrap();
        assert_eq!(get_provider(fpath).unwrap(), "scaleway");

        let empty = tempfile::NamedTempFile::new().unwrap();
        get_provider(empty.path().to_str().unwrap()).unwrap_err();
    }
}

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

//! utility functions

use anyhow::Result;
use std::io::{BufRead, BufReader, Read};

mod cmdline;
pub use self::cmdline::{cmdline_has_token, get_provider};

mod detect;
pub use self::detect::{HostEvidence, SystemEvidence};
#[cfg(test)]
pub use self::detect::StaticEvidence;

mod devices;
pub use self::devices::{Blkid, DeviceProbe};

mod dhcp;
pub use self::dhcp::{EphemeralNetwork, NetworkdLease};

mod mount;
pub(crate) use self::mount::{mount_ro, unmount};

#[cfg(test)]
pub(crate) mod testing;

fn key_lookup_line(delim: char, key: &str, line: &str) -> Option<String> {
    match line.find(delim) {
        Some(index) => {
            let (k, val) = line.split_at(index + 1);
            if k != format!("{key}{delim}") {
                None
            } else {
                Some(val.to_owned())
            }
        }
        None => None,
    }
}

/// Find the value of the first `key<delim>value` line.
pub fn key_lookup<R: Read>(delim: char, key: &str, reader: R) -> Result<Option<String>> {
    let contents = BufReader::new(reader);

    for l in contents.lines() {
        let l = l?;
        if let Some(v) = key_lookup_line(delim, key, &l) {
            return Ok(Some(v));
        }
    }
    Ok(None)
}

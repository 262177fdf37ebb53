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

//! Test helpers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::util::DeviceProbe;

/// Drain recording every log record, for assertions on emitted messages.
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<(slog::Level, String)>>>,
}

impl LogCapture {
    pub fn logger(&self) -> slog::Logger {
        slog::Logger::root(self.clone(), slog::o!())
    }

    pub fn warnings(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == slog::Level::Warning)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

impl slog::Drain for LogCapture {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &slog::Record, _: &slog::OwnedKVList) -> Result<(), slog::Never> {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.msg().to_string()));
        Ok(())
    }
}

/// Block device probe answering from static tables.
#[derive(Clone, Debug, Default)]
pub struct FakeProbe {
    /// Devices returned per `blkid -t` criterion.
    pub devs: HashMap<&'static str, Vec<&'static str>>,
    pub existing: Vec<&'static str>,
}

impl DeviceProbe for FakeProbe {
    fn find_devs_with(&self, criteria: &str) -> Result<Vec<String>> {
        Ok(self
            .devs
            .get(criteria)
            .map(|devs| devs.iter().map(|d| d.to_string()).collect())
            .unwrap_or_default())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.existing.iter().any(|e| Path::new(e) == path)
    }

    fn is_partition(&self, device: &str) -> bool {
        let name = device.rsplit('/').next().unwrap_or_default();
        name.ends_with(|c: char| c.is_ascii_digit()) && !name.starts_with("sr")
    }

    fn fs_type(&self, _device: &str) -> Result<Option<String>> {
        Ok(Some("iso9660".to_string()))
    }
}

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

//! Error taxonomy shared by transports, seed readers and network conversion.
//!
//! Everything is propagated as `anyhow::Error`; these types sit at the bottom
//! of the context chain so callers can `downcast_ref` and tell a transient
//! fetch failure from broken metadata.

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single metadata-service request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate-limited by metadata service ({0})")]
    RateLimited(StatusCode),
    #[error("metadata service error ({0})")]
    ServerError(StatusCode),
    #[error("unexpected response status ({0})")]
    UnexpectedStatus(StatusCode),
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited(_) | FetchError::ServerError(_) | FetchError::Transport(_) => {
                true
            }
            FetchError::UnexpectedStatus(_) => false,
        }
    }

    /// Classify an HTTP status which is neither success nor 404.
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            FetchError::RateLimited(status)
        } else if status.is_server_error() {
            FetchError::ServerError(status)
        } else {
            FetchError::UnexpectedStatus(status)
        }
    }
}

/// Structural problems with acquired metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("{0}")]
    NonReadable(String),
    #[error("failed to process {what}: {reason}")]
    BrokenMetadata { what: String, reason: String },
    #[error("unresolvable link: {0}")]
    UnresolvableLink(String),
    #[error("interface name '{0}' resolved more than once")]
    DuplicateInterface(String),
    #[error("unknown network_data link type '{0}'")]
    UnsupportedLink(String),
    #[error("unknown network_data network type '{0}'")]
    UnsupportedNetwork(String),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}

impl SourceError {
    pub fn broken(what: impl fmt::Display, reason: impl fmt::Display) -> Self {
        SourceError::BrokenMetadata {
            what: what.to_string(),
            reason: reason.to_string(),
        }
    }
}

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

//! Drive a functions through a finite number of retries until it succeeds.
//!
//! The pause between attempts goes through a pluggable sleeper, so callers
//! (and tests) can observe or skip the waiting entirely.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

mod client;
pub use self::client::*;

/// Function invoked to wait between two attempts.
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Clone)]
pub struct Retry {
    initial_backoff: Duration,
    max_backoff: Duration,
    max_retries: u8,
    max_elapsed: Option<Duration>,
    sleeper: Sleeper,
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("max_retries", &self.max_retries)
            .field("max_elapsed", &self.max_elapsed)
            .finish()
    }
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            initial_backoff: Duration::new(1, 0),
            max_backoff: Duration::new(5, 0),
            max_retries: 10,
            max_elapsed: None,
            sleeper: Arc::new(thread::sleep),
        }
    }
}

impl Retry {
    /// Build a new retrying driver.
    ///
    /// This defaults to 10 retries with 5 seconds maximum backoff and no
    /// overall deadline.
    pub fn new() -> Self {
        Retry::default()
    }

    /// Set the initial backoff.
    pub fn initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Set the maximum backoff.
    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Maximum number of retries to attempt.
    ///
    /// If zero, only the initial run will be performed, with no
    /// additional retries.
    pub fn max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    /// Upper bound on the wall-clock time spent across all attempts.
    ///
    /// No further attempt is started if waiting for it would cross the bound.
    pub fn max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Replace the function used to wait between attempts.
    pub fn sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Retry a function until it either succeeds once or fails all the time.
    pub fn retry<F, R>(self, try_fn: F) -> Result<R>
    where
        F: FnMut(u8) -> Result<R>,
    {
        self.retry_if(try_fn, |_| true)
    }

    /// Retry a function while it fails with errors accepted by `should_retry`.
    ///
    /// Errors rejected by the predicate are returned right away.
    pub fn retry_if<F, P, R>(self, mut try_fn: F, should_retry: P) -> Result<R>
    where
        F: FnMut(u8) -> Result<R>,
        P: Fn(&anyhow::Error) -> bool,
    {
        let started = Instant::now();
        let mut delay = self.initial_backoff;
        let mut attempts = 0;

        loop {
            let err = match try_fn(attempts) {
                // If the result is ok, there is no need to try again.
                Ok(res) => break Ok(res),
                Err(e) => e,
            };

            if !should_retry(&err) {
                break Err(err);
            }

            // Otherwise, perform "the retry with backoff" logic.
            if attempts >= self.max_retries {
                break Err(err).with_context(|| {
                    format!("maximum number of retries ({}) reached", self.max_retries)
                });
            }
            if let Some(limit) = self.max_elapsed {
                if started.elapsed() + delay > limit {
                    break Err(err)
                        .with_context(|| format!("retry deadline of {limit:?} exceeded"));
                }
            }
            attempts = attempts.saturating_add(1);

            (self.sleeper)(delay);

            delay = if self.max_backoff != Duration::new(0, 0) && delay * 2 > self.max_backoff {
                self.max_backoff
            } else {
                delay * 2
            };
        }
    }
}

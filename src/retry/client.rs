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

//! retry
//!
//! this is an abstraction over the regular http get request. it allows you to
//! have a request retry until it succeeds, with a configurable number of
//! of attempts and a backoff strategy. Only rate-limiting, server errors and
//! transport failures are retried; a 404 can be surfaced as an absent value.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{blocking, header, Method, StatusCode};
use serde::de::DeserializeOwned;
use slog_scope::info;

use crate::errors::{FetchError, SourceError};
use crate::retry::{Retry, Sleeper};

#[derive(Debug, Clone)]
pub struct Client {
    client: blocking::Client,
    retry: Retry,
    return_on_404: bool,
    #[cfg(test)]
    mock_base_url: Option<String>,
}

impl Client {
    /// Build a client with a per-request timeout and an optional local
    /// address the outbound connections are bound to.
    pub fn try_with_transport(
        timeout: Option<Duration>,
        local_address: Option<IpAddr>,
    ) -> Result<Self> {
        let mut builder = blocking::Client::builder().local_address(local_address);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("failed to initialize client")?;
        Ok(Client {
            client,
            retry: Retry::new(),
            return_on_404: false,
            #[cfg(test)]
            mock_base_url: None,
        })
    }

    /// Maximum number of retries to attempt.
    ///
    /// If zero, only the initial request will be performed, with no
    /// additional retries.
    pub fn max_retries(mut self, retries: u8) -> Self {
        self.retry = self.retry.max_retries(retries);
        self
    }

    /// Overall time budget for one request, across all its retries.
    pub fn max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.retry = self.retry.max_elapsed(max_elapsed);
        self
    }

    /// Function used to wait between attempts.
    pub fn sleeper(mut self, sleeper: Sleeper) -> Self {
        self.retry = self.retry.sleeper(sleeper);
        self
    }

    pub fn return_on_404(mut self, return_on_404: bool) -> Self {
        self.return_on_404 = return_on_404;
        self
    }

    #[cfg(test)]
    pub fn mock_base_url(mut self, base_url: String) -> Self {
        self.mock_base_url = Some(base_url);
        self
    }

    pub fn get(&self, url: String) -> RequestBuilder {
        self.request(Method::GET, url, None)
    }

    pub fn patch(&self, url: String, body: Option<String>) -> RequestBuilder {
        self.request(Method::PATCH, url, body)
    }

    fn request(&self, method: Method, url: String, body: Option<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            url,
            body,
            client: self.client.clone(),
            retry: self.retry.clone(),
            return_on_404: self.return_on_404,
            #[cfg(test)]
            mock_base_url: self.mock_base_url.clone(),
        }
    }
}

pub struct RequestBuilder {
    method: Method,
    url: String,
    body: Option<String>,
    client: blocking::Client,
    retry: Retry,
    return_on_404: bool,
    #[cfg(test)]
    mock_base_url: Option<String>,
}

impl RequestBuilder {
    /// Fetch the raw response body.
    ///
    /// `Ok(None)` means the resource does not exist (404), which is only
    /// possible when the client was built with `return_on_404(true)`.
    pub fn send(self) -> Result<Option<Vec<u8>>> {
        let url = self.parse_url()?;
        let req = blocking::Request::new(self.method.clone(), url);

        self.retry.clone().retry_if(
            |attempt| {
                info!("Fetching {}: Attempt #{}", req.url(), attempt + 1);
                self.dispatch_request(&req)
            },
            is_transient,
        )
    }

    /// Fetch and decode a JSON document.
    ///
    /// Malformed JSON is reported as broken metadata and never retried.
    pub fn send_json<T>(self) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.url.clone();
        match self.send()? {
            None => Ok(None),
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| SourceError::broken(&url, e).into()),
        }
    }

    /// Send the request body and only care about the response status.
    pub fn dispatch(self) -> Result<StatusCode> {
        let url = self.parse_url()?;

        self.retry.clone().retry_if(
            |attempt| {
                let mut builder = self
                    .client
                    .request(self.method.clone(), url.clone())
                    .header(
                        header::CONTENT_TYPE,
                        header::HeaderValue::from_static("application/json"),
                    );
                if let Some(ref content) = self.body {
                    builder = builder.body(content.clone());
                };
                let req = builder.build().context("failed to build request")?;

                info!("Sending {} {}: Attempt #{}", req.method(), req.url(), attempt + 1);
                let status = self
                    .client
                    .execute(req)
                    .map_err(FetchError::Transport)?
                    .status();
                if status.is_success() {
                    Ok(status)
                } else {
                    Err(FetchError::from_status(status).into())
                }
            },
            is_transient,
        )
    }

    fn dispatch_request(&self, req: &blocking::Request) -> Result<Option<Vec<u8>>> {
        match self.client.execute(clone_request(req)) {
            Ok(resp) => match (resp.status(), self.return_on_404) {
                (StatusCode::OK, _) => {
                    info!("Fetch successful");
                    let body = resp.bytes().map_err(FetchError::Transport)?;
                    Ok(Some(body.to_vec()))
                }
                (StatusCode::NOT_FOUND, true) => {
                    info!("Fetch failed with 404: resource not found");
                    Ok(None)
                }
                (s, _) => {
                    info!("Failed to fetch: {}", s);
                    Err(FetchError::from_status(s).into())
                }
            },
            Err(e) => {
                info!("Failed to fetch: {}", e);
                Err(FetchError::Transport(e).into())
            }
        }
    }

    fn parse_url(&self) -> Result<reqwest::Url> {
        #[allow(unused_mut)]
        let mut url = reqwest::Url::parse(self.url.as_str()).context("failed to parse uri")?;
        #[cfg(test)]
        if let Some(mock_base_url) = &self.mock_base_url {
            let base_url =
                reqwest::Url::parse(mock_base_url).context("failed to parse mock base URL")?;
            url.set_scheme(base_url.scheme())
                .map_err(|_| anyhow::anyhow!("failed to update URL scheme"))?;
            let host = base_url
                .host()
                .context("mock base URL doesn't have a host")?
                .to_string();
            url.set_host(Some(&host))
                .context("failed to update URL host")?;
            url.set_port(base_url.port())
                .map_err(|_| anyhow::anyhow!("failed to update URL port"))?;
        }
        Ok(url)
    }
}

/// Only failures which may go away on their own are worth another attempt.
fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FetchError>()
        .map_or(false, FetchError::is_transient)
}

/// Reqwests Request struct doesn't implement `Clone`,
/// so we have to do it here.
fn clone_request(req: &blocking::Request) -> blocking::Request {
    let mut newreq = blocking::Request::new(req.method().clone(), req.url().clone());
    newreq.headers_mut().extend(req.headers().clone());
    newreq
}

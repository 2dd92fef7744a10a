// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Source configuration: allocator endpoint and read timeout.
// Endpoints are written as `smem://<address>:<port>/<channel>`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_CHANNEL: &str = "test";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(1);

const SCHEME: &str = "smem://";

/// Where the segment allocator lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllocatorEndpoint {
    pub address: String,
    pub port: u16,
    pub channel: String,
}

impl Default for AllocatorEndpoint {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            port: DEFAULT_PORT,
            channel: DEFAULT_CHANNEL.to_owned(),
        }
    }
}

impl fmt::Display for AllocatorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}:{}/{}", self.address, self.port, self.channel)
    }
}

impl FromStr for AllocatorEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s.strip_prefix(SCHEME).unwrap_or(s);
        let (authority, channel) = match rest.split_once('/') {
            Some((a, c)) => (a, c),
            None => (rest, ""),
        };
        if channel.is_empty() || channel.contains('/') {
            return Err(Error::Connection(format!("invalid channel in endpoint '{s}'")));
        }

        let (address, port) = match authority.rsplit_once(':') {
            Some((a, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| Error::Connection(format!("invalid port in endpoint '{s}'")))?;
                (a, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        let address = if address.is_empty() { DEFAULT_ADDRESS } else { address };

        Ok(Self {
            address: address.to_owned(),
            port,
            channel: channel.to_owned(),
        })
    }
}

/// Options for [`SmemSource`](crate::SmemSource).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub endpoint: AllocatorEndpoint,
    /// Deadline for every read call, including the initial stream-table read.
    #[serde(rename = "timeout_secs", deserialize_with = "de_secs")]
    pub timeout: Duration,
    /// Sleep between unsuccessful claim attempts.
    #[serde(skip, default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Suppress a frame when unmapping its segment fails.
    pub strict_release: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: AllocatorEndpoint::default(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            strict_release: false,
        }
    }
}

impl SourceConfig {
    pub fn new(endpoint: AllocatorEndpoint) -> Self {
        Self { endpoint, ..Self::default() }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_strict_release(mut self, strict: bool) -> Self {
        self.strict_release = strict;
        self
    }
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn de_secs<'de, D>(de: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(de).map(Duration::from_secs)
}

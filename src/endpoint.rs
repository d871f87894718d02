//! Cache Endpoints
//!
//! An endpoint is one physical cache server as registered with discovery.
//! Identity is `(host, port)`: equality, hashing and ordering ignore the
//! shard weight, so sets of endpoints are keyed and sorted by address alone.
//!
//! Textual form: `host:port[:weight]`, with IPv6 hosts in brackets
//! (`[::1]:11211:2`). Lists are comma separated.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Shard weight used when none is given
pub const DEFAULT_SHARD_WEIGHT: u32 = 1;

/// A cache server address plus its placement weight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// Service port
    pub port: u16,
    /// Relative weight on the hash ring
    #[serde(default = "default_weight")]
    pub shard_weight: u32,
}

fn default_weight() -> u32 {
    DEFAULT_SHARD_WEIGHT
}

impl Endpoint {
    /// Create an endpoint with the default weight
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_weight(host, port, DEFAULT_SHARD_WEIGHT)
    }

    /// Create an endpoint with an explicit weight
    pub fn with_weight(host: impl Into<String>, port: u16, shard_weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            shard_weight,
        }
    }

    /// The identity tuple used for equality and ordering
    pub fn identity(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// `host:port` form suitable for dialing
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let invalid = |reason: &str| Error::InvalidEndpoint {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        // Split off the host, which may be a bracketed IPv6 literal
        let (host, rest) = if let Some(stripped) = input.strip_prefix('[') {
            let close = stripped.find(']').ok_or_else(|| invalid("unterminated '['"))?;
            let rest = stripped[close + 1..]
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            (&stripped[..close], rest)
        } else {
            input.split_once(':').ok_or_else(|| invalid("missing port"))?
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let mut parts = rest.split(':');
        let port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| invalid("port is not a number"))?;

        let shard_weight = match parts.next() {
            Some(w) => w.parse::<u32>().map_err(|_| invalid("weight is not a number"))?,
            None => DEFAULT_SHARD_WEIGHT,
        };

        if parts.next().is_some() {
            return Err(invalid("too many ':' separated fields"));
        }

        Ok(Endpoint::with_weight(host, port, shard_weight))
    }
}

/// Parse a comma separated endpoint list, e.g. `"a:11211,b:11211:2"`
///
/// Blank entries are skipped. Duplicate identities keep the last weight seen.
pub fn parse_endpoint_list(s: &str) -> Result<BTreeSet<Endpoint>> {
    let mut set = BTreeSet::new();
    for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        set.replace(item.parse::<Endpoint>()?);
    }
    Ok(set)
}

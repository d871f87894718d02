//! Pool Addressing
//!
//! Clients name a logical pool with a composite string:
//! `<scheme>!<discovery-bootstrap-address>!<path>`, for example
//! `twcache!zk-1:2181,zk-2:2181!/cache/pools/session`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Separator between address components
pub const ADDRESS_SEPARATOR: char = '!';

/// A parsed pool address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolAddress {
    /// Resolver scheme (selects the coordination backend)
    pub scheme: String,
    /// Bootstrap address of the coordination service
    pub bootstrap: String,
    /// Pool path on the coordination service
    pub path: String,
}

impl PoolAddress {
    /// Create a new pool address
    pub fn new(
        scheme: impl Into<String>,
        bootstrap: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            bootstrap: bootstrap.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for PoolAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.scheme,
            self.bootstrap,
            self.path,
            sep = ADDRESS_SEPARATOR
        )
    }
}

impl FromStr for PoolAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.trim().split(ADDRESS_SEPARATOR).collect();
        if parts.len() != 3 {
            return Err(invalid("expected <scheme>!<bootstrap>!<path>"));
        }

        let (scheme, bootstrap, path) = (parts[0], parts[1], parts[2]);
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }
        if bootstrap.is_empty() {
            return Err(invalid("empty bootstrap address"));
        }
        if !path.starts_with('/') {
            return Err(invalid("path must be absolute"));
        }

        Ok(PoolAddress::new(scheme, bootstrap, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pool_address() {
        let addr: PoolAddress = "twcache!zk-1:2181,zk-2:2181!/cache/pools/session"
            .parse()
            .unwrap();
        assert_eq!(addr.scheme, "twcache");
        assert_eq!(addr.bootstrap, "zk-1:2181,zk-2:2181");
        assert_eq!(addr.path, "/cache/pools/session");
        assert_eq!(
            addr.to_string(),
            "twcache!zk-1:2181,zk-2:2181!/cache/pools/session"
        );
    }

    #[test]
    fn test_parse_pool_address_errors() {
        assert!("twcache!zk:2181".parse::<PoolAddress>().is_err());
        assert!("!zk:2181!/p".parse::<PoolAddress>().is_err());
        assert!("twcache!!/p".parse::<PoolAddress>().is_err());
        assert!("twcache!zk:2181!relative".parse::<PoolAddress>().is_err());
        assert!("a!b!/c!d".parse::<PoolAddress>().is_err());
    }
}

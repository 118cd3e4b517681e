//! Process configuration, read from the environment.
//!
//! | Variable                       | Default        |
//! |--------------------------------|----------------|
//! | `SLUICE_ADDR`                  | `0.0.0.0:3000` |
//! | `SLUICE_SHUTDOWN_TIMEOUT_SECS` | `20`           |
//! | `SLUICE_API_VERSION`           | `v1`           |

use std::net::{AddrParseError, SocketAddr};
use std::num::ParseIntError;
use std::time::Duration;

use crate::shutdown::DEFAULT_DRAIN_TIMEOUT;

pub const ADDR_VAR: &str = "SLUICE_ADDR";
pub const SHUTDOWN_TIMEOUT_VAR: &str = "SLUICE_SHUTDOWN_TIMEOUT_SECS";
pub const API_VERSION_VAR: &str = "SLUICE_API_VERSION";

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_API_VERSION: &str = "v1";

/// A variable was set to something unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a socket address: {source}")]
    InvalidAddr {
        var: &'static str,
        value: String,
        #[source]
        source: AddrParseError,
    },

    #[error("{var}={value:?} is not a whole number of seconds: {source}")]
    InvalidNumber {
        var: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Address the server binds to.
    pub addr: SocketAddr,
    /// Bound on the graceful drain once shutdown starts.
    pub shutdown_timeout: Duration,
    /// Version segment every route is mounted under.
    pub api_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            shutdown_timeout: DEFAULT_DRAIN_TIMEOUT,
            api_version: DEFAULT_API_VERSION.to_owned(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads every variable through `lookup`. Unset and blank variables fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let addr = get(ADDR_VAR).unwrap_or_else(|| DEFAULT_ADDR.to_owned());
        let addr = addr.parse().map_err(|source| ConfigError::InvalidAddr {
            var: ADDR_VAR,
            value: addr.clone(),
            source,
        })?;

        let shutdown_timeout = match get(SHUTDOWN_TIMEOUT_VAR) {
            None => DEFAULT_DRAIN_TIMEOUT,
            Some(value) => {
                let secs: u64 = value.parse().map_err(|source| ConfigError::InvalidNumber {
                    var: SHUTDOWN_TIMEOUT_VAR,
                    value: value.clone(),
                    source,
                })?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        var: SHUTDOWN_TIMEOUT_VAR,
                        value,
                        reason: "must be at least one second",
                    });
                }
                Duration::from_secs(secs)
            }
        };

        let api_version = get(API_VERSION_VAR).unwrap_or_else(|| DEFAULT_API_VERSION.to_owned());
        if !api_version.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_') {
            return Err(ConfigError::Invalid {
                var: API_VERSION_VAR,
                value: api_version,
                reason: "must be a single path segment",
            });
        }

        Ok(Self { addr, shutdown_timeout, api_version })
    }
}

//! Environment-driven service configuration.

use std::fmt::Debug;
use std::str::FromStr;

use tracing::warn;

use coinduel_core::{TiePolicy, DEFAULT_STALENESS_SECS, HERMES_URL};

/// Default WebSocket bind address (0.0.0.0 for Docker/production).
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8090";

/// Default expiry sweep interval in seconds.
pub const DEFAULT_SWEEP_SECS: u64 = 5;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway bind address (`COINDUEL_BIND_ADDR`).
    pub bind_addr: String,

    /// Pyth Hermes endpoint (`COINDUEL_HERMES_URL`).
    pub hermes_url: String,

    /// Price staleness threshold in seconds (`COINDUEL_STALENESS_SECS`).
    pub staleness_secs: i64,

    /// Dead-heat resolution at finalize (`COINDUEL_TIE_POLICY`:
    /// rollover, draw, or creator_wins).
    pub tie_policy: TiePolicy,

    /// Expiry sweep interval in seconds (`COINDUEL_SWEEP_SECS`).
    /// Zero disables the sweeper and leaves settlement to clients.
    pub sweep_secs: u64,
}

impl Config {
    /// Read configuration from the environment. Unset or unparsable
    /// variables fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("COINDUEL_BIND_ADDR")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            hermes_url: std::env::var("COINDUEL_HERMES_URL")
                .unwrap_or_else(|_| HERMES_URL.to_string()),
            staleness_secs: parse_var("COINDUEL_STALENESS_SECS", DEFAULT_STALENESS_SECS),
            tie_policy: parse_var("COINDUEL_TIE_POLICY", TiePolicy::default()),
            sweep_secs: parse_var("COINDUEL_SWEEP_SECS", DEFAULT_SWEEP_SECS),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Debug,
{
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}, using {:?}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

//! Ambient configuration. The spec's CLI surface is a single
//! positional argument (the membership hostname); everything else the
//! engine needs — listen address, concurrency window, retry bounds —
//! is a fixed constant in the distilled spec. A complete service still
//! wants those tunable without a recompile, so they live in an
//! optional TOML file, loaded the same way the teacher's
//! `config::load_from_path` loads `huginn-proxy-lib`'s config: read,
//! parse, validate.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::{CoreError, Result};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CoreConfig {
    /// Address the proxy's client-facing listener binds to.
    pub listen: SocketAddr,
    /// Port the membership collaborator is reached on, alongside the
    /// hostname given on the command line.
    pub membership_port: u16,
    /// Port every block server in the fleet listens on.
    pub block_server_port: u16,
    /// `K`, the fan-out concurrency window (spec §4.D, §5).
    pub concurrency: usize,
    /// Bounded retry count for the request path (spec §4.D).
    pub request_max_attempts: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8787".parse().unwrap(),
            membership_port: 19_841,
            block_server_port: crate::membership::BLOCK_SERVER_PORT,
            concurrency: crate::transfer::K,
            request_max_attempts: crate::transfer::REQUEST_MAX_ATTEMPTS,
        }
    }
}

/// Load configuration from a TOML file, falling back to defaults for
/// any field the file omits (`#[serde(default)]` on the struct).
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<CoreConfig> {
    let text = fs::read_to_string(path.as_ref())
        .map_err(|e| CoreError::Config(format!("failed to read {}: {e}", path.as_ref().display())))?;
    let cfg: CoreConfig = toml::from_str(&text)
        .map_err(|e| CoreError::Config(format!("failed to parse {}: {e}", path.as_ref().display())))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &CoreConfig) -> Result<()> {
    if cfg.concurrency == 0 {
        return Err(CoreError::Config("concurrency must be at least 1".into()));
    }
    if cfg.request_max_attempts == 0 {
        return Err(CoreError::Config("request_max_attempts must be at least 1".into()));
    }
    Ok(())
}

//! Configuration: the TOML file format and the runtime options derived
//! from it.

use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Default Stratum v2 port on mainnet.
pub const DEFAULT_SV2_PORT: u16 = 8442;
/// Default fee-check interval in seconds (`--sv2-interval`).
pub const DEFAULT_FEE_CHECK_INTERVAL: u64 = 30;
/// Default minimum fee improvement, in satoshis, before a template update
/// is pushed on an unchanged tip (`--sv2-feedelta`).
pub const DEFAULT_FEE_DELTA: i64 = 1000;
/// Default cap on simultaneously connected peers.
pub const DEFAULT_MAX_PEERS: usize = 8;

/// On-disk TOML configuration. Every field has a default so an empty file
/// (or no file at all) is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateProviderConfig {
    #[serde(default = "default_bind")]
    pub sv2_bind: String,
    #[serde(default = "default_port")]
    pub sv2_port: u16,
    /// Fee-check interval, seconds.
    #[serde(default = "default_interval")]
    pub sv2_interval: u64,
    /// Minimum fee delta, satoshis.
    #[serde(default = "default_fee_delta")]
    pub sv2_feedelta: i64,
    /// Node endpoint: `unix` or `unix:<path>`.
    #[serde(default = "default_ipc_connect")]
    pub ipc_connect: String,
    /// Where the authority key and solved-block archive live.
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Certificate lifetime in seconds from startup; unset means the
    /// certificate never expires.
    #[serde(default)]
    pub cert_validity_secs: Option<i64>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for TemplateProviderConfig {
    fn default() -> Self {
        Self {
            sv2_bind: default_bind(),
            sv2_port: default_port(),
            sv2_interval: default_interval(),
            sv2_feedelta: default_fee_delta(),
            ipc_connect: default_ipc_connect(),
            datadir: default_datadir(),
            max_peers: default_max_peers(),
            cert_validity_secs: None,
            log_file: None,
        }
    }
}

impl TemplateProviderConfig {
    pub fn options(&self) -> Sv2TemplateProviderOptions {
        Sv2TemplateProviderOptions {
            host: self.sv2_bind.clone(),
            port: self.sv2_port,
            fee_check_interval: Duration::from_secs(self.sv2_interval.max(1)),
            fee_delta: self.sv2_feedelta,
            max_peers: self.max_peers,
            datadir: self.datadir.clone(),
            cert_validity: self.cert_validity_secs,
            is_test: false,
        }
    }
}

/// Runtime options of one Template Provider instance.
#[derive(Debug, Clone)]
pub struct Sv2TemplateProviderOptions {
    pub host: String,
    pub port: u16,
    pub fee_check_interval: Duration,
    /// Minimum fee improvement (satoshis) to push a template on an
    /// unchanged tip.
    pub fee_delta: i64,
    pub max_peers: usize,
    pub datadir: PathBuf,
    /// Certificate lifetime in seconds relative to now; negative values
    /// produce an already-expired certificate (used by tests), `None` a
    /// certificate that never expires.
    pub cert_validity: Option<i64>,
    /// Shortens internal waits so integration tests run in bounded time.
    pub is_test: bool,
}

impl Default for Sv2TemplateProviderOptions {
    fn default() -> Self {
        TemplateProviderConfig::default().options()
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_SV2_PORT
}
fn default_interval() -> u64 {
    DEFAULT_FEE_CHECK_INTERVAL
}
fn default_fee_delta() -> i64 {
    DEFAULT_FEE_DELTA
}
fn default_ipc_connect() -> String {
    "unix".to_string()
}
fn default_datadir() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

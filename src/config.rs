//! Exchange topology and ambient process configuration.
//!
//! Genuinely multi-symbol, multi-coin: every symbol names its base and
//! quote coin explicitly rather than assuming a single active pair. There
//! is no per-asset `decimals` table for internal scaling — one global
//! exponent covers every amount ([`crate::scaled`]), so `AssetConfig` here
//! only names coins, it does not configure their precision.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolEntry {
    pub symbol: String,
    pub base_coin: String,
    pub quote_coin: String,
}

/// The exchange-wide symbol/coin table. Hot-reloaded by
/// [`crate::config_watcher::config_watcher`]; process identity (which
/// coin a Bank owns, which symbol an OME owns) is fixed at startup and is
/// not part of this reloadable structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeTopology {
    pub coins: Vec<String>,
    pub symbols: Vec<SymbolEntry>,
}

impl ExchangeTopology {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("reading {}: {e}", path.as_ref().display()))?;
        let topo: ExchangeTopology =
            serde_yaml::from_str(&text).map_err(|e| format!("parsing topology yaml: {e}"))?;
        topo.validate()?;
        Ok(topo)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.coins.is_empty() {
            return Err("no coins configured".into());
        }
        if self.symbols.is_empty() {
            return Err("no symbols configured".into());
        }
        let coins: std::collections::HashSet<&str> =
            self.coins.iter().map(String::as_str).collect();
        for s in &self.symbols {
            if !coins.contains(s.base_coin.as_str()) {
                return Err(format!(
                    "symbol {} references unknown base coin {}",
                    s.symbol, s.base_coin
                ));
            }
            if !coins.contains(s.quote_coin.as_str()) {
                return Err(format!(
                    "symbol {} references unknown quote coin {}",
                    s.symbol, s.quote_coin
                ));
            }
        }
        Ok(())
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolEntry> {
        self.symbols.iter().find(|s| s.symbol == name)
    }

    /// Every symbol for which `coin` is either the base or the quote —
    /// the set of OMEs a Bank(coin) must replicate tickets/balance
    /// changes with.
    pub fn symbols_for_coin(&self, coin: &str) -> Vec<&SymbolEntry> {
        self.symbols
            .iter()
            .filter(|s| s.base_coin == coin || s.quote_coin == coin)
            .collect()
    }
}

/// Ambient process configuration: logging, store, and peer discovery.
/// Follows `src/logging.rs`'s `AppConfig` shape, generalized with the
/// connection strings spec §6 requires (store, durable stream, service
/// discovery).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log_dir: String,
    pub log_file: String,
    pub rotation: String, // "hourly" | "daily" | "never"
    pub log_level: String,
    pub use_json: bool,
    pub enable_tracing: bool,

    pub data_dir: String,
    pub database_url: String,
    pub nats_url: String,
    pub etcd_endpoints: Vec<String>,

    /// Topology hot-reload poll interval.
    #[serde(default = "default_reload_secs")]
    pub topology_reload_secs: u64,
}

fn default_reload_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("reading {}: {e}", path.as_ref().display()))?;
        serde_yaml::from_str(&text).map_err(|e| format!("parsing app config yaml: {e}"))
    }

    pub fn filedb_path(&self, engine_name: &str) -> std::path::PathBuf {
        Path::new(&self.data_dir)
            .join("filedb")
            .join(format!("{engine_name}.log"))
    }
}

/// A Bank process owns exactly one coin.
#[derive(Debug, Clone, Deserialize)]
pub struct BankIdentity {
    pub coin: String,
}

/// An OME process owns exactly one symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct OmeIdentity {
    pub symbol: String,
}

/// `bank_service_<coin> -> host:port` / `nats_bank_<coin> -> host:port`
/// resolved from the discovery store (§6). Kept here as the shape both
/// [`crate::discovery`] and tests share.
pub type DiscoveryTable = HashMap<String, String>;

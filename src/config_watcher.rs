//! Background hot-reload of the exchange topology.
//!
//! Never-crash, validate-before-swap: a bad reload logs and keeps the
//! previous [`crate::config::ExchangeTopology`] in place rather than
//! taking the process down.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

use crate::config::ExchangeTopology;

/// Configuration reload result
pub enum ConfigReloadResult {
    Success,
    ReadError(String),
    ValidationError(String),
}

fn reload_config(config_path: &Path) -> Result<ExchangeTopology, String> {
    ExchangeTopology::load(config_path)
}

/// Background config watcher for hot-reload.
///
/// Key principles:
/// - Never crash on config errors
/// - Keep old config if new config is invalid
/// - Log errors for monitoring/alerting
pub async fn config_watcher(
    config_path: &Path,
    topology: Arc<RwLock<ExchangeTopology>>,
    check_interval_secs: u64,
) {
    let config_path = config_path.to_path_buf();

    loop {
        tokio::time::sleep(Duration::from_secs(check_interval_secs)).await;

        let result = match reload_config(&config_path) {
            Ok(new_topo) => {
                if let Err(e) = new_topo.validate() {
                    tracing::error!(
                        target: "CONFIG",
                        "invalid topology: {e}, keeping old configuration"
                    );
                    ConfigReloadResult::ValidationError(e)
                } else {
                    *topology.write().await = new_topo;
                    tracing::info!(target: "CONFIG", "topology reloaded successfully");
                    ConfigReloadResult::Success
                }
            }
            Err(e) => {
                tracing::error!(
                    target: "CONFIG",
                    "failed to reload topology: {e}, keeping old configuration"
                );
                ConfigReloadResult::ReadError(e)
            }
        };

        match result {
            ConfigReloadResult::Success => {}
            ConfigReloadResult::ReadError(_) | ConfigReloadResult::ValidationError(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_validate_rejects_empty_topology() {
        let topo = ExchangeTopology {
            coins: vec![],
            symbols: vec![],
        };
        assert!(topo.validate().is_err());
    }

    #[test]
    fn qa_validate_rejects_unknown_coin() {
        let topo = ExchangeTopology {
            coins: vec!["BTC".into()],
            symbols: vec![crate::config::SymbolEntry {
                symbol: "BTC_USDT".into(),
                base_coin: "BTC".into(),
                quote_coin: "USDT".into(),
            }],
        };
        assert!(topo.validate().is_err());
    }

    #[test]
    fn qa_validate_accepts_consistent_topology() {
        let topo = ExchangeTopology {
            coins: vec!["BTC".into(), "USDT".into()],
            symbols: vec![crate::config::SymbolEntry {
                symbol: "BTC_USDT".into(),
                base_coin: "BTC".into(),
                quote_coin: "USDT".into(),
            }],
        };
        assert!(topo.validate().is_ok());
    }
}

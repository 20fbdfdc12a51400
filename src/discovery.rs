//! Service discovery: a key-value store mapping `bank_service_<coin>` and
//! `nats_bank_<coin>` to `host:port`.
//!
//! A thin `Get(key)`/`Put(key, value)` wrapper over an etcd client with a
//! fixed 30s per-call deadline. The key-naming helpers are free functions
//! so every caller constructs the same key shape.

use std::time::Duration;

use thiserror::Error;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// `bank_service_<coin>` — the gRPC dial address for `Bank(coin)`'s
/// `BankService` server.
pub fn key_bank_service(coin: &str) -> String {
    format!("bank_service_{}", coin.to_lowercase())
}

/// `nats_bank_<coin>` — the durable-stream connection address a
/// `Bank(coin)` subscribes to for its `OrderReq` ingress.
pub fn key_nats_service(coin: &str) -> String {
    format!("nats_bank_{}", coin.to_lowercase())
}

/// A registered client over one or more etcd endpoints.
#[derive(Clone)]
pub struct Discovery {
    client: etcd_client::Client,
}

impl Discovery {
    pub async fn connect(endpoints: &[String]) -> Result<Self, DiscoveryError> {
        let client = etcd_client::Client::connect(endpoints, None).await?;
        Ok(Self { client })
    }

    /// Resolves `key` to its stored value, or `NotFound` if absent. Bounded
    /// by [`LOOKUP_TIMEOUT`] per spec §5.
    pub async fn get(&self, key: &str) -> Result<String, DiscoveryError> {
        let mut client = self.client.clone();
        let fut = client.get(key, None);
        let resp = tokio::time::timeout(LOOKUP_TIMEOUT, fut)
            .await
            .map_err(|_| DiscoveryError::Timeout(LOOKUP_TIMEOUT))??;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| DiscoveryError::NotFound(key.to_string()))?;
        Ok(kv.value_str()?.to_string())
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<(), DiscoveryError> {
        let mut client = self.client.clone();
        let fut = client.put(key, value, None);
        tokio::time::timeout(LOOKUP_TIMEOUT, fut)
            .await
            .map_err(|_| DiscoveryError::Timeout(LOOKUP_TIMEOUT))??;
        Ok(())
    }

    /// Resolves the `BankService` gRPC address for `coin`.
    pub async fn bank_service_addr(&self, coin: &str) -> Result<String, DiscoveryError> {
        self.get(&key_bank_service(coin)).await
    }

    /// Resolves the durable-stream address a `Bank(coin)` should connect
    /// to for `OrderReq` ingress.
    pub async fn nats_addr(&self, coin: &str) -> Result<String, DiscoveryError> {
        self.get(&key_nats_service(coin)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_key_bank_service() {
        assert_eq!(key_bank_service("BTC"), "bank_service_btc");
        assert_eq!(key_bank_service("usdt"), "bank_service_usdt");
    }

    #[test]
    fn qa_key_nats_service() {
        assert_eq!(key_nats_service("BTC"), "nats_bank_btc");
    }
}

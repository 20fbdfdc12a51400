//! ccoms-core — spot exchange core.
//!
//! Three cooperating process kinds share this crate:
//!
//! - [`bank`]: one process per coin, owns user balances for that coin.
//! - [`ome`]: one process per symbol, owns the order book and matches
//!   trades for that symbol.
//! - Ingress (ticket intake from the outside world) is out of scope here;
//!   a Bank only ever accepts an [`domain::OrderReq`] off the durable
//!   NATS stream described in [`bank::ingress`].
//!
//! Both process kinds share the same ambient stack: [`config`] for
//! topology/app settings, [`logging`] for structured tracing,
//! [`filedb`] for the write-ahead log, [`persistence`] for the
//! Postgres-backed relational store, and [`rpc`] for the gRPC
//! replication protocol tying a Bank to its OMEs.

pub mod config;
pub mod config_watcher;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod fee;
pub mod filedb;
pub mod lastkv;
pub mod logging;
pub mod logs;
pub mod orderbook;
pub mod persistence;
pub mod rpc;
pub mod scaled;

pub mod bank;
pub mod ome;

pub use config::{AppConfig, ExchangeTopology};
pub use domain::{BalanceChange, Order, OrderReq, Side, Ticket, Trade, UserAsset};
pub use error::{BankError, OmeError};
pub use orderbook::OrderBook;
pub use scaled::Scaled;

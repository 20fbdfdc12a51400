//! `Bank(coin)`: the single-writer ledger process.
//!
//! Four cooperating tasks: [`engine`] is the writer (the only mutator of
//! assets, ticket ids, the log id, the NATS sequence cursor, and the
//! per-OME reason-id cursors); [`ingress`] is the NATS stream subscriber
//! plus its ack-batcher; [`service`] is the gRPC server (ticket push +
//! balance-change intake); [`flusher`] tails the filedb into Postgres.
//! All four feed or drain the same `inbox`/`acks` channel pair —
//! constructed in `src/bin/bank.rs`, not here, since wiring them together
//! is process startup, not engine logic.

pub mod engine;
pub mod flusher;
pub mod ingress;
pub mod service;

pub use engine::{BankEngine, BankMsg};

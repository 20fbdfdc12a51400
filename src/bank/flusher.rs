//! Tails a bank's filedb and idempotently replays each [`BankLog`] into
//! Postgres.
//!
//! Drains whatever has piled up on the tail channel, capped at 100
//! records per batch, hands the batch to the store, retries on error
//! after a short sleep rather than aborting. Each record of the batch is
//! flushed one at a time through
//! [`crate::persistence::repository::flush_bank_log`] — that function's
//! own transaction is the atomic unit, so a mid-batch crash only ever
//! costs a re-read of the tail, never a torn write (the `saved_log_id`
//! cursor makes every replay a no-op up to where it last succeeded).

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::filedb::Filedb;
use crate::logs::BankLog;
use crate::persistence::repository::flush_bank_log;

const BATCH_CAP: usize = 100;

/// Runs forever, tailing `filedb_path` and flushing into `pool` under
/// `coin`. Never returns except if the tail channel itself closes.
pub async fn run(pool: PgPool, coin: String, filedb_path: std::path::PathBuf) {
    let (tx, mut rx) = mpsc::channel(BATCH_CAP * 4);
    tokio::spawn(Filedb::tailf(filedb_path, tx, Duration::from_millis(200)));

    loop {
        let Some(first) = rx.recv().await else {
            return;
        };
        let mut batch = vec![first];
        while batch.len() < BATCH_CAP {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        for line in batch {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(target: "BANK", coin, error = %e, "filedb tail error, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let log: BankLog = match serde_json::from_str(&line) {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(target: "BANK", coin, error = %e, line, "malformed filedb record, halting flusher");
                    return;
                }
            };
            loop {
                match flush_bank_log(&pool, &coin, &log).await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::error!(target: "BANK", coin, log_id = log.log_id, error = %e, "flush failed, retrying in 1s");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

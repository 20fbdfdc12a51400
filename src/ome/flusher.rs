//! Tails an OME's filedb and idempotently replays each [`OmeLog`] into
//! Postgres. Same batching/retry shape as [`crate::bank::flusher`].

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::filedb::Filedb;
use crate::logs::OmeLog;
use crate::persistence::repository::flush_ome_log;

const BATCH_CAP: usize = 100;

pub async fn run(pool: PgPool, symbol: String, filedb_path: std::path::PathBuf) {
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
                    tracing::error!(target: "OME", symbol, error = %e, "filedb tail error, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let log: OmeLog = match serde_json::from_str(&line) {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(target: "OME", symbol, error = %e, line, "malformed filedb record, halting flusher");
                    return;
                }
            };
            loop {
                match flush_ome_log(&pool, &symbol, &log).await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::error!(target: "OME", symbol, log_id = log.log_id, error = %e, "flush failed, retrying in 1s");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

//! Pushes match-caused and cancel-caused balance changes from this OME's
//! filedb to one of the two coin banks it trades against.
//!
//! Opens the bidi stream, sends the `reason_id_first = -1` handshake,
//! waits for the bank's reply cursor, then tails this engine's own filedb
//! and pushes one `BalanceChange` per match or cancel whose log id is
//! past that cursor — split by coin: the quote-coin push moves `amount`
//! (bidder's freeze down, asker's free up), the base-coin push moves
//! `quantity` (asker's freeze down, bidder's free up). A connection only
//! ever pushes to one bank, so the OME runs two of these, one per coin.

use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;

use crate::discovery::Discovery;
use crate::domain::Side;
use crate::filedb::Filedb;
use crate::logs::OmeLog;
use crate::rpc::{BankServiceClient, WireBalanceChange};

pub async fn run(
    discovery: Discovery,
    coin: String,
    symbol: String,
    base_coin: String,
    quote_coin: String,
    filedb_path: std::path::PathBuf,
) {
    loop {
        if let Err(e) = push_once(
            &discovery,
            &coin,
            &symbol,
            &base_coin,
            &quote_coin,
            filedb_path.clone(),
        )
        .await
        {
            tracing::error!(target: "OME", coin, symbol, error = %e, "balance pusher error, reconnecting in 1s");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn push_once(
    discovery: &Discovery,
    coin: &str,
    symbol: &str,
    base_coin: &str,
    quote_coin: &str,
    filedb_path: std::path::PathBuf,
) -> anyhow::Result<()> {
    let addr = discovery.bank_service_addr(coin).await?;
    let channel = Channel::from_shared(format!("http://{addr}"))?
        .connect()
        .await?;
    let mut client = BankServiceClient::new(channel);

    let reason_table = format!("ome_{}_logs", symbol.to_lowercase());
    let (out_tx, out_rx) = mpsc::channel(1024);
    out_tx
        .send(WireBalanceChange {
            reason_table: reason_table.clone(),
            reason_id_first: -1,
            ..Default::default()
        })
        .await?;

    let response = client.balance_changes(ReceiverStream::new(out_rx)).await?;
    let mut inbound = response.into_inner();
    let first_id = inbound
        .message()
        .await?
        .ok_or_else(|| anyhow::anyhow!("stream closed before handshake reply"))?
        .id;

    let (raw_tx, mut raw_rx) = mpsc::channel(1024);
    tokio::spawn(Filedb::tailf(
        filedb_path,
        raw_tx,
        Duration::from_millis(200),
    ));

    while let Some(line) = raw_rx.recv().await {
        let line = line?;
        let log: OmeLog = match serde_json::from_str(&line) {
            Ok(l) => l,
            Err(_) => continue,
        };
        if log.log_id <= first_id {
            continue;
        }

        for ml in &log.match_logs {
            if coin == quote_coin {
                let bc = WireBalanceChange {
                    reason: "match".to_string(),
                    reason_table: reason_table.clone(),
                    reason_id: log.log_id,
                    reason_id_first: first_id,
                    owner: ml.asker,
                    free_change: ml.amount.to_decimal_string(),
                    freeze_change: "0".to_string(),
                    owner2: ml.bider,
                    free_change2: "0".to_string(),
                    freeze_change2: (-ml.amount.clone()).to_decimal_string(),
                };
                if out_tx.send(bc).await.is_err() {
                    return Ok(());
                }
            }
            if coin == base_coin {
                let bc = WireBalanceChange {
                    reason: "match".to_string(),
                    reason_table: reason_table.clone(),
                    reason_id: log.log_id,
                    reason_id_first: first_id,
                    owner: ml.asker,
                    free_change: "0".to_string(),
                    freeze_change: (-ml.quantity.clone()).to_decimal_string(),
                    owner2: ml.bider,
                    free_change2: ml.quantity.to_decimal_string(),
                    freeze_change2: "0".to_string(),
                };
                if out_tx.send(bc).await.is_err() {
                    return Ok(());
                }
            }
        }

        for cl in &log.cancel_logs {
            let refunds_this_coin = match cl.side {
                Side::Ask => coin == base_coin,
                Side::Bid => coin == quote_coin,
            };
            if !refunds_this_coin {
                continue;
            }
            let bc = WireBalanceChange {
                reason: "cancel".to_string(),
                reason_table: reason_table.clone(),
                reason_id: log.log_id,
                reason_id_first: first_id,
                owner: cl.owner,
                free_change: cl.refund_total.to_decimal_string(),
                freeze_change: (-cl.refund_total.clone()).to_decimal_string(),
                owner2: 0,
                free_change2: "0".to_string(),
                freeze_change2: "0".to_string(),
            };
            if out_tx.send(bc).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

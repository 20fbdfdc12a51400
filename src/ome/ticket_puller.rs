//! Pulls newly-minted tickets from one coin bank's `Tickets` stream and
//! forwards them to the matching engine's single writer.
//!
//! Dials the bank discovered for `coin`, opens the stream starting just
//! past whatever ticket id this side has already consumed, forwards every
//! message, reconnects with a 1s backoff on any transport error or stream
//! close (a bank restarting is routine, not fatal). A ticket id gap is
//! detected only once the single writer actually applies it, not here —
//! `resync` carries that cursor back so this task can tear down the
//! current stream and reopen it at the writer's true `latestTicketID`,
//! per spec §7's "out-of-order input is fatal to the stream, not the
//! process" (scenario F).
use tokio::sync::mpsc;
use tokio::time::Duration;
use tonic::transport::Channel;

use crate::discovery::Discovery;
use crate::domain::Side;
use crate::ome::engine::OmeMsg;
use crate::rpc::{wire_to_ticket, BankServiceClient, TicketCursor};

/// Runs forever: resolves `coin`'s bank address via `discovery`, opens a
/// `Tickets` stream scoped to `(symbol, side)` starting at `start_id`,
/// and forwards decoded tickets to `inbox`. Each reconnect resumes from
/// whichever ticket id this OME last actually applied, so a missed
/// connection never loses a ticket. `resync` lets the writer force an
/// immediate reconnect at a specific cursor when it detects a gap.
pub async fn run(
    discovery: Discovery,
    coin: String,
    symbol: String,
    side: Side,
    mut start_id: i64,
    inbox: mpsc::Sender<OmeMsg>,
    mut resync: mpsc::Receiver<i64>,
) {
    loop {
        tokio::select! {
            result = pull_once(&discovery, &coin, &symbol, side, start_id, &inbox) => {
                match result {
                    Ok(last_id) => start_id = last_id.max(start_id),
                    Err(e) => {
                        tracing::error!(target: "OME", coin, symbol, error = %e, "ticket puller error, reconnecting in 1s");
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Some(cursor) = resync.recv() => {
                tracing::warn!(target: "OME", coin, symbol, ?side, cursor, "ticket stream desynced, resyncing");
                start_id = cursor;
            }
        }
    }
}

async fn pull_once(
    discovery: &Discovery,
    coin: &str,
    symbol: &str,
    side: Side,
    start_id: i64,
    inbox: &mpsc::Sender<OmeMsg>,
) -> anyhow::Result<i64> {
    let addr = discovery.bank_service_addr(coin).await?;
    let channel = Channel::from_shared(format!("http://{addr}"))?
        .connect()
        .await?;
    let mut client = BankServiceClient::new(channel);

    let mut stream = client
        .tickets(TicketCursor {
            id: start_id,
            symbol: symbol.to_string(),
            side: side as i32,
        })
        .await?
        .into_inner();

    let mut last_id = start_id;
    while let Some(wire) = stream.message().await? {
        let ticket = wire_to_ticket(&wire)?;
        last_id = ticket.id;
        if inbox.send(OmeMsg::Ticket(ticket)).await.is_err() {
            return Ok(last_id);
        }
    }
    Ok(last_id)
}

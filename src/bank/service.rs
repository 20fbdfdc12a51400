//! The gRPC surface a Bank exposes to the OMEs of every symbol it backs:
//! `Tickets` (server-stream, resume-from-cursor) and `BalanceChanges`
//! (bidi-stream, cursor handshake then forward).
//!
//! `Tickets` re-tails filedb from offset zero on every connection and
//! filters by `id > cursor` rather than seeking to a saved offset — an
//! easy efficiency win to pick up later, not required for correctness.
//! `BalanceChanges` replies once with the bank's current reason cursor
//! for the client's `reason_table` when it sees `reason_id_first == -1`,
//! then only forwards messages whose `reason_id_first` still matches that
//! reply — a stale or mismatched cursor is silently dropped.

use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

use crate::bank::engine::BankMsg;
use crate::domain::Side;
use crate::filedb::Filedb;
use crate::logs::BankLog;
use crate::rpc::{
    ticket_to_wire, wire_to_balance_change, BankService, ReasonCursor, TicketCursor,
    WireBalanceChange, WireTicket,
};

/// Backs one coin bank's `BankService` endpoint. Cheap to clone — it only
/// holds the filedb path and a handle into the single writer's inbox.
#[derive(Clone)]
pub struct BankServiceImpl {
    filedb_path: std::path::PathBuf,
    inbox: mpsc::Sender<BankMsg>,
}

impl BankServiceImpl {
    pub fn new(filedb_path: std::path::PathBuf, inbox: mpsc::Sender<BankMsg>) -> Self {
        Self { filedb_path, inbox }
    }
}

#[tonic::async_trait]
impl BankService for BankServiceImpl {
    type TicketsStream = Pin<Box<dyn Stream<Item = Result<WireTicket, Status>> + Send + 'static>>;

    async fn tickets(
        &self,
        request: Request<TicketCursor>,
    ) -> Result<Response<Self::TicketsStream>, Status> {
        let cursor = request.into_inner();
        let side = decode_cursor_side(cursor.side)?;
        let symbol = cursor.symbol;
        let after_id = cursor.id;
        let path = self.filedb_path.clone();

        let (raw_tx, mut raw_rx) = mpsc::channel(1024);
        tokio::spawn(Filedb::tailf(
            path,
            raw_tx,
            tokio::time::Duration::from_millis(200),
        ));

        let (out_tx, out_rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            while let Some(line) = raw_rx.recv().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        let _ = out_tx.send(Err(Status::internal(e.to_string()))).await;
                        return;
                    }
                };
                let bl: BankLog = match serde_json::from_str(&line) {
                    Ok(bl) => bl,
                    Err(_) => continue,
                };
                for tl in &bl.ticket_logs {
                    if tl.id <= after_id || tl.symbol != symbol || tl.side != side {
                        continue;
                    }
                    let ticket = crate::domain::Ticket {
                        id: tl.id,
                        time: bl.ts,
                        owner: tl.owner,
                        symbol: tl.symbol.clone(),
                        side: tl.side,
                        order_type: tl.order_type,
                        price: tl.price.clone(),
                        quantity: tl.quantity.clone(),
                        fee_rate: tl.fee_rate.clone(),
                    };
                    if out_tx.send(Ok(ticket_to_wire(&ticket))).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(out_rx))))
    }

    type BalanceChangesStream =
        Pin<Box<dyn Stream<Item = Result<ReasonCursor, Status>> + Send + 'static>>;

    async fn balance_changes(
        &self,
        request: Request<Streaming<WireBalanceChange>>,
    ) -> Result<Response<Self::BalanceChangesStream>, Status> {
        let mut inbound = request.into_inner();
        let inbox = self.inbox.clone();
        let (out_tx, out_rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut first_id: Option<i64> = None;
            while let Some(msg) = inbound.message().await.transpose() {
                let wire = match msg {
                    Ok(w) => w,
                    Err(e) => {
                        tracing::error!(target: "BANK", error = %e, "balance_changes stream error");
                        return;
                    }
                };

                if wire.reason_id_first == -1 {
                    let current = query_reason_cursor(&inbox, wire.reason_table.clone()).await;
                    first_id = Some(current);
                    if out_tx.send(Ok(ReasonCursor { id: current })).await.is_err() {
                        return;
                    }
                }

                if Some(wire.reason_id_first) == first_id {
                    let bc = match wire_to_balance_change(&wire) {
                        Ok(bc) => bc,
                        Err(e) => {
                            tracing::error!(target: "BANK", error = %e, "malformed balance change");
                            continue;
                        }
                    };
                    if inbox.send(BankMsg::Balance(bc)).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(out_rx))))
    }
}

async fn query_reason_cursor(inbox: &mpsc::Sender<BankMsg>, reason_table: String) -> i64 {
    let (reply_tx, reply_rx) = oneshot::channel();
    if inbox
        .send(BankMsg::ReasonCursorQuery {
            reason_table,
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return -1;
    }
    reply_rx.await.unwrap_or(-1)
}

fn decode_cursor_side(v: i32) -> Result<Side, Status> {
    match v {
        1 => Ok(Side::Ask),
        2 => Ok(Side::Bid),
        _ => Err(Status::invalid_argument(format!("invalid side tag: {v}"))),
    }
}

//! Durable `OrderReq` ingress and its ack-batching task.
//!
//! A durable pull consumer over `BANK.<COIN>.OrderReq` on stream `BANK`,
//! resuming at `latest_msg_seq + 1`. `run_ack_batcher` drains whatever has
//! piled up on its side channel, keeps only the highest-sequence message,
//! and acks once per activation rather than acking one message at a time
//! — every lower-sequence message in the same batch is implicitly
//! covered.

use async_nats::jetstream::consumer::DeliverPolicy;
use async_nats::jetstream::{self, Message};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::bank::engine::BankMsg;
use crate::domain::OrderReq;

/// One acked-or-droppable delivery, handed to the ack-batcher once the
/// writer has finished with it (applied, duplicate, or safely dropped —
/// every one of those is acked; only a genuine error leaves the message
/// unacked for redelivery).
pub struct AckItem {
    pub seq: u64,
    pub msg: Message,
}

/// Subscribes to `BANK.<coin>.OrderReq`, decodes each payload, and pushes
/// a [`BankMsg::Order`] into `inbox` plus the raw message into `ack_tx`
/// for later batched acking. Reconnects with a 1s backoff on any stream
/// error (spec §5), resuming from `start_seq` each time — the writer's
/// own `latestMsgSeq` de-duplicates any overlap.
pub async fn run_order_ingress(
    nats_url: String,
    coin: String,
    mut start_seq: u64,
    inbox: mpsc::Sender<BankMsg>,
    ack_tx: mpsc::Sender<AckItem>,
) {
    loop {
        match subscribe_once(&nats_url, &coin, start_seq, &inbox, &ack_tx).await {
            Ok(last_seq) => {
                start_seq = last_seq.max(start_seq);
            }
            Err(e) => {
                tracing::error!(target: "BANK", coin = %coin, error = %e, "ingress stream error, reconnecting in 1s");
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn subscribe_once(
    nats_url: &str,
    coin: &str,
    start_seq: u64,
    inbox: &mpsc::Sender<BankMsg>,
    ack_tx: &mpsc::Sender<AckItem>,
) -> anyhow::Result<u64> {
    let client = async_nats::connect(nats_url).await?;
    let js = jetstream::new(client);
    let stream = js.get_stream("BANK").await?;

    let subject = format!("BANK.{}.OrderReq", coin.to_uppercase());
    let consumer: jetstream::consumer::PullConsumer = stream
        .create_consumer(jetstream::consumer::pull::Config {
            filter_subject: subject,
            deliver_policy: DeliverPolicy::ByStartSequence {
                start_sequence: start_seq.max(1),
            },
            ..Default::default()
        })
        .await?;

    let mut messages = consumer.messages().await?;
    let mut last_seq = start_seq;
    while let Some(msg) = messages.next().await {
        let msg = msg?;
        let info = msg.info().map_err(|e| anyhow::anyhow!("{e}"))?;
        let seq = info.stream_sequence;
        let req: OrderReq = serde_json::from_slice(&msg.payload)?;

        if inbox.send(BankMsg::Order { seq, req }).await.is_err() {
            return Ok(last_seq);
        }
        if ack_tx.send(AckItem { seq, msg }).await.is_err() {
            return Ok(last_seq);
        }
        last_seq = seq;
    }
    Ok(last_seq)
}

/// Drains `acks` on each activation, keeps the highest-sequence message
/// seen, and acks it once — every lower-sequence message in the same
/// batch is implicitly covered (ack-all semantics, spec §6).
pub async fn run_ack_batcher(mut acks: mpsc::Receiver<AckItem>) {
    while let Some(first) = acks.recv().await {
        let mut latest = first;
        while let Ok(next) = acks.try_recv() {
            if next.seq >= latest.seq {
                latest = next;
            }
        }
        if let Err(e) = latest.msg.ack().await {
            tracing::error!(target: "BANK", error = %e, "failed to ack batch");
        }
    }
}

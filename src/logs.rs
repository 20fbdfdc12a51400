//! Filedb record shapes.
//!
//! One minified JSON object per filedb line: `BankLog` (with its nested
//! `BalanceLog`/`TicketLog` entries) and `OmeLog` (with its nested
//! `OrderLog`/`MatchLog`/`CancelLog` entries). `log_id` is a per-engine
//! strictly monotonic counter; `msg_seq` is present only on bank records
//! caused by an `OrderReq` delivery, absent for OME-push-caused records.

use serde::{Deserialize, Serialize};

use crate::domain::{LogId, OrderId, OrderType, Side, TicketId, UserId};
use crate::scaled::Scaled;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankLog {
    #[serde(rename = "logID")]
    pub log_id: LogId,
    pub ts: i64,
    #[serde(rename = "msgSeq", skip_serializing_if = "Option::is_none")]
    pub msg_seq: Option<u64>,

    #[serde(rename = "balances", default, skip_serializing_if = "Vec::is_empty")]
    pub balance_logs: Vec<BalanceLog>,
    #[serde(rename = "tickets", default, skip_serializing_if = "Vec::is_empty")]
    pub ticket_logs: Vec<TicketLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLog {
    pub log_index: i64,

    pub reason: String,
    pub reason_table: String,
    pub reason_id: LogId,

    pub owner: UserId,
    pub coin: String,
    pub free_change: Scaled,
    pub freeze_change: Scaled,
    pub free_new: Scaled,
    pub freeze_new: Scaled,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner2: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_change2: Option<Scaled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_change2: Option<Scaled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_new2: Option<Scaled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_new2: Option<Scaled>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketLog {
    pub log_index: i64,

    pub reason: String,
    pub reason_table: String,
    pub reason_id: LogId,

    pub id: TicketId,
    pub owner: UserId,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: Side,
    pub price: Scaled,
    pub quantity: Scaled,
    pub amount: Scaled,
    pub fee_rate: Scaled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmeLog {
    #[serde(rename = "logID")]
    pub log_id: LogId,
    pub ts: i64,

    #[serde(rename = "orders", default, skip_serializing_if = "Vec::is_empty")]
    pub order_logs: Vec<OrderLog>,
    #[serde(rename = "matchs", default, skip_serializing_if = "Vec::is_empty")]
    pub match_logs: Vec<MatchLog>,
    #[serde(rename = "cancels", default, skip_serializing_if = "Vec::is_empty")]
    pub cancel_logs: Vec<CancelLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLog {
    pub log_index: i64,

    pub id: OrderId,
    pub ticket_id: TicketId,
    pub owner: UserId,
    pub fee_rate: Scaled,
    pub time: i64,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Scaled,
    pub quantity: Scaled,
    pub orig_qty: Scaled,
}

/// One order removed from the book by cancellation rather than a fill
/// (§9 Design Notes' narrow `CancelOrder`). `refund_total` is the full
/// reserved amount released back to the owner's free balance in the
/// coin implied by `side` (base for an ask, quote for a bid) — principal
/// plus fee, symmetric with `CreateOrder`'s `total = value + fee`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelLog {
    pub log_index: i64,

    pub order_id: OrderId,
    pub ticket_id: TicketId,
    pub owner: UserId,
    pub side: Side,
    pub refund_total: Scaled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLog {
    pub log_index: i64,

    pub asker: UserId,
    pub ask_id: OrderId,
    pub ask_price: Scaled,
    pub ask_quantity: Scaled,

    pub bider: UserId,
    pub bid_id: OrderId,
    pub bid_price: Scaled,
    pub bid_quantity: Scaled,

    pub price: Scaled,
    pub quantity: Scaled,
    pub amount: Scaled,
    pub ask_fee: Scaled,
    pub bid_fee: Scaled,

    pub time: i64,
}

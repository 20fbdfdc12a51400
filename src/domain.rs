//! Shared domain types: tickets, orders, trades, user assets.
//!
//! Rust idioms throughout — enums instead of bare integer tags, `Scaled`
//! instead of an untyped big-integer — but the field sets and their wire
//! names are the stable contract every other module (filedb logs, gRPC
//! wire types, the relational store) agrees on.

use serde::{Deserialize, Serialize};

use crate::scaled::Scaled;

pub type UserId = i64;
pub type TicketId = i64;
pub type OrderId = i64;
pub type LogId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum Side {
    Ask = 1,
    Bid = 2,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Ask => Side::Bid,
            Side::Bid => Side::Ask,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum OrderType {
    Limit = 1,
    Market = 2,
}

/// A bank-minted receipt that funds are frozen for a prospective order on
/// a given `(symbol, side)`. Consumed exactly once by the matching OME.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub time: i64,
    pub owner: UserId,
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Scaled,
    pub quantity: Scaled,
    pub fee_rate: Scaled,
}

/// An OME-side representation of a live position in the book, created
/// from a ticket. `quantity` is the remaining (unfilled) quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub ticket_id: TicketId,
    pub owner: UserId,
    pub fee_rate: Scaled,
    pub time: i64,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Scaled,
    pub quantity: Scaled,
    /// Quantity at order creation, unchanged by fills — the `origQty`
    /// persisted column (§6), needed to tell a filled order apart from a
    /// never-filled one once `quantity` alone has decayed to the same
    /// remainder for both.
    pub orig_qty: Scaled,
}

impl Order {
    pub fn is_exhausted(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// A pairing of one ask with one bid producing an atomic transfer.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub log_id: LogId,

    pub asker: UserId,
    pub ask_id: OrderId,
    pub ask_price: Scaled,
    /// Ask order's remaining quantity *after* this trade.
    pub ask_remaining: Scaled,

    pub bider: UserId,
    pub bid_id: OrderId,
    pub bid_price: Scaled,
    /// Bid order's remaining quantity *after* this trade.
    pub bid_remaining: Scaled,

    pub price: Scaled,
    pub quantity: Scaled,
    pub amount: Scaled,
    pub ask_fee: Scaled,
    pub bid_fee: Scaled,

    pub time: i64,
}

/// Per-coin balance for one user. Lazily created at first reference,
/// mutated only by the owning bank's single writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAsset {
    pub free: Scaled,
    pub freeze: Scaled,
}

impl Default for UserAsset {
    fn default() -> Self {
        Self {
            free: Scaled::zero(),
            freeze: Scaled::zero(),
        }
    }
}

impl UserAsset {
    /// `value + fee` moves from free to freeze. Rejected if free would go
    /// negative — callers roll back the ticket/log allocation on error.
    pub fn reserve(&mut self, total: &Scaled) -> Result<(), crate::error::BankError> {
        let new_free = self.free.checked_sub_nonneg(total).ok_or_else(|| {
            crate::error::BankError::InsufficientFunds {
                have: self.free.to_decimal_string(),
                need: total.to_decimal_string(),
            }
        })?;
        self.free = new_free;
        self.freeze = &self.freeze + total;
        Ok(())
    }

    /// Applies a signed `{freeChange, freezeChange}` pair from an
    /// OME-originated `BalanceChange` (§4.2 "Match settlement").
    pub fn apply_change(&mut self, free_change: &Scaled, freeze_change: &Scaled) {
        self.free = &self.free + free_change;
        self.freeze = &self.freeze + freeze_change;
    }
}

/// Order request delivered on the durable ingress stream
/// (`BANK.<COIN>.OrderReq`, §6). This is the only input the Bank accepts
/// from outside the replication streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReq {
    pub symbol: String,
    pub owner: UserId,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Scaled,
    pub quantity: Scaled,
    pub orig_qty: Scaled,
    pub amount: Scaled,
    pub time: i64,
    pub fee_level: Scaled,
}

/// A balance mutation pushed from an OME to a bank over the
/// `BalanceChanges` bidi stream. `owner2`/the `*_change2` fields carry
/// the counterparty's delta in the same coin — a single match moves both
/// the asker's and the bidder's balance in whichever coin this connection
/// owns, so one message covers both legs rather than sending two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    pub reason: String,
    pub reason_table: String,
    pub reason_id: LogId,
    /// Cross-engine resume cursor: `-1` on the handshake-opening message.
    pub reason_id_first: LogId,

    pub owner: UserId,
    pub free_change: Scaled,
    pub freeze_change: Scaled,

    pub owner2: Option<UserId>,
    pub free_change2: Option<Scaled>,
    pub freeze_change2: Option<Scaled>,
}

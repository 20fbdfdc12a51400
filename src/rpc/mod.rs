//! gRPC replication surface tying a Bank to the OMEs of every symbol it
//! backs.
//!
//! Transport is `tonic`+`prost` over the wire shape in `proto/bank.proto`.
//! [`crate::bank::service`] and [`crate::ome::ticket_puller`]/
//! [`crate::ome::balance_pusher`] wrap it as background-task-per-RPC,
//! reconnect-with-backoff, single-writer-inbox feeders.
//!
//! `owner2 == 0` on the wire means "absent" (proto3 has no optional
//! scalar here without the `optional` keyword complicating older
//! codegens); [`wire_to_balance_change`]/[`balance_change_to_wire`]
//! translate that to/from `Option<UserId>`.

pub mod bank_v1 {
    tonic::include_proto!("bank.v1");
}

pub use bank_v1::bank_service_client::BankServiceClient;
pub use bank_v1::bank_service_server::{BankService, BankServiceServer};
pub use bank_v1::{
    BalanceChange as WireBalanceChange, ReasonCursor, Ticket as WireTicket, TicketCursor,
};

use crate::domain::{self, LogId, OrderType, Side, TicketId, UserId};
use crate::scaled::Scaled;

/// Converts a domain [`domain::Ticket`] into the wire [`WireTicket`]
/// pushed on the `Tickets` server stream.
pub fn ticket_to_wire(t: &domain::Ticket) -> WireTicket {
    WireTicket {
        id: t.id,
        time: t.time,
        owner: t.owner,
        side: t.side as i32,
        r#type: t.order_type as i32,
        price: t.price.to_decimal_string(),
        quantity: t.quantity.to_decimal_string(),
        fee_rate: t.fee_rate.to_decimal_string(),
        symbol: t.symbol.clone(),
    }
}

/// Parses a [`WireTicket`] as received by [`crate::ome::ticket_puller`].
pub fn wire_to_ticket(w: &WireTicket) -> Result<domain::Ticket, RpcDecodeError> {
    Ok(domain::Ticket {
        id: w.id,
        time: w.time,
        owner: w.owner,
        symbol: w.symbol.clone(),
        side: decode_side(w.side)?,
        order_type: decode_order_type(w.r#type)?,
        price: Scaled::parse(&w.price)?,
        quantity: Scaled::parse(&w.quantity)?,
        fee_rate: Scaled::parse(&w.fee_rate)?,
    })
}

/// Converts a domain [`domain::BalanceChange`] into the wire shape sent
/// by [`crate::ome::balance_pusher`].
pub fn balance_change_to_wire(bc: &domain::BalanceChange) -> WireBalanceChange {
    WireBalanceChange {
        reason: bc.reason.clone(),
        reason_table: bc.reason_table.clone(),
        reason_id: bc.reason_id,
        reason_id_first: bc.reason_id_first,
        owner: bc.owner,
        free_change: bc.free_change.to_decimal_string(),
        freeze_change: bc.freeze_change.to_decimal_string(),
        owner2: bc.owner2.unwrap_or(0),
        free_change2: bc
            .free_change2
            .as_ref()
            .map(Scaled::to_decimal_string)
            .unwrap_or_default(),
        freeze_change2: bc
            .freeze_change2
            .as_ref()
            .map(Scaled::to_decimal_string)
            .unwrap_or_default(),
    }
}

pub fn wire_to_balance_change(
    w: &WireBalanceChange,
) -> Result<domain::BalanceChange, RpcDecodeError> {
    let owner2 = if w.owner2 > 0 { Some(w.owner2) } else { None };
    let (free_change2, freeze_change2) = if owner2.is_some() {
        (
            Some(Scaled::parse(&w.free_change2)?),
            Some(Scaled::parse(&w.freeze_change2)?),
        )
    } else {
        (None, None)
    };
    Ok(domain::BalanceChange {
        reason: w.reason.clone(),
        reason_table: w.reason_table.clone(),
        reason_id: w.reason_id,
        reason_id_first: w.reason_id_first,
        owner: w.owner,
        free_change: Scaled::parse(&w.free_change)?,
        freeze_change: Scaled::parse(&w.freeze_change)?,
        owner2,
        free_change2,
        freeze_change2,
    })
}

fn decode_side(v: i32) -> Result<Side, RpcDecodeError> {
    match v {
        1 => Ok(Side::Ask),
        2 => Ok(Side::Bid),
        _ => Err(RpcDecodeError::InvalidSide(v)),
    }
}

fn decode_order_type(v: i32) -> Result<OrderType, RpcDecodeError> {
    match v {
        1 => Ok(OrderType::Limit),
        2 => Ok(OrderType::Market),
        _ => Err(RpcDecodeError::InvalidOrderType(v)),
    }
}

pub type ReasonId = LogId;
pub type WireTicketId = TicketId;
pub type WireOwner = UserId;

#[derive(Debug, thiserror::Error)]
pub enum RpcDecodeError {
    #[error("invalid side tag: {0}")]
    InvalidSide(i32),
    #[error("invalid order type tag: {0}")]
    InvalidOrderType(i32),
    #[error("invalid decimal payload: {0}")]
    InvalidAmount(#[from] crate::scaled::ScaledError),
}

impl From<RpcDecodeError> for tonic::Status {
    fn from(e: RpcDecodeError) -> Self {
        tonic::Status::invalid_argument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Scaled {
        Scaled::parse(v).unwrap()
    }

    fn ticket() -> domain::Ticket {
        domain::Ticket {
            id: 1,
            time: 0,
            owner: 7,
            symbol: "BTC_USDT".into(),
            side: Side::Ask,
            order_type: OrderType::Limit,
            price: s("100"),
            quantity: s("2"),
            fee_rate: s("0.001"),
        }
    }

    #[test]
    fn qa_ticket_roundtrip() {
        let t = ticket();
        let wire = ticket_to_wire(&t);
        let back = wire_to_ticket(&wire).unwrap();
        assert_eq!(back.id, t.id);
        assert_eq!(back.price, t.price);
        assert_eq!(back.side, t.side);
        assert_eq!(back.symbol, t.symbol);
    }

    #[test]
    fn qa_balance_change_roundtrip_with_second_owner() {
        let bc = domain::BalanceChange {
            reason: "match".into(),
            reason_table: "ome_btc_usdt_logs".into(),
            reason_id: 42,
            reason_id_first: 41,
            owner: 1,
            free_change: s("100"),
            freeze_change: s("0"),
            owner2: Some(2),
            free_change2: Some(s("0")),
            freeze_change2: Some(s("-100")),
        };
        let wire = balance_change_to_wire(&bc);
        let back = wire_to_balance_change(&wire).unwrap();
        assert_eq!(back.owner2, Some(2));
        assert_eq!(back.freeze_change2, Some(s("-100")));
    }

    #[test]
    fn qa_balance_change_roundtrip_without_second_owner() {
        let bc = domain::BalanceChange {
            reason: "CreateOrder".into(),
            reason_table: "btc_usdt_ask_tickets".into(),
            reason_id: 5,
            reason_id_first: -1,
            owner: 1,
            free_change: s("-100.001"),
            freeze_change: s("100.001"),
            owner2: None,
            free_change2: None,
            freeze_change2: None,
        };
        let wire = balance_change_to_wire(&bc);
        assert_eq!(wire.owner2, 0);
        let back = wire_to_balance_change(&wire).unwrap();
        assert_eq!(back.owner2, None);
        assert_eq!(back.free_change, s("-100.001"));
    }

    #[test]
    fn qa_decode_rejects_invalid_side() {
        let mut wire = ticket_to_wire(&ticket());
        wire.side = 9;
        assert!(wire_to_ticket(&wire).is_err());
    }
}

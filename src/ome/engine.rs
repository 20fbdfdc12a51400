//! The per-symbol matching engine: ticket intake plus the price-time
//! priority matching loop.
//!
//! A ticket is rejected as a duplicate at or below the per-side cursor,
//! fatal if it skips ahead of it (the stream promised sequential delivery
//! and broke that promise), otherwise minted into an [`Order`], logged,
//! rested in the book, then matched to exhaustion. Each match step writes
//! and commits its own [`MatchLog`] line before the loop continues —
//! unlike [`crate::bank::engine::BankEngine`]'s stage-then-commit-once
//! shape, a multi-step match genuinely has no single all-or-nothing
//! boundary: each trade is its own durable fact the instant it happens.

use crate::domain::{LogId, Order, OrderId, Side, Ticket, TicketId, UserId};
use crate::error::{IntakeOutcome, OmeError};
use crate::fee;
use crate::filedb::Filedb;
use crate::logs::{CancelLog, MatchLog, OmeLog, OrderLog};
use crate::orderbook::OrderBook;
use crate::scaled::Scaled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmeState {
    Init,
    WaitForFiledb,
    LoadingOrders,
    Matching,
}

/// One inbound message for the single writer. A `NonContinuousTicket`
/// error out of [`OmeEngine::handle_ticket`] is fatal to the whole
/// process (§9) — the caller is expected to let it propagate and crash
/// the matching task rather than drop the message and desync the book.
pub enum OmeMsg {
    Ticket(Ticket),
    /// Cancel a resting order by id (§9 Design Notes' narrow
    /// `CancelOrder` — no partial-cancel, no replace, routed through the
    /// same single-writer queue as every ticket so it can never race a
    /// match on the same order).
    Cancel(OrderId),
}

pub struct OmeEngine {
    pub name: String,
    pub symbol: String,
    pub base_coin: String,
    pub quote_coin: String,
    pub state: OmeState,
    pub log_id: LogId,
    pub order_id: OrderId,
    latest_ask_ticket_id: TicketId,
    latest_bid_ticket_id: TicketId,
    book: OrderBook,
    filedb: Filedb,
}

impl OmeEngine {
    pub fn new(
        name: impl Into<String>,
        symbol: impl Into<String>,
        base_coin: impl Into<String>,
        quote_coin: impl Into<String>,
        filedb: Filedb,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            base_coin: base_coin.into(),
            quote_coin: quote_coin.into(),
            state: OmeState::Init,
            log_id: 0,
            order_id: 0,
            latest_ask_ticket_id: 0,
            latest_bid_ticket_id: 0,
            book: OrderBook::new(),
            filedb,
        }
    }

    pub fn filedb_path(&self) -> &std::path::Path {
        self.filedb.path()
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Seeds `log_id` from the filedb tail without touching the book —
    /// the `WaitForFiledb` state uses this to learn what `savedLogID`
    /// must catch up to before the matching loop may start.
    pub async fn bootstrap_from_filedb(&mut self) -> Result<(), OmeError> {
        let last = self.filedb.read_last_line().await?;
        if !last.is_empty() {
            let log: OmeLog = serde_json::from_str(&last)?;
            self.log_id = log.log_id;
        }
        self.state = OmeState::WaitForFiledb;
        Ok(())
    }

    pub fn enter_loading_orders(&mut self) {
        self.state = OmeState::LoadingOrders;
    }

    pub fn enter_matching(&mut self) {
        self.state = OmeState::Matching;
    }

    /// Rebuilds the book from the store's live order set (`status > -1`),
    /// highest id first doesn't matter here — insertion order doesn't
    /// affect price-time priority since each `Order` carries its own id.
    pub fn load_orders(&mut self, orders: Vec<Order>) {
        for o in orders {
            self.order_id = self.order_id.max(o.id);
            self.book.rest_order(o);
        }
    }

    pub fn load_order_id(&mut self, id: OrderId) {
        self.order_id = self.order_id.max(id);
    }

    pub fn load_ticket_id(&mut self, side: Side, id: TicketId) {
        match side {
            Side::Ask => self.latest_ask_ticket_id = self.latest_ask_ticket_id.max(id),
            Side::Bid => self.latest_bid_ticket_id = self.latest_bid_ticket_id.max(id),
        }
    }

    pub fn latest_ticket_id(&self, side: Side) -> TicketId {
        match side {
            Side::Ask => self.latest_ask_ticket_id,
            Side::Bid => self.latest_bid_ticket_id,
        }
    }

    /// Ticket intake (`TicketToMatchEngine`). Mints an `Order`, logs it,
    /// rests it in the book, then runs [`Self::try_match`] to exhaustion.
    pub async fn handle_ticket(
        &mut self,
        ticket: Ticket,
        now_s: i64,
        now_ns: i64,
    ) -> Result<IntakeOutcome, OmeError> {
        let latest = self.latest_ticket_id(ticket.side);
        if ticket.id <= latest {
            return Ok(IntakeOutcome::Duplicate);
        }
        if ticket.id != latest + 1 {
            return Err(OmeError::NonContinuousTicket {
                latest,
                got: ticket.id,
            });
        }

        let order_id = self.order_id + 1;
        let log_id = self.log_id + 1;
        let order = Order {
            id: order_id,
            ticket_id: ticket.id,
            owner: ticket.owner,
            fee_rate: ticket.fee_rate.clone(),
            time: now_s,
            side: ticket.side,
            order_type: ticket.order_type,
            price: ticket.price.clone(),
            quantity: ticket.quantity.clone(),
            orig_qty: ticket.quantity.clone(),
        };
        let order_log = OrderLog {
            log_index: 1,
            id: order.id,
            ticket_id: order.ticket_id,
            owner: order.owner,
            fee_rate: order.fee_rate.clone(),
            time: order.time,
            side: order.side,
            order_type: order.order_type,
            price: order.price.clone(),
            quantity: order.quantity.clone(),
            orig_qty: order.orig_qty.clone(),
        };
        let ome_log = OmeLog {
            log_id,
            ts: now_ns,
            order_logs: vec![order_log],
            match_logs: vec![],
            cancel_logs: vec![],
        };
        let line = serde_json::to_string(&ome_log)?;
        self.filedb.write_line(&line).await?;

        self.book.rest_order(order);
        self.order_id = order_id;
        self.log_id = log_id;
        match ticket.side {
            Side::Ask => self.latest_ask_ticket_id = ticket.id,
            Side::Bid => self.latest_bid_ticket_id = ticket.id,
        }

        self.try_match(now_s, now_ns).await?;
        Ok(IntakeOutcome::Applied)
    }

    /// Matches the book to exhaustion (`TryMatch`'s recursion, run as a
    /// loop). Every step is its own durable filedb append + commit before
    /// the next crossing is even checked — a crash mid-loop leaves the
    /// book exactly as durable as the last successfully written
    /// `MatchLog`, never partway through an uncommitted trade.
    pub async fn try_match(&mut self, now_s: i64, now_ns: i64) -> Result<Vec<MatchLog>, OmeError> {
        let mut produced = Vec::new();
        loop {
            let Some(ask_peek) = self.book.best_ask_order() else {
                break;
            };
            let Some(bid_peek) = self.book.best_bid_order() else {
                break;
            };
            if ask_peek.price > bid_peek.price {
                break;
            }

            let (ask_price, ask_id, ask_qty) =
                (ask_peek.price.clone(), ask_peek.id, ask_peek.quantity.clone());
            let (bid_price, bid_id, bid_qty) =
                (bid_peek.price.clone(), bid_peek.id, bid_peek.quantity.clone());

            let price = if ask_id < bid_id { ask_price } else { bid_price };
            let quantity = if ask_qty < bid_qty { ask_qty } else { bid_qty };
            let amount = price.mul_scaled(&quantity);

            let ask_after = self.book.fill_best(Side::Ask, &quantity);
            let bid_after = self.book.fill_best(Side::Bid, &quantity);

            let log_id = self.log_id + 1;
            let match_log = MatchLog {
                log_index: 1,
                asker: ask_after.owner,
                ask_id: ask_after.id,
                ask_price: ask_after.price.clone(),
                ask_quantity: ask_after.quantity.clone(),
                bider: bid_after.owner,
                bid_id: bid_after.id,
                bid_price: bid_after.price.clone(),
                bid_quantity: bid_after.quantity.clone(),
                price,
                quantity,
                amount,
                ask_fee: Scaled::zero(),
                bid_fee: Scaled::zero(),
                time: now_s,
            };
            let ome_log = OmeLog {
                log_id,
                ts: now_ns,
                order_logs: vec![],
                match_logs: vec![match_log.clone()],
                cancel_logs: vec![],
            };
            let line = serde_json::to_string(&ome_log)?;
            self.filedb.write_line(&line).await?;

            self.log_id = log_id;
            produced.push(match_log);
        }
        Ok(produced)
    }

    /// Cancels a resting order: removes it from the book and releases its
    /// full remaining reservation (principal + fee, the same `total`
    /// shape `BankEngine::handle_order_req` reserved) back to the owner's
    /// free balance in the coin `side` implies. A cancel targeting an
    /// order that has already fully filled or was never resting here is
    /// a safe-skip (§7 "invalid payload"), not an error — the caller may
    /// simply be racing a match that just exhausted it.
    pub async fn handle_cancel(
        &mut self,
        order_id: OrderId,
        now_ns: i64,
    ) -> Result<IntakeOutcome, OmeError> {
        let Some(order) = self.book.order_by_id(order_id) else {
            return Ok(IntakeOutcome::Dropped);
        };
        let (ticket_id, owner, side, price, quantity, fee_rate) = (
            order.ticket_id,
            order.owner,
            order.side,
            order.price.clone(),
            order.quantity.clone(),
            order.fee_rate.clone(),
        );

        let principal = match side {
            Side::Ask => quantity.clone(),
            Side::Bid => price.mul_scaled(&quantity),
        };
        let refund_fee = fee::calculate_fee(&principal, &fee_rate);
        let refund_total = &principal + &refund_fee;

        let log_id = self.log_id + 1;
        let cancel_log = CancelLog {
            log_index: 1,
            order_id,
            ticket_id,
            owner,
            side,
            refund_total,
        };
        let ome_log = OmeLog {
            log_id,
            ts: now_ns,
            order_logs: vec![],
            match_logs: vec![],
            cancel_logs: vec![cancel_log],
        };
        let line = serde_json::to_string(&ome_log)?;
        self.filedb.write_line(&line).await?;

        self.book.remove_order_by_id(order_id);
        self.log_id = log_id;
        Ok(IntakeOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderType;

    fn s(v: &str) -> Scaled {
        Scaled::parse(v).unwrap()
    }

    async fn engine() -> OmeEngine {
        let dir = tempdir();
        let filedb = Filedb::open(dir.join("test.log")).await.unwrap();
        let mut e = OmeEngine::new("ome_btc_usdt", "BTC_USDT", "BTC", "USDT", filedb);
        e.enter_matching();
        e
    }

    fn ticket(id: TicketId, owner: UserId, side: Side, price: &str, qty: &str) -> Ticket {
        Ticket {
            id,
            time: 0,
            owner,
            symbol: "BTC_USDT".into(),
            side,
            order_type: OrderType::Limit,
            price: s(price),
            quantity: s(qty),
            fee_rate: Scaled::zero(),
        }
    }

    #[tokio::test]
    async fn qa_exact_cross_produces_one_match_and_empties_book() {
        let mut ome = engine().await;
        ome.handle_ticket(ticket(1, 1, Side::Ask, "100", "5"), 0, 0)
            .await
            .unwrap();
        ome.handle_ticket(ticket(1, 2, Side::Bid, "100", "5"), 0, 0)
            .await
            .unwrap();

        assert_eq!(ome.book().best_ask(), None);
        assert_eq!(ome.book().best_bid(), None);
        assert_eq!(ome.order_id, 2);
    }

    #[tokio::test]
    async fn qa_partial_fill_uses_maker_price_on_taker_cross() {
        let mut ome = engine().await;
        // resting ask at 100 (id 1, the maker)
        ome.handle_ticket(ticket(1, 1, Side::Ask, "100", "10"), 0, 0)
            .await
            .unwrap();
        // incoming bid crosses at 101 (id 2, the taker) — trade prices at
        // the maker's (lower id) price, 100, not the taker's 101.
        ome.handle_ticket(ticket(1, 2, Side::Bid, "101", "4"), 0, 0)
            .await
            .unwrap();

        let remaining = ome.book().best_ask_order().unwrap();
        assert_eq!(remaining.quantity, s("6"));
        assert_eq!(ome.book().best_bid(), None);
    }

    #[tokio::test]
    async fn qa_duplicate_ticket_is_ignored() {
        let mut ome = engine().await;
        ome.handle_ticket(ticket(1, 1, Side::Ask, "100", "5"), 0, 0)
            .await
            .unwrap();
        let outcome = ome
            .handle_ticket(ticket(1, 1, Side::Ask, "100", "5"), 0, 0)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Duplicate);
        assert_eq!(ome.order_id, 1);
    }

    #[tokio::test]
    async fn qa_non_continuous_ticket_is_fatal() {
        let mut ome = engine().await;
        let err = ome
            .handle_ticket(ticket(2, 1, Side::Ask, "100", "5"), 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OmeError::NonContinuousTicket { latest: 0, got: 2 }));
    }

    #[tokio::test]
    async fn qa_matches_to_exhaustion_across_multiple_resting_orders() {
        let mut ome = engine().await;
        ome.handle_ticket(ticket(1, 1, Side::Ask, "100", "3"), 0, 0)
            .await
            .unwrap();
        ome.handle_ticket(ticket(2, 1, Side::Ask, "100", "3"), 0, 0)
            .await
            .unwrap();
        // one big bid eats both resting asks in one intake call.
        ome.handle_ticket(ticket(1, 2, Side::Bid, "100", "6"), 0, 0)
            .await
            .unwrap();

        assert_eq!(ome.book().best_ask(), None);
        assert_eq!(ome.book().best_bid(), None);
    }

    #[tokio::test]
    async fn qa_cancel_ask_refunds_base_quantity_plus_fee() {
        let mut ome = engine().await;
        ome.handle_ticket(ticket(1, 1, Side::Ask, "100", "5"), 0, 0)
            .await
            .unwrap();
        let order_id = ome.book().best_ask_order().unwrap().id;

        let outcome = ome.handle_cancel(order_id, 0).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Applied);
        assert_eq!(ome.book().best_ask(), None);
    }

    #[tokio::test]
    async fn qa_cancel_bid_refunds_price_times_quantity_plus_fee() {
        let mut ome = engine().await;
        ome.handle_ticket(ticket(1, 1, Side::Bid, "100", "5"), 0, 0)
            .await
            .unwrap();
        let order_id = ome.book().best_bid_order().unwrap().id;

        let outcome = ome.handle_cancel(order_id, 0).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Applied);
        assert_eq!(ome.book().best_bid(), None);
    }

    #[tokio::test]
    async fn qa_cancel_unknown_order_is_dropped() {
        let mut ome = engine().await;
        let outcome = ome.handle_cancel(999, 0).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Dropped);
    }

    #[tokio::test]
    async fn qa_cancel_already_filled_order_is_dropped() {
        let mut ome = engine().await;
        ome.handle_ticket(ticket(1, 1, Side::Ask, "100", "5"), 0, 0)
            .await
            .unwrap();
        ome.handle_ticket(ticket(1, 2, Side::Bid, "100", "5"), 0, 0)
            .await
            .unwrap();
        let outcome = ome.handle_cancel(1, 0).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Dropped);
    }

    fn tempdir() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ome_engine_test_{}", std::process::id()));
        p.push(uuid_like());
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn uuid_like() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        format!(
            "{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }
}

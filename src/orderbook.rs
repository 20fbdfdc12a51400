//! `BTreeMap`-based price-time priority order book.
//!
//! A `BTreeMap` per side keyed by price, a `VecDeque` per price level for
//! FIFO, and an `order_index` for O(1) cancel-by-id.
//!
//! - Prices are [`Scaled`] (arbitrary-precision), not a fixed-width int.
//! - Bids are keyed by `std::cmp::Reverse<Scaled>` for highest-price-first
//!   iteration — `Scaled`/`BigInt` has no fixed maximum, so there's no
//!   sentinel-ceiling trick available the way there would be for a `u64`
//!   key.
//!
//! Matching logic (price-time priority plus the maker-price/id tiebreak)
//! lives in [`crate::ome::engine`], not here — this module is pure book
//! storage.

use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};

use rustc_hash::FxHashMap;

use crate::domain::{Order, OrderId, Side};
use crate::scaled::Scaled;

#[derive(Debug)]
pub struct OrderBook {
    /// Sell orders: price -> orders (ascending, lowest = best ask).
    asks: BTreeMap<Scaled, VecDeque<Order>>,
    /// Buy orders: Reverse(price) -> orders (descending, highest = best bid).
    bids: BTreeMap<Reverse<Scaled>, VecDeque<Order>>,
    /// OrderId -> (price, side) for O(1) cancel lookup.
    order_index: FxHashMap<OrderId, (Scaled, Side)>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            order_index: FxHashMap::default(),
        }
    }

    pub fn best_bid(&self) -> Option<&Scaled> {
        self.bids.first_key_value().map(|(k, _)| &k.0)
    }

    pub fn best_ask(&self) -> Option<&Scaled> {
        self.asks.first_key_value().map(|(k, _)| k)
    }

    pub fn spread(&self) -> Option<Scaled> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    /// `(bid_depth, ask_depth)` — number of distinct price levels on each side.
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    pub fn asks_mut(&mut self) -> &mut BTreeMap<Scaled, VecDeque<Order>> {
        &mut self.asks
    }

    pub fn bids_mut(&mut self) -> &mut BTreeMap<Reverse<Scaled>, VecDeque<Order>> {
        &mut self.bids
    }

    pub fn asks(&self) -> &BTreeMap<Scaled, VecDeque<Order>> {
        &self.asks
    }

    pub fn bids(&self) -> &BTreeMap<Reverse<Scaled>, VecDeque<Order>> {
        &self.bids
    }

    /// Removes an order from the index once the matcher has popped it off
    /// its queue directly (keeps the index in sync without a full
    /// `remove_order_by_id` tree walk).
    pub fn remove_from_index(&mut self, order_id: OrderId) {
        self.order_index.remove(&order_id);
    }

    /// Rests an unfilled/partially-filled order at the back of its price
    /// level's queue. Caller is responsible for the order's `quantity`
    /// already reflecting what remains.
    pub fn rest_order(&mut self, order: Order) {
        self.order_index
            .insert(order.id, (order.price.clone(), order.side));
        match order.side {
            Side::Bid => {
                self.bids
                    .entry(Reverse(order.price.clone()))
                    .or_default()
                    .push_back(order);
            }
            Side::Ask => {
                self.asks
                    .entry(order.price.clone())
                    .or_default()
                    .push_back(order);
            }
        }
    }

    pub fn qty_at_price(&self, price: &Scaled, side: Side) -> Scaled {
        match side {
            Side::Bid => self
                .bids
                .get(&Reverse(price.clone()))
                .map(|orders| {
                    orders
                        .iter()
                        .fold(Scaled::zero(), |acc, o| &acc + &o.quantity)
                })
                .unwrap_or_else(Scaled::zero),
            Side::Ask => self
                .asks
                .get(price)
                .map(|orders| {
                    orders
                        .iter()
                        .fold(Scaled::zero(), |acc, o| &acc + &o.quantity)
                })
                .unwrap_or_else(Scaled::zero),
        }
    }

    pub fn cancel_order(&mut self, order_id: OrderId, price: &Scaled, side: Side) -> bool {
        let removed = match side {
            Side::Bid => {
                let key = Reverse(price.clone());
                if let Some(orders) = self.bids.get_mut(&key) {
                    let pos = orders.iter().position(|o| o.id == order_id);
                    if let Some(pos) = pos {
                        orders.remove(pos);
                        if orders.is_empty() {
                            self.bids.remove(&key);
                        }
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            Side::Ask => {
                if let Some(orders) = self.asks.get_mut(price) {
                    let pos = orders.iter().position(|o| o.id == order_id);
                    if let Some(pos) = pos {
                        orders.remove(pos);
                        if orders.is_empty() {
                            self.asks.remove(price);
                        }
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
        };
        if removed {
            self.order_index.remove(&order_id);
        }
        removed
    }

    /// Looks up a resting order by id without removing it (uses the
    /// index for price/side lookup, then a linear scan of that level's
    /// queue — price levels are shallow in practice, and this only runs
    /// on the cancel path, never in the match loop's hot path).
    pub fn order_by_id(&self, order_id: OrderId) -> Option<&Order> {
        let (price, side) = self.order_index.get(&order_id)?;
        match side {
            Side::Bid => self
                .bids
                .get(&Reverse(price.clone()))?
                .iter()
                .find(|o| o.id == order_id),
            Side::Ask => self.asks.get(price)?.iter().find(|o| o.id == order_id),
        }
    }

    /// Removes an order by id alone (uses the index for price/side lookup).
    pub fn remove_order_by_id(&mut self, order_id: OrderId) -> Option<Order> {
        let (price, side) = self.order_index.remove(&order_id)?;
        match side {
            Side::Bid => {
                let key = Reverse(price);
                let orders = self.bids.get_mut(&key)?;
                let pos = orders.iter().position(|o| o.id == order_id)?;
                let order = orders.remove(pos)?;
                if orders.is_empty() {
                    self.bids.remove(&key);
                }
                Some(order)
            }
            Side::Ask => {
                let orders = self.asks.get_mut(&price)?;
                let pos = orders.iter().position(|o| o.id == order_id)?;
                let order = orders.remove(pos)?;
                if orders.is_empty() {
                    self.asks.remove(&price);
                }
                Some(order)
            }
        }
    }

    /// The resting order at the front of the best ask level (lowest price,
    /// earliest id within that level) — the next ask `try_match` would
    /// consider.
    pub fn best_ask_order(&self) -> Option<&Order> {
        self.asks.first_key_value().and_then(|(_, q)| q.front())
    }

    /// The resting order at the front of the best bid level (highest
    /// price, earliest id within that level).
    pub fn best_bid_order(&self) -> Option<&Order> {
        self.bids.first_key_value().and_then(|(_, q)| q.front())
    }

    /// Reduces the front order of `side`'s best price level by `qty`,
    /// returning it with its post-fill quantity. An exhausted order
    /// (quantity reaches zero) is dropped from the book and its index
    /// entry removed; a survivor is pushed back to the *front* of its
    /// queue, preserving its time priority for the next match attempt.
    ///
    /// Panics if there is no such resting order — callers only invoke
    /// this immediately after [`Self::best_ask_order`]/
    /// [`Self::best_bid_order`] confirmed one exists.
    pub fn fill_best(&mut self, side: Side, qty: &Scaled) -> Order {
        match side {
            Side::Ask => {
                let price = self
                    .asks
                    .first_key_value()
                    .expect("fill_best: empty ask side")
                    .0
                    .clone();
                let queue = self.asks.get_mut(&price).expect("fill_best: ask level");
                let mut order = queue.pop_front().expect("fill_best: empty ask queue");
                order.quantity = order
                    .quantity
                    .checked_sub_nonneg(qty)
                    .expect("fill_best: ask overfill");
                if order.quantity.is_zero() {
                    self.order_index.remove(&order.id);
                } else {
                    queue.push_front(order.clone());
                }
                if queue.is_empty() {
                    self.asks.remove(&price);
                }
                order
            }
            Side::Bid => {
                let key = self.bids.first_key_value().expect("fill_best: empty bid side").0.clone();
                let queue = self.bids.get_mut(&key).expect("fill_best: bid level");
                let mut order = queue.pop_front().expect("fill_best: empty bid queue");
                order.quantity = order
                    .quantity
                    .checked_sub_nonneg(qty)
                    .expect("fill_best: bid overfill");
                if order.quantity.is_zero() {
                    self.order_index.remove(&order.id);
                } else {
                    queue.push_front(order.clone());
                }
                if queue.is_empty() {
                    self.bids.remove(&key);
                }
                order
            }
        }
    }

    /// Top `limit` price levels per side with aggregated remaining quantity.
    pub fn get_depth(&self, limit: usize) -> DepthSnapshot {
        let bids = self
            .bids
            .iter()
            .take(limit)
            .map(|(Reverse(price), orders)| {
                let qty = orders
                    .iter()
                    .fold(Scaled::zero(), |acc, o| &acc + &o.quantity);
                (price.clone(), qty)
            })
            .collect();

        let asks = self
            .asks
            .iter()
            .take(limit)
            .map(|(price, orders)| {
                let qty = orders
                    .iter()
                    .fold(Scaled::zero(), |acc, o| &acc + &o.quantity);
                (price.clone(), qty)
            })
            .collect();

        DepthSnapshot { bids, asks }
    }
}

#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub bids: Vec<(Scaled, Scaled)>,
    pub asks: Vec<(Scaled, Scaled)>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderType;

    fn s(v: &str) -> Scaled {
        Scaled::parse(v).unwrap()
    }

    fn make_order(id: OrderId, price: &str, qty: &str, side: Side) -> Order {
        Order {
            id,
            ticket_id: id,
            owner: 1,
            fee_rate: Scaled::zero(),
            time: 0,
            side,
            order_type: OrderType::Limit,
            price: s(price),
            quantity: s(qty),
            orig_qty: s(qty),
        }
    }

    #[test]
    fn qa_rest_order() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "10", Side::Bid));
        assert_eq!(book.best_bid(), Some(&s("100")));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn qa_best_bid_ask() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "10", Side::Bid));
        book.rest_order(make_order(2, "99", "10", Side::Bid));
        book.rest_order(make_order(3, "101", "10", Side::Ask));
        book.rest_order(make_order(4, "102", "10", Side::Ask));

        assert_eq!(book.best_bid(), Some(&s("100")));
        assert_eq!(book.best_ask(), Some(&s("101")));
        assert_eq!(book.spread(), Some(s("1")));
    }

    #[test]
    fn qa_cancel_order() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "10", Side::Bid));
        assert!(book.cancel_order(1, &s("100"), Side::Bid));
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn qa_depth() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "10", Side::Bid));
        book.rest_order(make_order(2, "99", "10", Side::Bid));
        book.rest_order(make_order(3, "101", "10", Side::Ask));
        assert_eq!(book.depth(), (2, 1));
    }

    #[test]
    fn qa_remove_order_by_id() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "10", Side::Bid));
        book.rest_order(make_order(2, "101", "20", Side::Ask));
        book.rest_order(make_order(3, "99", "30", Side::Bid));

        let removed = book.remove_order_by_id(1).unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(removed.price, s("100"));
        assert_eq!(book.best_bid(), Some(&s("99")));

        let removed = book.remove_order_by_id(2).unwrap();
        assert_eq!(removed.id, 2);
        assert_eq!(book.best_ask(), None);
        assert!(book.remove_order_by_id(999).is_none());
    }

    #[test]
    fn qa_get_depth_ordering() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "10", Side::Bid));
        book.rest_order(make_order(2, "99", "20", Side::Bid));
        book.rest_order(make_order(3, "98", "15", Side::Bid));
        book.rest_order(make_order(4, "101", "12", Side::Ask));
        book.rest_order(make_order(5, "102", "25", Side::Ask));
        book.rest_order(make_order(6, "103", "8", Side::Ask));

        let depth = book.get_depth(5);
        assert_eq!(depth.bids.len(), 3);
        assert_eq!(depth.bids[0], (s("100"), s("10")));
        assert_eq!(depth.bids[1], (s("99"), s("20")));
        assert_eq!(depth.bids[2], (s("98"), s("15")));

        assert_eq!(depth.asks.len(), 3);
        assert_eq!(depth.asks[0], (s("101"), s("12")));
        assert_eq!(depth.asks[1], (s("102"), s("25")));
        assert_eq!(depth.asks[2], (s("103"), s("8")));

        let depth_limited = book.get_depth(2);
        assert_eq!(depth_limited.bids.len(), 2);
        assert_eq!(depth_limited.asks.len(), 2);
    }

    #[test]
    fn qa_fill_best_partial_keeps_priority_at_front() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "5", Side::Ask));
        book.rest_order(make_order(2, "100", "5", Side::Ask));

        let filled = book.fill_best(Side::Ask, &s("2"));
        assert_eq!(filled.id, 1);
        assert_eq!(filled.quantity, s("3"));
        // order 1 still leads its level, now with 3 remaining.
        assert_eq!(book.best_ask_order().unwrap().id, 1);
        assert_eq!(book.best_ask_order().unwrap().quantity, s("3"));
    }

    #[test]
    fn qa_fill_best_exhausted_drops_order() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "5", Side::Bid));
        book.rest_order(make_order(2, "99", "5", Side::Bid));

        let filled = book.fill_best(Side::Bid, &s("5"));
        assert_eq!(filled.id, 1);
        assert!(filled.quantity.is_zero());
        assert_eq!(book.best_bid_order().unwrap().id, 2);
    }

    #[test]
    fn qa_fifo_within_price_level() {
        let mut book = OrderBook::new();
        book.rest_order(make_order(1, "100", "10", Side::Bid));
        book.rest_order(make_order(2, "100", "5", Side::Bid));
        let level = book.bids().get(&Reverse(s("100"))).unwrap();
        assert_eq!(level[0].id, 1);
        assert_eq!(level[1].id, 2);
    }
}

//! DDL for the relational store.
//!
//! Postgres DDL; every decimal amount is stored as `numeric` rather than
//! a floating type, since [`crate::scaled`] already renders/parses the
//! canonical decimal-string form and `numeric` preserves exact arithmetic
//! end to end.
//!
//! Table names are generated per-coin/per-symbol (tickets, orders,
//! trades, balance snapshots), since one physical Postgres database backs
//! every Bank/OME process in the exchange.

/// One row per `(owner, coin)`. A single table is fine in Postgres at
/// exchange scale; `(owner, coin)` is unique.
pub const CREATE_BALANCES: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    id BIGSERIAL PRIMARY KEY,
    owner BIGINT NOT NULL,
    coin VARCHAR(16) NOT NULL,
    free NUMERIC NOT NULL DEFAULT 0,
    freeze NUMERIC NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (owner, coin)
)"#;

pub const CREATE_LASTKV: &str = r#"
CREATE TABLE IF NOT EXISTS lastkv (
    id BIGSERIAL PRIMARY KEY,
    app VARCHAR(64) NOT NULL,
    key VARCHAR(64) NOT NULL,
    val BIGINT NOT NULL DEFAULT 0,
    UNIQUE (app, key)
)"#;

pub fn create_balance_snaps(coin: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
    id BIGSERIAL PRIMARY KEY,
    log_id BIGINT NOT NULL,
    log_index BIGINT NOT NULL,
    owner BIGINT NOT NULL,
    free_change NUMERIC NOT NULL DEFAULT 0,
    freeze_change NUMERIC NOT NULL DEFAULT 0,
    free_new NUMERIC NOT NULL DEFAULT 0,
    freeze_new NUMERIC NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (log_id, log_index)
)"#,
        table = balance_snaps_table(coin)
    )
}

pub fn create_tickets(symbol: &str, side: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
    id BIGINT PRIMARY KEY,
    owner BIGINT NOT NULL,
    type SMALLINT NOT NULL,
    time BIGINT NOT NULL,
    fee_level NUMERIC NOT NULL DEFAULT 0,
    price NUMERIC NOT NULL DEFAULT 0,
    quantity NUMERIC NOT NULL DEFAULT 0,
    amount NUMERIC NOT NULL DEFAULT 0
)"#,
        table = tickets_table(symbol, side)
    )
}

pub fn create_orders(symbol: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
    id BIGINT PRIMARY KEY,
    ticket_id BIGINT NOT NULL,
    owner BIGINT NOT NULL,
    side SMALLINT NOT NULL,
    type SMALLINT NOT NULL,
    time BIGINT NOT NULL,
    fee_level NUMERIC NOT NULL DEFAULT 0,
    price NUMERIC NOT NULL DEFAULT 0,
    quantity NUMERIC NOT NULL DEFAULT 0,
    orig_qty NUMERIC NOT NULL DEFAULT 0,
    amount NUMERIC NOT NULL DEFAULT 0,
    status SMALLINT NOT NULL DEFAULT 20,
    trades BIGINT NOT NULL DEFAULT 0
)"#,
        table = orders_table(symbol)
    )
}

pub fn create_trades(symbol: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
    id BIGSERIAL PRIMARY KEY,
    log_id BIGINT NOT NULL,
    ask_order BIGINT NOT NULL,
    bid_order BIGINT NOT NULL,
    asker BIGINT NOT NULL,
    bider BIGINT NOT NULL,
    price NUMERIC NOT NULL DEFAULT 0,
    quantity NUMERIC NOT NULL DEFAULT 0,
    amount NUMERIC NOT NULL DEFAULT 0,
    ask_fee NUMERIC NOT NULL DEFAULT 0,
    bid_fee NUMERIC NOT NULL DEFAULT 0,
    time BIGINT NOT NULL
)"#,
        table = trades_table(symbol)
    )
}

pub fn balance_snaps_table(coin: &str) -> String {
    format!("{}_balance_snaps", coin.to_lowercase())
}

pub fn tickets_table(symbol: &str, side: &str) -> String {
    format!("{}_{}_tickets", symbol.to_lowercase(), side)
}

pub fn orders_table(symbol: &str) -> String {
    format!("{}_orders", symbol.to_lowercase())
}

pub fn trades_table(symbol: &str) -> String {
    format!("{}_trades", symbol.to_lowercase())
}

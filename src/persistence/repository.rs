//! Queries and idempotent batch writers over the schema in
//! [`crate::persistence::schema`].
//!
//! Grounded in `pkg/bank/bank.go`'s `LoadAllAssets`/`ParseAndWriteLogs`
//! (name preserved as [`flush_bank_log`]'s doc pointer) and
//! `pkg/ome/ome.go`'s `LoadAllOrders`. Amounts bind as the canonical
//! decimal string and cast to `numeric` in SQL, rather than going through
//! `rust_decimal`, so [`Scaled`]'s `BigInt` remains the single source of
//! truth for arithmetic — the store never rounds or reinterprets a value.

use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::domain::{Order, OrderId, OrderType, Side, Ticket, TicketId, UserAsset, UserId};
use crate::lastkv::{self, LastKv};
use crate::logs::{BankLog, OmeLog};
use crate::scaled::Scaled;

use super::schema;

fn parse_scaled(s: &str) -> Scaled {
    // Store-trusted values only; a malformed numeric column is a store
    // corruption bug, not a recoverable input-validation case.
    Scaled::parse(s).unwrap_or_else(|_| Scaled::zero())
}

pub async fn ensure_bank_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(schema::CREATE_BALANCES).execute(pool).await?;
    sqlx::query(schema::CREATE_LASTKV).execute(pool).await?;
    Ok(())
}

pub async fn ensure_balance_snaps_table(pool: &PgPool, coin: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&schema::create_balance_snaps(coin))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn ensure_ticket_tables(pool: &PgPool, symbol: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&schema::create_tickets(symbol, "ask"))
        .execute(pool)
        .await?;
    sqlx::query(&schema::create_tickets(symbol, "bid"))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn ensure_ome_schema(pool: &PgPool, symbol: &str) -> Result<(), sqlx::Error> {
    sqlx::query(schema::CREATE_LASTKV).execute(pool).await?;
    sqlx::query(&schema::create_orders(symbol))
        .execute(pool)
        .await?;
    sqlx::query(&schema::create_trades(symbol))
        .execute(pool)
        .await?;
    Ok(())
}

/// All balances for one coin, keyed by owner — the Bank's cold-start
/// cache (`LoadAllAssets`).
pub async fn load_balances(
    pool: &PgPool,
    coin: &str,
) -> Result<HashMap<UserId, UserAsset>, sqlx::Error> {
    let rows = sqlx::query("SELECT owner, free::text, freeze::text FROM balances WHERE coin = $1")
        .bind(coin)
        .fetch_all(pool)
        .await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let owner: i64 = row.try_get(0)?;
        let free: String = row.try_get(1)?;
        let freeze: String = row.try_get(2)?;
        out.insert(
            owner,
            UserAsset {
                free: parse_scaled(&free),
                freeze: parse_scaled(&freeze),
            },
        );
    }
    Ok(out)
}

/// Highest ticket id already persisted for `(symbol, side)`, 0 if none —
/// the per-symbol `w.TicketIDs[symbol]` seed.
pub async fn load_latest_ticket_id(
    pool: &PgPool,
    symbol: &str,
    side: &str,
) -> Result<TicketId, sqlx::Error> {
    let table = schema::tickets_table(symbol, side);
    let row = sqlx::query(&format!("SELECT COALESCE(MAX(id), 0) FROM {table}"))
        .fetch_one(pool)
        .await?;
    row.try_get(0)
}

/// All live orders for a symbol (`status > -1`, i.e. not deleted),
/// ascending by id — the OME's cold-start book rebuild (`LoadAllOrders`).
pub async fn load_orders(pool: &PgPool, symbol: &str) -> Result<Vec<Order>, sqlx::Error> {
    let table = schema::orders_table(symbol);
    let rows = sqlx::query(&format!(
        "SELECT id, ticket_id, owner, side, type, time, fee_level::text, price::text, quantity::text, orig_qty::text \
         FROM {table} WHERE status > -1 ORDER BY id ASC"
    ))
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let id: OrderId = row.try_get(0)?;
        let ticket_id: TicketId = row.try_get(1)?;
        let owner: UserId = row.try_get(2)?;
        let side: i16 = row.try_get(3)?;
        let order_type: i16 = row.try_get(4)?;
        let time: i64 = row.try_get(5)?;
        let fee_rate: String = row.try_get(6)?;
        let price: String = row.try_get(7)?;
        let quantity: String = row.try_get(8)?;
        let orig_qty: String = row.try_get(9)?;
        out.push(Order {
            id,
            ticket_id,
            owner,
            fee_rate: parse_scaled(&fee_rate),
            time,
            side: if side == 1 { Side::Ask } else { Side::Bid },
            order_type: if order_type == 1 {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            price: parse_scaled(&price),
            quantity: parse_scaled(&quantity),
            orig_qty: parse_scaled(&orig_qty),
        });
    }
    Ok(out)
}

pub async fn load_lastkv(pool: &PgPool, app: &str) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows = sqlx::query("SELECT key, val FROM lastkv WHERE app = $1")
        .bind(app)
        .fetch_all(pool)
        .await?;
    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let key: String = row.try_get(0)?;
        let val: i64 = row.try_get(1)?;
        out.insert(key, val);
    }
    Ok(out)
}

/// Highest logID already written to the store for `app` — compared
/// against a filedb's last `logID` by `WaitForFiledb` before a process
/// starts serving to ensure no log tail is missing.
pub async fn load_saved_log_id(pool: &PgPool, app: &str) -> Result<i64, sqlx::Error> {
    let kv = LastKv::new(app);
    Ok(kv.get(pool, lastkv::KEY_SAVED_LOG_ID).await?.unwrap_or(0))
}

/// Persists one [`BankLog`] (ticket + balance rows, balances upsert,
/// `saved_log_id` cursor) inside a single transaction. Idempotent: a
/// `logID` at or below the stored cursor is a no-op, so replaying the
/// filedb tail after a crash mid-flush never double-applies a batch —
/// mirrors `ParseAndWriteLogs` in `pkg/bank/bank.go`.
pub async fn flush_bank_log(pool: &PgPool, coin: &str, log: &BankLog) -> Result<(), sqlx::Error> {
    let kv = LastKv::new(format!("bank_{}", coin.to_lowercase()));
    let mut tx = pool.begin().await?;

    let saved = kv
        .get(pool, lastkv::KEY_SAVED_LOG_ID)
        .await?
        .unwrap_or(0);
    if log.log_id <= saved {
        tx.commit().await?;
        return Ok(());
    }

    for tl in &log.ticket_logs {
        let side = if tl.side == Side::Ask { "ask" } else { "bid" };
        let table = schema::tickets_table(&tl.symbol, side);
        sqlx::query(&format!(
            "INSERT INTO {table} (id, owner, type, time, fee_level, price, quantity, amount) \
             VALUES ($1, $2, $3, $4, $5::numeric, $6::numeric, $7::numeric, $8::numeric) \
             ON CONFLICT (id) DO NOTHING"
        ))
        .bind(tl.id)
        .bind(tl.owner)
        .bind(tl.order_type as i16)
        .bind(log.ts)
        .bind(tl.fee_rate.to_decimal_string())
        .bind(tl.price.to_decimal_string())
        .bind(tl.quantity.to_decimal_string())
        .bind(tl.amount.to_decimal_string())
        .execute(&mut *tx)
        .await?;
    }

    for bl in &log.balance_logs {
        upsert_balance(
            &mut tx,
            coin,
            bl.owner,
            &bl.free_change,
            &bl.freeze_change,
        )
        .await?;
        if let (Some(owner2), Some(free2), Some(freeze2)) =
            (bl.owner2, &bl.free_change2, &bl.freeze_change2)
        {
            upsert_balance(&mut tx, coin, owner2, free2, freeze2).await?;
        }

        sqlx::query(&format!(
            "INSERT INTO {table} (log_id, log_index, owner, free_change, freeze_change, free_new, freeze_new) \
             VALUES ($1, $2, $3, $4::numeric, $5::numeric, $6::numeric, $7::numeric) \
             ON CONFLICT (log_id, log_index) DO NOTHING",
            table = schema::balance_snaps_table(coin)
        ))
        .bind(log.log_id)
        .bind(bl.log_index)
        .bind(bl.owner)
        .bind(bl.free_change.to_decimal_string())
        .bind(bl.freeze_change.to_decimal_string())
        .bind(bl.free_new.to_decimal_string())
        .bind(bl.freeze_new.to_decimal_string())
        .execute(&mut *tx)
        .await?;
    }

    if let Some(seq) = log.msg_seq {
        kv.advance_tx(&mut tx, lastkv::KEY_NATS_SEQ, seq as i64)
            .await?;
    }
    kv.advance_tx(&mut tx, lastkv::KEY_SAVED_LOG_ID, log.log_id)
        .await?;

    tx.commit().await?;
    Ok(())
}

async fn upsert_balance(
    tx: &mut Transaction<'_, Postgres>,
    coin: &str,
    owner: UserId,
    free_change: &Scaled,
    freeze_change: &Scaled,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO balances (owner, coin, free, freeze) VALUES ($1, $2, $3::numeric, $4::numeric) \
         ON CONFLICT (owner, coin) DO UPDATE SET free = balances.free + EXCLUDED.free, \
         freeze = balances.freeze + EXCLUDED.freeze, updated_at = now()",
    )
    .bind(owner)
    .bind(coin)
    .bind(free_change.to_decimal_string())
    .bind(freeze_change.to_decimal_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Persists one [`OmeLog`] (orders upsert, trades insert, `saved_log_id`
/// cursor), same idempotence contract as [`flush_bank_log`].
pub async fn flush_ome_log(pool: &PgPool, symbol: &str, log: &OmeLog) -> Result<(), sqlx::Error> {
    let kv = LastKv::new(format!("ome_{}", symbol.to_lowercase()));
    let mut tx = pool.begin().await?;

    let saved = kv
        .get(pool, lastkv::KEY_SAVED_LOG_ID)
        .await?
        .unwrap_or(0);
    if log.log_id <= saved {
        tx.commit().await?;
        return Ok(());
    }

    let orders_table = schema::orders_table(symbol);
    let mut max_order_id: Option<OrderId> = None;
    let mut max_ask_ticket_id: Option<TicketId> = None;
    let mut max_bid_ticket_id: Option<TicketId> = None;
    for ol in &log.order_logs {
        let amount = ol.price.mul_scaled(&ol.orig_qty);
        sqlx::query(&format!(
            "INSERT INTO {orders_table} \
             (id, ticket_id, owner, side, type, time, fee_level, price, quantity, orig_qty, amount, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7::numeric, $8::numeric, $9::numeric, $10::numeric, $11::numeric, 20) \
             ON CONFLICT (id) DO NOTHING"
        ))
        .bind(ol.id)
        .bind(ol.ticket_id)
        .bind(ol.owner)
        .bind(ol.side as i16)
        .bind(ol.order_type as i16)
        .bind(ol.time)
        .bind(ol.fee_rate.to_decimal_string())
        .bind(ol.price.to_decimal_string())
        .bind(ol.quantity.to_decimal_string())
        .bind(ol.orig_qty.to_decimal_string())
        .bind(amount.to_decimal_string())
        .execute(&mut *tx)
        .await?;

        max_order_id = Some(max_order_id.map_or(ol.id, |m| m.max(ol.id)));
        match ol.side {
            Side::Ask => {
                max_ask_ticket_id =
                    Some(max_ask_ticket_id.map_or(ol.ticket_id, |m| m.max(ol.ticket_id)));
            }
            Side::Bid => {
                max_bid_ticket_id =
                    Some(max_bid_ticket_id.map_or(ol.ticket_id, |m| m.max(ol.ticket_id)));
            }
        }
    }

    let trades_table = schema::trades_table(symbol);
    for ml in &log.match_logs {
        sqlx::query(&format!(
            "INSERT INTO {trades_table} \
             (log_id, ask_order, bid_order, asker, bider, price, quantity, amount, ask_fee, bid_fee, time) \
             VALUES ($1, $2, $3, $4, $5, $6::numeric, $7::numeric, $8::numeric, $9::numeric, $10::numeric, $11)"
        ))
        .bind(log.log_id)
        .bind(ml.ask_id)
        .bind(ml.bid_id)
        .bind(ml.asker)
        .bind(ml.bider)
        .bind(ml.price.to_decimal_string())
        .bind(ml.quantity.to_decimal_string())
        .bind(ml.amount.to_decimal_string())
        .bind(ml.ask_fee.to_decimal_string())
        .bind(ml.bid_fee.to_decimal_string())
        .bind(ml.time)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE {orders_table} SET quantity = $2::numeric, trades = trades + 1, \
             status = CASE WHEN $2::numeric = 0 THEN -1 ELSE status END WHERE id = $1"
        ))
        .bind(ml.ask_id)
        .bind(ml.ask_quantity.to_decimal_string())
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "UPDATE {orders_table} SET quantity = $2::numeric, trades = trades + 1, \
             status = CASE WHEN $2::numeric = 0 THEN -1 ELSE status END WHERE id = $1"
        ))
        .bind(ml.bid_id)
        .bind(ml.bid_quantity.to_decimal_string())
        .execute(&mut *tx)
        .await?;
    }

    // Cancelled orders are removed from the book entirely (§9); mark the
    // row deleted the same way a fully-filled order is marked, so
    // `load_orders`'s `status > -1` filter excludes it on restart.
    for cl in &log.cancel_logs {
        sqlx::query(&format!(
            "UPDATE {orders_table} SET status = -1 WHERE id = $1"
        ))
        .bind(cl.order_id)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(v) = max_order_id {
        kv.advance_tx(&mut tx, lastkv::KEY_LATEST_ORDER_ID, v).await?;
    }
    if let Some(v) = max_ask_ticket_id {
        kv.advance_tx(&mut tx, lastkv::KEY_LATEST_ASK_TICKET_ID, v)
            .await?;
    }
    if let Some(v) = max_bid_ticket_id {
        kv.advance_tx(&mut tx, lastkv::KEY_LATEST_BID_TICKET_ID, v)
            .await?;
    }
    kv.advance_tx(&mut tx, lastkv::KEY_SAVED_LOG_ID, log.log_id)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Round-tripped back into a `Ticket` for tests/tools that want the
/// domain type rather than raw rows.
pub fn ticket_from_row(
    id: TicketId,
    owner: UserId,
    symbol: String,
    side: Side,
    order_type: OrderType,
    price: Scaled,
    quantity: Scaled,
    fee_rate: Scaled,
    time: i64,
) -> Ticket {
    Ticket {
        id,
        time,
        owner,
        symbol,
        side,
        order_type,
        price,
        quantity,
        fee_rate,
    }
}

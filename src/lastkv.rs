//! The `lastkv` recovery-cursor table.
//!
//! A generic `(app, key) -> value` table holding every recovery cursor a
//! Bank or OME process needs on restart: the NATS consumer sequence, the
//! per-ome-reason-table replication cursor, the latest order/ticket ids,
//! the last saved filedb log id. A real persisted table, not an
//! in-memory-only value — the whole point is that it survives a process
//! restart.

pub const KEY_NATS_SEQ: &str = "nats_seq";
pub const KEY_SAVED_LOG_ID: &str = "saved_log_id";
pub const KEY_LATEST_ORDER_ID: &str = "latest_order_id";
pub const KEY_LATEST_ASK_TICKET_ID: &str = "latest_ask_ticket_id";
pub const KEY_LATEST_BID_TICKET_ID: &str = "latest_bid_ticket_id";

pub fn key_ome_reasonid(symbol: &str) -> String {
    format!("ome_reasonid_{symbol}")
}

/// Reads and conditionally-updates `lastkv` rows for one `app`
/// (engine instance name, e.g. `bank_usdt` or `ome_btc_usdt`).
#[derive(Debug)]
pub struct LastKv {
    pub(crate) app: String,
}

impl LastKv {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }

    pub async fn get(&self, pool: &sqlx::PgPool, key: &str) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT val FROM lastkv WHERE app = $1 AND key = $2")
                .bind(&self.app)
                .bind(key)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Conditional upsert: only ever moves the cursor forward
    /// (`WHERE lastkv.val < EXCLUDED.val`), so replaying an already-flushed
    /// batch never regresses a cursor (§4.5 idempotence).
    pub async fn advance(
        &self,
        pool: &sqlx::PgPool,
        key: &str,
        val: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO lastkv (app, key, val) VALUES ($1, $2, $3)
             ON CONFLICT (app, key) DO UPDATE SET val = EXCLUDED.val
             WHERE lastkv.val < EXCLUDED.val",
        )
        .bind(&self.app)
        .bind(key)
        .bind(val)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn advance_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        key: &str,
        val: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO lastkv (app, key, val) VALUES ($1, $2, $3)
             ON CONFLICT (app, key) DO UPDATE SET val = EXCLUDED.val
             WHERE lastkv.val < EXCLUDED.val",
        )
        .bind(&self.app)
        .bind(key)
        .bind(val)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

//! The Bank writer: the one task that mutates assets, ticket ids, the
//! filedb log id, the NATS sequence cursor, and the per-OME reason-id
//! cursors.
//!
//! Every mutation is staged on owned local copies and only written into
//! `self` after the filedb append that makes it durable succeeds — a
//! failed append leaves state exactly as before the attempt
//! (commit-on-success rather than mutate-then-unwind; see DESIGN.md).

use rustc_hash::FxHashMap;

use crate::domain::{BalanceChange, LogId, OrderReq, Side, TicketId, UserAsset, UserId};
use crate::error::{BankError, IntakeOutcome};
use crate::fee;
use crate::filedb::Filedb;
use crate::logs::{BalanceLog, BankLog, TicketLog};

/// `Init -> WaitForFiledb -> LoadingAssets -> Working`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankState {
    Init,
    WaitForFiledb,
    LoadingAssets,
    Working,
}

/// Everything that reaches the single writer task: an `OrderReq` off the
/// durable stream, or a `BalanceChange` pushed by an OME over the bidi
/// RPC stream. The writer resolves `(symbol) -> (base_coin, quote_coin)`
/// against the current topology snapshot at processing time, not at
/// ingress time, so a hot-reloaded topology is always consulted fresh
/// (`crate::config_watcher`).
pub enum BankMsg {
    Order { seq: u64, req: OrderReq },
    Balance(BalanceChange),
    /// A `BalanceChanges` RPC handshake asking for the current
    /// `omeReasonIDs[reason_table]` so the OME learns where to resume
    /// (spec §4.4's "resume from a stale cursor" handshake). Routed
    /// through the writer rather than read off a shared cache so the
    /// answer always reflects log records already durable, never a
    /// stale snapshot racing the writer.
    ReasonCursorQuery {
        reason_table: String,
        reply: tokio::sync::oneshot::Sender<LogId>,
    },
}

/// The Bank(coin) in-memory state plus its filedb handle. Owned
/// exclusively by the writer task — no field here is ever touched from
/// another task.
pub struct BankEngine {
    pub name: String,
    pub coin: String,
    pub state: BankState,

    pub log_id: LogId,
    pub latest_msg_seq: u64,

    ticket_ids: FxHashMap<(String, Side), TicketId>,
    assets: FxHashMap<UserId, UserAsset>,
    ome_reason_ids: FxHashMap<String, LogId>,

    filedb: Filedb,
}

impl BankEngine {
    pub fn new(name: impl Into<String>, coin: impl Into<String>, filedb: Filedb) -> Self {
        Self {
            name: name.into(),
            coin: coin.into(),
            state: BankState::Init,
            log_id: 0,
            latest_msg_seq: 0,
            ticket_ids: FxHashMap::default(),
            assets: FxHashMap::default(),
            ome_reason_ids: FxHashMap::default(),
            filedb,
        }
    }

    pub fn filedb_path(&self) -> &std::path::Path {
        self.filedb.path()
    }

    /// `Init`: read filedb's last line and seed `logID`/`latestMsgSeq`
    /// from it (0 if the file is empty). Parsing a non-empty last line is
    /// a corruption, not a recoverable case — the file is never supposed
    /// to hold anything but complete `BankLog` JSON lines.
    pub async fn bootstrap_from_filedb(&mut self) -> Result<(), BankError> {
        let last = self.filedb.read_last_line().await?;
        if !last.is_empty() {
            let log: BankLog = serde_json::from_str(&last)?;
            self.log_id = log.log_id;
            if let Some(seq) = log.msg_seq {
                self.latest_msg_seq = seq;
            }
        }
        self.state = BankState::WaitForFiledb;
        Ok(())
    }

    pub fn enter_loading_assets(&mut self) {
        self.state = BankState::LoadingAssets;
    }

    pub fn enter_working(&mut self) {
        self.state = BankState::Working;
    }

    pub fn load_assets(&mut self, assets: FxHashMap<UserId, UserAsset>) {
        self.assets = assets;
    }

    pub fn load_ticket_id(&mut self, symbol: impl Into<String>, side: Side, id: TicketId) {
        self.ticket_ids.insert((symbol.into(), side), id);
    }

    pub fn load_ome_reason_id(&mut self, reason_table: impl Into<String>, id: LogId) {
        self.ome_reason_ids.insert(reason_table.into(), id);
    }

    pub fn load_nats_seq(&mut self, seq: u64) {
        self.latest_msg_seq = self.latest_msg_seq.max(seq);
    }

    pub fn asset(&self, owner: UserId) -> UserAsset {
        self.assets.get(&owner).cloned().unwrap_or_default()
    }

    pub fn ticket_id(&self, symbol: &str, side: Side) -> TicketId {
        *self.ticket_ids.get(&(symbol.to_string(), side)).unwrap_or(&0)
    }

    pub fn ome_reason_id(&self, reason_table: &str) -> LogId {
        *self.ome_reason_ids.get(reason_table).unwrap_or(&0)
    }

    /// Reserve-funds algorithm (§4.2). Returns `Duplicate`/`Dropped`
    /// without touching any counter; returns `Applied` only once the
    /// `BankLog` record is durable.
    pub async fn handle_order_req(
        &mut self,
        seq: u64,
        req: OrderReq,
        base_coin: &str,
        quote_coin: &str,
        now_ns: i64,
    ) -> Result<IntakeOutcome, BankError> {
        if seq <= self.latest_msg_seq {
            return Ok(IntakeOutcome::Duplicate);
        }

        let (required_coin, value) = match req.side {
            Side::Bid => (quote_coin, req.amount.clone()),
            Side::Ask => (base_coin, req.quantity.clone()),
        };
        if required_coin != self.coin {
            return Ok(IntakeOutcome::Dropped);
        }

        let fee = fee::calculate_fee(&value, &req.fee_level);
        let total = &value + &fee;

        let mut asset = self.asset(req.owner);
        if let Err(BankError::InsufficientFunds { have, need }) = asset.reserve(&total) {
            tracing::warn!(
                target: "BANK",
                owner = req.owner,
                have,
                need,
                "insufficient funds, dropping order request"
            );
            return Ok(IntakeOutcome::Dropped);
        }

        let log_id = self.log_id + 1;
        let key = (req.symbol.clone(), req.side);
        let ticket_id = self.ticket_id(&req.symbol, req.side) + 1;

        let ticket_log = TicketLog {
            log_index: 1,
            reason: "CreateOrder".to_string(),
            reason_table: ticket_table_name(&req.symbol, req.side),
            reason_id: ticket_id,
            id: ticket_id,
            owner: req.owner,
            symbol: req.symbol.clone(),
            order_type: req.order_type,
            side: req.side,
            price: req.price.clone(),
            quantity: req.quantity.clone(),
            amount: value.clone(),
            fee_rate: req.fee_level.clone(),
        };
        let balance_log = BalanceLog {
            log_index: 1,
            reason: "CreateOrder".to_string(),
            reason_table: ticket_table_name(&req.symbol, req.side),
            reason_id: ticket_id,
            owner: req.owner,
            coin: self.coin.clone(),
            free_change: -total.clone(),
            freeze_change: total.clone(),
            free_new: asset.free.clone(),
            freeze_new: asset.freeze.clone(),
            owner2: None,
            coin2: None,
            free_change2: None,
            freeze_change2: None,
            free_new2: None,
            freeze_new2: None,
        };
        let bank_log = BankLog {
            log_id,
            ts: now_ns,
            msg_seq: Some(seq),
            balance_logs: vec![balance_log],
            ticket_logs: vec![ticket_log],
        };
        let line = serde_json::to_string(&bank_log)?;
        self.filedb.write_line(&line).await?;

        self.assets.insert(req.owner, asset);
        self.ticket_ids.insert(key, ticket_id);
        self.log_id = log_id;
        self.latest_msg_seq = seq;
        Ok(IntakeOutcome::Applied)
    }

    /// Match settlement (§4.2). Caller (the RPC handler, §4.4) has
    /// already checked `bc.reason_id_first` against
    /// [`Self::ome_reason_id`] before handing the message to the writer —
    /// this only applies it and advances the cursor.
    pub async fn handle_balance_change(
        &mut self,
        bc: BalanceChange,
        now_ns: i64,
    ) -> Result<(), BankError> {
        if let (Some(fc2), Some(fz2)) = (&bc.free_change2, &bc.freeze_change2) {
            let net = (&bc.free_change + &bc.freeze_change) + (fc2 + fz2);
            if !net.is_zero() {
                return Err(BankError::ConservationViolation(format!(
                    "reason_table={} reason_id={}: net flow {} is nonzero",
                    bc.reason_table,
                    bc.reason_id,
                    net.to_decimal_string()
                )));
            }
        }

        let mut asset1 = self.asset(bc.owner);
        asset1.apply_change(&bc.free_change, &bc.freeze_change);

        let second = match (bc.owner2, &bc.free_change2, &bc.freeze_change2) {
            (Some(owner2), Some(fc2), Some(fz2)) => {
                let mut asset2 = self.asset(owner2);
                asset2.apply_change(fc2, fz2);
                Some((owner2, asset2))
            }
            _ => None,
        };

        let log_id = self.log_id + 1;
        let mut balance_log = BalanceLog {
            log_index: 1,
            reason: bc.reason.clone(),
            reason_table: bc.reason_table.clone(),
            reason_id: bc.reason_id,
            owner: bc.owner,
            coin: self.coin.clone(),
            free_change: bc.free_change.clone(),
            freeze_change: bc.freeze_change.clone(),
            free_new: asset1.free.clone(),
            freeze_new: asset1.freeze.clone(),
            owner2: None,
            coin2: None,
            free_change2: None,
            freeze_change2: None,
            free_new2: None,
            freeze_new2: None,
        };
        if let Some((owner2, asset2)) = &second {
            balance_log.owner2 = Some(*owner2);
            balance_log.coin2 = Some(self.coin.clone());
            balance_log.free_change2 = bc.free_change2.clone();
            balance_log.freeze_change2 = bc.freeze_change2.clone();
            balance_log.free_new2 = Some(asset2.free.clone());
            balance_log.freeze_new2 = Some(asset2.freeze.clone());
        }

        let bank_log = BankLog {
            log_id,
            ts: now_ns,
            msg_seq: None,
            balance_logs: vec![balance_log],
            ticket_logs: vec![],
        };
        let line = serde_json::to_string(&bank_log)?;
        self.filedb.write_line(&line).await?;

        self.assets.insert(bc.owner, asset1);
        if let Some((owner2, asset2)) = second {
            self.assets.insert(owner2, asset2);
        }
        self.log_id = log_id;
        self.ome_reason_ids.insert(bc.reason_table, bc.reason_id);
        Ok(())
    }
}

fn ticket_table_name(symbol: &str, side: Side) -> String {
    let side = if side == Side::Ask { "ask" } else { "bid" };
    crate::persistence::schema::tickets_table(symbol, side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderType;
    use crate::scaled::Scaled;

    fn s(v: &str) -> Scaled {
        Scaled::parse(v).unwrap()
    }

    async fn engine(coin: &str) -> BankEngine {
        let dir = tempdir();
        let filedb = Filedb::open(dir.join("test.log")).await.unwrap();
        let mut e = BankEngine::new(format!("bank_{coin}"), coin, filedb);
        e.enter_working();
        e
    }

    fn order_req(symbol: &str, owner: UserId, side: Side, price: &str, qty: &str, amount: &str) -> OrderReq {
        OrderReq {
            symbol: symbol.to_string(),
            owner,
            side,
            order_type: OrderType::Limit,
            price: s(price),
            quantity: s(qty),
            orig_qty: s(qty),
            amount: s(amount),
            time: 0,
            fee_level: Scaled::zero(),
        }
    }

    #[tokio::test]
    async fn qa_reserve_funds_ask_debits_base_coin() {
        let mut bank = engine("BTC").await;
        let mut assets = FxHashMap::default();
        assets.insert(2, UserAsset { free: s("10"), freeze: Scaled::zero() });
        bank.load_assets(assets);

        let outcome = bank
            .handle_order_req(1, order_req("BTC_USDT", 2, Side::Ask, "100", "1", "100"), "BTC", "USDT", 0)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Applied);
        assert_eq!(bank.asset(2).free, s("9"));
        assert_eq!(bank.asset(2).freeze, s("1"));
        assert_eq!(bank.ticket_id("BTC_USDT", Side::Ask), 1);
        assert_eq!(bank.log_id, 1);
        assert_eq!(bank.latest_msg_seq, 1);
    }

    #[tokio::test]
    async fn qa_wrong_coin_is_dropped_without_mutation() {
        let mut bank = engine("USDT").await;
        let outcome = bank
            .handle_order_req(1, order_req("BTC_USDT", 2, Side::Ask, "100", "1", "100"), "BTC", "USDT", 0)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Dropped);
        assert_eq!(bank.log_id, 0);
        assert_eq!(bank.latest_msg_seq, 0);
    }

    #[tokio::test]
    async fn qa_duplicate_seq_is_dropped() {
        let mut bank = engine("BTC").await;
        let mut assets = FxHashMap::default();
        assets.insert(2, UserAsset { free: s("10"), freeze: Scaled::zero() });
        bank.load_assets(assets);
        bank.handle_order_req(5, order_req("BTC_USDT", 2, Side::Ask, "100", "1", "100"), "BTC", "USDT", 0)
            .await
            .unwrap();
        let outcome = bank
            .handle_order_req(5, order_req("BTC_USDT", 2, Side::Ask, "100", "1", "100"), "BTC", "USDT", 0)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Duplicate);
        assert_eq!(bank.log_id, 1);
    }

    #[tokio::test]
    async fn qa_insufficient_funds_is_dropped() {
        let mut bank = engine("BTC").await;
        let mut assets = FxHashMap::default();
        assets.insert(2, UserAsset { free: s("0.5"), freeze: Scaled::zero() });
        bank.load_assets(assets);
        let outcome = bank
            .handle_order_req(1, order_req("BTC_USDT", 2, Side::Ask, "100", "1", "100"), "BTC", "USDT", 0)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Dropped);
        assert_eq!(bank.asset(2).free, s("0.5"));
        assert_eq!(bank.log_id, 0);
    }

    #[tokio::test]
    async fn qa_balance_change_settles_both_owners() {
        let mut bank = engine("USDT").await;
        let mut assets = FxHashMap::default();
        assets.insert(1, UserAsset { free: s("900"), freeze: s("100") });
        assets.insert(2, UserAsset { free: s("0"), freeze: Scaled::zero() });
        bank.load_assets(assets);
        bank.load_ome_reason_id("ome_btc_usdt_logs", 0);

        let bc = BalanceChange {
            reason: "match".into(),
            reason_table: "ome_btc_usdt_logs".into(),
            reason_id: 1,
            reason_id_first: 0,
            owner: 1,
            free_change: s("0"),
            freeze_change: s("-100"),
            owner2: Some(2),
            free_change2: Some(s("100")),
            freeze_change2: Some(s("0")),
        };
        bank.handle_balance_change(bc, 0).await.unwrap();

        assert_eq!(bank.asset(1).freeze, Scaled::zero());
        assert_eq!(bank.asset(2).free, s("100"));
        assert_eq!(bank.ome_reason_id("ome_btc_usdt_logs"), 1);
        assert_eq!(bank.log_id, 1);
    }

    #[tokio::test]
    async fn qa_balance_change_rejects_nonconserving_flow() {
        let mut bank = engine("USDT").await;
        let bc = BalanceChange {
            reason: "match".into(),
            reason_table: "ome_btc_usdt_logs".into(),
            reason_id: 1,
            reason_id_first: 0,
            owner: 1,
            free_change: s("0"),
            freeze_change: s("-100"),
            owner2: Some(2),
            free_change2: Some(s("50")),
            freeze_change2: Some(s("0")),
        };
        assert!(bank.handle_balance_change(bc, 0).await.is_err());
        assert_eq!(bank.log_id, 0);
    }

    #[tokio::test]
    async fn qa_bootstrap_from_empty_filedb() {
        let mut bank = engine("BTC").await;
        bank.bootstrap_from_filedb().await.unwrap();
        assert_eq!(bank.log_id, 0);
        assert_eq!(bank.latest_msg_seq, 0);
        assert_eq!(bank.state, BankState::WaitForFiledb);
    }

    fn tempdir() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("bank_engine_test_{}", std::process::id()));
        p.push(uuid_like());
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn uuid_like() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        format!("{}", SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos())
    }
}

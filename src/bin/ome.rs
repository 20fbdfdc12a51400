//! `OME(symbol)` process entry point.
//!
//! Load config, open filedb, wait for the store to catch up, rebuild the
//! book from the store's live order set, run one match pass over
//! whatever was loaded, then start pulling tickets from both coin banks
//! while the flusher and balance pushers run as independent background
//! tasks.
//!
//! Flags (plain `--key=value`):
//!   --symbol=BTC_USDT      required, the symbol this process owns
//!   --app-config=PATH      default "config/app.yaml"
//!   --topology=PATH        default "config/topology.yaml"

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;

use ccoms_core::config::AppConfig;
use ccoms_core::config::ExchangeTopology;
use ccoms_core::discovery::Discovery;
use ccoms_core::domain::Side;
use ccoms_core::filedb::Filedb;
use ccoms_core::lastkv;
use ccoms_core::error::OmeError;
use ccoms_core::ome::engine::OmeState;
use ccoms_core::ome::{balance_pusher, flusher, ticket_puller, OmeEngine, OmeMsg};
use ccoms_core::persistence::repository;

struct Args {
    symbol: String,
    app_config: String,
    topology: String,
}

fn parse_args() -> Args {
    let mut symbol = None;
    let mut app_config = "config/app.yaml".to_string();
    let mut topology = "config/topology.yaml".to_string();

    for arg in std::env::args().skip(1) {
        if let Some(v) = arg.strip_prefix("--symbol=") {
            symbol = Some(v.to_uppercase());
        } else if let Some(v) = arg.strip_prefix("--app-config=") {
            app_config = v.to_string();
        } else if let Some(v) = arg.strip_prefix("--topology=") {
            topology = v.to_string();
        }
    }

    Args {
        symbol: symbol.expect("missing required --symbol=<SYMBOL>"),
        app_config,
        topology,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let app_config = AppConfig::load(&args.app_config).map_err(anyhow::Error::msg)?;
    let topology = ExchangeTopology::load(&args.topology).map_err(anyhow::Error::msg)?;
    let entry = topology
        .symbol(&args.symbol)
        .ok_or_else(|| anyhow::anyhow!("unknown symbol {}", args.symbol))?
        .clone();

    let _log_guard = ccoms_core::logging::init_logging(&app_config);
    tracing::info!(target: "OME", symbol = %args.symbol, "ome worker created");

    let name = format!("ome_{}", args.symbol.to_lowercase());
    let filedb_path = app_config.filedb_path(&name);
    let filedb = Filedb::open(&filedb_path).await?;
    let mut engine = OmeEngine::new(
        name.clone(),
        args.symbol.clone(),
        entry.base_coin.clone(),
        entry.quote_coin.clone(),
        filedb,
    );
    engine.bootstrap_from_filedb().await?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&app_config.database_url)
        .await?;
    repository::ensure_ome_schema(&pool, &args.symbol).await?;

    tokio::spawn(flusher::run(pool.clone(), args.symbol.clone(), filedb_path.clone()));

    let target_log_id = engine.log_id;
    loop {
        let saved = repository::load_saved_log_id(&pool, &name).await?;
        if saved >= target_log_id {
            tracing::info!(target: "OME", saved, target_log_id, "WaitForFiledb done");
            break;
        }
        tracing::info!(target: "OME", saved, target_log_id, "WaitForFiledb sleeping");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    engine.enter_loading_orders();
    let orders = repository::load_orders(&pool, &args.symbol).await?;
    engine.load_orders(orders);
    let lastkv_rows = repository::load_lastkv(&pool, &name).await?;
    if let Some(v) = lastkv_rows.get(lastkv::KEY_LATEST_ORDER_ID) {
        engine.load_order_id(*v);
    }
    if let Some(v) = lastkv_rows.get(lastkv::KEY_LATEST_ASK_TICKET_ID) {
        engine.load_ticket_id(Side::Ask, *v);
    }
    if let Some(v) = lastkv_rows.get(lastkv::KEY_LATEST_BID_TICKET_ID) {
        engine.load_ticket_id(Side::Bid, *v);
    }
    tracing::info!(target: "OME", "LoadAllOrders done");

    engine.enter_matching();
    debug_assert_eq!(engine.state, OmeState::Matching);

    let (inbox_tx, mut inbox_rx) = mpsc::channel::<OmeMsg>(4096);

    let discovery = Discovery::connect(&app_config.etcd_endpoints).await?;

    // One resync channel per side: if the writer spots a ticket-id gap
    // (`OmeError::NonContinuousTicket`), it pushes the cursor to resume
    // from here instead of crashing the process (spec §7).
    let (ask_resync_tx, ask_resync_rx) = mpsc::channel::<i64>(8);
    let (bid_resync_tx, bid_resync_rx) = mpsc::channel::<i64>(8);

    tokio::spawn(ticket_puller::run(
        discovery.clone(),
        entry.base_coin.clone(),
        args.symbol.clone(),
        Side::Ask,
        engine.latest_ticket_id(Side::Ask),
        inbox_tx.clone(),
        ask_resync_rx,
    ));
    tokio::spawn(ticket_puller::run(
        discovery.clone(),
        entry.quote_coin.clone(),
        args.symbol.clone(),
        Side::Bid,
        engine.latest_ticket_id(Side::Bid),
        inbox_tx.clone(),
        bid_resync_rx,
    ));

    tokio::spawn(balance_pusher::run(
        discovery.clone(),
        entry.base_coin.clone(),
        args.symbol.clone(),
        entry.base_coin.clone(),
        entry.quote_coin.clone(),
        engine.filedb_path().to_path_buf(),
    ));
    tokio::spawn(balance_pusher::run(
        discovery.clone(),
        entry.quote_coin.clone(),
        args.symbol.clone(),
        entry.base_coin.clone(),
        entry.quote_coin.clone(),
        engine.filedb_path().to_path_buf(),
    ));

    // The single writer loop: matches tickets to exhaustion and applies
    // cancellations, in arrival order, one message at a time.
    while let Some(msg) = inbox_rx.recv().await {
        let now_s = chrono::Utc::now().timestamp();
        let now_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        match msg {
            OmeMsg::Ticket(ticket) => {
                let side = ticket.side;
                match engine.handle_ticket(ticket, now_s, now_ns).await {
                    Ok(_) => {}
                    Err(OmeError::NonContinuousTicket { latest, got }) => {
                        // Fatal to this side's stream only (spec §7): the
                        // engine's state is untouched, so the puller just
                        // needs to reopen its stream at our real cursor.
                        tracing::warn!(
                            target: "OME",
                            ?side,
                            latest,
                            got,
                            "ticket id is not continuous, resyncing stream"
                        );
                        let resync_tx = match side {
                            Side::Ask => &ask_resync_tx,
                            Side::Bid => &bid_resync_tx,
                        };
                        let _ = resync_tx.send(latest).await;
                    }
                    Err(e) => {
                        tracing::error!(target: "OME", error = %e, "handle_ticket failed, halting");
                        return Err(e.into());
                    }
                }
            }
            OmeMsg::Cancel(order_id) => {
                if let Err(e) = engine.handle_cancel(order_id, now_ns).await {
                    tracing::error!(target: "OME", error = %e, order_id, "handle_cancel failed");
                }
            }
        }
    }

    Ok(())
}

//! `Bank(coin)` process entry point.
//!
//! Load config, open filedb, wait for the store's `saved_log_id` to catch
//! the filedb tail up, load cached state from the store, then hand off to
//! the single writer loop while the flusher, NATS ingress, and gRPC
//! server run as independent background tasks feeding the same `inbox`.
//!
//! Flags (plain `--key=value` — no CLI-parsing dependency the rest of the
//! stack has no other use for):
//!   --coin=BTC            required, the coin this process owns
//!   --bind=host:port       required, this process's BankService gRPC address
//!   --app-config=PATH      default "config/app.yaml"
//!   --topology=PATH        default "config/topology.yaml"

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::{mpsc, RwLock};

use ccoms_core::bank::engine::BankState;
use ccoms_core::bank::service::BankServiceImpl;
use ccoms_core::bank::{flusher, ingress, BankEngine, BankMsg};
use ccoms_core::config::{AppConfig, ExchangeTopology};
use ccoms_core::config_watcher::config_watcher;
use ccoms_core::discovery::Discovery;
use ccoms_core::filedb::Filedb;
use ccoms_core::lastkv;
use ccoms_core::persistence::repository;
use ccoms_core::rpc::BankServiceServer;

struct Args {
    coin: String,
    bind: String,
    app_config: String,
    topology: String,
}

fn parse_args() -> Args {
    let mut coin = None;
    let mut bind = None;
    let mut app_config = "config/app.yaml".to_string();
    let mut topology = "config/topology.yaml".to_string();

    for arg in std::env::args().skip(1) {
        if let Some(v) = arg.strip_prefix("--coin=") {
            coin = Some(v.to_uppercase());
        } else if let Some(v) = arg.strip_prefix("--bind=") {
            bind = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--app-config=") {
            app_config = v.to_string();
        } else if let Some(v) = arg.strip_prefix("--topology=") {
            topology = v.to_string();
        }
    }

    Args {
        coin: coin.expect("missing required --coin=<COIN>"),
        bind: bind.expect("missing required --bind=<host:port>"),
        app_config,
        topology,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let app_config = AppConfig::load(&args.app_config).map_err(anyhow::Error::msg)?;
    let topology = ExchangeTopology::load(&args.topology).map_err(anyhow::Error::msg)?;

    let _log_guard = ccoms_core::logging::init_logging(&app_config);
    tracing::info!(target: "BANK", coin = %args.coin, "bank worker created");

    let name = format!("bank_{}", args.coin.to_lowercase());
    let filedb_path = app_config.filedb_path(&name);
    let filedb = Filedb::open(&filedb_path).await?;
    let mut engine = BankEngine::new(name.clone(), args.coin.clone(), filedb);
    engine.bootstrap_from_filedb().await?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&app_config.database_url)
        .await?;
    repository::ensure_bank_schema(&pool).await?;
    repository::ensure_balance_snaps_table(&pool, &args.coin).await?;

    let symbols: Vec<_> = topology
        .symbols_for_coin(&args.coin)
        .into_iter()
        .cloned()
        .collect();
    for s in &symbols {
        repository::ensure_ticket_tables(&pool, &s.symbol).await?;
    }

    tokio::spawn(flusher::run(pool.clone(), args.coin.clone(), filedb_path.clone()));

    // WaitForFiledb: block until the store's saved_log_id has caught the
    // filedb tail up to what was on disk at startup.
    let target_log_id = engine.log_id;
    loop {
        let saved = repository::load_saved_log_id(&pool, &name).await?;
        if saved >= target_log_id {
            tracing::info!(target: "BANK", saved, target_log_id, "WaitForFiledb done");
            break;
        }
        tracing::info!(target: "BANK", saved, target_log_id, "WaitForFiledb sleeping");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    engine.enter_loading_assets();
    let assets = repository::load_balances(&pool, &args.coin).await?;
    engine.load_assets(assets);
    for s in &symbols {
        for side in [ccoms_core::Side::Ask, ccoms_core::Side::Bid] {
            let side_str = if side == ccoms_core::Side::Ask { "ask" } else { "bid" };
            let id = repository::load_latest_ticket_id(&pool, &s.symbol, side_str).await?;
            engine.load_ticket_id(s.symbol.clone(), side, id);
        }
    }
    let lastkv_rows = repository::load_lastkv(&pool, &name).await?;
    if let Some(seq) = lastkv_rows.get(lastkv::KEY_NATS_SEQ) {
        engine.load_nats_seq(*seq as u64);
    }
    for s in &symbols {
        let key = lastkv::key_ome_reasonid(&s.symbol);
        if let Some(v) = lastkv_rows.get(&key) {
            let reason_table = format!("ome_{}_logs", s.symbol.to_lowercase());
            engine.load_ome_reason_id(reason_table, *v);
        }
    }
    tracing::info!(target: "BANK", "LoadAllAssets done");

    engine.enter_working();
    debug_assert_eq!(engine.state, BankState::Working);

    let (inbox_tx, mut inbox_rx) = mpsc::channel::<BankMsg>(4096);
    let (ack_tx, ack_rx) = mpsc::channel(1024);

    let discovery = Discovery::connect(&app_config.etcd_endpoints).await?;
    discovery
        .put(
            &ccoms_core::discovery::key_bank_service(&args.coin),
            &args.bind,
        )
        .await?;

    tokio::spawn(ingress::run_order_ingress(
        app_config.nats_url.clone(),
        args.coin.clone(),
        engine.latest_msg_seq + 1,
        inbox_tx.clone(),
        ack_tx,
    ));
    tokio::spawn(ingress::run_ack_batcher(ack_rx));

    let bank_service = BankServiceImpl::new(engine.filedb_path().to_path_buf(), inbox_tx.clone());
    let bind_addr: std::net::SocketAddr = args.bind.parse()?;
    tokio::spawn(async move {
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(BankServiceServer::new(bank_service))
            .serve(bind_addr)
            .await
        {
            tracing::error!(target: "BANK", error = %e, "grpc server exited");
        }
    });

    let topology = Arc::new(RwLock::new(topology));
    tokio::spawn(config_watcher(
        std::path::Path::new(&args.topology),
        topology.clone(),
        app_config.topology_reload_secs,
    ));

    // The single writer loop (HandleBankMsgs): every mutation to engine
    // state happens here, and only here.
    while let Some(msg) = inbox_rx.recv().await {
        let now_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        match msg {
            BankMsg::Order { seq, req } => {
                let topo = topology.read().await;
                let Some(entry) = topo.symbol(&req.symbol) else {
                    tracing::warn!(target: "BANK", symbol = %req.symbol, "order for unknown symbol dropped");
                    continue;
                };
                let (base_coin, quote_coin) = (entry.base_coin.clone(), entry.quote_coin.clone());
                drop(topo);
                match engine
                    .handle_order_req(seq, req, &base_coin, &quote_coin, now_ns)
                    .await
                {
                    Ok(_outcome) => {}
                    Err(e) => tracing::error!(target: "BANK", error = %e, "handle_order_req failed"),
                }
            }
            BankMsg::Balance(bc) => {
                if let Err(e) = engine.handle_balance_change(bc, now_ns).await {
                    tracing::error!(target: "BANK", error = %e, "handle_balance_change failed");
                }
            }
            BankMsg::ReasonCursorQuery { reason_table, reply } => {
                let _ = reply.send(engine.ome_reason_id(&reason_table));
            }
        }
    }

    Ok(())
}

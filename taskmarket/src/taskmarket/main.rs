use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use jsonrpsee::http_server::{HttpServerBuilder, HttpServerHandle, RpcModule};
use log::*;
use migration::Migrator;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::migrator::MigratorTrait;
use simplelog::*;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use taskmarket::chain::{is_valid_address, PaymentGateway, SolanaGateway};
use taskmarket::cli;
use taskmarket::config::*;
use taskmarket::market_rpc::rpc::{self, MarketImpl};
use taskmarket::payout::{DbLedger, PayoutLedger};
use taskmarket::repo::MarketRepo;
use taskmarket::resource::{DbResource, FileResource, ResourceRepo};
use taskmarket::service::Market;
use taskmarket::store::SqlStore;
use taskmarket::utils::{ensure_db_file, LogErr};
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main()]
async fn main() {
    let task_cmds = cli::task_cmds().await;
    let application_cmds = cli::application_cmds().await;
    let agent_cmds = cli::agent_cmds().await;
    let payout_cmds = cli::payout_cmds().await;
    let app_m = Command::new("taskmarket")
        .version("0.1.0")
        .args(&[
            Arg::new("url")
                .long("url")
                .env("TASKMARKET_URL")
                .global(true)
                .default_value("127.0.0.1:18888")
                .required(false)
                .help("specify url for provide service api service"),
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .env("TASKMARKET_LOG_LEVEL")
                .default_value("info")
                .help("set log level for application"),
            Arg::new("admin-password")
                .long("admin-password")
                .global(true)
                .env("TASKMARKET_ADMIN_PASSWORD")
                .hide_env_values(true)
                .takes_value(true)
                .help("password of the admin api, the daemon disables admin calls when empty"),
        ])
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("run daemon for provide service")
                .args(&[
                    Arg::new("db-dsn")
                        .long("db-dsn")
                        .env("TASKMARKET_DSN")
                        .default_value("sqlite://taskmarket.db")
                        .help("specify sqlite path or mysql dsn to store market data"),
                    Arg::new("debug-sql")
                        .long("debug-sql")
                        .env("TASKMARKET_DEBUG_SQL")
                        .required(false)
                        .action(ArgAction::SetTrue)
                        .help("print sql to debug"),
                    Arg::new("resource-type")
                        .long("resource-type")
                        .env("TASKMARKET_RESOURCE_TYPE")
                        .default_value("fs")
                        .help("where uploaded proof images are kept (db, fs)"),
                    Arg::new("fs-resource-path")
                        .long("fs-resource-path")
                        .env("TASKMARKET_FS_RESOURCE_PATH")
                        .default_value("proofs")
                        .help("when resource type is fs, directory of uploaded proof images"),
                    Arg::new("rpc-url")
                        .long("rpc-url")
                        .env("TASKMARKET_RPC_URL")
                        .default_value("https://api.devnet.solana.com")
                        .help("solana json-rpc endpoint"),
                    Arg::new("treasury-key")
                        .long("treasury-key")
                        .env("TASKMARKET_TREASURY_KEY")
                        .hide_env_values(true)
                        .required(true)
                        .help("keypair json file or base58 secret of the wallet paying rewards"),
                    Arg::new("registration-address")
                        .long("registration-address")
                        .env("TASKMARKET_REGISTRATION_ADDRESS")
                        .default_value("")
                        .help("address receiving agent registration fees, the treasury when empty"),
                    Arg::new("registration-fee")
                        .long("registration-fee")
                        .env("TASKMARKET_REGISTRATION_FEE")
                        .value_parser(value_parser!(f64))
                        .default_value("0.1")
                        .help("minimum registration payment in SOL"),
                    Arg::new("payment-timeout")
                        .long("payment-timeout")
                        .env("TASKMARKET_PAYMENT_TIMEOUT")
                        .default_value("60s")
                        .help("how long to wait for a payout to confirm before its outcome is unknown"),
                    Arg::new("max-upload-size")
                        .long("max-upload-size")
                        .env("TASKMARKET_MAX_UPLOAD_SIZE")
                        .value_parser(value_parser!(usize))
                        .default_value("5242880")
                        .help("largest accepted proof image in bytes"),
                ]),
        )
        .subcommand(task_cmds)
        .subcommand(application_cmds)
        .subcommand(agent_cmds)
        .subcommand(Command::new("stats").about("show market statistics"))
        .subcommand(payout_cmds)
        .get_matches();

    let exec_result: Result<()> = match app_m.subcommand() {
        Some(("run", ref sub_m)) => start_server(sub_m).await,
        Some(("task", ref sub_m)) => cli::tasks_command(sub_m).await,
        Some(("application", ref sub_m)) => cli::applications_command(sub_m).await,
        Some(("agent", ref sub_m)) => cli::agents_command(sub_m).await,
        Some(("stats", ref sub_m)) => cli::stats_command(sub_m).await,
        Some(("payout", ref sub_m)) => cli::payouts_command(sub_m).await,
        _ => Ok(()),
    };

    if let Err(e) = exec_result {
        println!("{:?}", e);
        std::process::exit(1);
    }
}

fn flag(sub_m: &ArgMatches, name: &str) -> Result<String> {
    sub_m
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow!("{} flag not found", name))
}

async fn start_server(sub_m: &&ArgMatches) -> Result<()> {
    let payment_timeout = duration_str::parse(flag(sub_m, "payment-timeout")?.as_str())
        .map_err(|e| anyhow!("invalid payment-timeout: {}", e))?;
    let registration_fee = *sub_m
        .get_one::<f64>("registration-fee")
        .ok_or_else(|| anyhow!("registration-fee flag not found"))?;
    let max_upload_size = *sub_m
        .get_one::<usize>("max-upload-size")
        .ok_or_else(|| anyhow!("max-upload-size flag not found"))?;
    let debug_sql = *sub_m
        .get_one::<bool>("debug-sql")
        .ok_or_else(|| anyhow!("debug-sql flag not found"))?;

    let market_cfg = MarketConfig::new(
        sub_m.get_one::<String>("admin-password").cloned().unwrap_or_default(),
        flag(sub_m, "registration-address")?,
        registration_fee,
        max_upload_size,
        payment_timeout,
    );
    let chain_cfg = ChainConfig {
        rpc_url: flag(sub_m, "rpc-url")?,
        treasury_key: flag(sub_m, "treasury-key")?,
        payment_timeout,
    };
    let mut cfg = ServiceConfig::new(
        flag(sub_m, "url")?,
        flag(sub_m, "db-dsn")?,
        debug_sql,
        flag(sub_m, "resource-type")?,
        flag(sub_m, "fs-resource-path")?,
        flag(sub_m, "log-level")?,
        market_cfg,
        chain_cfg,
    );

    let lv = LevelFilter::from_str(cfg.log_level.as_str())?;
    TermLogger::init(lv, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    let gateway = Arc::new(SolanaGateway::new(&cfg.chain)?);
    if cfg.market.registration_address.is_empty() {
        cfg.market.registration_address = gateway.treasury_address().to_string();
    }
    if !is_valid_address(&cfg.market.registration_address) {
        return Err(anyhow!(
            "invalid registration address {}",
            cfg.market.registration_address
        ));
    }
    if cfg.market.admin_password.is_empty() {
        warn!("no admin password configured, admin api is disabled");
    }
    info!(
        "registration fee {} SOL to {}",
        cfg.market.registration_fee, cfg.market.registration_address
    );

    ensure_db_file(&cfg.db_dsn).await?;
    let mut opt = ConnectOptions::new(cfg.db_dsn.clone());
    opt.max_connections(10)
        .min_connections(5)
        .sqlx_logging(cfg.debug_sql)
        .max_lifetime(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8));

    let db_conn = Database::connect(opt).await?;
    Migrator::up(&db_conn, None).await?;

    let repo = MarketRepo::new(Arc::new(SqlStore::new(db_conn.clone())));
    let ledger: Arc<dyn PayoutLedger + Send + Sync> = Arc::new(DbLedger::new(db_conn.clone()));
    let resource: Arc<dyn ResourceRepo + Send + Sync> = match cfg.resource.clone() {
        Resource::Db => Arc::new(DbResource::new(db_conn)),
        Resource::FS(path) => Arc::new(FileResource::new(path)),
    };
    let gateway: Arc<dyn PaymentGateway + Send + Sync> = gateway;
    let market = Arc::new(Market::new(repo, gateway, ledger, resource, cfg.market.clone()));

    market.reconcile_payouts().await.map(|_| ()).log_error();

    let rpc_module = rpc::register(market);
    let (server_addr, handle) = start_api(&cfg, rpc_module).await?;
    info!("starting listening {}", server_addr);

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sig_int.recv() => info!("receive SIGINT"),
        _ = sig_term.recv() => info!("receive SIGTERM"),
        _ = ctrl_c() => info!("receive Ctrl C"),
    }
    handle.stop()?;
    info!("Shutdown program");
    Ok(())
}

async fn start_api(cfg: &ServiceConfig, module: RpcModule<MarketImpl>) -> Result<(SocketAddr, HttpServerHandle)> {
    let server = HttpServerBuilder::default()
        .max_request_body_size(cfg.max_request_body_size())
        .build(cfg.url.parse::<SocketAddr>()?)?;

    let addr = server.local_addr()?;
    let server_handle = server.start(module)?;

    Ok((addr, server_handle))
}

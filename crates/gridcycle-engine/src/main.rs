/*
[INPUT]:  CLI arguments, environment configuration, OS shutdown signals
[OUTPUT]: Running bot pipelines or one-shot admin command results
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow or shutdown handling
*/

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use gridcycle_adapter::{BinanceClient, Credentials};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gridcycle_engine::{
    AdminCommands, AppConfig, BinanceConnector, Bot, BotPatch, BotSupervisor, Database,
    FilterTable,
};

#[derive(Parser, Debug)]
#[command(name = "gridcycle", version, about = "DCA grid-trading engine")]
struct Cli {
    /// Log filter; falls back to RUST_LOG, then the ENV default.
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine: install every active bot and trade until shutdown.
    Run,
    /// List all bots.
    ListBots,
    /// Show one bot.
    ShowBot {
        #[arg(long)]
        id: Uuid,
    },
    /// Create a bot (inactive until started).
    CreateBot(Box<CreateBotArgs>),
    /// Activate a bot and start trading it.
    StartBot {
        #[arg(long)]
        id: Uuid,
    },
    /// Deactivate a bot, cancelling its open orders and cycle.
    StopBot {
        #[arg(long)]
        id: Uuid,
    },
    /// Let the current cycle finish, then stop.
    StopAfterCycle {
        #[arg(long)]
        id: Uuid,
    },
    /// List a bot's cycles.
    Cycles {
        #[arg(long)]
        bot: Uuid,
    },
    /// List a cycle's orders.
    Orders {
        #[arg(long)]
        cycle: Uuid,
    },
    /// Realized profit of one cycle.
    Profit {
        #[arg(long)]
        bot: Uuid,
        #[arg(long)]
        cycle: Uuid,
    },
    /// Account balances over the fallback credentials.
    Balance {
        /// Comma-separated asset filter, e.g. BTC,USDT.
        #[arg(long, value_delimiter = ',')]
        assets: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct CreateBotArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    symbol: String,
    #[arg(long)]
    api_key: String,
    #[arg(long)]
    api_secret: String,
    /// Base capital in quote currency.
    #[arg(long)]
    amount: Decimal,
    /// Total depth of the buy ladder, percent.
    #[arg(long)]
    grid_length: Decimal,
    /// Offset below market for the top order, percent.
    #[arg(long)]
    first_order_offset: Decimal,
    #[arg(long)]
    num_orders: u32,
    /// Geometric growth of successive buy sizes, percent.
    #[arg(long)]
    next_order_volume: Decimal,
    /// Take-profit margin over average entry, percent.
    #[arg(long)]
    profit_percentage: Decimal,
    /// Upward move that triggers a re-grid, percent.
    #[arg(long)]
    price_change_percentage: Decimal,
    /// No grid is placed above this price.
    #[arg(long)]
    upper_price_limit: Option<Decimal>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let config = AppConfig::from_env().context("load configuration")?;
    init_tracing(args.log_level.as_deref(), &config)?;

    let store = Arc::new(
        Database::open(config.database_path())
            .map_err(|err| anyhow!("open database {}: {err}", config.database_path()))?,
    );

    let filters = FilterTable::with_defaults();
    let connector = Arc::new(BinanceConnector::new(config.exchange_testnet));
    let supervisor = Arc::new(BotSupervisor::new(
        store.clone(),
        filters.clone(),
        connector.clone(),
    ));
    let balance_client = fallback_client(&config)?;
    let admin = AdminCommands::new(store.clone(), filters, supervisor.clone(), connector, balance_client);

    match args.command {
        Command::Run => run_engine(store, supervisor, &config).await,
        Command::ListBots => {
            for bot in admin.list_bots()? {
                println!(
                    "{}  {:<20} {:<10} active={} status={}",
                    bot.id,
                    bot.name,
                    bot.symbol,
                    bot.is_active,
                    bot.status.as_str()
                );
            }
            Ok(())
        }
        Command::ShowBot { id } => {
            let bot = admin
                .get_bot(id)?
                .ok_or_else(|| anyhow!("bot {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&redacted(bot))?);
            Ok(())
        }
        Command::CreateBot(create) => {
            let bot = admin.create_bot(bot_from_args(*create))?;
            println!("created bot {}", bot.id);
            Ok(())
        }
        Command::StartBot { id } => {
            admin.start_bot(id).await?;
            println!("bot {id} started");
            Ok(())
        }
        Command::StopBot { id } => {
            admin.stop_bot(id).await?;
            println!("bot {id} stopped");
            Ok(())
        }
        Command::StopAfterCycle { id } => {
            admin.stop_after_cycle(id)?;
            println!("bot {id} will stop after its current cycle");
            Ok(())
        }
        Command::Cycles { bot } => {
            for cycle in admin.list_cycles(bot)? {
                println!(
                    "{}  {:<10} price={} quantity={} status={}",
                    cycle.id,
                    cycle.symbol,
                    cycle.price,
                    cycle.quantity,
                    cycle.status.as_str()
                );
            }
            Ok(())
        }
        Command::Orders { cycle } => {
            for order in admin.list_orders(cycle)? {
                println!(
                    "#{:<3} {:<4} {:<18} price={} qty={} filled={} status={}",
                    order.number,
                    order.side.as_str(),
                    order.exchange_order_id,
                    order.price,
                    order.quantity,
                    order.quantity_filled,
                    order.status.as_str()
                );
            }
            Ok(())
        }
        Command::Profit { bot, cycle } => {
            println!("{}", admin.cycle_profit(bot, cycle)?);
            Ok(())
        }
        Command::Balance { assets } => {
            for balance in admin.balance(&assets).await? {
                println!("{:<8} free={} locked={}", balance.asset, balance.free, balance.locked);
            }
            Ok(())
        }
    }
}

async fn run_engine(
    store: Arc<Database>,
    supervisor: Arc<BotSupervisor>,
    config: &AppConfig,
) -> Result<()> {
    info!(
        database = %config.database_path(),
        testnet = config.exchange_testnet,
        "starting gridcycle engine"
    );

    let bots = store.active_bots()?;
    info!(bot_count = bots.len(), "installing active bots");
    supervisor.install_bots(bots).await;

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    shutdown.cancelled().await;
    info!("shutdown signal received");

    supervisor.release_all().await;
    info!("all bots released");
    Ok(())
}

fn init_tracing(flag: Option<&str>, config: &AppConfig) -> Result<()> {
    let directive = flag
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| config.default_log_filter().to_string());

    let filter = EnvFilter::try_new(directive).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn fallback_client(config: &AppConfig) -> Result<Option<Arc<BinanceClient>>> {
    if config.exchange_api_key.is_empty() || config.exchange_api_secret.is_empty() {
        return Ok(None);
    }

    let credentials = Credentials {
        api_key: config.exchange_api_key.clone(),
        api_secret: config.exchange_api_secret.clone(),
    };
    let client = BinanceClient::new(credentials, config.exchange_testnet)
        .context("build fallback exchange client")?;
    Ok(Some(Arc::new(client)))
}

fn bot_from_args(args: CreateBotArgs) -> Bot {
    let mut bot = Bot::new(args.name, args.symbol);
    bot.api_key = args.api_key;
    bot.api_secret = args.api_secret;
    bot.amount = args.amount;
    bot.grid_length = args.grid_length;
    bot.first_order_offset = args.first_order_offset;
    bot.num_orders = args.num_orders;
    bot.next_order_volume = args.next_order_volume;
    bot.profit_percentage = args.profit_percentage;
    bot.price_change_percentage = args.price_change_percentage;
    bot.upper_price_limit = args.upper_price_limit;
    bot
}

/// Bot view safe to print: credentials are blanked.
fn redacted(mut bot: Bot) -> Bot {
    bot.api_key = "<redacted>".to_string();
    bot.api_secret = "<redacted>".to_string();
    bot
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}

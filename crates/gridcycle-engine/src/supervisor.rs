/*
[INPUT]:  Active bots from the store, a connector producing per-bot gateways
[OUTPUT]: One running pipeline (gateway + state machine + router) per bot
[POS]:    Supervision layer - bot lifecycle fan-out
[UPDATE]: When install/release guarantees or connector wiring change
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridcycle_adapter::{BinanceClient, BinanceStreams, Credentials, StreamMessage};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::EventRouter;
use crate::gateway::ExchangeGateway;
use crate::grid::FilterTable;
use crate::model::Bot;
use crate::store::Database;
use crate::trading::TradingService;

const RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one bot needs to talk to its venue.
pub struct BotConnection {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub listen_key: String,
    pub user_stream: mpsc::Receiver<StreamMessage>,
    pub ticker_stream: mpsc::Receiver<StreamMessage>,
}

/// Builds per-bot venue connections. The production implementation talks to
/// the exchange; tests inject in-memory doubles.
#[async_trait]
pub trait BotConnector: Send + Sync {
    async fn connect(&self, bot: &Bot, shutdown: CancellationToken) -> Result<BotConnection>;

    /// A bare gateway for one-off REST calls (admin stop of a bot that is
    /// not running in this process), without streams or listen key.
    async fn gateway(&self, bot: &Bot) -> Result<Arc<dyn ExchangeGateway>>;
}

/// Connects bots to Binance spot with their own credentials, listen key and
/// stream subscriptions. Nothing is shared between bots.
pub struct BinanceConnector {
    testnet: bool,
}

impl BinanceConnector {
    pub fn new(testnet: bool) -> Self {
        Self { testnet }
    }
}

#[async_trait]
impl BotConnector for BinanceConnector {
    async fn connect(&self, bot: &Bot, shutdown: CancellationToken) -> Result<BotConnection> {
        let credentials = Credentials {
            api_key: bot.api_key.clone(),
            api_secret: bot.api_secret.clone(),
        };
        let client = Arc::new(BinanceClient::new(credentials, self.testnet)?);

        let listen_key = client.new_listen_key().await?;

        let streams = BinanceStreams::new(self.testnet);
        let user_stream = streams.user_data_stream(&listen_key, shutdown.clone());
        let ticker_stream = streams.ticker_stream(std::slice::from_ref(&bot.symbol), shutdown);

        Ok(BotConnection {
            gateway: client,
            listen_key,
            user_stream,
            ticker_stream,
        })
    }

    async fn gateway(&self, bot: &Bot) -> Result<Arc<dyn ExchangeGateway>> {
        let credentials = Credentials {
            api_key: bot.api_key.clone(),
            api_secret: bot.api_secret.clone(),
        };
        Ok(Arc::new(BinanceClient::new(credentials, self.testnet)?))
    }
}

struct BotHandle {
    service: Arc<Mutex<TradingService>>,
    shutdown: CancellationToken,
    router: JoinHandle<()>,
}

/// Owns the set of running bots and their pipelines. One bot's failure never
/// touches another's.
pub struct BotSupervisor {
    store: Arc<Database>,
    filters: FilterTable,
    connector: Arc<dyn BotConnector>,
    bots: Mutex<HashMap<Uuid, BotHandle>>,
}

impl BotSupervisor {
    pub fn new(store: Arc<Database>, filters: FilterTable, connector: Arc<dyn BotConnector>) -> Self {
        Self {
            store,
            filters,
            connector,
            bots: Mutex::new(HashMap::new()),
        }
    }

    /// Install every active bot concurrently. Per-bot failures are logged
    /// and isolated.
    pub async fn install_bots(&self, bots: Vec<Bot>) {
        let installs = bots
            .into_iter()
            .filter(|bot| bot.is_active)
            .map(|bot| async move {
                let bot_id = bot.id;
                let name = bot.name.clone();
                if let Err(err) = self.install(bot).await {
                    error!(bot_id = %bot_id, bot = %name, error = %err, "bot install failed");
                }
            });
        futures_util::future::join_all(installs).await;
    }

    /// Install one bot: build its gateway, launch the state machine, start
    /// the router. Installing an already-running bot is a no-op.
    pub async fn install(&self, bot: Bot) -> Result<()> {
        if !bot.is_active {
            return Ok(());
        }

        if self.bots.lock().await.contains_key(&bot.id) {
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let connection = self.connector.connect(&bot, shutdown.clone()).await?;

        let mut service = TradingService::new(
            self.store.clone(),
            connection.gateway.clone(),
            self.filters.clone(),
            bot.clone(),
        )?;
        service.launch().await?;

        let service = Arc::new(Mutex::new(service));
        let router = EventRouter::new(
            bot.id,
            bot.symbol.clone(),
            service.clone(),
            connection.gateway,
            connection.listen_key,
            shutdown.clone(),
        );
        let router = router.spawn(connection.user_stream, connection.ticker_stream);

        let mut bots = self.bots.lock().await;
        if bots.contains_key(&bot.id) {
            // Lost an install race; tear down the duplicate pipeline.
            shutdown.cancel();
            router.abort();
            return Ok(());
        }

        bots.insert(
            bot.id,
            BotHandle {
                service,
                shutdown,
                router,
            },
        );

        info!(bot_id = %bot.id, bot = %bot.name, symbol = %bot.symbol, "bot installed");
        Ok(())
    }

    /// The running state machine for a bot, when installed.
    pub async fn service(&self, bot_id: Uuid) -> Option<Arc<Mutex<TradingService>>> {
        self.bots.lock().await.get(&bot_id).map(|handle| handle.service.clone())
    }

    pub async fn is_installed(&self, bot_id: Uuid) -> bool {
        self.bots.lock().await.contains_key(&bot_id)
    }

    pub async fn active_count(&self) -> usize {
        self.bots.lock().await.len()
    }

    /// Stop a bot's pipeline. Exchange-side orders are left intact so a
    /// later launch can reconcile them.
    pub async fn release(&self, bot_id: Uuid) -> bool {
        let Some(mut handle) = self.bots.lock().await.remove(&bot_id) else {
            return false;
        };

        handle.shutdown.cancel();
        match tokio::time::timeout(RELEASE_TIMEOUT, &mut handle.router).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                warn!(bot_id = %bot_id, error = %join_err, "router join failed");
            }
            Err(_) => {
                warn!(bot_id = %bot_id, "router did not stop in time, aborting");
                handle.router.abort();
            }
        }

        info!(bot_id = %bot_id, "bot released");
        true
    }

    /// Release every running bot.
    pub async fn release_all(&self) {
        let ids: Vec<Uuid> = self.bots.lock().await.keys().copied().collect();
        for bot_id in ids {
            self.release(bot_id).await;
        }
    }
}

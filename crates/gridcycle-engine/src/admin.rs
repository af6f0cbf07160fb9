/*
[INPUT]:  External control requests (CLI or any future HTTP adaptor)
[OUTPUT]: Store mutations and supervisor operations
[POS]:    Control layer - thin adaptor over supervisor and state machine
[UPDATE]: When adding admin operations or changing start/stop semantics
*/

use std::sync::Arc;

use gridcycle_adapter::{AssetBalance, BinanceClient};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::grid::FilterTable;
use crate::model::{Bot, BotStatus, CycleProfit, Order, TradingCycle, cycle_profit};
use crate::store::Database;
use crate::supervisor::{BotConnector, BotSupervisor};
use crate::trading::TradingService;

/// Partial bot reconfiguration. `is_active` and `status` are deliberately
/// absent; lifecycle changes go through start/stop.
#[derive(Debug, Default, Clone)]
pub struct BotPatch {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub amount: Option<Decimal>,
    pub grid_length: Option<Decimal>,
    pub first_order_offset: Option<Decimal>,
    pub num_orders: Option<u32>,
    pub next_order_volume: Option<Decimal>,
    pub profit_percentage: Option<Decimal>,
    pub price_change_percentage: Option<Decimal>,
    pub upper_price_limit: Option<Decimal>,
}

/// Administrative operations over bots, cycles and orders.
pub struct AdminCommands {
    store: Arc<Database>,
    filters: FilterTable,
    supervisor: Arc<BotSupervisor>,
    connector: Arc<dyn BotConnector>,
    /// Fallback client for the balance view; bots carry their own keys.
    balance_client: Option<Arc<BinanceClient>>,
}

impl AdminCommands {
    pub fn new(
        store: Arc<Database>,
        filters: FilterTable,
        supervisor: Arc<BotSupervisor>,
        connector: Arc<dyn BotConnector>,
        balance_client: Option<Arc<BinanceClient>>,
    ) -> Self {
        Self {
            store,
            filters,
            supervisor,
            connector,
            balance_client,
        }
    }

    /// Persist a new bot, always inactive until explicitly started.
    pub fn create_bot(&self, mut bot: Bot) -> Result<Bot> {
        bot.validate().map_err(EngineError::Validation)?;
        bot.is_active = false;
        bot.status = BotStatus::Stopped;
        self.store.create_bot(&bot)?;
        info!(bot_id = %bot.id, bot = %bot.name, "bot created");
        Ok(bot)
    }

    /// Patch configuration. Never touches the lifecycle flags.
    pub fn update_bot(&self, id: Uuid, patch: BotPatch) -> Result<Bot> {
        let mut bot = self.require_bot(id)?;

        if let Some(name) = patch.name {
            bot.name = name;
        }
        if let Some(symbol) = patch.symbol {
            bot.symbol = symbol;
        }
        if let Some(api_key) = patch.api_key {
            bot.api_key = api_key;
        }
        if let Some(api_secret) = patch.api_secret {
            bot.api_secret = api_secret;
        }
        if let Some(amount) = patch.amount {
            bot.amount = amount;
        }
        if let Some(grid_length) = patch.grid_length {
            bot.grid_length = grid_length;
        }
        if let Some(first_order_offset) = patch.first_order_offset {
            bot.first_order_offset = first_order_offset;
        }
        if let Some(num_orders) = patch.num_orders {
            bot.num_orders = num_orders;
        }
        if let Some(next_order_volume) = patch.next_order_volume {
            bot.next_order_volume = next_order_volume;
        }
        if let Some(profit_percentage) = patch.profit_percentage {
            bot.profit_percentage = profit_percentage;
        }
        if let Some(price_change_percentage) = patch.price_change_percentage {
            bot.price_change_percentage = price_change_percentage;
        }
        if let Some(upper_price_limit) = patch.upper_price_limit {
            bot.upper_price_limit = Some(upper_price_limit);
        }

        bot.validate().map_err(EngineError::Validation)?;
        self.store.update_bot(&bot)?;
        Ok(bot)
    }

    /// Activate a bot and hand it to the supervisor.
    pub async fn start_bot(&self, id: Uuid) -> Result<Bot> {
        let mut bot = self.require_bot(id)?;
        bot.is_active = true;
        bot.status = BotStatus::Running;
        self.store.update_bot(&bot)?;

        self.supervisor.install(bot.clone()).await?;
        info!(bot_id = %bot.id, bot = %bot.name, "bot started");
        Ok(bot)
    }

    /// Let the current cycle finish, then stop.
    pub fn stop_after_cycle(&self, id: Uuid) -> Result<Bot> {
        let mut bot = self.require_bot(id)?;
        bot.status = BotStatus::LastCycle;
        self.store.update_bot(&bot)?;
        info!(bot_id = %bot.id, bot = %bot.name, "bot will stop after current cycle");
        Ok(bot)
    }

    /// Deactivate a bot: cancel its NEW orders, cancel the cycle, release
    /// the pipeline.
    pub async fn stop_bot(&self, id: Uuid) -> Result<()> {
        let bot = self.require_bot(id)?;

        if let Some(service) = self.supervisor.service(id).await {
            service.lock().await.stop().await?;
            self.supervisor.release(id).await;
            return Ok(());
        }

        // Not running in this process; go through a one-off gateway so the
        // exchange-side orders still get cancelled.
        if self.store.active_cycle(id)?.is_some() {
            let gateway = self.connector.gateway(&bot).await?;
            let mut service =
                TradingService::new(self.store.clone(), gateway, self.filters.clone(), bot)?;
            service.stop().await?;
        } else {
            let mut bot = bot;
            bot.is_active = false;
            bot.status = BotStatus::Stopped;
            self.store.update_bot(&bot)?;
        }

        info!(bot_id = %id, "bot stopped");
        Ok(())
    }

    pub fn list_bots(&self) -> Result<Vec<Bot>> {
        self.store.list_bots()
    }

    pub fn get_bot(&self, id: Uuid) -> Result<Option<Bot>> {
        self.store.get_bot(id)
    }

    pub fn list_cycles(&self, bot_id: Uuid) -> Result<Vec<TradingCycle>> {
        self.store.cycles_by_bot(bot_id)
    }

    pub fn list_orders(&self, cycle_id: Uuid) -> Result<Vec<Order>> {
        self.store.orders_by_cycle(cycle_id)
    }

    /// Realized profit for one cycle.
    pub fn cycle_profit(&self, bot_id: Uuid, cycle_id: Uuid) -> Result<CycleProfit> {
        let cycle = self
            .store
            .cycles_by_bot(bot_id)?
            .into_iter()
            .find(|cycle| cycle.id == cycle_id)
            .ok_or_else(|| EngineError::Invariant(format!("cycle {cycle_id} not found")))?;
        let orders = self.store.orders_by_cycle(cycle_id)?;
        Ok(cycle_profit(&cycle, &orders))
    }

    /// Balance view over the fallback credentials.
    pub async fn balance(&self, assets: &[String]) -> Result<Vec<AssetBalance>> {
        let client = self.balance_client.as_ref().ok_or_else(|| {
            EngineError::Validation("no fallback exchange credentials configured".to_string())
        })?;
        Ok(client.account_balances(assets).await?)
    }

    fn require_bot(&self, id: Uuid) -> Result<Bot> {
        self.store
            .get_bot(id)?
            .ok_or_else(|| EngineError::Invariant(format!("bot {id} not found")))
    }
}

/*
[INPUT]:  One bot, its exchange gateway, the store and the symbol filters
[OUTPUT]: A trading cycle kept in sync with exchange fills and ticker drift
[POS]:    Strategy layer - per-bot trading state machine
[UPDATE]: When cycle lifecycle, take-profit or re-grid semantics change
*/

use std::sync::Arc;

use gridcycle_adapter::{ExecutionReport, OrderStatus, OrderType, Side, TimeInForce};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::gateway::ExchangeGateway;
use crate::grid::{self, FilterTable, SymbolFilters};
use crate::model::{Bot, BotStatus, CycleStatus, Order, TradingCycle};
use crate::store::Database;

/// Per-bot trading state machine.
///
/// Owns the bot's one ACTIVE cycle (or none). All operations are serialized
/// by the caller through a per-bot mutex; nothing here is re-entrant.
pub struct TradingService {
    store: Arc<Database>,
    gateway: Arc<dyn ExchangeGateway>,
    filters: FilterTable,
    bot: Bot,
    cycle: Option<TradingCycle>,
}

impl TradingService {
    /// Bind a bot to its gateway and lazily pick up the ACTIVE cycle.
    pub fn new(
        store: Arc<Database>,
        gateway: Arc<dyn ExchangeGateway>,
        filters: FilterTable,
        bot: Bot,
    ) -> Result<Self> {
        let cycle = store.active_cycle(bot.id)?;
        Ok(Self {
            store,
            gateway,
            filters,
            bot,
            cycle,
        })
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn cycle(&self) -> Option<&TradingCycle> {
        self.cycle.as_ref()
    }

    /// Idempotent startup: resume the ACTIVE cycle after reconciling it with
    /// the exchange, or start a fresh one.
    pub async fn launch(&mut self) -> Result<()> {
        if !self.bot.is_active {
            return Ok(());
        }

        if let Some(cycle) = &self.cycle {
            let cycle_id = cycle.id;
            info!(bot_id = %self.bot.id, cycle_id = %cycle_id, "resuming active cycle");
            self.reconcile_open_orders().await?;

            // A crash between cycle insert and first placement leaves an
            // ACTIVE cycle with no orders; re-issue the grid.
            if self.store.orders_by_cycle(cycle_id)?.is_empty() {
                self.place_grid().await?;
            }
        } else {
            self.start_new_cycle().await?;
        }

        Ok(())
    }

    /// Exchange reported an order state change.
    pub async fn on_execution_report(
        &mut self,
        report: &ExecutionReport,
        raw: serde_json::Value,
    ) -> Result<()> {
        let Some(cycle) = &self.cycle else {
            return Ok(());
        };

        let Some(mut order) = self.store.order_by_exchange_id(cycle.id, report.order_id)? else {
            debug!(
                bot_id = %self.bot.id,
                order_id = report.order_id,
                "execution report for unknown order, ignoring"
            );
            return Ok(());
        };

        if !matches!(
            report.status,
            OrderStatus::PartiallyFilled | OrderStatus::Filled
        ) {
            return Ok(());
        }

        order.status = report.status;
        // Cumulative fills never go backwards.
        order.quantity_filled = order.quantity_filled.max(report.cumulative_filled_qty);
        order.exchange_order_data = Some(raw);
        self.store.update_order(&order)?;

        info!(
            bot_id = %self.bot.id,
            cycle_id = %order.cycle_id,
            order_id = order.exchange_order_id,
            side = order.side.as_str(),
            status = order.status.as_str(),
            filled = %order.quantity_filled,
            "order update"
        );

        match order.side {
            Side::Buy => self.update_take_profit().await,
            Side::Sell if report.status == OrderStatus::Filled => {
                self.check_cycle_completion().await
            }
            Side::Sell => Ok(()),
        }
    }

    /// Ticker tick: retry a missing grid, or re-grid on upward drift.
    pub async fn on_ticker(&mut self, current_price: Decimal) -> Result<()> {
        let Some(cycle) = &self.cycle else {
            return Ok(());
        };

        let orders = self.store.orders_by_cycle(cycle.id)?;

        // A cycle without orders (placement skipped or aborted) retries on
        // the next tick rather than waiting for a relaunch.
        if orders.is_empty() {
            return self.place_grid().await;
        }

        if cycle.price.is_zero() {
            return Ok(());
        }

        let drift_pct = (current_price - cycle.price) / cycle.price * Decimal::ONE_HUNDRED;
        if drift_pct < cycle.price_change_percentage {
            return Ok(());
        }

        // A partial fill has committed capital; re-gridding would orphan it.
        if orders.iter().any(|order| order.status != OrderStatus::New) {
            debug!(
                bot_id = %self.bot.id,
                cycle_id = %cycle.id,
                drift = %drift_pct,
                "drift trigger ignored, cycle has non-NEW orders"
            );
            return Ok(());
        }

        info!(
            bot_id = %self.bot.id,
            cycle_id = %cycle.id,
            old_price = %cycle.price,
            new_price = %current_price,
            drift = %drift_pct,
            "re-gridding on upward drift"
        );

        if let Some(cycle) = &mut self.cycle {
            cycle.price = current_price;
            self.store.update_cycle(cycle)?;
        }

        self.cancel_cycle_orders().await?;
        self.place_grid().await
    }

    /// Cancel every NEW order in the current cycle. Logs and proceeds on
    /// individual failures; never raises.
    pub async fn cancel_cycle_orders(&mut self) -> Result<()> {
        let Some(cycle) = &self.cycle else {
            return Ok(());
        };

        let open = self
            .store
            .orders_by_cycle_and_statuses(cycle.id, &[OrderStatus::New])?;

        for mut order in open {
            match self
                .gateway
                .cancel_order(&order.symbol, order.exchange_order_id)
                .await
            {
                Ok(Some(ack)) => {
                    order.quantity_filled = order.quantity_filled.max(ack.executed_qty);
                    order.status = OrderStatus::Canceled;
                    self.store.update_order(&order)?;
                }
                Ok(None) => {
                    // Venue already considers it terminal.
                    order.status = OrderStatus::Canceled;
                    self.store.update_order(&order)?;
                }
                Err(err) => {
                    warn!(
                        bot_id = %self.bot.id,
                        order_id = order.exchange_order_id,
                        error = %err,
                        "failed to cancel order"
                    );
                }
            }
        }

        Ok(())
    }

    /// Cancel outstanding orders and close the cycle; used by admin stop.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel_cycle_orders().await?;

        if let Some(mut cycle) = self.cycle.take() {
            cycle.status = CycleStatus::Cancelled;
            self.store.update_cycle(&cycle)?;
            info!(bot_id = %self.bot.id, cycle_id = %cycle.id, "cycle cancelled");
        }

        self.bot.is_active = false;
        self.bot.status = BotStatus::Stopped;
        self.store.update_bot(&self.bot)?;
        Ok(())
    }

    /// Stop this bot without touching exchange-side orders; used when a
    /// fatal error kills the pipeline so a later launch can reconcile.
    pub fn halt(&mut self) -> Result<()> {
        self.bot.is_active = false;
        self.bot.status = BotStatus::Stopped;
        self.store.update_bot(&self.bot)
    }

    async fn start_new_cycle(&mut self) -> Result<()> {
        if self.store.active_cycle(self.bot.id)?.is_some() {
            return Err(EngineError::Invariant(format!(
                "bot {} already has an active cycle",
                self.bot.name
            )));
        }

        let market_price = self.gateway.ticker_price(&self.bot.symbol).await?;
        let cycle = TradingCycle::from_bot(&self.bot, market_price);
        self.store.insert_cycle(&cycle)?;

        info!(
            bot_id = %self.bot.id,
            cycle_id = %cycle.id,
            price = %market_price,
            "new cycle started"
        );

        self.cycle = Some(cycle);
        self.place_grid().await
    }

    /// Build and place the buy ladder at the current market price.
    ///
    /// On a Validation rejection placement aborts; whatever was placed stays
    /// and the cycle remains ACTIVE with fewer orders.
    async fn place_grid(&mut self) -> Result<()> {
        let Some(cycle) = self.cycle.clone() else {
            return Err(EngineError::Invariant("no active cycle to place grid for".to_string()));
        };

        let filters = self.filters.get(&cycle.symbol)?;
        let market_price = self.gateway.ticker_price(&cycle.symbol).await?;

        if let Some(limit) = self.bot.upper_price_limit
            && market_price > limit
        {
            warn!(
                bot_id = %self.bot.id,
                cycle_id = %cycle.id,
                price = %market_price,
                limit = %limit,
                "market above upper price limit, grid not placed"
            );
            return Ok(());
        }

        let existing = self.store.orders_by_cycle(cycle.id)?;
        let spent: Decimal = existing
            .iter()
            .filter(|order| order.side == Side::Buy)
            .map(|order| order.price * order.quantity_filled)
            .sum();
        let budget = cycle.amount - spent;

        let prices = grid::grid_prices(
            market_price,
            cycle.first_order_offset,
            cycle.grid_length,
            cycle.num_orders,
        );
        let quantities = grid::grid_quantities(&prices, budget, cycle.next_order_volume)?;

        let mut placed = Vec::new();
        let mut placement_error = None;

        for (i, (price, quantity)) in prices.iter().zip(quantities).enumerate() {
            let price = filters.round_price(*price);
            let quantity = filters.quantize_qty(quantity);

            match self
                .submit_order(&cycle, Side::Buy, price, quantity, (i + 1) as u32, &filters)
                .await
            {
                Ok(order) => placed.push(order),
                Err(err) => {
                    warn!(
                        bot_id = %self.bot.id,
                        cycle_id = %cycle.id,
                        number = i + 1,
                        error = %err,
                        "grid placement aborted"
                    );
                    placement_error = Some(err);
                    break;
                }
            }
        }

        // The committed quantity is the sum over the NEW buy ladder.
        let committed: Decimal = existing
            .iter()
            .filter(|order| order.side == Side::Buy && order.status == OrderStatus::New)
            .map(|order| order.quantity)
            .chain(placed.iter().map(|order| order.quantity))
            .sum();

        if let Some(cycle) = &mut self.cycle {
            cycle.price = market_price;
            cycle.quantity = committed;
            self.store.insert_grid_orders(cycle, &placed)?;
        }

        info!(
            bot_id = %self.bot.id,
            cycle_id = %cycle.id,
            orders = placed.len(),
            quantity = %committed,
            price = %market_price,
            "grid placed"
        );

        match placement_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Regenerate the aggregate take-profit after a buy fill.
    async fn update_take_profit(&mut self) -> Result<()> {
        self.refresh_take_profit(true).await
    }

    /// Cancel-and-replace the take-profit order.
    ///
    /// With `force` false (reconcile path) an up-to-date TP is left alone so
    /// repeated launches converge instead of churning order rows.
    async fn refresh_take_profit(&mut self, force: bool) -> Result<()> {
        let Some(cycle) = self.cycle.clone() else {
            return Ok(());
        };
        let filters = self.filters.get(&cycle.symbol)?;

        let orders = self.store.orders_by_cycle(cycle.id)?;

        let filled_buys: Vec<&Order> = orders
            .iter()
            .filter(|order| order.side == Side::Buy && order.quantity_filled > Decimal::ZERO)
            .collect();
        if filled_buys.is_empty() {
            return Ok(());
        }

        let filled_qty: Decimal = filled_buys.iter().map(|order| order.quantity_filled).sum();
        let cost: Decimal = filled_buys
            .iter()
            .map(|order| order.price * order.quantity_filled)
            .sum();
        let average_entry = cost / filled_qty;

        let sell_filled: Decimal = orders
            .iter()
            .filter(|order| order.side == Side::Sell)
            .map(|order| order.quantity_filled)
            .sum();

        let target_price =
            filters.round_price(grid::take_profit_price(average_entry, cycle.profit_percentage));
        let target_qty = filters.quantize_qty(filled_qty - sell_filled);

        if target_qty <= Decimal::ZERO {
            debug!(bot_id = %self.bot.id, cycle_id = %cycle.id, "nothing left to take profit on");
            return Ok(());
        }

        let active_tps: Vec<Order> = orders
            .iter()
            .filter(|order| order.side == Side::Sell && order.status.is_open())
            .cloned()
            .collect();

        if !force
            && let Some(tp) = active_tps.first()
            && tp.price == target_price
            && tp.quantity == target_qty
        {
            return Ok(());
        }

        // Cancel before replace, so at most one TP ever rests on the book.
        for mut tp in active_tps {
            match self.gateway.cancel_order(&tp.symbol, tp.exchange_order_id).await {
                Ok(Some(ack)) => {
                    tp.quantity_filled = tp.quantity_filled.max(ack.executed_qty);
                    tp.status = OrderStatus::Canceled;
                    self.store.update_order(&tp)?;
                }
                Ok(None) => {
                    tp.status = OrderStatus::Canceled;
                    self.store.update_order(&tp)?;
                }
                Err(err) => {
                    warn!(
                        bot_id = %self.bot.id,
                        order_id = tp.exchange_order_id,
                        error = %err,
                        "failed to cancel take-profit"
                    );
                    return Err(err);
                }
            }
        }

        let number = filled_buys.len() as u32 + 1;
        let order = self
            .submit_order(&cycle, Side::Sell, target_price, target_qty, number, &filters)
            .await?;
        self.store.insert_order(&order)?;

        info!(
            bot_id = %self.bot.id,
            cycle_id = %cycle.id,
            order_id = order.exchange_order_id,
            price = %target_price,
            quantity = %target_qty,
            "take-profit placed"
        );

        Ok(())
    }

    /// Close the cycle when the take-profit has sold the whole position.
    async fn check_cycle_completion(&mut self) -> Result<()> {
        let Some(cycle) = self.cycle.clone() else {
            return Ok(());
        };

        let orders = self.store.orders_by_cycle(cycle.id)?;
        let sell_filled: Decimal = orders
            .iter()
            .filter(|order| order.side == Side::Sell)
            .map(|order| order.quantity_filled)
            .sum();

        if sell_filled != cycle.quantity {
            warn!(
                bot_id = %self.bot.id,
                cycle_id = %cycle.id,
                sold = %sell_filled,
                committed = %cycle.quantity,
                "sell fill does not close the cycle yet"
            );
            return Ok(());
        }

        let mut completed = cycle;
        completed.status = CycleStatus::Completed;
        self.store.update_cycle(&completed)?;
        self.cycle = None;

        info!(bot_id = %self.bot.id, cycle_id = %completed.id, "cycle completed");

        if self.bot.status == BotStatus::LastCycle {
            self.bot.is_active = false;
            self.bot.status = BotStatus::Stopped;
            self.store.update_bot(&self.bot)?;
            info!(bot_id = %self.bot.id, "last cycle finished, bot stopped");
            return Ok(());
        }

        if self.bot.is_active {
            self.start_new_cycle().await?;
        }

        Ok(())
    }

    /// Bring every non-terminal persisted order up to date with the
    /// exchange, then repair derived state (completion or a stale TP).
    pub async fn reconcile_open_orders(&mut self) -> Result<()> {
        let Some(cycle) = self.cycle.clone() else {
            return Ok(());
        };

        let open = self.store.orders_by_cycle_and_statuses(
            cycle.id,
            &[OrderStatus::New, OrderStatus::PartiallyFilled],
        )?;

        for mut order in open {
            match self
                .gateway
                .get_order(&order.symbol, order.exchange_order_id)
                .await
            {
                Ok(Some(snapshot)) => {
                    if snapshot.status != order.status
                        || snapshot.executed_qty != order.quantity_filled
                    {
                        order.status = snapshot.status;
                        order.quantity_filled = order.quantity_filled.max(snapshot.executed_qty);
                        order.exchange_order_data = Some(snapshot.raw);
                        self.store.update_order(&order)?;
                        debug!(
                            bot_id = %self.bot.id,
                            order_id = order.exchange_order_id,
                            status = order.status.as_str(),
                            "order reconciled"
                        );
                    }
                }
                Ok(None) => {
                    // The venue forgot the order entirely; close it out.
                    order.status = OrderStatus::Canceled;
                    self.store.update_order(&order)?;
                    warn!(
                        bot_id = %self.bot.id,
                        order_id = order.exchange_order_id,
                        "order unknown on exchange, marked canceled"
                    );
                }
                Err(err) => {
                    warn!(
                        bot_id = %self.bot.id,
                        order_id = order.exchange_order_id,
                        error = %err,
                        "failed to query order"
                    );
                }
            }
        }

        // A SELL that filled while we were offline completes the cycle; any
        // buy fills otherwise need the TP brought up to date.
        let orders = self.store.orders_by_cycle(cycle.id)?;
        let sell_filled: Decimal = orders
            .iter()
            .filter(|order| order.side == Side::Sell)
            .map(|order| order.quantity_filled)
            .sum();

        if !sell_filled.is_zero() && sell_filled == cycle.quantity {
            return self.check_cycle_completion().await;
        }

        self.refresh_take_profit(false).await
    }

    async fn submit_order(
        &self,
        cycle: &TradingCycle,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        number: u32,
        filters: &SymbolFilters,
    ) -> Result<Order> {
        let notional = price * quantity;
        if notional < filters.min_notional {
            return Err(EngineError::Validation(format!(
                "order notional {notional} below minimum {}",
                filters.min_notional
            )));
        }

        let ack = self
            .gateway
            .place_limit_order(&cycle.symbol, side, quantity, price)
            .await?;

        let now = chrono::Utc::now();
        Ok(Order {
            id: Uuid::new_v4(),
            cycle_id: cycle.id,
            exchange: cycle.exchange.clone(),
            symbol: cycle.symbol.clone(),
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            price,
            quantity,
            quantity_filled: ack.executed_qty,
            amount: notional,
            status: ack.status,
            number,
            exchange_order_id: ack.order_id,
            exchange_order_data: Some(ack.raw),
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;

    use crate::gateway::{CancelledOrder, OrderSnapshot, PlacedOrder};

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    #[derive(Debug, Clone)]
    struct MockOrder {
        side: Side,
        price: Decimal,
        quantity: Decimal,
        status: OrderStatus,
        executed_qty: Decimal,
    }

    /// In-memory gateway double: every placed order rests as NEW until the
    /// test moves it.
    #[derive(Debug)]
    struct MockGateway {
        price: Mutex<Decimal>,
        next_order_id: AtomicI64,
        orders: Mutex<HashMap<i64, MockOrder>>,
        cancel_requests: Mutex<Vec<i64>>,
        fail_placements_after: Mutex<Option<usize>>,
        placements: AtomicI64,
    }

    impl MockGateway {
        fn new(price: Decimal) -> Arc<Self> {
            Arc::new(Self {
                price: Mutex::new(price),
                next_order_id: AtomicI64::new(1),
                orders: Mutex::new(HashMap::new()),
                cancel_requests: Mutex::new(Vec::new()),
                fail_placements_after: Mutex::new(None),
                placements: AtomicI64::new(0),
            })
        }

        fn set_price(&self, price: Decimal) {
            *self.price.lock().unwrap() = price;
        }

        fn set_order_state(&self, order_id: i64, status: OrderStatus, executed_qty: Decimal) {
            let mut orders = self.orders.lock().unwrap();
            let order = orders.get_mut(&order_id).expect("order exists");
            order.status = status;
            order.executed_qty = executed_qty;
        }

        fn forget_order(&self, order_id: i64) {
            self.orders.lock().unwrap().remove(&order_id);
        }

        fn fail_placements_after(&self, count: usize) {
            *self.fail_placements_after.lock().unwrap() = Some(count);
        }

        fn cancel_count(&self) -> usize {
            self.cancel_requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        async fn ticker_price(&self, _symbol: &str) -> Result<Decimal> {
            Ok(*self.price.lock().unwrap())
        }

        async fn place_limit_order(
            &self,
            _symbol: &str,
            side: Side,
            quantity: Decimal,
            price: Decimal,
        ) -> Result<PlacedOrder> {
            if let Some(limit) = *self.fail_placements_after.lock().unwrap()
                && self.placements.load(Ordering::SeqCst) as usize >= limit
            {
                return Err(EngineError::Validation("Filter failure: PERCENT_PRICE".to_string()));
            }
            self.placements.fetch_add(1, Ordering::SeqCst);

            let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
            self.orders.lock().unwrap().insert(
                order_id,
                MockOrder {
                    side,
                    price,
                    quantity,
                    status: OrderStatus::New,
                    executed_qty: Decimal::ZERO,
                },
            );
            Ok(PlacedOrder {
                order_id,
                status: OrderStatus::New,
                executed_qty: Decimal::ZERO,
                raw: serde_json::json!({"orderId": order_id, "status": "NEW"}),
            })
        }

        async fn cancel_order(
            &self,
            _symbol: &str,
            order_id: i64,
        ) -> Result<Option<CancelledOrder>> {
            self.cancel_requests.lock().unwrap().push(order_id);

            let mut orders = self.orders.lock().unwrap();
            match orders.get_mut(&order_id) {
                Some(order) if order.status.is_open() => {
                    order.status = OrderStatus::Canceled;
                    Ok(Some(CancelledOrder {
                        status: OrderStatus::Canceled,
                        executed_qty: order.executed_qty,
                    }))
                }
                _ => Ok(None),
            }
        }

        async fn get_order(&self, _symbol: &str, order_id: i64) -> Result<Option<OrderSnapshot>> {
            let orders = self.orders.lock().unwrap();
            Ok(orders.get(&order_id).map(|order| OrderSnapshot {
                status: order.status,
                executed_qty: order.executed_qty,
                raw: serde_json::json!({"orderId": order_id, "status": order.status.as_str()}),
            }))
        }

        async fn new_listen_key(&self) -> Result<String> {
            Ok("test-listen-key".to_string())
        }

        async fn keepalive_listen_key(&self, _listen_key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn test_bot() -> Bot {
        let mut bot = Bot::new("grid-1", "BTCUSDT");
        bot.api_key = "key".to_string();
        bot.api_secret = "secret".to_string();
        bot.amount = dec("1000");
        bot.grid_length = dec("10");
        bot.first_order_offset = dec("1");
        bot.num_orders = 5;
        bot.next_order_volume = dec("5");
        bot.profit_percentage = dec("1");
        bot.price_change_percentage = dec("0.5");
        bot.is_active = true;
        bot.status = BotStatus::Running;
        bot
    }

    fn setup(price: &str) -> (Arc<Database>, Arc<MockGateway>, TradingService) {
        let store = Arc::new(Database::open_in_memory().unwrap());
        let gateway = MockGateway::new(dec(price));
        let bot = test_bot();
        store.create_bot(&bot).unwrap();

        let service = TradingService::new(
            store.clone(),
            gateway.clone(),
            FilterTable::with_defaults(),
            bot,
        )
        .unwrap();
        (store, gateway, service)
    }

    fn report(order_id: i64, side: Side, status: OrderStatus, cumulative: &str) -> ExecutionReport {
        ExecutionReport {
            symbol: "BTCUSDT".to_string(),
            side,
            order_id,
            status,
            cumulative_filled_qty: dec(cumulative),
        }
    }

    fn active_sells(store: &Database, cycle_id: Uuid) -> Vec<Order> {
        store
            .orders_by_cycle(cycle_id)
            .unwrap()
            .into_iter()
            .filter(|order| order.side == Side::Sell && order.status.is_open())
            .collect()
    }

    #[tokio::test]
    async fn launch_places_descending_grid_matching_budget() {
        let (store, _gateway, mut service) = setup("25000");
        service.launch().await.unwrap();

        let cycle = service.cycle().expect("active cycle").clone();
        assert_eq!(cycle.price, dec("25000"));

        let orders = store.orders_by_cycle(cycle.id).unwrap();
        assert_eq!(orders.len(), 5);

        // Ladder from the worked example, all resting as NEW.
        let prices: Vec<Decimal> = orders.iter().map(|order| order.price).collect();
        assert_eq!(
            prices,
            vec![
                dec("24750.00"),
                dec("24131.25"),
                dec("23512.50"),
                dec("22893.75"),
                dec("22275.00"),
            ]
        );
        assert!(orders.iter().all(|order| order.status == OrderStatus::New));
        assert!(orders.iter().all(|order| order.side == Side::Buy));

        let numbers: Vec<u32> = orders.iter().map(|order| order.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        // Sizes grow geometrically and the notional stays inside the budget
        // after quantization.
        for pair in orders.windows(2) {
            assert!(pair[1].quantity > pair[0].quantity);
        }
        let notional: Decimal = orders.iter().map(|order| order.price * order.quantity).sum();
        assert!(notional <= dec("1000"));
        assert!(notional > dec("999"));

        let committed: Decimal = orders.iter().map(|order| order.quantity).sum();
        assert_eq!(cycle.quantity, committed);
    }

    #[tokio::test]
    async fn buy_fills_regenerate_single_take_profit() {
        let (store, _gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle_id = service.cycle().unwrap().id;

        // BUY #1 fills at 24750 for 0.008.
        let event = report(1, Side::Buy, OrderStatus::Filled, "0.008");
        let raw = serde_json::json!({"i": 1, "X": "FILLED"});
        service.on_execution_report(&event, raw).await.unwrap();

        let sells = active_sells(&store, cycle_id);
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].price, dec("24997.50")); // 24750 * 1.01
        assert_eq!(sells[0].quantity, dec("0.008"));
        assert_eq!(sells[0].number, 2);

        // BUY #2 fills at 24131.25 for 0.0084: old TP is replaced.
        let event = report(2, Side::Buy, OrderStatus::Filled, "0.0084");
        let raw = serde_json::json!({"i": 2, "X": "FILLED"});
        service.on_execution_report(&event, raw).await.unwrap();

        let sells = active_sells(&store, cycle_id);
        assert_eq!(sells.len(), 1, "exactly one open TP at any time");
        // avg = (24750*0.008 + 24131.25*0.0084) / 0.0164, target = avg * 1.01
        assert_eq!(sells[0].price, dec("24677.41"));
        assert_eq!(sells[0].quantity, dec("0.0164"));
        assert_eq!(sells[0].number, 3);

        let canceled: Vec<Order> = store
            .orders_by_cycle(cycle_id)
            .unwrap()
            .into_iter()
            .filter(|order| order.side == Side::Sell && order.status == OrderStatus::Canceled)
            .collect();
        assert_eq!(canceled.len(), 1);
    }

    #[tokio::test]
    async fn take_profit_fill_completes_cycle_and_starts_next() {
        let (store, gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let first_cycle = service.cycle().unwrap().clone();

        // Fill the whole ladder.
        let orders = store.orders_by_cycle(first_cycle.id).unwrap();
        for order in &orders {
            let event = report(
                order.exchange_order_id,
                Side::Buy,
                OrderStatus::Filled,
                &order.quantity.to_string(),
            );
            service
                .on_execution_report(&event, serde_json::Value::Null)
                .await
                .unwrap();
        }

        let sells = active_sells(&store, first_cycle.id);
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].quantity, first_cycle.quantity);

        // The TP fills in full; the next cycle opens at the new market price.
        gateway.set_price(dec("26000"));
        let event = report(
            sells[0].exchange_order_id,
            Side::Sell,
            OrderStatus::Filled,
            &first_cycle.quantity.to_string(),
        );
        service
            .on_execution_report(&event, serde_json::Value::Null)
            .await
            .unwrap();

        let cycles = store.cycles_by_bot(service.bot().id).unwrap();
        assert_eq!(cycles.len(), 2);
        let completed = cycles.iter().find(|c| c.id == first_cycle.id).unwrap();
        assert_eq!(completed.status, CycleStatus::Completed);

        let next = service.cycle().expect("fresh cycle");
        assert_eq!(next.status, CycleStatus::Active);
        assert_eq!(next.price, dec("26000"));
        assert_eq!(store.orders_by_cycle(next.id).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn last_cycle_completion_stops_the_bot() {
        let (store, _gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle = service.cycle().unwrap().clone();

        service.bot.status = BotStatus::LastCycle;
        store.update_bot(&service.bot).unwrap();

        let orders = store.orders_by_cycle(cycle.id).unwrap();
        for order in &orders {
            let event = report(
                order.exchange_order_id,
                Side::Buy,
                OrderStatus::Filled,
                &order.quantity.to_string(),
            );
            service
                .on_execution_report(&event, serde_json::Value::Null)
                .await
                .unwrap();
        }

        let tp = active_sells(&store, cycle.id).remove(0);
        let event = report(
            tp.exchange_order_id,
            Side::Sell,
            OrderStatus::Filled,
            &cycle.quantity.to_string(),
        );
        service
            .on_execution_report(&event, serde_json::Value::Null)
            .await
            .unwrap();

        assert!(service.cycle().is_none());
        let bot = store.get_bot(service.bot().id).unwrap().unwrap();
        assert!(!bot.is_active);
        assert_eq!(bot.status, BotStatus::Stopped);
        assert_eq!(store.cycles_by_bot(bot.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upward_drift_regrids_when_everything_is_new() {
        let (store, gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle_id = service.cycle().unwrap().id;

        // +0.8% >= 0.5% and every order still NEW.
        gateway.set_price(dec("25200"));
        service.on_ticker(dec("25200")).await.unwrap();

        let cycle = service.cycle().unwrap();
        assert_eq!(cycle.id, cycle_id, "same cycle, new reference price");
        assert_eq!(cycle.price, dec("25200"));

        let orders = store.orders_by_cycle(cycle_id).unwrap();
        let canceled = orders
            .iter()
            .filter(|order| order.status == OrderStatus::Canceled)
            .count();
        let fresh: Vec<&Order> = orders
            .iter()
            .filter(|order| order.status == OrderStatus::New)
            .collect();
        assert_eq!(canceled, 5);
        assert_eq!(fresh.len(), 5);
        // New top of ladder tracks the new reference: 25200 * 0.99.
        assert_eq!(fresh[0].price, dec("24948.00"));
        assert_eq!(gateway.cancel_count(), 5);
    }

    #[tokio::test]
    async fn no_regrid_once_capital_is_committed() {
        let (store, gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle_id = service.cycle().unwrap().id;

        // A partial fill on BUY #1 commits capital.
        let event = report(1, Side::Buy, OrderStatus::PartiallyFilled, "0.003");
        service
            .on_execution_report(&event, serde_json::Value::Null)
            .await
            .unwrap();
        let cancels_after_tp = gateway.cancel_count();

        service.on_ticker(dec("25200")).await.unwrap();

        let cycle = service.cycle().unwrap();
        assert_eq!(cycle.price, dec("25000"), "reference price untouched");
        assert_eq!(gateway.cancel_count(), cancels_after_tp, "no grid cancels");

        let buys: Vec<Order> = store
            .orders_by_cycle(cycle_id)
            .unwrap()
            .into_iter()
            .filter(|order| order.side == Side::Buy)
            .collect();
        assert_eq!(buys.len(), 5);
        assert!(buys.iter().all(|order| order.status != OrderStatus::Canceled));
    }

    #[tokio::test]
    async fn small_drift_does_not_regrid() {
        let (_store, gateway, mut service) = setup("25000");
        service.launch().await.unwrap();

        // +0.2% < 0.5%
        service.on_ticker(dec("25050")).await.unwrap();
        assert_eq!(service.cycle().unwrap().price, dec("25000"));
        assert_eq!(gateway.cancel_count(), 0);

        // Downward drift never triggers.
        service.on_ticker(dec("20000")).await.unwrap();
        assert_eq!(service.cycle().unwrap().price, dec("25000"));
        assert_eq!(gateway.cancel_count(), 0);
    }

    #[tokio::test]
    async fn launch_reconciles_offline_fills_into_one_take_profit() {
        let (store, gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle_id = service.cycle().unwrap().id;
        let orders = store.orders_by_cycle(cycle_id).unwrap();

        // While the process was down, orders 1 and 2 filled on the exchange.
        gateway.set_order_state(
            orders[0].exchange_order_id,
            OrderStatus::Filled,
            orders[0].quantity,
        );
        gateway.set_order_state(
            orders[1].exchange_order_id,
            OrderStatus::Filled,
            orders[1].quantity,
        );

        // Fresh state machine, as after a restart.
        let bot = store.get_bot(service.bot().id).unwrap().unwrap();
        let mut restarted = TradingService::new(
            store.clone(),
            gateway.clone(),
            FilterTable::with_defaults(),
            bot,
        )
        .unwrap();
        restarted.launch().await.unwrap();

        let orders = store.orders_by_cycle(cycle_id).unwrap();
        let filled = orders
            .iter()
            .filter(|order| order.status == OrderStatus::Filled)
            .count();
        assert_eq!(filled, 2);

        let sells = active_sells(&store, cycle_id);
        assert_eq!(sells.len(), 1, "reconcile produced exactly one TP");
        assert_eq!(sells[0].quantity, orders[0].quantity + orders[1].quantity);

        // Launching again converges: no new orders, same TP.
        let order_count = store.orders_by_cycle(cycle_id).unwrap().len();
        let tp_id = sells[0].id;
        restarted.launch().await.unwrap();
        assert_eq!(store.orders_by_cycle(cycle_id).unwrap().len(), order_count);
        assert_eq!(active_sells(&store, cycle_id)[0].id, tp_id);
    }

    #[tokio::test]
    async fn launch_replaces_grid_for_cycle_without_orders() {
        let (store, _gateway, mut service) = setup("25000");

        // Crash happened between cycle insert and first placement.
        let cycle = TradingCycle::from_bot(service.bot(), dec("25000"));
        store.insert_cycle(&cycle).unwrap();
        service.cycle = Some(cycle.clone());

        service.launch().await.unwrap();
        assert_eq!(store.orders_by_cycle(cycle.id).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn execution_report_for_unknown_order_is_ignored() {
        let (store, _gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle_id = service.cycle().unwrap().id;
        let before = store.orders_by_cycle(cycle_id).unwrap().len();

        let event = report(9999, Side::Buy, OrderStatus::Filled, "1");
        service
            .on_execution_report(&event, serde_json::Value::Null)
            .await
            .unwrap();

        assert_eq!(store.orders_by_cycle(cycle_id).unwrap().len(), before);
        assert!(active_sells(&store, cycle_id).is_empty());
    }

    #[tokio::test]
    async fn upper_price_limit_defers_grid_until_price_allows() {
        let (store, gateway, mut service) = setup("25000");
        service.bot.upper_price_limit = Some(dec("20000"));
        store.update_bot(&service.bot).unwrap();

        service.launch().await.unwrap();
        let cycle_id = service.cycle().expect("cycle exists").id;
        assert!(store.orders_by_cycle(cycle_id).unwrap().is_empty());

        // Market falls under the ceiling; the next tick retries placement.
        gateway.set_price(dec("19000"));
        service.on_ticker(dec("19000")).await.unwrap();
        assert_eq!(store.orders_by_cycle(cycle_id).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn validation_rejection_aborts_placement_keeping_partial_grid() {
        let (store, gateway, mut service) = setup("25000");
        gateway.fail_placements_after(2);

        let err = service.launch().await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let cycle = service.cycle().expect("cycle stays active");
        assert_eq!(cycle.status, CycleStatus::Active);

        let orders = store.orders_by_cycle(cycle.id).unwrap();
        assert_eq!(orders.len(), 2);
        let committed: Decimal = orders.iter().map(|order| order.quantity).sum();
        assert_eq!(cycle.quantity, committed);
    }

    #[tokio::test]
    async fn cancel_folds_already_terminal_orders() {
        let (store, gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle_id = service.cycle().unwrap().id;
        let orders = store.orders_by_cycle(cycle_id).unwrap();

        // The venue forgot one order (manual cancel, expiry).
        gateway.forget_order(orders[0].exchange_order_id);

        service.cancel_cycle_orders().await.unwrap();

        let orders = store.orders_by_cycle(cycle_id).unwrap();
        assert!(
            orders
                .iter()
                .all(|order| order.status == OrderStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn stop_cancels_orders_and_closes_cycle() {
        let (store, _gateway, mut service) = setup("25000");
        service.launch().await.unwrap();
        let cycle_id = service.cycle().unwrap().id;

        service.stop().await.unwrap();

        assert!(service.cycle().is_none());
        let cycles = store.cycles_by_bot(service.bot().id).unwrap();
        assert_eq!(cycles[0].status, CycleStatus::Cancelled);
        assert!(
            store
                .orders_by_cycle(cycle_id)
                .unwrap()
                .iter()
                .all(|order| order.status == OrderStatus::Canceled)
        );

        let bot = store.get_bot(service.bot().id).unwrap().unwrap();
        assert!(!bot.is_active);
        assert_eq!(bot.status, BotStatus::Stopped);
    }

    #[tokio::test]
    async fn second_active_cycle_is_an_invariant_violation() {
        let (_store, _gateway, mut service) = setup("25000");
        service.launch().await.unwrap();

        let err = service.start_new_cycle().await.unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }
}

/*
[INPUT]:  Persisted entity shapes (bots, trading cycles, orders)
[OUTPUT]: Domain structs, lifecycle enums and the realized-profit view
[POS]:    Data layer - domain model shared by store, state machine and admin
[UPDATE]: When entity fields or lifecycle states change
*/

use chrono::{DateTime, Utc};
use gridcycle_adapter::{OrderStatus, OrderType, Side, TimeInForce};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Running,
    /// Finish the current cycle, then stop.
    LastCycle,
    Stopped,
}

impl BotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BotStatus::Running => "RUNNING",
            BotStatus::LastCycle => "LAST_CYCLE",
            BotStatus::Stopped => "STOPPED",
        }
    }
}

impl std::str::FromStr for BotStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "RUNNING" => Ok(BotStatus::Running),
            "LAST_CYCLE" => Ok(BotStatus::LastCycle),
            "STOPPED" => Ok(BotStatus::Stopped),
            other => Err(format!("unknown bot status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Active,
    Completed,
    Cancelled,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Active => "ACTIVE",
            CycleStatus::Completed => "COMPLETED",
            CycleStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(CycleStatus::Active),
            "COMPLETED" => Ok(CycleStatus::Completed),
            "CANCELLED" => Ok(CycleStatus::Cancelled),
            other => Err(format!("unknown cycle status: {other}")),
        }
    }
}

/// Configuration and credentials for one strategy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub exchange: String,
    pub symbol: String,
    /// Base capital in quote currency.
    pub amount: Decimal,
    /// Total depth of the buy ladder, percent.
    pub grid_length: Decimal,
    /// Offset below market for the top of the ladder, percent.
    pub first_order_offset: Decimal,
    pub num_orders: u32,
    /// Geometric growth of successive buy sizes, percent.
    pub next_order_volume: Decimal,
    /// Take-profit margin over average entry, percent.
    pub profit_percentage: Decimal,
    /// Upward move that triggers a re-grid, percent.
    pub price_change_percentage: Decimal,
    /// Hard ceiling: no grid is placed above this price.
    pub upper_price_limit: Option<Decimal>,
    pub is_active: bool,
    pub status: BotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bot {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            api_key: String::new(),
            api_secret: String::new(),
            exchange: "BINANCE".to_string(),
            symbol: symbol.into(),
            amount: Decimal::ZERO,
            grid_length: Decimal::ZERO,
            first_order_offset: Decimal::ZERO,
            num_orders: 1,
            next_order_volume: Decimal::ZERO,
            profit_percentage: Decimal::ZERO,
            price_change_percentage: Decimal::ZERO,
            upper_price_limit: None,
            is_active: false,
            status: BotStatus::Stopped,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("bot name cannot be empty".to_string());
        }
        if self.symbol.is_empty() {
            return Err("symbol cannot be empty".to_string());
        }
        if self.num_orders < 1 {
            return Err("num_orders must be at least 1".to_string());
        }
        if self.amount <= Decimal::ZERO {
            return Err("amount must be positive".to_string());
        }
        Ok(())
    }
}

/// One round-trip of the grid strategy. Bot parameters are snapshotted at
/// cycle start so a reconfigured bot never changes a running cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingCycle {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub exchange: String,
    pub symbol: String,
    pub amount: Decimal,
    pub grid_length: Decimal,
    pub first_order_offset: Decimal,
    pub num_orders: u32,
    pub next_order_volume: Decimal,
    pub profit_percentage: Decimal,
    pub price_change_percentage: Decimal,
    /// Market reference price captured when the current grid was built.
    pub price: Decimal,
    /// Total base quantity committed across the current grid.
    pub quantity: Decimal,
    pub status: CycleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradingCycle {
    /// Snapshot a bot's parameters into a fresh ACTIVE cycle.
    pub fn from_bot(bot: &Bot, price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bot_id: bot.id,
            exchange: bot.exchange.clone(),
            symbol: bot.symbol.clone(),
            amount: bot.amount,
            grid_length: bot.grid_length,
            first_order_offset: bot.first_order_offset,
            num_orders: bot.num_orders,
            next_order_volume: bot.next_order_volume,
            profit_percentage: bot.profit_percentage,
            price_change_percentage: bot.price_change_percentage,
            price,
            quantity: Decimal::ZERO,
            status: CycleStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One exchange-side limit order. Rows are never deleted, only
/// status-mutated; `exchange_order_data` keeps the venue's last raw echo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quantity_filled: Decimal,
    pub amount: Decimal,
    pub status: OrderStatus,
    /// 1-based ordinal within the cycle; the take-profit order follows the
    /// grid ordinals.
    pub number: u32,
    pub exchange_order_id: i64,
    pub exchange_order_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Realized profit of a cycle, per the admin dashboard contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleProfit {
    /// Completed cycle, rounded to 2 decimals.
    Amount(Decimal),
    /// Completed, but sell fills don't add up to the cycle quantity.
    QuantityMismatch,
    /// Cycle not completed yet.
    Open,
}

impl std::fmt::Display for CycleProfit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleProfit::Amount(amount) => write!(f, "{amount}"),
            CycleProfit::QuantityMismatch => write!(f, "quantity mismatch"),
            CycleProfit::Open => write!(f, "0"),
        }
    }
}

/// Realized profit over a completed cycle's orders.
///
/// `Σ_sell(price·qty_filled) − Σ_buy(price·qty_filled)`, with the sentinel
/// when sell fills don't match the committed quantity.
pub fn cycle_profit(cycle: &TradingCycle, orders: &[Order]) -> CycleProfit {
    if cycle.status != CycleStatus::Completed {
        return CycleProfit::Open;
    }

    let mut buy_amount = Decimal::ZERO;
    let mut sell_amount = Decimal::ZERO;
    let mut sell_filled = Decimal::ZERO;

    for order in orders {
        match order.side {
            Side::Buy => buy_amount += order.price * order.quantity_filled,
            Side::Sell => {
                sell_amount += order.price * order.quantity_filled;
                sell_filled += order.quantity_filled;
            }
        }
    }

    if sell_filled != cycle.quantity {
        return CycleProfit::QuantityMismatch;
    }

    CycleProfit::Amount((sell_amount - buy_amount).round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    fn order(side: Side, price: &str, filled: &str) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            cycle_id: Uuid::new_v4(),
            exchange: "BINANCE".to_string(),
            symbol: "BTCUSDT".to_string(),
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            price: dec(price),
            quantity: dec(filled),
            quantity_filled: dec(filled),
            amount: dec(price) * dec(filled),
            status: OrderStatus::Filled,
            number: 1,
            exchange_order_id: 1,
            exchange_order_data: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn completed_cycle(quantity: &str) -> TradingCycle {
        let bot = Bot::new("test", "BTCUSDT");
        let mut cycle = TradingCycle::from_bot(&bot, dec("25000"));
        cycle.quantity = dec(quantity);
        cycle.status = CycleStatus::Completed;
        cycle
    }

    #[test]
    fn profit_is_sell_minus_buy_rounded() {
        let cycle = completed_cycle("0.0164");
        let orders = vec![
            order(Side::Buy, "24750.00", "0.008"),
            order(Side::Buy, "24131.25", "0.0084"),
            order(Side::Sell, "24683.42", "0.0164"),
        ];

        // buys: 198.00 + 202.7025 = 400.7025; sells: 404.808088
        let profit = cycle_profit(&cycle, &orders);
        assert_eq!(profit, CycleProfit::Amount(dec("4.11")));
    }

    #[test]
    fn profit_reports_quantity_mismatch() {
        let cycle = completed_cycle("0.02");
        let orders = vec![
            order(Side::Buy, "24750.00", "0.008"),
            order(Side::Sell, "25000.00", "0.008"),
        ];
        assert_eq!(cycle_profit(&cycle, &orders), CycleProfit::QuantityMismatch);
    }

    #[test]
    fn profit_of_open_cycle_is_zero() {
        let bot = Bot::new("test", "BTCUSDT");
        let cycle = TradingCycle::from_bot(&bot, dec("25000"));
        assert_eq!(cycle_profit(&cycle, &[]), CycleProfit::Open);
        assert_eq!(CycleProfit::Open.to_string(), "0");
        assert_eq!(CycleProfit::QuantityMismatch.to_string(), "quantity mismatch");
    }

    #[test]
    fn bot_validation_rejects_bad_configs() {
        let mut bot = Bot::new("grid", "BTCUSDT");
        bot.amount = dec("1000");
        assert!(bot.validate().is_ok());

        bot.num_orders = 0;
        assert!(bot.validate().is_err());

        bot.num_orders = 5;
        bot.amount = Decimal::ZERO;
        assert!(bot.validate().is_err());
    }
}

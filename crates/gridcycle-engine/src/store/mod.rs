/*
[INPUT]:  schema.sql, domain model types
[OUTPUT]: SQLite-backed Database pool with typed load/store operations
[POS]:    Persistence layer - bots, trading cycles and orders
[UPDATE]: When schema.sql or domain model shapes change
*/

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use gridcycle_adapter::{OrderStatus, OrderType, Side, TimeInForce};
use rusqlite::{OptionalExtension, params};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{Bot, BotStatus, CycleStatus, Order, TradingCycle};

/// Relational store shared by all bots. Every operation is a short
/// synchronous transaction; callers never hold a connection across awaits.
pub struct Database {
    pool: r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = r2d2_sqlite::SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        let pool = r2d2::Pool::new(manager)?;
        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    /// Single-connection in-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory().with_init(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        let pool = r2d2::Pool::builder().max_size(1).build(manager)?;
        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    // ----- bots -----

    pub fn create_bot(&self, bot: &Bot) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO bots (id, name, api_key, api_secret, exchange, symbol, amount, \
             grid_length, first_order_offset, num_orders, next_order_volume, \
             profit_percentage, price_change_percentage, upper_price_limit, is_active, \
             status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                bot.id.to_string(),
                bot.name,
                bot.api_key,
                bot.api_secret,
                bot.exchange,
                bot.symbol,
                bot.amount.to_string(),
                bot.grid_length.to_string(),
                bot.first_order_offset.to_string(),
                bot.num_orders,
                bot.next_order_volume.to_string(),
                bot.profit_percentage.to_string(),
                bot.price_change_percentage.to_string(),
                bot.upper_price_limit.map(|limit| limit.to_string()),
                bot.is_active,
                bot.status.as_str(),
                bot.created_at.to_rfc3339(),
                bot.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_bot(&self, bot: &Bot) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE bots SET name = ?2, api_key = ?3, api_secret = ?4, exchange = ?5, \
             symbol = ?6, amount = ?7, grid_length = ?8, first_order_offset = ?9, \
             num_orders = ?10, next_order_volume = ?11, profit_percentage = ?12, \
             price_change_percentage = ?13, upper_price_limit = ?14, is_active = ?15, \
             status = ?16, updated_at = ?17 WHERE id = ?1",
            params![
                bot.id.to_string(),
                bot.name,
                bot.api_key,
                bot.api_secret,
                bot.exchange,
                bot.symbol,
                bot.amount.to_string(),
                bot.grid_length.to_string(),
                bot.first_order_offset.to_string(),
                bot.num_orders,
                bot.next_order_volume.to_string(),
                bot.profit_percentage.to_string(),
                bot.price_change_percentage.to_string(),
                bot.upper_price_limit.map(|limit| limit.to_string()),
                bot.is_active,
                bot.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_bot(&self, id: Uuid) -> Result<Option<Bot>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?1"),
                params![id.to_string()],
                BotRow::from_row,
            )
            .optional()?;
        row.map(Bot::try_from).transpose()
    }

    pub fn list_bots(&self) -> Result<Vec<Bot>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {BOT_COLUMNS} FROM bots ORDER BY created_at"))?;
        let rows = stmt.query_map([], BotRow::from_row)?;

        let mut bots = Vec::new();
        for row in rows {
            bots.push(Bot::try_from(row?)?);
        }
        Ok(bots)
    }

    pub fn active_bots(&self) -> Result<Vec<Bot>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BOT_COLUMNS} FROM bots WHERE is_active = 1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], BotRow::from_row)?;

        let mut bots = Vec::new();
        for row in rows {
            bots.push(Bot::try_from(row?)?);
        }
        Ok(bots)
    }

    // ----- trading cycles -----

    pub fn insert_cycle(&self, cycle: &TradingCycle) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO trading_cycles (id, bot_id, exchange, symbol, amount, grid_length, \
             first_order_offset, num_orders, next_order_volume, profit_percentage, \
             price_change_percentage, price, quantity, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                cycle.id.to_string(),
                cycle.bot_id.to_string(),
                cycle.exchange,
                cycle.symbol,
                cycle.amount.to_string(),
                cycle.grid_length.to_string(),
                cycle.first_order_offset.to_string(),
                cycle.num_orders,
                cycle.next_order_volume.to_string(),
                cycle.profit_percentage.to_string(),
                cycle.price_change_percentage.to_string(),
                cycle.price.to_string(),
                cycle.quantity.to_string(),
                cycle.status.as_str(),
                cycle.created_at.to_rfc3339(),
                cycle.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_cycle(&self, cycle: &TradingCycle) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE trading_cycles SET price = ?2, quantity = ?3, status = ?4, updated_at = ?5 \
             WHERE id = ?1",
            params![
                cycle.id.to_string(),
                cycle.price.to_string(),
                cycle.quantity.to_string(),
                cycle.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn active_cycle(&self, bot_id: Uuid) -> Result<Option<TradingCycle>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {CYCLE_COLUMNS} FROM trading_cycles \
                     WHERE bot_id = ?1 AND status = 'ACTIVE'"
                ),
                params![bot_id.to_string()],
                CycleRow::from_row,
            )
            .optional()?;
        row.map(TradingCycle::try_from).transpose()
    }

    pub fn cycles_by_bot(&self, bot_id: Uuid) -> Result<Vec<TradingCycle>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CYCLE_COLUMNS} FROM trading_cycles WHERE bot_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![bot_id.to_string()], CycleRow::from_row)?;

        let mut cycles = Vec::new();
        for row in rows {
            cycles.push(TradingCycle::try_from(row?)?);
        }
        Ok(cycles)
    }

    // ----- orders -----

    pub fn insert_order(&self, order: &Order) -> Result<()> {
        let conn = self.pool.get()?;
        insert_order_on(&conn, order)
    }

    /// Persist a freshly placed grid and the cycle's committed quantity in
    /// one transaction, so a crash can't leave the quantity out of step with
    /// the order rows.
    pub fn insert_grid_orders(&self, cycle: &TradingCycle, orders: &[Order]) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(EngineError::from)?;
        for order in orders {
            insert_order_on(&tx, order)?;
        }
        tx.execute(
            "UPDATE trading_cycles SET quantity = ?2, price = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                cycle.id.to_string(),
                cycle.quantity.to_string(),
                cycle.price.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit().map_err(EngineError::from)
    }

    pub fn update_order(&self, order: &Order) -> Result<()> {
        let conn = self.pool.get()?;
        let data = order
            .exchange_order_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| EngineError::Storage(err.to_string()))?;
        conn.execute(
            "UPDATE orders SET status = ?2, quantity_filled = ?3, exchange_order_data = ?4, \
             updated_at = ?5 WHERE id = ?1",
            params![
                order.id.to_string(),
                order.status.as_str(),
                order.quantity_filled.to_string(),
                data,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn orders_by_cycle(&self, cycle_id: Uuid) -> Result<Vec<Order>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE cycle_id = ?1 ORDER BY number, created_at"
        ))?;
        let rows = stmt.query_map(params![cycle_id.to_string()], OrderRow::from_row)?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(Order::try_from(row?)?);
        }
        Ok(orders)
    }

    pub fn orders_by_cycle_and_statuses(
        &self,
        cycle_id: Uuid,
        statuses: &[OrderStatus],
    ) -> Result<Vec<Order>> {
        let all = self.orders_by_cycle(cycle_id)?;
        Ok(all
            .into_iter()
            .filter(|order| statuses.contains(&order.status))
            .collect())
    }

    pub fn order_by_exchange_id(
        &self,
        cycle_id: Uuid,
        exchange_order_id: i64,
    ) -> Result<Option<Order>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {ORDER_COLUMNS} FROM orders \
                     WHERE cycle_id = ?1 AND exchange_order_id = ?2"
                ),
                params![cycle_id.to_string(), exchange_order_id],
                OrderRow::from_row,
            )
            .optional()?;
        row.map(Order::try_from).transpose()
    }
}

fn insert_order_on(conn: &rusqlite::Connection, order: &Order) -> Result<()> {
    let data = order
        .exchange_order_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| EngineError::Storage(err.to_string()))?;
    conn.execute(
        "INSERT INTO orders (id, cycle_id, exchange, symbol, side, type, time_in_force, \
         price, quantity, quantity_filled, amount, status, number, exchange_order_id, \
         exchange_order_data, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            order.id.to_string(),
            order.cycle_id.to_string(),
            order.exchange,
            order.symbol,
            order.side.as_str(),
            order.order_type.as_str(),
            order.time_in_force.as_str(),
            order.price.to_string(),
            order.quantity.to_string(),
            order.quantity_filled.to_string(),
            order.amount.to_string(),
            order.status.as_str(),
            order.number,
            order.exchange_order_id,
            data,
            order.created_at.to_rfc3339(),
            order.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

const BOT_COLUMNS: &str = "id, name, api_key, api_secret, exchange, symbol, amount, grid_length, \
     first_order_offset, num_orders, next_order_volume, profit_percentage, \
     price_change_percentage, upper_price_limit, is_active, status, created_at, updated_at";

const CYCLE_COLUMNS: &str = "id, bot_id, exchange, symbol, amount, grid_length, \
     first_order_offset, num_orders, next_order_volume, profit_percentage, \
     price_change_percentage, price, quantity, status, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, cycle_id, exchange, symbol, side, type, time_in_force, price, \
     quantity, quantity_filled, amount, status, number, exchange_order_id, \
     exchange_order_data, created_at, updated_at";

struct BotRow {
    id: String,
    name: String,
    api_key: String,
    api_secret: String,
    exchange: String,
    symbol: String,
    amount: String,
    grid_length: String,
    first_order_offset: String,
    num_orders: u32,
    next_order_volume: String,
    profit_percentage: String,
    price_change_percentage: String,
    upper_price_limit: Option<String>,
    is_active: bool,
    status: String,
    created_at: String,
    updated_at: String,
}

impl BotRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            api_key: row.get(2)?,
            api_secret: row.get(3)?,
            exchange: row.get(4)?,
            symbol: row.get(5)?,
            amount: row.get(6)?,
            grid_length: row.get(7)?,
            first_order_offset: row.get(8)?,
            num_orders: row.get(9)?,
            next_order_volume: row.get(10)?,
            profit_percentage: row.get(11)?,
            price_change_percentage: row.get(12)?,
            upper_price_limit: row.get(13)?,
            is_active: row.get(14)?,
            status: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }
}

impl TryFrom<BotRow> for Bot {
    type Error = EngineError;

    fn try_from(row: BotRow) -> Result<Self> {
        Ok(Bot {
            id: parse_uuid(&row.id)?,
            name: row.name,
            api_key: row.api_key,
            api_secret: row.api_secret,
            exchange: row.exchange,
            symbol: row.symbol,
            amount: parse_decimal(&row.amount)?,
            grid_length: parse_decimal(&row.grid_length)?,
            first_order_offset: parse_decimal(&row.first_order_offset)?,
            num_orders: row.num_orders,
            next_order_volume: parse_decimal(&row.next_order_volume)?,
            profit_percentage: parse_decimal(&row.profit_percentage)?,
            price_change_percentage: parse_decimal(&row.price_change_percentage)?,
            upper_price_limit: row
                .upper_price_limit
                .as_deref()
                .map(parse_decimal)
                .transpose()?,
            is_active: row.is_active,
            status: parse_enum::<BotStatus>(&row.status)?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

struct CycleRow {
    id: String,
    bot_id: String,
    exchange: String,
    symbol: String,
    amount: String,
    grid_length: String,
    first_order_offset: String,
    num_orders: u32,
    next_order_volume: String,
    profit_percentage: String,
    price_change_percentage: String,
    price: String,
    quantity: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl CycleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bot_id: row.get(1)?,
            exchange: row.get(2)?,
            symbol: row.get(3)?,
            amount: row.get(4)?,
            grid_length: row.get(5)?,
            first_order_offset: row.get(6)?,
            num_orders: row.get(7)?,
            next_order_volume: row.get(8)?,
            profit_percentage: row.get(9)?,
            price_change_percentage: row.get(10)?,
            price: row.get(11)?,
            quantity: row.get(12)?,
            status: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl TryFrom<CycleRow> for TradingCycle {
    type Error = EngineError;

    fn try_from(row: CycleRow) -> Result<Self> {
        Ok(TradingCycle {
            id: parse_uuid(&row.id)?,
            bot_id: parse_uuid(&row.bot_id)?,
            exchange: row.exchange,
            symbol: row.symbol,
            amount: parse_decimal(&row.amount)?,
            grid_length: parse_decimal(&row.grid_length)?,
            first_order_offset: parse_decimal(&row.first_order_offset)?,
            num_orders: row.num_orders,
            next_order_volume: parse_decimal(&row.next_order_volume)?,
            profit_percentage: parse_decimal(&row.profit_percentage)?,
            price_change_percentage: parse_decimal(&row.price_change_percentage)?,
            price: parse_decimal(&row.price)?,
            quantity: parse_decimal(&row.quantity)?,
            status: parse_enum::<CycleStatus>(&row.status)?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

struct OrderRow {
    id: String,
    cycle_id: String,
    exchange: String,
    symbol: String,
    side: String,
    order_type: String,
    time_in_force: String,
    price: String,
    quantity: String,
    quantity_filled: String,
    amount: String,
    status: String,
    number: u32,
    exchange_order_id: i64,
    exchange_order_data: Option<String>,
    created_at: String,
    updated_at: String,
}

impl OrderRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            cycle_id: row.get(1)?,
            exchange: row.get(2)?,
            symbol: row.get(3)?,
            side: row.get(4)?,
            order_type: row.get(5)?,
            time_in_force: row.get(6)?,
            price: row.get(7)?,
            quantity: row.get(8)?,
            quantity_filled: row.get(9)?,
            amount: row.get(10)?,
            status: row.get(11)?,
            number: row.get(12)?,
            exchange_order_id: row.get(13)?,
            exchange_order_data: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = EngineError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let data = row
            .exchange_order_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| EngineError::Storage(err.to_string()))?;
        Ok(Order {
            id: parse_uuid(&row.id)?,
            cycle_id: parse_uuid(&row.cycle_id)?,
            exchange: row.exchange,
            symbol: row.symbol,
            side: parse_enum::<Side>(&row.side)?,
            order_type: parse_enum::<OrderType>(&row.order_type)?,
            time_in_force: parse_enum::<TimeInForce>(&row.time_in_force)?,
            price: parse_decimal(&row.price)?,
            quantity: parse_decimal(&row.quantity)?,
            quantity_filled: parse_decimal(&row.quantity_filled)?,
            amount: parse_decimal(&row.amount)?,
            status: parse_enum::<OrderStatus>(&row.status)?,
            number: row.number,
            exchange_order_id: row.exchange_order_id,
            exchange_order_data: data,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|err| EngineError::Storage(format!("bad uuid: {err}")))
}

fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|err| EngineError::Storage(format!("bad decimal: {err}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| EngineError::Storage(format!("bad timestamp: {err}")))
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(EngineError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BotStatus, CycleStatus};

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
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
        bot
    }

    fn test_order(cycle_id: Uuid, exchange_order_id: i64, number: u32) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            cycle_id,
            exchange: "BINANCE".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            price: dec("24750.00"),
            quantity: dec("0.008"),
            quantity_filled: Decimal::ZERO,
            amount: dec("198.00"),
            status: OrderStatus::New,
            number,
            exchange_order_id,
            exchange_order_data: Some(serde_json::json!({"orderId": exchange_order_id})),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn bot_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let mut bot = test_bot();
        bot.upper_price_limit = Some(dec("90000"));
        db.create_bot(&bot).unwrap();

        let loaded = db.get_bot(bot.id).unwrap().expect("bot exists");
        assert_eq!(loaded.name, "grid-1");
        assert_eq!(loaded.amount, dec("1000"));
        assert_eq!(loaded.upper_price_limit, Some(dec("90000")));
        assert_eq!(loaded.status, BotStatus::Stopped);
        assert!(!loaded.is_active);

        bot.is_active = true;
        bot.status = BotStatus::Running;
        db.update_bot(&bot).unwrap();

        let active = db.active_bots().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, BotStatus::Running);
    }

    #[test]
    fn at_most_one_active_cycle_per_bot() {
        let db = Database::open_in_memory().unwrap();
        let bot = test_bot();
        db.create_bot(&bot).unwrap();

        let first = TradingCycle::from_bot(&bot, dec("25000"));
        db.insert_cycle(&first).unwrap();

        let second = TradingCycle::from_bot(&bot, dec("25100"));
        assert!(matches!(
            db.insert_cycle(&second),
            Err(EngineError::Storage(_))
        ));

        // Completing the first frees the slot.
        let mut done = first.clone();
        done.status = CycleStatus::Completed;
        db.update_cycle(&done).unwrap();
        db.insert_cycle(&second).unwrap();

        let active = db.active_cycle(bot.id).unwrap().expect("active cycle");
        assert_eq!(active.id, second.id);
    }

    #[test]
    fn orders_require_an_existing_cycle() {
        let db = Database::open_in_memory().unwrap();
        let order = test_order(Uuid::new_v4(), 1, 1);
        assert!(matches!(
            db.insert_order(&order),
            Err(EngineError::Storage(_))
        ));
    }

    #[test]
    fn grid_insert_is_atomic_with_cycle_quantity() {
        let db = Database::open_in_memory().unwrap();
        let bot = test_bot();
        db.create_bot(&bot).unwrap();

        let mut cycle = TradingCycle::from_bot(&bot, dec("25000"));
        db.insert_cycle(&cycle).unwrap();

        let orders = vec![
            test_order(cycle.id, 1, 1),
            test_order(cycle.id, 2, 2),
            test_order(cycle.id, 3, 3),
        ];
        cycle.quantity = dec("0.024");
        db.insert_grid_orders(&cycle, &orders).unwrap();

        let loaded = db.active_cycle(bot.id).unwrap().expect("cycle");
        assert_eq!(loaded.quantity, dec("0.024"));
        assert_eq!(db.orders_by_cycle(cycle.id).unwrap().len(), 3);
    }

    #[test]
    fn order_lookup_and_status_queries() {
        let db = Database::open_in_memory().unwrap();
        let bot = test_bot();
        db.create_bot(&bot).unwrap();
        let cycle = TradingCycle::from_bot(&bot, dec("25000"));
        db.insert_cycle(&cycle).unwrap();

        let mut order = test_order(cycle.id, 42, 1);
        db.insert_order(&order).unwrap();
        db.insert_order(&test_order(cycle.id, 43, 2)).unwrap();

        let found = db
            .order_by_exchange_id(cycle.id, 42)
            .unwrap()
            .expect("order by exchange id");
        assert_eq!(found.id, order.id);
        assert_eq!(
            found
                .exchange_order_data
                .as_ref()
                .and_then(|data| data.get("orderId"))
                .and_then(|v| v.as_i64()),
            Some(42)
        );
        assert!(db.order_by_exchange_id(cycle.id, 99).unwrap().is_none());

        order.status = OrderStatus::Filled;
        order.quantity_filled = dec("0.008");
        db.update_order(&order).unwrap();

        let open = db
            .orders_by_cycle_and_statuses(cycle.id, &[OrderStatus::New])
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].exchange_order_id, 43);

        let filled = db
            .orders_by_cycle_and_statuses(cycle.id, &[OrderStatus::Filled])
            .unwrap();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].quantity_filled, dec("0.008"));
    }
}

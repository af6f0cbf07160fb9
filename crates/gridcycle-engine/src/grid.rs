/*
[INPUT]:  Reference price, bot strategy parameters, per-symbol venue filters
[OUTPUT]: Grid price/quantity ladders, take-profit price, filter rounding
[POS]:    Strategy layer - pure pricing and sizing arithmetic
[UPDATE]: When ladder construction, sizing rules or venue filters change
*/

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{EngineError, Result};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Venue trading filters for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolFilters {
    /// Quantities are quantized down to a multiple of this step.
    pub qty_step: Decimal,
    /// Prices are rounded to a multiple of this tick.
    pub price_tick: Decimal,
    /// Minimum order notional in quote currency.
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Quantize a quantity down to the step size.
    pub fn quantize_qty(&self, qty: Decimal) -> Decimal {
        if self.qty_step.is_zero() {
            return qty;
        }
        (qty / self.qty_step).floor() * self.qty_step
    }

    /// Round a price to the tick (nearest, away from zero on midpoints).
    pub fn round_price(&self, price: Decimal) -> Decimal {
        let decimals = self.price_tick.normalize().scale();
        price.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Core-owned, configurable table of per-symbol filters.
#[derive(Debug, Clone)]
pub struct FilterTable {
    filters: HashMap<String, SymbolFilters>,
}

impl FilterTable {
    /// The venue defaults the engine ships with.
    pub fn with_defaults() -> Self {
        let mut filters = HashMap::new();
        filters.insert(
            "BTCUSDT".to_string(),
            SymbolFilters {
                qty_step: Decimal::new(1, 5),     // 0.00001
                price_tick: Decimal::new(1, 2),   // 0.01
                min_notional: Decimal::from(5),
            },
        );
        filters.insert(
            "ETHUSDT".to_string(),
            SymbolFilters {
                qty_step: Decimal::new(1, 4),     // 0.0001
                price_tick: Decimal::new(1, 2),   // 0.01
                min_notional: Decimal::from(5),
            },
        );
        filters.insert(
            "PEPEUSDT".to_string(),
            SymbolFilters {
                qty_step: Decimal::new(1, 8),     // 0.00000001
                price_tick: Decimal::new(1, 8),   // 0.00000001
                min_notional: Decimal::ONE,
            },
        );
        Self { filters }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, filters: SymbolFilters) {
        self.filters.insert(symbol.into(), filters);
    }

    pub fn get(&self, symbol: &str) -> Result<SymbolFilters> {
        self.filters
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Descending ladder of grid prices below the reference price.
///
/// Top of the ladder sits `first_order_offset` percent below the market; the
/// ladder spans `grid_length` percent of the top price in `num_orders` even
/// steps.
pub fn grid_prices(
    market_price: Decimal,
    first_order_offset: Decimal,
    grid_length: Decimal,
    num_orders: u32,
) -> Vec<Decimal> {
    let first_order_price = market_price * (Decimal::ONE - first_order_offset / HUNDRED);
    let total_drop = first_order_price * (grid_length / HUNDRED);
    let price_step = if num_orders > 1 {
        total_drop / Decimal::from(num_orders - 1)
    } else {
        Decimal::ZERO
    };

    (0..num_orders)
        .map(|i| first_order_price - price_step * Decimal::from(i))
        .collect()
}

/// Quantity for each grid level.
///
/// Seeds an equal split of the budget, grows each level geometrically by
/// `next_order_volume` percent, then rescales so the total notional matches
/// the budget exactly.
pub fn grid_quantities(
    prices: &[Decimal],
    budget: Decimal,
    next_order_volume: Decimal,
) -> Result<Vec<Decimal>> {
    if budget <= Decimal::ZERO {
        return Err(EngineError::CycleBudgetExhausted);
    }

    let price_sum: Decimal = prices.iter().copied().sum();
    if price_sum.is_zero() {
        return Err(EngineError::Invariant("grid prices sum to zero".to_string()));
    }

    let base_quantity = budget / price_sum;
    let growth = Decimal::ONE + next_order_volume / HUNDRED;

    let mut quantities = Vec::with_capacity(prices.len());
    let mut current = base_quantity;
    for _ in prices {
        quantities.push(current);
        current *= growth;
    }

    let total_value: Decimal = prices
        .iter()
        .zip(&quantities)
        .map(|(price, qty)| *price * *qty)
        .sum();
    let scale = budget / total_value;

    Ok(quantities.into_iter().map(|qty| qty * scale).collect())
}

/// Take-profit price over a weighted-average entry.
pub fn take_profit_price(average_entry: Decimal, profit_percentage: Decimal) -> Decimal {
    average_entry * (Decimal::ONE + profit_percentage / HUNDRED)
}

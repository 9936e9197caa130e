//! Transaction cost model: commission tables plus a pluggable slippage curve

use crate::core::types::{ExchangeId, Fill, InstrumentId, Price, Side, Volume};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Default average daily volume when none is configured for an instrument
pub const DEFAULT_AVG_DAILY_VOLUME: Volume = 1_000_000;

/// Fee schedule for one exchange or instrument
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommissionTable {
    /// Rate for providing liquidity (negative means a rebate)
    pub maker_rate: Price,
    /// Rate for taking liquidity
    pub taker_rate: Price,
    /// Flat fee per trade
    pub fixed_fee: Price,
    pub min_commission: Price,
    pub max_commission: Price,
}

impl Default for CommissionTable {
    fn default() -> Self {
        Self {
            maker_rate: 0.0,
            taker_rate: 0.001,
            fixed_fee: 0.0,
            min_commission: 0.0,
            max_commission: 1_000_000.0,
        }
    }
}

impl CommissionTable {
    /// `clamp(qty * price * rate + fixed, min, max)`
    pub fn commission(&self, quantity: Volume, price: Price, is_maker: bool) -> Price {
        let rate = if is_maker { self.maker_rate } else { self.taker_rate };
        let raw = quantity as Price * price * rate + self.fixed_fee;
        raw.clamp(self.min_commission, self.max_commission)
    }
}

/// Adverse price impact model. Results are signed costs, at most zero.
pub trait SlippageModel: Send + Sync {
    fn slippage(
        &self,
        instrument: &str,
        side: Side,
        quantity: Volume,
        reference_price: Price,
        avg_daily_volume: Volume,
    ) -> Price;
}

/// `rate = base + impact * (qty / adv)`
#[derive(Debug, Clone, Copy)]
pub struct LinearSlippage {
    pub base_rate: Price,
    pub impact_rate: Price,
}

impl Default for LinearSlippage {
    fn default() -> Self {
        Self {
            base_rate: 0.0001,
            impact_rate: 0.01,
        }
    }
}

impl SlippageModel for LinearSlippage {
    fn slippage(
        &self,
        _instrument: &str,
        _side: Side,
        quantity: Volume,
        reference_price: Price,
        avg_daily_volume: Volume,
    ) -> Price {
        if avg_daily_volume == 0 {
            return -(self.base_rate * reference_price).abs();
        }
        let volume_ratio = quantity as Price / avg_daily_volume as Price;
        let rate = self.base_rate + self.impact_rate * volume_ratio;
        -(rate * reference_price).abs()
    }
}

/// `rate = base + coeff * sqrt(qty / adv)`, flatter for large orders
#[derive(Debug, Clone, Copy)]
pub struct SqrtSlippage {
    pub base_rate: Price,
    pub impact_coefficient: Price,
}

impl Default for SqrtSlippage {
    fn default() -> Self {
        Self {
            base_rate: 0.0001,
            impact_coefficient: 0.1,
        }
    }
}

impl SlippageModel for SqrtSlippage {
    fn slippage(
        &self,
        _instrument: &str,
        _side: Side,
        quantity: Volume,
        reference_price: Price,
        avg_daily_volume: Volume,
    ) -> Price {
        if avg_daily_volume == 0 {
            return -(self.base_rate * reference_price).abs();
        }
        let volume_ratio = quantity as Price / avg_daily_volume as Price;
        let rate = self.base_rate + self.impact_coefficient * volume_ratio.sqrt();
        -(rate * reference_price).abs()
    }
}

/// Commission and slippage for one transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionCost {
    pub commission: Price,
    pub slippage: Price,
    pub total: Price,
}

impl TransactionCost {
    pub fn new(commission: Price, slippage: Price) -> Self {
        Self {
            commission,
            slippage,
            total: commission + slippage,
        }
    }
}

/// Composed cost model: commission tables resolved instrument-first,
/// exchange second, built-in default last, plus a slippage curve.
pub struct CostModel {
    exchange_tables: HashMap<ExchangeId, CommissionTable>,
    instrument_tables: HashMap<InstrumentId, CommissionTable>,
    avg_daily_volumes: HashMap<InstrumentId, Volume>,
    slippage_model: Box<dyn SlippageModel>,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            exchange_tables: HashMap::new(),
            instrument_tables: HashMap::new(),
            avg_daily_volumes: HashMap::new(),
            slippage_model: Box::new(LinearSlippage::default()),
        }
    }
}

impl CostModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exchange_commission(&mut self, exchange: impl Into<ExchangeId>, table: CommissionTable) {
        self.exchange_tables.insert(exchange.into(), table);
    }

    pub fn set_instrument_commission(
        &mut self,
        instrument: impl Into<InstrumentId>,
        table: CommissionTable,
    ) {
        self.instrument_tables.insert(instrument.into(), table);
    }

    pub fn set_slippage_model(&mut self, model: Box<dyn SlippageModel>) {
        self.slippage_model = model;
    }

    pub fn set_avg_daily_volume(&mut self, instrument: impl Into<InstrumentId>, volume: Volume) {
        self.avg_daily_volumes.insert(instrument.into(), volume);
    }

    fn table_for(&self, instrument: &str, exchange: &str) -> CommissionTable {
        if let Some(table) = self.instrument_tables.get(instrument) {
            return *table;
        }
        if let Some(table) = self.exchange_tables.get(exchange) {
            return *table;
        }
        CommissionTable::default()
    }

    pub fn commission(
        &self,
        instrument: &str,
        exchange: &str,
        quantity: Volume,
        price: Price,
        is_maker: bool,
    ) -> Price {
        self.table_for(instrument, exchange).commission(quantity, price, is_maker)
    }

    /// Full transaction cost. Aggressive orders pay taker rates.
    pub fn cost_of(
        &self,
        instrument: &str,
        exchange: &str,
        side: Side,
        quantity: Volume,
        price: Price,
        aggressive: bool,
    ) -> TransactionCost {
        let commission = self.commission(instrument, exchange, quantity, price, !aggressive);
        let adv = self
            .avg_daily_volumes
            .get(instrument)
            .copied()
            .unwrap_or(DEFAULT_AVG_DAILY_VOLUME);
        let slippage = self
            .slippage_model
            .slippage(instrument, side, quantity, price, adv);
        TransactionCost::new(commission, slippage)
    }

    /// Cost of an executed fill, treated as aggressive
    pub fn fill_cost(&self, fill: &Fill, exchange: &str) -> TransactionCost {
        self.cost_of(&fill.instrument, exchange, fill.side, fill.quantity, fill.price, true)
    }
}

/// Ready-made models for common venues
pub mod presets {
    use super::*;

    /// Zero-commission US equity venue with linear impact
    pub fn us_equity() -> CostModel {
        let mut model = CostModel::new();
        model.set_exchange_commission(
            "us_equity",
            CommissionTable {
                maker_rate: 0.0,
                taker_rate: 0.0,
                ..CommissionTable::default()
            },
        );
        model.set_slippage_model(Box::new(LinearSlippage {
            base_rate: 0.0001,
            impact_rate: 0.01,
        }));
        model
    }

    /// Crypto venue: 10bp both sides, square-root impact
    pub fn crypto() -> CostModel {
        let mut model = CostModel::new();
        model.set_exchange_commission(
            "crypto",
            CommissionTable {
                maker_rate: 0.001,
                taker_rate: 0.001,
                ..CommissionTable::default()
            },
        );
        model.set_slippage_model(Box::new(SqrtSlippage {
            base_rate: 0.0005,
            impact_coefficient: 0.1,
        }));
        model
    }

    /// Spread-only FX venue
    pub fn forex() -> CostModel {
        let mut model = CostModel::new();
        model.set_exchange_commission(
            "forex",
            CommissionTable {
                maker_rate: 0.0,
                taker_rate: 0.0,
                ..CommissionTable::default()
            },
        );
        model.set_slippage_model(Box::new(LinearSlippage {
            base_rate: 0.00005,
            impact_rate: 0.005,
        }));
        model
    }
}

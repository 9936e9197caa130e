//! Run results and engine statistics

use crate::core::types::{Duration, Fill, InstrumentId, Price, StrategyId, Timestamp};
use hashbrown::HashMap;
use serde::Serialize;

/// Annualization factor base for the Sharpe ratio (trading days per year)
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// One closed round trip, derived by pairing an exit fill against the most
/// recent entry for the same instrument.
#[derive(Debug, Clone, Serialize)]
pub struct RoundTrip {
    pub strategy: StrategyId,
    pub instrument: InstrumentId,
    pub entry_price: Price,
    pub exit_price: Price,
    /// Positive for closed longs, negative for closed shorts
    pub quantity: i64,
    pub entry_time: Timestamp,
    pub exit_time: Timestamp,
    /// Realized P&L net of the exit fill's commission
    pub pnl: Price,
}

impl RoundTrip {
    /// Fractional return on the entry notional
    pub fn trade_return(&self) -> f64 {
        let notional = self.entry_price * self.quantity.abs() as Price;
        if notional != 0.0 {
            self.pnl / notional
        } else {
            0.0
        }
    }
}

/// Pair fills into round trips, per (strategy, instrument).
///
/// A fill extending the position (or opening from flat) is an entry and
/// refreshes the weighted entry price; a fill reducing it is an exit and
/// closes quantity against that entry.
pub fn pair_round_trips(fills: &[Fill]) -> Vec<RoundTrip> {
    #[derive(Default)]
    struct OpenLot {
        quantity: i64,
        entry_price: Price,
        entry_time: Timestamp,
    }

    let mut lots: HashMap<(StrategyId, InstrumentId), OpenLot> = HashMap::new();
    let mut trips = Vec::new();

    for fill in fills {
        let key = (fill.strategy.clone(), fill.instrument.clone());
        let lot = lots.entry(key).or_default();
        let fill_qty = fill.signed_quantity();

        if lot.quantity == 0 || lot.quantity.signum() == fill_qty.signum() {
            if lot.quantity == 0 {
                lot.entry_time = fill.timestamp;
                lot.entry_price = fill.price;
            } else {
                let old = lot.entry_price * lot.quantity.abs() as Price;
                let add = fill.price * fill_qty.abs() as Price;
                lot.entry_price = (old + add) / (lot.quantity.abs() + fill_qty.abs()) as Price;
            }
            lot.quantity += fill_qty;
            continue;
        }

        let closed = fill_qty.abs().min(lot.quantity.abs());
        let direction = lot.quantity.signum();
        trips.push(RoundTrip {
            strategy: fill.strategy.clone(),
            instrument: fill.instrument.clone(),
            entry_price: lot.entry_price,
            exit_price: fill.price,
            quantity: direction * closed,
            entry_time: lot.entry_time,
            exit_time: fill.timestamp,
            pnl: (fill.price - lot.entry_price) * closed as Price * direction as Price
                - fill.commission,
        });

        lot.quantity += fill_qty;
        if lot.quantity != 0 && lot.quantity.signum() != direction {
            // Reversed through flat: the surplus opens a new lot
            lot.entry_price = fill.price;
            lot.entry_time = fill.timestamp;
        } else if lot.quantity == 0 {
            lot.entry_price = 0.0;
        }
    }
    trips
}

/// Aggregated outcome of one backtest run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestResults {
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub duration: Duration,

    pub total_pnl: Price,
    pub total_commission: Price,
    pub total_slippage: Price,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,

    /// Largest peak-to-trough decline of cumulative trade P&L
    pub max_drawdown: Price,
    /// Highest cumulative trade P&L reached
    pub max_profit: Price,
    /// Mean per-trade return over its standard deviation, annualized by sqrt(252)
    pub sharpe_ratio: f64,

    pub strategy_pnl: HashMap<StrategyId, Price>,
    /// Every fill of the run, in execution order
    pub trade_history: Vec<Fill>,
}

impl BacktestResults {
    pub fn win_rate(&self) -> f64 {
        if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64
        } else {
            0.0
        }
    }

    pub fn average_trade(&self) -> Price {
        if self.total_trades > 0 {
            self.total_pnl / self.total_trades as Price
        } else {
            0.0
        }
    }

    /// Gross profit over gross loss, from exits paired against the most
    /// recent entry per instrument. Zero when there are no losing trades.
    pub fn profit_factor(&self) -> f64 {
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        for trip in pair_round_trips(&self.trade_history) {
            if trip.pnl > 0.0 {
                gross_profit += trip.pnl;
            } else {
                gross_loss += -trip.pnl;
            }
        }
        if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        }
    }

    /// Fill in the trade-derived metrics from the fill history
    pub(crate) fn compute_trade_metrics(&mut self) {
        let trips = pair_round_trips(&self.trade_history);
        self.total_trades = trips.len();
        self.winning_trades = trips.iter().filter(|t| t.pnl > 0.0).count();
        self.losing_trades = self.total_trades - self.winning_trades;

        let mut cumulative = 0.0;
        let mut peak: Price = 0.0;
        self.max_drawdown = 0.0;
        self.max_profit = 0.0;
        for trip in &trips {
            cumulative += trip.pnl;
            peak = peak.max(cumulative);
            self.max_profit = self.max_profit.max(cumulative);
            self.max_drawdown = self.max_drawdown.max(peak - cumulative);
        }

        self.sharpe_ratio = sharpe_ratio(&trips);
    }
}

/// Annualized Sharpe ratio over per-trade returns
fn sharpe_ratio(trips: &[RoundTrip]) -> f64 {
    if trips.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = trips.iter().map(RoundTrip::trade_return).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

/// Engine throughput and order flow counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub events_processed: usize,
    pub orders_submitted: usize,
    pub orders_filled: usize,
    pub orders_rejected: usize,
    /// Wall-clock time spent inside `run`
    pub total_processing_time: std::time::Duration,
    pub events_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Side;

    fn fill(side: Side, price: Price, quantity: u64, commission: Price, secs: i64) -> Fill {
        Fill {
            order_id: 1,
            timestamp: Timestamp::from_secs(secs),
            instrument: "ES".to_string(),
            strategy: "s".to_string(),
            side,
            price,
            quantity,
            commission,
        }
    }

    #[test]
    fn exits_pair_against_most_recent_entry() {
        let fills = vec![
            fill(Side::Buy, 100.0, 10, 1.0, 0),
            fill(Side::Sell, 110.0, 10, 1.0, 10),
            fill(Side::Buy, 105.0, 5, 0.0, 20),
            fill(Side::Sell, 100.0, 5, 0.0, 30),
        ];

        let trips = pair_round_trips(&fills);
        assert_eq!(trips.len(), 2);
        // (110 - 100) * 10 - 1
        assert!((trips[0].pnl - 99.0).abs() < 1e-9);
        // (100 - 105) * 5
        assert!((trips[1].pnl - -25.0).abs() < 1e-9);
        assert_eq!(trips[1].quantity, 5);
    }

    #[test]
    fn short_round_trip_pairs_cover_against_entry() {
        let fills = vec![
            fill(Side::Sell, 100.0, 4, 0.0, 0),
            fill(Side::Buy, 90.0, 4, 0.0, 10),
        ];
        let trips = pair_round_trips(&fills);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].quantity, -4);
        assert!((trips[0].pnl - 40.0).abs() < 1e-9);
    }

    #[test]
    fn reversal_closes_then_reopens() {
        let fills = vec![
            fill(Side::Buy, 100.0, 5, 0.0, 0),
            fill(Side::Sell, 110.0, 8, 0.0, 10),
            fill(Side::Buy, 105.0, 3, 0.0, 20),
        ];
        let trips = pair_round_trips(&fills);
        assert_eq!(trips.len(), 2);
        assert!((trips[0].pnl - 50.0).abs() < 1e-9);
        // Short 3 from 110 covered at 105
        assert_eq!(trips[1].quantity, -3);
        assert!((trips[1].pnl - 15.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_track_wins_losses_and_drawdown() {
        let mut results = BacktestResults {
            trade_history: vec![
                fill(Side::Buy, 100.0, 10, 0.0, 0),
                fill(Side::Sell, 110.0, 10, 0.0, 10),
                fill(Side::Buy, 110.0, 10, 0.0, 20),
                fill(Side::Sell, 104.0, 10, 0.0, 30),
            ],
            ..Default::default()
        };
        results.compute_trade_metrics();

        assert_eq!(results.total_trades, 2);
        assert_eq!(results.winning_trades, 1);
        assert_eq!(results.losing_trades, 1);
        assert!((results.win_rate() - 0.5).abs() < 1e-9);
        // +100 then -60
        assert!((results.max_profit - 100.0).abs() < 1e-9);
        assert!((results.max_drawdown - 60.0).abs() < 1e-9);
        assert!((results.profit_factor() - 100.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_is_zero_without_losses() {
        let results = BacktestResults {
            trade_history: vec![
                fill(Side::Buy, 100.0, 1, 0.0, 0),
                fill(Side::Sell, 101.0, 1, 0.0, 10),
            ],
            ..Default::default()
        };
        assert_eq!(results.profit_factor(), 0.0);
    }
}

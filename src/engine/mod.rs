//! Backtest engine: wires the store, clock, bus, books, cost and risk models
//! into a time-ordered replay
//!
//! The loop merges per-instrument tick streams into one non-decreasing
//! timestamp sequence, advances the clock (firing due order deliveries),
//! refreshes book liquidity from the tick, and publishes the market event.
//! Strategies react synchronously; their signals become orders, orders become
//! fills after order latency, and fills flow back to the risk manager and the
//! owning strategy before the next tick is taken.

pub mod results;

pub use results::{BacktestResults, EngineStats, RoundTrip};

use crate::core::bus::EventBus;
use crate::core::clock::SimClock;
use crate::core::events::{Event, EventKind, MarketEvent, TimerEvent};
use crate::core::types::{
    Duration, InstrumentId, Order, OrderId, OrderType, Price, Side, StrategyId, Tick, Timestamp,
    Volume,
};
use crate::data::TickStore;
use crate::error::{EngineError, Result};
use crate::execution::cost::CostModel;
use crate::execution::handler::{ExecutionHandler, OrderSizer, RunRecorder, SharedBooks};
use crate::order_book::OrderBook;
use crate::risk::{RiskLimits, RiskManager};
use crate::strategy::{Strategy, StrategyContext};
use chrono::NaiveDate;
use hashbrown::HashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Reserved order ids for the liquidity mirrored from tick quotes
const MARKET_BID_ORDER: OrderId = OrderId::MAX;
const MARKET_ASK_ORDER: OrderId = OrderId::MAX - 1;

/// Ticks between progress/update callback invocations
const CALLBACK_STRIDE: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
struct SyntheticQuote {
    bid_price: Price,
    bid_size: Volume,
    ask_price: Price,
    ask_size: Volume,
}

struct StrategyHandle {
    strategy: Box<dyn Strategy>,
    ctx: StrategyContext,
    active: bool,
}

/// Event-driven backtest engine
pub struct BacktestEngine {
    store: TickStore,
    clock: Arc<SimClock>,
    bus: Arc<EventBus>,
    books: SharedBooks,
    risk: Arc<Mutex<RiskManager>>,
    cost: Arc<RwLock<CostModel>>,
    recorder: Arc<Mutex<RunRecorder>>,
    handler: Option<Arc<ExecutionHandler>>,
    strategies: Vec<StrategyHandle>,
    /// Fill/risk/timer events parked by bus subscribers for strategy dispatch
    inbox: Arc<Mutex<Vec<Event>>>,
    subscriptions: Vec<crate::core::bus::SubscriptionHandle>,
    last_quotes: HashMap<InstrumentId, SyntheticQuote>,

    market_data_latency: Duration,
    order_latency: Duration,
    sizer: OrderSizer,

    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,

    results: BacktestResults,
    stats: EngineStats,
    progress_callback: Option<Box<dyn Fn(f64) + Send>>,
    update_callback: Option<Box<dyn Fn(&BacktestResults) + Send>>,
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BacktestEngine {
    pub fn new() -> Self {
        Self {
            store: TickStore::new(),
            clock: Arc::new(SimClock::new(Timestamp::default())),
            bus: Arc::new(EventBus::new()),
            books: Arc::new(RwLock::new(HashMap::new())),
            risk: Arc::new(Mutex::new(RiskManager::default())),
            cost: Arc::new(RwLock::new(CostModel::new())),
            recorder: Arc::new(Mutex::new(RunRecorder::default())),
            handler: None,
            strategies: Vec::new(),
            inbox: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Vec::new(),
            last_quotes: HashMap::new(),
            market_data_latency: Duration::from_micros(1),
            order_latency: Duration::from_micros(100),
            sizer: OrderSizer::Unit,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            results: BacktestResults::default(),
            stats: EngineStats::default(),
            progress_callback: None,
            update_callback: None,
        }
    }

    // Configuration ------------------------------------------------------

    pub fn add_ticks(&mut self, instrument: &str, ticks: &[Tick]) {
        self.store.append_batch(instrument, ticks);
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        let ctx = StrategyContext::new(strategy.id());
        self.strategies.push(StrategyHandle {
            strategy,
            ctx,
            active: true,
        });
    }

    pub fn set_cost_model(&mut self, cost_model: CostModel) {
        *self.cost.write().unwrap() = cost_model;
    }

    pub fn set_risk_limits(&mut self, limits: RiskLimits) {
        self.risk.lock().unwrap().set_limits(limits);
    }

    pub fn set_strategy_risk_limits(&mut self, strategy: &str, limits: RiskLimits) {
        self.risk.lock().unwrap().set_strategy_limits(strategy, limits);
    }

    pub fn configure_latency(&mut self, market_data_latency: Duration, order_latency: Duration) {
        self.market_data_latency = market_data_latency;
        self.order_latency = order_latency;
    }

    pub fn set_order_sizer(&mut self, sizer: OrderSizer) {
        self.sizer = sizer;
    }

    pub fn set_progress_callback(&mut self, callback: impl Fn(f64) + Send + 'static) {
        self.progress_callback = Some(Box::new(callback));
    }

    pub fn set_update_callback(&mut self, callback: impl Fn(&BacktestResults) + Send + 'static) {
        self.update_callback = Some(Box::new(callback));
    }

    // Control ------------------------------------------------------------

    /// Flag observed between ticks; the loop blocks until `resume` or `stop`
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Exit after the current tick
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deactivate one strategy: it stops receiving market data
    pub fn pause_strategy(&mut self, id: &str) {
        for handle in &mut self.strategies {
            if handle.strategy.id() == id && handle.active {
                handle.active = false;
                handle.strategy.on_pause(&mut handle.ctx);
            }
        }
    }

    pub fn resume_strategy(&mut self, id: &str) {
        for handle in &mut self.strategies {
            if handle.strategy.id() == id && !handle.active {
                handle.active = true;
                handle.strategy.on_resume(&mut handle.ctx);
            }
        }
    }

    // Observation --------------------------------------------------------

    pub fn results(&self) -> &BacktestResults {
        &self.results
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Orders registered but not yet fully filled in the current run
    pub fn pending_orders(&self) -> usize {
        self.handler.as_ref().map_or(0, |h| h.pending_count())
    }

    // Execution ----------------------------------------------------------

    /// Replay the entire data set
    pub fn run(&mut self) -> Result<()> {
        self.run_range(Timestamp::MIN, Timestamp::MAX)
    }

    /// Replay ticks with `start <= timestamp <= end`
    pub fn run_range(&mut self, start: Timestamp, end: Timestamp) -> Result<()> {
        if self.store.is_empty() {
            return Err(EngineError::NoData);
        }
        if self.strategies.is_empty() {
            return Err(EngineError::NoStrategies);
        }

        let wall_start = std::time::Instant::now();
        self.prepare_run()?;

        // Per-instrument streams within the range; instruments() is sorted,
        // so equal timestamps tie-break deterministically by instrument id.
        let instruments = self.store.instruments();
        let streams: Vec<(InstrumentId, Vec<Tick>)> = instruments
            .iter()
            .map(|instrument| (instrument.clone(), self.store.range(instrument, start, end)))
            .collect();
        let total_ticks: usize = streams.iter().map(|(_, ticks)| ticks.len()).sum();

        let mut heap: BinaryHeap<Reverse<(Timestamp, usize, usize)>> = BinaryHeap::new();
        for (idx, (_, ticks)) in streams.iter().enumerate() {
            if let Some(first) = ticks.first() {
                heap.push(Reverse((first.timestamp, idx, 0)));
            }
        }
        if let Some(Reverse((first_ts, _, _))) = heap.peek() {
            self.clock.reset(*first_ts);
        }

        self.running.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        info!(total_ticks, "backtest started");

        self.start_strategies();

        let mut events_processed = 0usize;
        let mut processed_ticks = 0usize;
        let mut first_seen: Option<Timestamp> = None;
        let mut current_date: Option<NaiveDate> = None;
        let run_result = loop {
            let Some(Reverse((ts, idx, cursor))) = heap.pop() else {
                break Ok(());
            };
            if self.stop_requested.load(Ordering::SeqCst) {
                break Ok(());
            }
            while self.paused.load(Ordering::SeqCst) && !self.stop_requested.load(Ordering::SeqCst)
            {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }

            let tick = streams[idx].1[cursor].clone();
            if let Some(next) = streams[idx].1.get(cursor + 1) {
                heap.push(Reverse((next.timestamp, idx, cursor + 1)));
            }
            first_seen.get_or_insert(ts);

            // Due order deliveries fire before the tick becomes visible
            let visible = (ts + self.market_data_latency).max(self.clock.now());
            if let Err(err) = self.clock.advance_to(visible) {
                break Err(err);
            }

            // Calendar rollover: clear per-day risk counters and P&L
            if let Some(previous) = current_date {
                if tick.date > previous {
                    self.risk.lock().unwrap().reset_daily();
                }
            }
            current_date = Some(current_date.map_or(tick.date, |d| d.max(tick.date)));

            self.refresh_book_liquidity(&tick);
            self.risk.lock().unwrap().mark_to_market(&tick.instrument, tick.last_price);

            events_processed += 1;
            events_processed += self.dispatch_market(tick);
            events_processed += self.drain_inbox();

            processed_ticks += 1;
            if processed_ticks % CALLBACK_STRIDE == 0 || processed_ticks == total_ticks {
                self.fire_callbacks(processed_ticks, total_ticks, first_seen);
            }
        };

        // Drain residual scheduled events (in-flight orders, timers)
        if run_result.is_ok() && !self.stop_requested.load(Ordering::SeqCst) {
            while let Some(next) = self.clock.next_event_time() {
                let target = next.max(self.clock.now());
                self.clock.advance_to(target)?;
                events_processed += self.drain_inbox();
            }
        }

        self.stop_strategies();
        self.running.store(false, Ordering::SeqCst);

        self.finalize(first_seen, events_processed, wall_start.elapsed());
        info!(
            events = self.stats.events_processed,
            trades = self.results.total_trades,
            pnl = self.results.total_pnl,
            "backtest finished"
        );
        run_result
    }

    // Internals ----------------------------------------------------------

    /// Reset run-scoped state and wire the execution pipeline
    fn prepare_run(&mut self) -> Result<()> {
        self.store.sort_by_time();

        {
            let mut books = self.books.write().unwrap();
            books.clear();
            for instrument in self.store.instruments() {
                books.insert(instrument.clone(), OrderBook::new(instrument));
            }
        }
        self.last_quotes.clear();
        *self.recorder.lock().unwrap() = RunRecorder::default();
        self.risk.lock().unwrap().reset();
        self.inbox.lock().unwrap().clear();
        self.results = BacktestResults::default();
        self.stats = EngineStats::default();

        for handle in self.subscriptions.drain(..) {
            self.bus.unsubscribe(handle);
        }

        let handler = Arc::new(ExecutionHandler::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.clock),
            Arc::clone(&self.risk),
            Arc::clone(&self.cost),
            Arc::clone(&self.books),
            Arc::clone(&self.recorder),
            self.order_latency,
            self.sizer,
        ));

        let h = Arc::clone(&handler);
        self.subscriptions.push(self.bus.subscribe(EventKind::Signal, move |event| {
            if let Event::Signal(signal) = event {
                h.handle_signal(signal);
            }
        }));
        let h = Arc::clone(&handler);
        self.subscriptions.push(self.bus.subscribe(EventKind::Order, move |event| {
            if let Event::Order(order_event) = event {
                ExecutionHandler::route_order(&h, &order_event.order);
            }
        }));
        for kind in [EventKind::Fill, EventKind::Risk, EventKind::Timer] {
            let inbox = Arc::clone(&self.inbox);
            self.subscriptions.push(self.bus.subscribe(kind, move |event| {
                inbox.lock().unwrap().push(event.clone());
            }));
        }

        self.handler = Some(handler);
        Ok(())
    }

    fn start_strategies(&mut self) {
        let now = self.clock.now();
        for handle in &mut self.strategies {
            handle.ctx.set_now(now);
            handle.strategy.initialize(&mut handle.ctx);
            handle.strategy.on_start(&mut handle.ctx);
        }
        self.flush_strategy_outputs();
    }

    fn stop_strategies(&mut self) {
        let now = self.clock.now();
        for handle in &mut self.strategies {
            handle.ctx.set_now(now);
            handle.strategy.on_stop(&mut handle.ctx);
        }
    }

    /// Mirror the tick's top of book as resting liquidity, replacing the
    /// previous quote for the instrument. Strategy orders on the book are
    /// untouched.
    fn refresh_book_liquidity(&mut self, tick: &Tick) {
        let mut books = self.books.write().unwrap();
        let Some(book) = books.get_mut(&tick.instrument) else {
            return;
        };

        if let Some(quote) = self.last_quotes.get(&tick.instrument) {
            book.remove(MARKET_BID_ORDER, Side::Buy, quote.bid_price, quote.bid_size);
            book.remove(MARKET_ASK_ORDER, Side::Sell, quote.ask_price, quote.ask_size);
        }

        let mut applied = SyntheticQuote::default();
        if tick.bid_size > 0 && tick.bid_price > 0.0 {
            book.add(&Order::new(
                MARKET_BID_ORDER,
                tick.timestamp,
                tick.instrument.clone(),
                String::new(),
                Side::Buy,
                OrderType::Limit,
                tick.bid_price,
                tick.bid_size,
            ));
            applied.bid_price = tick.bid_price;
            applied.bid_size = tick.bid_size;
        }
        if tick.ask_size > 0 && tick.ask_price > 0.0 {
            book.add(&Order::new(
                MARKET_ASK_ORDER,
                tick.timestamp,
                tick.instrument.clone(),
                String::new(),
                Side::Sell,
                OrderType::Limit,
                tick.ask_price,
                tick.ask_size,
            ));
            applied.ask_price = tick.ask_price;
            applied.ask_size = tick.ask_size;
        }
        self.last_quotes.insert(tick.instrument.clone(), applied);
    }

    /// Publish the market event and let active strategies react.
    /// Returns the number of derived events published.
    fn dispatch_market(&mut self, tick: Tick) -> usize {
        let now = self.clock.now();
        let instrument = tick.instrument.clone();
        let event = MarketEvent { tick };
        self.bus.publish_sync(&Event::Market(event.clone()));

        let risk = Arc::clone(&self.risk);
        for handle in &mut self.strategies {
            if !handle.active {
                continue;
            }
            handle.ctx.set_now(now);
            let position = risk
                .lock()
                .unwrap()
                .position(handle.strategy.id(), &instrument)
                .map_or(0, |p| p.quantity);
            handle.ctx.set_position(&instrument, position);
            handle.strategy.on_market_data(&event, &mut handle.ctx);
        }
        self.flush_strategy_outputs()
    }

    /// Publish buffered signals and schedule requested timers for every
    /// strategy. Returns the number of events published.
    fn flush_strategy_outputs(&mut self) -> usize {
        let mut published = 0;
        let bus = Arc::clone(&self.bus);
        let clock = Arc::clone(&self.clock);
        for handle in &mut self.strategies {
            for signal in handle.ctx.take_signals() {
                bus.publish_sync(&Event::Signal(signal));
                published += 1;
            }
            for timer in handle.ctx.take_timers() {
                let strategy = handle.strategy.id().to_string();
                let timer_bus = Arc::clone(&bus);
                let at = timer.at;
                let timer_id = timer.timer_id;
                clock.schedule(at, move || {
                    timer_bus.publish_sync(&Event::Timer(TimerEvent {
                        timestamp: at,
                        strategy,
                        timer_id,
                    }));
                });
            }
        }
        published
    }

    /// Deliver parked fill/risk/timer events to their owning strategies,
    /// looping until nothing new arrives. Returns events dispatched.
    fn drain_inbox(&mut self) -> usize {
        let mut dispatched = 0;
        loop {
            let batch: Vec<Event> = std::mem::take(&mut *self.inbox.lock().unwrap());
            if batch.is_empty() {
                break;
            }
            let now = self.clock.now();
            for event in batch {
                dispatched += 1;
                let owner: &StrategyId = match &event {
                    Event::Fill(e) => &e.fill.strategy,
                    Event::Risk(e) => &e.strategy,
                    Event::Timer(e) => &e.strategy,
                    _ => continue,
                };
                let Some(handle) = self
                    .strategies
                    .iter_mut()
                    .find(|h| h.strategy.id() == owner.as_str())
                else {
                    continue;
                };
                handle.ctx.set_now(now);
                match &event {
                    Event::Fill(fill_event) => {
                        let position = self
                            .risk
                            .lock()
                            .unwrap()
                            .position(owner, &fill_event.fill.instrument)
                            .map_or(0, |p| p.quantity);
                        handle.ctx.set_position(&fill_event.fill.instrument, position);
                        handle.strategy.on_fill(fill_event, &mut handle.ctx);
                    }
                    Event::Risk(risk_event) => {
                        handle.strategy.on_risk_event(risk_event, &mut handle.ctx);
                    }
                    Event::Timer(timer_event) => {
                        handle.strategy.on_timer(timer_event, &mut handle.ctx);
                    }
                    _ => {}
                }
            }
            // Reactions may have emitted fresh signals
            dispatched += self.flush_strategy_outputs();
        }
        dispatched
    }

    fn fire_callbacks(&mut self, processed: usize, total: usize, first_seen: Option<Timestamp>) {
        if let Some(callback) = &self.progress_callback {
            let fraction = if total > 0 {
                processed as f64 / total as f64
            } else {
                1.0
            };
            callback(fraction);
        }
        if self.update_callback.is_some() {
            let interim = self.build_results(first_seen);
            if let Some(callback) = &self.update_callback {
                callback(&interim);
            }
        }
    }

    fn build_results(&self, first_seen: Option<Timestamp>) -> BacktestResults {
        let recorder = self.recorder.lock().unwrap();
        let risk = self.risk.lock().unwrap();

        let start_time = first_seen.unwrap_or_default();
        let end_time = self.clock.now();
        let mut results = BacktestResults {
            start_time,
            end_time,
            duration: end_time - start_time,
            total_commission: recorder.total_commission,
            total_slippage: recorder.total_slippage,
            trade_history: recorder.fills.clone(),
            ..Default::default()
        };
        for handle in &self.strategies {
            let id = handle.strategy.id().to_string();
            let pnl = risk.strategy_pnl(&id);
            results.total_pnl += pnl;
            results.strategy_pnl.insert(id, pnl);
        }
        results.compute_trade_metrics();
        results
    }

    fn finalize(
        &mut self,
        first_seen: Option<Timestamp>,
        events_processed: usize,
        elapsed: std::time::Duration,
    ) {
        self.results = self.build_results(first_seen);

        let recorder = self.recorder.lock().unwrap();
        self.stats = EngineStats {
            events_processed,
            orders_submitted: recorder.orders_submitted,
            orders_filled: recorder.orders_filled,
            orders_rejected: recorder.orders_rejected,
            total_processing_time: elapsed,
            events_per_second: if elapsed.as_secs_f64() > 0.0 {
                events_processed as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
        };
        debug!(stats = ?self.stats, "run statistics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tick(secs: i64, bid: Price, ask: Price) -> Tick {
        Tick {
            timestamp: Timestamp::from_secs(secs),
            instrument: "ES".to_string(),
            bid_price: bid,
            ask_price: ask,
            bid_size: 100,
            ask_size: 100,
            last_price: (bid + ask) / 2.0,
            volume: 10,
            open: bid,
            high: ask,
            low: bid,
            close: (bid + ask) / 2.0,
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        }
    }

    /// Buys once on the first tick, then holds
    struct BuyOnce {
        id: String,
        bought: bool,
    }

    impl Strategy for BuyOnce {
        fn id(&self) -> &str {
            &self.id
        }

        fn on_market_data(&mut self, event: &MarketEvent, ctx: &mut StrategyContext) {
            if !self.bought {
                self.bought = true;
                ctx.buy(&event.tick.instrument, 1.0);
            }
        }
    }

    #[test]
    fn run_without_data_or_strategies_fails() {
        let mut engine = BacktestEngine::new();
        assert!(matches!(engine.run(), Err(EngineError::NoData)));

        engine.add_ticks("ES", &[tick(1, 99.0, 100.0)]);
        assert!(matches!(engine.run(), Err(EngineError::NoStrategies)));
    }

    #[test]
    fn single_buy_round_trips_through_the_pipeline() {
        let mut engine = BacktestEngine::new();
        engine.add_ticks("ES", &(0..10).map(|i| tick(i, 99.0, 100.0)).collect::<Vec<_>>());
        engine.add_strategy(Box::new(BuyOnce {
            id: "buyer".to_string(),
            bought: false,
        }));

        engine.run().unwrap();

        let results = engine.results();
        assert_eq!(results.trade_history.len(), 1);
        let fill = &results.trade_history[0];
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.quantity, 1);
        assert_eq!(fill.price, 100.0);

        let stats = engine.stats();
        assert_eq!(stats.orders_submitted, 1);
        assert_eq!(stats.orders_filled, 1);
        assert_eq!(stats.orders_rejected, 0);
        assert!(stats.events_processed >= 10);
    }

    #[test]
    fn run_range_filters_ticks() {
        let mut engine = BacktestEngine::new();
        engine.add_ticks("ES", &(0..10).map(|i| tick(i, 99.0, 100.0)).collect::<Vec<_>>());
        engine.add_strategy(Box::new(BuyOnce {
            id: "buyer".to_string(),
            bought: false,
        }));

        engine
            .run_range(Timestamp::from_secs(5), Timestamp::from_secs(7))
            .unwrap();
        assert_eq!(engine.results().start_time, Timestamp::from_secs(5));
        assert!(engine.results().end_time >= Timestamp::from_secs(7));
    }
}

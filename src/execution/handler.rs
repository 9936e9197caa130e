//! Signal-to-order conversion, risk gating, latency routing and matching
//!
//! The handler owns the order id sequence and the pending-order registry. An
//! approved order is routed through the [`OrderRouter`], which schedules a
//! clock callback `order_latency` later; only at that point does the order
//! touch its book. Fills are priced through the cost model before anyone
//! else sees them.

use crate::core::bus::EventBus;
use crate::core::clock::SimClock;
use crate::core::events::{Event, FillEvent, OrderEvent, RiskEvent, RiskKind, SignalEvent};
use crate::core::types::{
    Duration, ExchangeId, InstrumentId, Order, OrderId, OrderStatus, OrderType, Price, Side,
    SignalKind, Volume,
};
use crate::execution::cost::CostModel;
use crate::order_book::OrderBook;
use crate::risk::RiskManager;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, warn};

/// Order books shared between the engine and the execution pipeline
pub type SharedBooks = Arc<RwLock<HashMap<InstrumentId, OrderBook>>>;

/// How signals translate into order quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSizer {
    /// Every entry signal trades one unit
    Unit,
    /// `max(1, round(strength * scale))`
    StrengthScaled { scale: f64 },
}

impl Default for OrderSizer {
    fn default() -> Self {
        OrderSizer::Unit
    }
}

impl OrderSizer {
    pub fn size(&self, strength: Price) -> Volume {
        match self {
            OrderSizer::Unit => 1,
            OrderSizer::StrengthScaled { scale } => (strength * scale).round().max(1.0) as Volume,
        }
    }
}

/// Counters and fill history accumulated over one run
#[derive(Debug, Default)]
pub struct RunRecorder {
    pub orders_submitted: usize,
    pub orders_filled: usize,
    pub orders_rejected: usize,
    pub fills: Vec<crate::core::types::Fill>,
    pub total_commission: Price,
    pub total_slippage: Price,
}

/// Applies order latency by scheduling delivery on the simulation clock
pub struct OrderRouter {
    clock: Arc<SimClock>,
    latency: Duration,
}

impl OrderRouter {
    pub fn new(clock: Arc<SimClock>, latency: Duration) -> Self {
        Self { clock, latency }
    }

    fn route(&self, handler: Arc<ExecutionHandler>, order: Order) {
        debug!(order_id = order.id, latency_ns = self.latency.nanos(), "routing order");
        self.clock.schedule_after(self.latency, move || handler.deliver(order));
    }
}

/// Converts signals to orders and orders to matched fills
pub struct ExecutionHandler {
    bus: Arc<EventBus>,
    clock: Arc<SimClock>,
    risk: Arc<Mutex<RiskManager>>,
    cost: Arc<RwLock<CostModel>>,
    books: SharedBooks,
    recorder: Arc<Mutex<RunRecorder>>,
    router: OrderRouter,
    sizer: OrderSizer,
    exchange: ExchangeId,
    next_order_id: AtomicU64,
    pending: Mutex<HashMap<OrderId, Order>>,
}

impl ExecutionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        clock: Arc<SimClock>,
        risk: Arc<Mutex<RiskManager>>,
        cost: Arc<RwLock<CostModel>>,
        books: SharedBooks,
        recorder: Arc<Mutex<RunRecorder>>,
        order_latency: Duration,
        sizer: OrderSizer,
    ) -> Self {
        let router = OrderRouter::new(Arc::clone(&clock), order_latency);
        Self {
            bus,
            clock,
            risk,
            cost,
            books,
            recorder,
            router,
            sizer,
            exchange: "default".to_string(),
            next_order_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_order_id(&self) -> OrderId {
        self.next_order_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Map a signal to a market order and submit it
    pub fn handle_signal(&self, signal: &SignalEvent) {
        let (side, quantity) = match signal.kind {
            SignalKind::Hold => return,
            SignalKind::Buy => (Side::Buy, self.sizer.size(signal.strength)),
            SignalKind::Sell => (Side::Sell, self.sizer.size(signal.strength)),
            SignalKind::Close => {
                let position = self
                    .risk
                    .lock()
                    .unwrap()
                    .position(&signal.strategy, &signal.instrument)
                    .map_or(0, |p| p.quantity);
                if position == 0 {
                    return;
                }
                let side = if position > 0 { Side::Sell } else { Side::Buy };
                (side, position.unsigned_abs())
            }
        };

        let reference = self
            .books
            .read()
            .unwrap()
            .get(&signal.instrument)
            .and_then(|b| b.mid_price())
            .unwrap_or(0.0);

        let order = Order::new(
            self.next_order_id(),
            self.clock.now(),
            signal.instrument.clone(),
            signal.strategy.clone(),
            side,
            OrderType::Market,
            reference,
            quantity,
        );
        self.submit(order);
    }

    /// Pre-trade gate, registration and routing
    pub fn submit(&self, order: Order) {
        if !self.books.read().unwrap().contains_key(&order.instrument) {
            self.reject(
                &order,
                RiskKind::UnknownInstrument,
                format!("no order book for instrument {}", order.instrument),
            );
            return;
        }

        let violation = self.risk.lock().unwrap().check(&order, order.timestamp);
        if let Some(violation) = violation {
            warn!(
                order_id = order.id,
                strategy = %order.strategy,
                kind = ?violation.kind,
                "order rejected: {}",
                violation.message
            );
            self.reject(&order, violation.kind.into(), violation.message);
            return;
        }

        self.risk.lock().unwrap().on_order_submitted(&order);
        self.pending.lock().unwrap().insert(order.id, order.clone());
        self.recorder.lock().unwrap().orders_submitted += 1;
        self.bus.publish_sync(&Event::Order(OrderEvent { order }));
    }

    /// Schedule delivery to the book after order latency
    pub fn route_order(handler: &Arc<Self>, order: &Order) {
        handler.router.route(Arc::clone(handler), order.clone());
    }

    fn reject(&self, order: &Order, kind: RiskKind, message: impl Into<String>) {
        self.recorder.lock().unwrap().orders_rejected += 1;
        self.bus.publish_sync(&Event::Risk(RiskEvent {
            timestamp: self.clock.now(),
            strategy: order.strategy.clone(),
            kind,
            message: message.into(),
            order_id: Some(order.id),
        }));
    }

    /// Match the order against its book at delivery time. Stop orders route
    /// as their market leg, stop-limits as their limit leg.
    fn deliver(self: Arc<Self>, order: Order) {
        let now = self.clock.now();
        let result = {
            let mut books = self.books.write().unwrap();
            let Some(book) = books.get_mut(&order.instrument) else {
                drop(books);
                self.reject(
                    &order,
                    RiskKind::UnknownInstrument,
                    format!("no order book for instrument {}", order.instrument),
                );
                return;
            };
            match order.order_type {
                OrderType::Market | OrderType::Stop => book.match_market(&order, now),
                OrderType::Limit | OrderType::StopLimit => book.match_limit(&order, now),
            }
        };

        let fills = match result {
            Ok(fills) => fills,
            Err(err) => {
                error!(order_id = order.id, "matching failed: {err}");
                return;
            }
        };
        if fills.is_empty() {
            // No liquidity: market orders stay unfilled, limit residue rests
            debug!(order_id = order.id, "no fills at delivery");
            return;
        }

        for mut fill in fills {
            let cost = self.cost.read().unwrap().cost_of(
                &fill.instrument,
                &self.exchange,
                fill.side,
                fill.quantity,
                fill.price,
                true,
            );
            fill.commission = cost.commission;

            {
                let mut pending = self.pending.lock().unwrap();
                if let Some(entry) = pending.get_mut(&fill.order_id) {
                    entry.filled_quantity += fill.quantity;
                    if entry.filled_quantity >= entry.quantity {
                        entry.status = OrderStatus::Filled;
                        pending.remove(&fill.order_id);
                        self.recorder.lock().unwrap().orders_filled += 1;
                    } else {
                        entry.status = OrderStatus::PartialFill;
                    }
                }
            }

            {
                let mut recorder = self.recorder.lock().unwrap();
                recorder.fills.push(fill.clone());
                recorder.total_commission += cost.commission;
                recorder.total_slippage += cost.slippage;
            }

            self.risk.lock().unwrap().on_fill(&fill);
            self.bus.publish_sync(&Event::Fill(FillEvent { fill }));
        }
    }

    pub fn pending_order(&self, order_id: OrderId) -> Option<Order> {
        self.pending.lock().unwrap().get(&order_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventKind;
    use crate::core::types::Timestamp;
    use crate::risk::RiskLimits;

    fn harness(order_latency: Duration) -> (Arc<ExecutionHandler>, Arc<SimClock>, Arc<Mutex<RunRecorder>>, Arc<Mutex<RiskManager>>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(SimClock::new(Timestamp::from_secs(0)));
        let risk = Arc::new(Mutex::new(RiskManager::new(RiskLimits::default())));
        let cost = Arc::new(RwLock::new(CostModel::new()));
        let recorder = Arc::new(Mutex::new(RunRecorder::default()));

        let mut books = HashMap::new();
        books.insert("ES".to_string(), OrderBook::new("ES"));
        let books: SharedBooks = Arc::new(RwLock::new(books));

        let handler = Arc::new(ExecutionHandler::new(
            Arc::clone(&bus),
            Arc::clone(&clock),
            Arc::clone(&risk),
            Arc::clone(&cost),
            books,
            Arc::clone(&recorder),
            order_latency,
            OrderSizer::Unit,
        ));

        // Wire order events back into the router, as the engine does
        let h = Arc::clone(&handler);
        bus.subscribe(EventKind::Order, move |event| {
            if let Event::Order(order_event) = event {
                ExecutionHandler::route_order(&h, &order_event.order);
            }
        });

        (handler, clock, recorder, risk, bus)
    }

    fn seed_asks(handler: &Arc<ExecutionHandler>, price: Price, quantity: Volume) {
        let mut books = handler.books.write().unwrap();
        let book = books.get_mut("ES").unwrap();
        book.add(&Order::new(
            999,
            Timestamp::from_secs(0),
            "ES".to_string(),
            "maker".to_string(),
            Side::Sell,
            OrderType::Limit,
            price,
            quantity,
        ));
    }

    fn signal(kind: SignalKind, strength: Price) -> SignalEvent {
        SignalEvent {
            timestamp: Timestamp::from_secs(0),
            instrument: "ES".to_string(),
            strategy: "test".to_string(),
            kind,
            strength,
        }
    }

    #[test]
    fn buy_signal_fills_after_latency() {
        let latency = Duration::from_micros(100);
        let (handler, clock, recorder, risk, _bus) = harness(latency);
        seed_asks(&handler, 100.0, 5);

        handler.handle_signal(&signal(SignalKind::Buy, 1.0));
        assert_eq!(recorder.lock().unwrap().orders_submitted, 1);
        assert!(recorder.lock().unwrap().fills.is_empty());

        clock.advance_by(Duration::from_micros(100)).unwrap();
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.fills.len(), 1);
        assert_eq!(recorder.fills[0].price, 100.0);
        assert_eq!(recorder.fills[0].quantity, 1);
        assert_eq!(recorder.orders_filled, 1);
        assert!(recorder.fills[0].timestamp >= Timestamp::from_secs(0) + latency);

        assert_eq!(risk.lock().unwrap().position("test", "ES").unwrap().quantity, 1);
    }

    #[test]
    fn hold_signals_are_ignored() {
        let (handler, _clock, recorder, _risk, _bus) = harness(Duration::ZERO);
        handler.handle_signal(&signal(SignalKind::Hold, 1.0));
        assert_eq!(recorder.lock().unwrap().orders_submitted, 0);
    }

    #[test]
    fn close_signal_flattens_the_position() {
        let (handler, clock, recorder, risk, _bus) = harness(Duration::ZERO);
        seed_asks(&handler, 100.0, 10);

        // Open 3 long, one unit per signal
        for _ in 0..3 {
            handler.handle_signal(&signal(SignalKind::Buy, 1.0));
            clock.advance_by(Duration::from_micros(1)).unwrap();
        }
        assert_eq!(risk.lock().unwrap().position("test", "ES").unwrap().quantity, 3);

        // Bid liquidity for the close
        {
            let mut books = handler.books.write().unwrap();
            books.get_mut("ES").unwrap().add(&Order::new(
                998,
                clock.now(),
                "ES".to_string(),
                "maker".to_string(),
                Side::Buy,
                OrderType::Limit,
                99.0,
                10,
            ));
        }

        handler.handle_signal(&signal(SignalKind::Close, 1.0));
        clock.advance_by(Duration::from_micros(1)).unwrap();
        assert_eq!(risk.lock().unwrap().position("test", "ES").unwrap().quantity, 0);
        assert_eq!(recorder.lock().unwrap().fills.last().unwrap().quantity, 3);

        // Closing while flat is a no-op
        handler.handle_signal(&signal(SignalKind::Close, 1.0));
        assert_eq!(recorder.lock().unwrap().orders_submitted, 4);
    }

    #[test]
    fn rejected_order_emits_risk_event_and_no_fills() {
        let (handler, clock, recorder, risk, bus) = harness(Duration::ZERO);
        seed_asks(&handler, 100.0, 100);
        risk.lock().unwrap().set_limits(RiskLimits {
            max_order_size: 0,
            ..RiskLimits::default()
        });

        let rejections = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&rejections);
        bus.subscribe(EventKind::Risk, move |event| {
            if let Event::Risk(risk_event) = event {
                r.lock().unwrap().push(risk_event.kind);
            }
        });

        handler.handle_signal(&signal(SignalKind::Buy, 1.0));
        clock.advance_by(Duration::from_micros(10)).unwrap();

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.orders_rejected, 1);
        assert_eq!(recorder.orders_submitted, 0);
        assert!(recorder.fills.is_empty());
        assert_eq!(rejections.lock().unwrap().len(), 1);
    }

    #[test]
    fn unknown_instrument_is_rejected() {
        let (handler, _clock, recorder, _risk, _bus) = harness(Duration::ZERO);
        let mut signal = signal(SignalKind::Buy, 1.0);
        signal.instrument = "NQ".to_string();
        handler.handle_signal(&signal);
        assert_eq!(recorder.lock().unwrap().orders_rejected, 1);
    }

    #[test]
    fn order_ids_increase_monotonically() {
        let (handler, _clock, _recorder, _risk, _bus) = harness(Duration::ZERO);
        let a = handler.next_order_id();
        let b = handler.next_order_id();
        assert!(b > a);
    }

    #[test]
    fn strength_scaled_sizer_floors_at_one() {
        let sizer = OrderSizer::StrengthScaled { scale: 10.0 };
        assert_eq!(sizer.size(0.72), 7);
        assert_eq!(sizer.size(0.01), 1);
        assert_eq!(OrderSizer::Unit.size(5.0), 1);
    }
}

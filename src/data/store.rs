//! Columnar per-instrument tick storage
//!
//! Each series keeps one vector per tick field so range scans stay
//! cache-friendly and batch ingestion amortizes allocation. Appends do not
//! enforce ordering; the engine calls [`TickStore::sort_by_time`] before a
//! run and every series is monotonic non-decreasing in timestamp afterwards.

use crate::core::types::{InstrumentId, Price, Tick, Timestamp, Volume};
use chrono::NaiveDate;
use hashbrown::HashMap;

/// One instrument's ticks, stored column-wise
#[derive(Debug, Clone, Default)]
pub struct TickSeries {
    timestamps: Vec<Timestamp>,
    bid_prices: Vec<Price>,
    ask_prices: Vec<Price>,
    bid_sizes: Vec<Volume>,
    ask_sizes: Vec<Volume>,
    last_prices: Vec<Price>,
    volumes: Vec<Volume>,
    opens: Vec<Price>,
    highs: Vec<Price>,
    lows: Vec<Price>,
    closes: Vec<Price>,
    dates: Vec<NaiveDate>,
}

impl TickSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.timestamps.reserve(additional);
        self.bid_prices.reserve(additional);
        self.ask_prices.reserve(additional);
        self.bid_sizes.reserve(additional);
        self.ask_sizes.reserve(additional);
        self.last_prices.reserve(additional);
        self.volumes.reserve(additional);
        self.opens.reserve(additional);
        self.highs.reserve(additional);
        self.lows.reserve(additional);
        self.closes.reserve(additional);
        self.dates.reserve(additional);
    }

    pub fn push(&mut self, tick: &Tick) {
        self.timestamps.push(tick.timestamp);
        self.bid_prices.push(tick.bid_price);
        self.ask_prices.push(tick.ask_price);
        self.bid_sizes.push(tick.bid_size);
        self.ask_sizes.push(tick.ask_size);
        self.last_prices.push(tick.last_price);
        self.volumes.push(tick.volume);
        self.opens.push(tick.open);
        self.highs.push(tick.high);
        self.lows.push(tick.low);
        self.closes.push(tick.close);
        self.dates.push(tick.date);
    }

    pub fn timestamp(&self, index: usize) -> Timestamp {
        self.timestamps[index]
    }

    /// Materialize the tick at `index`; the caller supplies the instrument
    pub fn tick(&self, index: usize, instrument: &str) -> Tick {
        Tick {
            timestamp: self.timestamps[index],
            instrument: instrument.to_string(),
            bid_price: self.bid_prices[index],
            ask_price: self.ask_prices[index],
            bid_size: self.bid_sizes[index],
            ask_size: self.ask_sizes[index],
            last_price: self.last_prices[index],
            volume: self.volumes[index],
            open: self.opens[index],
            high: self.highs[index],
            low: self.lows[index],
            close: self.closes[index],
            date: self.dates[index],
        }
    }

    /// Stable argsort by timestamp, then reorder every column
    fn sort_by_time(&mut self) {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.sort_by_key(|&i| self.timestamps[i]);
        if indices.iter().enumerate().all(|(pos, &i)| pos == i) {
            return;
        }

        fn reorder<T: Clone>(column: &mut Vec<T>, indices: &[usize]) {
            let reordered: Vec<T> = indices.iter().map(|&i| column[i].clone()).collect();
            *column = reordered;
        }

        reorder(&mut self.timestamps, &indices);
        reorder(&mut self.bid_prices, &indices);
        reorder(&mut self.ask_prices, &indices);
        reorder(&mut self.bid_sizes, &indices);
        reorder(&mut self.ask_sizes, &indices);
        reorder(&mut self.last_prices, &indices);
        reorder(&mut self.volumes, &indices);
        reorder(&mut self.opens, &indices);
        reorder(&mut self.highs, &indices);
        reorder(&mut self.lows, &indices);
        reorder(&mut self.closes, &indices);
        reorder(&mut self.dates, &indices);
    }
}

/// Summary over the whole store
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_ticks: usize,
    pub total_instruments: usize,
    pub earliest: Option<Timestamp>,
    pub latest: Option<Timestamp>,
}

/// Mapping instrument -> columnar tick series
#[derive(Debug, Clone, Default)]
pub struct TickStore {
    series: HashMap<InstrumentId, TickSeries>,
}

impl TickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, instrument: &str, tick: &Tick) {
        self.series.entry(instrument.to_string()).or_default().push(tick);
    }

    pub fn append_batch(&mut self, instrument: &str, ticks: &[Tick]) {
        let series = self.series.entry(instrument.to_string()).or_default();
        series.reserve(ticks.len());
        for tick in ticks {
            series.push(tick);
        }
    }

    /// Ticks with `start <= timestamp <= end`, in series order
    pub fn range(&self, instrument: &str, start: Timestamp, end: Timestamp) -> Vec<Tick> {
        let Some(series) = self.series.get(instrument) else {
            return Vec::new();
        };
        (0..series.len())
            .filter(|&i| {
                let ts = series.timestamp(i);
                ts >= start && ts <= end
            })
            .map(|i| series.tick(i, instrument))
            .collect()
    }

    pub fn at(&self, instrument: &str, index: usize) -> Option<Tick> {
        let series = self.series.get(instrument)?;
        (index < series.len()).then(|| series.tick(index, instrument))
    }

    /// Stable-sort every series by timestamp. Idempotent.
    pub fn sort_by_time(&mut self) {
        for series in self.series.values_mut() {
            series.sort_by_time();
        }
    }

    pub fn series(&self, instrument: &str) -> Option<&TickSeries> {
        self.series.get(instrument)
    }

    /// Instrument ids, sorted for deterministic iteration
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut out: Vec<InstrumentId> = self.series.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.series.get(instrument).map_or(0, TickSeries::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(TickSeries::is_empty)
    }

    /// All ticks, materialized per instrument
    pub fn all_ticks(&self) -> HashMap<InstrumentId, Vec<Tick>> {
        self.series
            .iter()
            .map(|(instrument, series)| {
                let ticks = (0..series.len()).map(|i| series.tick(i, instrument)).collect();
                (instrument.clone(), ticks)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    pub fn clear_instrument(&mut self, instrument: &str) {
        self.series.remove(instrument);
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total_instruments: self.series.len(),
            ..Default::default()
        };
        for series in self.series.values() {
            stats.total_ticks += series.len();
            for i in 0..series.len() {
                let ts = series.timestamp(i);
                stats.earliest = Some(stats.earliest.map_or(ts, |e| e.min(ts)));
                stats.latest = Some(stats.latest.map_or(ts, |l| l.max(ts)));
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(secs: i64, last: Price) -> Tick {
        Tick {
            timestamp: Timestamp::from_secs(secs),
            instrument: "ES".to_string(),
            bid_price: last - 0.25,
            ask_price: last + 0.25,
            bid_size: 10,
            ask_size: 10,
            last_price: last,
            volume: 100,
            open: last,
            high: last,
            low: last,
            close: last,
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        }
    }

    #[test]
    fn append_and_materialize() {
        let mut store = TickStore::new();
        store.append("ES", &tick(1, 100.0));
        store.append("ES", &tick(2, 101.0));

        assert_eq!(store.len("ES"), 2);
        let got = store.at("ES", 1).unwrap();
        assert_eq!(got.instrument, "ES");
        assert_eq!(got.last_price, 101.0);
        assert!(store.at("ES", 2).is_none());
        assert!(store.at("NQ", 0).is_none());
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let mut store = TickStore::new();
        for secs in 1..=5 {
            store.append("ES", &tick(secs, 100.0 + secs as Price));
        }

        let got = store.range("ES", Timestamp::from_secs(2), Timestamp::from_secs(4));
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].timestamp, Timestamp::from_secs(2));
        assert_eq!(got[2].timestamp, Timestamp::from_secs(4));

        assert!(store.range("ES", Timestamp::from_secs(6), Timestamp::from_secs(9)).is_empty());
        assert!(store.range("NQ", Timestamp::MIN, Timestamp::MAX).is_empty());
    }

    #[test]
    fn sort_by_time_is_stable_and_idempotent() {
        let mut store = TickStore::new();
        store.append("ES", &tick(3, 103.0));
        store.append("ES", &tick(1, 101.0));
        // Duplicate timestamp: insertion order must survive the sort
        store.append("ES", &tick(2, 102.0));
        store.append("ES", &tick(2, 102.5));

        store.sort_by_time();
        let ordered: Vec<Price> = (0..4).map(|i| store.at("ES", i).unwrap().last_price).collect();
        assert_eq!(ordered, vec![101.0, 102.0, 102.5, 103.0]);

        store.sort_by_time();
        let again: Vec<Price> = (0..4).map(|i| store.at("ES", i).unwrap().last_price).collect();
        assert_eq!(again, ordered);
    }

    #[test]
    fn batch_append_and_stats() {
        let mut store = TickStore::new();
        store.append_batch("ES", &[tick(1, 100.0), tick(2, 101.0)]);
        store.append("NQ", &tick(5, 5000.0));

        let stats = store.stats();
        assert_eq!(stats.total_ticks, 3);
        assert_eq!(stats.total_instruments, 2);
        assert_eq!(stats.earliest, Some(Timestamp::from_secs(1)));
        assert_eq!(stats.latest, Some(Timestamp::from_secs(5)));
        assert_eq!(store.instruments(), vec!["ES".to_string(), "NQ".to_string()]);
    }
}

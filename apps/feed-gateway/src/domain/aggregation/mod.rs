//! Bar Aggregation
//!
//! Streaming conversion of ticks into OHLCV bars. One [`BarAggregator`] runs
//! per active `(provider, security, spec)` and applies the slicing policy of
//! its [`BarFormat`]:
//!
//! | Format | Closes when |
//! |--------|-------------|
//! | `Time` | the epoch-aligned window of `length` seconds ends |
//! | `EqualEngineered` | `length` sampled ticks have been seen |
//! | `Displacement` | the sample moves `length * pip_size` from the open |
//! | `UnequalEngineered` | `length` ticks or `length` seconds, whichever first |
//!
//! Aggregators are driven by ticks and by a clock; both entry points return
//! the bars completed by that input, in order.
//!
//! # Time Base
//!
//! Slicing runs on the gateway's receive clock: each tick is fed with the
//! time it was received and the clock passes wall time. Provider timestamps
//! travel on the tick but never open, close or assign a slice, so a feed
//! whose clock drifts cannot close bars early. A `Time` tick received in a
//! window the clock has already closed is dropped as late.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use super::market::{Bar, BarFormat, BarSpecification, ProviderName, Security, Tick};

/// Upper bound on windows replayed by a single `Time` rollover.
///
/// A clock jump would otherwise emit one copied bar per skipped window.
pub const MAX_WINDOWS_PER_ROLL: u32 = 1_440;

// =============================================================================
// Bar Builder
// =============================================================================

/// Accumulates OHLCV for the bar in progress.
#[derive(Debug, Clone, Default)]
pub struct BarBuilder {
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
    volume: Decimal,
    count: u32,
    opened_at: Option<DateTime<Utc>>,
    last_close: Option<Decimal>,
}

impl BarBuilder {
    /// Apply one price sample.
    pub fn update(&mut self, price: Decimal, timestamp: DateTime<Utc>) {
        if self.open.is_none() {
            self.open = Some(price);
            self.high = Some(price);
            self.low = Some(price);
            self.opened_at = Some(timestamp);
        } else {
            self.high = self.high.map(|high| high.max(price));
            self.low = self.low.map(|low| low.min(price));
        }
        self.close = Some(price);
        self.count += 1;
    }

    /// Add traded size to the bar in progress; ignored when no bar is open.
    pub fn add_volume(&mut self, size: Decimal) {
        if self.is_open() {
            self.volume += size;
        }
    }

    /// Whether a bar is in progress.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Samples applied to the bar in progress.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Opening sample of the bar in progress.
    #[must_use]
    pub const fn open(&self) -> Option<Decimal> {
        self.open
    }

    /// When the bar in progress received its first sample.
    #[must_use]
    pub const fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Close of the last bar built.
    #[must_use]
    pub const fn last_close(&self) -> Option<Decimal> {
        self.last_close
    }

    /// Finish the bar in progress and reset.
    ///
    /// With no samples the previous close is carried forward as a copied
    /// bar; with no previous close either, nothing is built.
    pub fn build(
        &mut self,
        provider: &ProviderName,
        security: &Security,
        timestamp: DateTime<Utc>,
    ) -> Option<Bar> {
        let bar = match (self.open, self.high, self.low, self.close) {
            (Some(open), Some(high), Some(low), Some(close)) => Bar {
                open,
                high,
                low,
                close,
                volume: self.volume,
                security: security.clone(),
                provider: provider.clone(),
                request_id: None,
                timestamp,
                is_bar_copied: false,
            },
            _ => {
                let close = self.last_close?;
                Bar {
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: Decimal::ZERO,
                    security: security.clone(),
                    provider: provider.clone(),
                    request_id: None,
                    timestamp,
                    is_bar_copied: true,
                }
            }
        };

        self.reset();
        self.last_close = Some(bar.close);
        Some(bar)
    }

    fn reset(&mut self) {
        self.open = None;
        self.high = None;
        self.low = None;
        self.close = None;
        self.volume = Decimal::ZERO;
        self.count = 0;
        self.opened_at = None;
    }
}

// =============================================================================
// Bar Aggregator
// =============================================================================

/// Live aggregator for one `(provider, security, spec)`.
#[derive(Debug, Clone)]
pub struct BarAggregator {
    provider: ProviderName,
    security: Security,
    spec: BarSpecification,
    builder: BarBuilder,
    window_end: Option<DateTime<Utc>>,
    last_emitted: Option<DateTime<Utc>>,
    late_ticks: u64,
}

impl BarAggregator {
    /// Create an aggregator activated at `activated_at`.
    ///
    /// For `Time` bars the first window is the one containing
    /// `activated_at`; windows that ended earlier are never emitted.
    #[must_use]
    pub fn new(
        provider: impl Into<ProviderName>,
        security: Security,
        spec: BarSpecification,
        activated_at: DateTime<Utc>,
    ) -> Self {
        let window_end = (spec.format == BarFormat::Time)
            .then(|| window_end_after(activated_at, spec.length));

        Self {
            provider: provider.into(),
            security,
            spec,
            builder: BarBuilder::default(),
            window_end,
            last_emitted: None,
            late_ticks: 0,
        }
    }

    /// The specification driving this aggregator.
    #[must_use]
    pub const fn spec(&self) -> &BarSpecification {
        &self.spec
    }

    /// The security this aggregator consumes.
    #[must_use]
    pub const fn security(&self) -> &Security {
        &self.security
    }

    /// The bar in progress.
    #[must_use]
    pub const fn builder(&self) -> &BarBuilder {
        &self.builder
    }

    /// Ticks dropped because their `Time` window had already closed.
    #[must_use]
    pub const fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    /// Whether a tick received at `received_at` falls in a `Time` window
    /// that has already closed.
    #[must_use]
    pub fn is_late(&self, received_at: DateTime<Utc>) -> bool {
        self.window_end.is_some_and(|end| {
            received_at < end - Duration::seconds(i64::from(self.spec.length))
        })
    }

    /// Feed one tick received at `received_at`, returning the bars it
    /// completed.
    pub fn on_tick(&mut self, tick: &Tick, received_at: DateTime<Utc>) -> Vec<Bar> {
        let mut bars = Vec::new();
        if self.is_late(received_at) {
            self.late_ticks += 1;
            return bars;
        }

        let sample = self.spec.price_type.sample(tick);
        let volume = tick.traded_volume();
        let at = self
            .last_emitted
            .map_or(received_at, |last| last.max(received_at));

        match self.spec.format {
            BarFormat::Time => {
                self.roll_windows(at, &mut bars);
                self.apply(sample, volume, at);
            }
            BarFormat::EqualEngineered => {
                self.apply(sample, volume, at);
                if sample.is_some() && self.builder.count() >= self.spec.length {
                    self.emit(at, &mut bars);
                }
            }
            BarFormat::Displacement => {
                self.on_displacement_tick(sample, volume, at, &mut bars);
            }
            BarFormat::UnequalEngineered => {
                self.close_expired(at, &mut bars);
                self.apply(sample, volume, at);
                if sample.is_some() && self.builder.count() >= self.spec.length {
                    self.emit(at, &mut bars);
                }
            }
        }

        bars
    }

    /// Advance the clock, returning bars whose slice ended by `now`.
    pub fn on_clock(&mut self, now: DateTime<Utc>) -> Vec<Bar> {
        let mut bars = Vec::new();
        match self.spec.format {
            BarFormat::Time => self.roll_windows(now, &mut bars),
            BarFormat::UnequalEngineered => self.close_expired(now, &mut bars),
            BarFormat::EqualEngineered | BarFormat::Displacement => {}
        }
        bars
    }

    fn apply(&mut self, sample: Option<Decimal>, volume: Decimal, timestamp: DateTime<Utc>) {
        if let Some(price) = sample {
            self.builder.update(price, timestamp);
        }
        self.builder.add_volume(volume);
    }

    fn on_displacement_tick(
        &mut self,
        sample: Option<Decimal>,
        volume: Decimal,
        timestamp: DateTime<Utc>,
        bars: &mut Vec<Bar>,
    ) {
        let Some(price) = sample else {
            self.builder.add_volume(volume);
            return;
        };

        self.apply(Some(price), volume, timestamp);

        let crossed = self
            .builder
            .open()
            .is_some_and(|open| (price - open).abs() >= self.spec.displacement_threshold());

        if crossed {
            self.emit(timestamp, bars);
            // Next brick opens at the crossing sample.
            self.builder.update(price, timestamp);
        }
    }

    fn roll_windows(&mut self, now: DateTime<Utc>, bars: &mut Vec<Bar>) {
        let Some(mut window_end) = self.window_end else {
            return;
        };
        let length = Duration::seconds(i64::from(self.spec.length));

        let mut rolled = 0;
        while now >= window_end {
            if rolled == MAX_WINDOWS_PER_ROLL {
                window_end = window_end_after(now, self.spec.length);
                break;
            }
            self.emit(window_end, bars);
            window_end += length;
            rolled += 1;
        }

        self.window_end = Some(window_end);
    }

    fn close_expired(&mut self, now: DateTime<Utc>, bars: &mut Vec<Bar>) {
        let Some(opened_at) = self.builder.opened_at() else {
            return;
        };
        let deadline = opened_at + Duration::seconds(i64::from(self.spec.length));
        if now >= deadline {
            self.emit(deadline, bars);
        }
    }

    fn emit(&mut self, timestamp: DateTime<Utc>, bars: &mut Vec<Bar>) {
        let timestamp = self.last_emitted.map_or(timestamp, |last| last.max(timestamp));
        if let Some(bar) = self.builder.build(&self.provider, &self.security, timestamp) {
            self.last_emitted = Some(bar.timestamp);
            bars.push(bar);
        }
    }
}

/// End of the epoch-aligned window of `length` seconds containing `at`.
fn window_end_after(at: DateTime<Utc>, length: u32) -> DateTime<Utc> {
    let length = i64::from(length.max(1));
    let into_window = Duration::seconds(at.timestamp().rem_euclid(length))
        + Duration::nanoseconds(i64::from(at.timestamp_subsec_nanos()));
    at - into_window + Duration::seconds(length)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;
    use crate::domain::market::BarPriceType;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap() + Duration::seconds(seconds)
    }

    fn trade(price: Decimal, size: Decimal, seconds: i64) -> Tick {
        Tick::trade("SIM", Security::new("AAPL"), price, size, at(seconds))
    }

    fn aggregator(format: BarFormat, length: u32, pip_size: Decimal) -> BarAggregator {
        let spec = BarSpecification::new(format, BarPriceType::Last, length, pip_size);
        BarAggregator::new("SIM", Security::new("AAPL"), spec, at(0))
    }

    /// Feed a tick received at its own timestamp.
    fn feed(agg: &mut BarAggregator, tick: Tick) -> Vec<Bar> {
        let received_at = tick.timestamp;
        agg.on_tick(&tick, received_at)
    }

    #[test]
    fn builder_tracks_ohlcv() {
        let mut builder = BarBuilder::default();
        builder.update(dec!(10), at(0));
        builder.add_volume(dec!(1));
        builder.update(dec!(12), at(1));
        builder.add_volume(dec!(2));
        builder.update(dec!(9), at(2));
        builder.update(dec!(11), at(3));

        let bar = builder
            .build(&"SIM".to_string(), &Security::new("AAPL"), at(4))
            .unwrap();

        assert_eq!(
            (bar.open, bar.high, bar.low, bar.close, bar.volume),
            (dec!(10), dec!(12), dec!(9), dec!(11), dec!(3))
        );
        assert!(!bar.is_bar_copied);
        assert!(!builder.is_open());
        assert_eq!(builder.last_close(), Some(dec!(11)));
    }

    #[test]
    fn builder_without_history_builds_nothing() {
        let mut builder = BarBuilder::default();
        builder.add_volume(dec!(5));

        assert!(builder
            .build(&"SIM".to_string(), &Security::new("AAPL"), at(0))
            .is_none());
    }

    #[test]
    fn time_window_closes_on_rollover() {
        let mut agg = aggregator(BarFormat::Time, 60, Decimal::ZERO);

        assert!(feed(&mut agg, trade(dec!(100), dec!(1), 5)).is_empty());
        assert!(feed(&mut agg, trade(dec!(101), dec!(2), 30)).is_empty());
        let bars = feed(&mut agg, trade(dec!(99), dec!(1), 61));

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, dec!(100));
        assert_eq!(bars[0].close, dec!(101));
        assert_eq!(bars[0].volume, dec!(3));
        assert_eq!(bars[0].timestamp, at(60));
    }

    #[test]
    fn time_empty_window_emits_one_copied_bar() {
        let mut agg = aggregator(BarFormat::Time, 60, Decimal::ZERO);
        feed(&mut agg, trade(dec!(100), dec!(1), 10));
        feed(&mut agg, trade(dec!(102), dec!(1), 20));

        let first = agg.on_clock(at(60));
        assert_eq!(first.len(), 1);
        assert!(!first[0].is_bar_copied);

        assert!(agg.on_clock(at(90)).is_empty());

        let copied = agg.on_clock(at(120));
        assert_eq!(copied.len(), 1);
        let bar = &copied[0];
        assert!(bar.is_bar_copied);
        assert_eq!(
            (bar.open, bar.high, bar.low, bar.close),
            (dec!(102), dec!(102), dec!(102), dec!(102))
        );
        assert_eq!(bar.volume, Decimal::ZERO);
        assert_eq!(bar.timestamp, at(120));
    }

    #[test]
    fn time_nothing_before_first_tick() {
        let mut agg = aggregator(BarFormat::Time, 60, Decimal::ZERO);

        assert!(agg.on_clock(at(60)).is_empty());
        assert!(agg.on_clock(at(180)).is_empty());
    }

    #[test]
    fn time_gap_emits_one_bar_per_window() {
        let mut agg = aggregator(BarFormat::Time, 60, Decimal::ZERO);
        feed(&mut agg, trade(dec!(100), dec!(1), 1));

        let bars = agg.on_clock(at(240));

        assert_eq!(bars.len(), 4);
        assert!(!bars[0].is_bar_copied);
        assert!(bars[1..].iter().all(|bar| bar.is_bar_copied));
        assert_eq!(bars[3].timestamp, at(240));
    }

    #[test]
    fn time_huge_gap_is_capped() {
        let mut agg = aggregator(BarFormat::Time, 1, Decimal::ZERO);
        feed(&mut agg, trade(dec!(100), dec!(1), 0));

        let bars = agg.on_clock(at(100_000));

        assert_eq!(bars.len(), MAX_WINDOWS_PER_ROLL as usize);
        assert!(agg.on_clock(at(100_000)).is_empty());
    }

    #[test_case(1 ; "single tick bars")]
    #[test_case(3 ; "three tick bars")]
    #[test_case(5 ; "five tick bars")]
    fn equal_engineered_closes_every_length_ticks(length: u32) {
        let mut agg = aggregator(BarFormat::EqualEngineered, length, Decimal::ZERO);
        let mut emitted = Vec::new();

        for i in 0..(length * 3) {
            emitted.extend(feed(&mut agg, trade(Decimal::from(100 + i), dec!(1), i64::from(i))));
        }

        assert_eq!(emitted.len(), 3);
        for bar in &emitted {
            assert_eq!(bar.volume, Decimal::from(length));
        }
        assert_eq!(emitted[0].open, dec!(100));
        assert_eq!(emitted[2].close, Decimal::from(100 + length * 3 - 1));
    }

    #[test]
    fn equal_engineered_ignores_ticks_without_sample() {
        let mut agg = aggregator(BarFormat::EqualEngineered, 2, Decimal::ZERO);
        let quote = Tick::quote("SIM", Security::new("AAPL"), dec!(1), dec!(2), at(0));

        assert!(feed(&mut agg, quote.clone()).is_empty());
        assert!(feed(&mut agg, quote.clone()).is_empty());
        assert!(!agg.builder().is_open());
    }

    #[test]
    fn displacement_closes_at_crossing_and_reopens_there() {
        let mut agg = aggregator(BarFormat::Displacement, 5, dec!(0.1));
        let prices = [dec!(100.0), dec!(100.1), dec!(100.3), dec!(100.5), dec!(100.6)];

        let mut emitted = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            emitted.extend(feed(&mut agg, trade(*price, dec!(1), i64::try_from(i).unwrap())));
        }

        assert_eq!(emitted.len(), 1);
        let bar = &emitted[0];
        assert_eq!(bar.open, dec!(100.0));
        assert_eq!(bar.close, dec!(100.5));
        assert_eq!(bar.high, dec!(100.5));
        assert_eq!(bar.timestamp, at(3));
        assert_eq!(agg.builder().open(), Some(bar.close));
    }

    #[test]
    fn displacement_closes_on_downward_move() {
        let mut agg = aggregator(BarFormat::Displacement, 2, dec!(0.5));

        feed(&mut agg, trade(dec!(50), dec!(1), 0));
        let bars = feed(&mut agg, trade(dec!(49), dec!(1), 1));

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].low, dec!(49));
        assert_eq!(bars[0].volume, dec!(2));
    }

    #[test]
    fn unequal_engineered_closes_on_tick_count() {
        let mut agg = aggregator(BarFormat::UnequalEngineered, 3, Decimal::ZERO);

        feed(&mut agg, trade(dec!(1), dec!(1), 0));
        feed(&mut agg, trade(dec!(2), dec!(1), 1));
        let bars = feed(&mut agg, trade(dec!(3), dec!(1), 2));

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, at(2));
    }

    #[test]
    fn unequal_engineered_closes_on_elapsed_time() {
        let mut agg = aggregator(BarFormat::UnequalEngineered, 10, Decimal::ZERO);
        feed(&mut agg, trade(dec!(1), dec!(1), 0));

        assert!(agg.on_clock(at(5)).is_empty());
        let bars = agg.on_clock(at(12));

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, at(10));
        assert!(!agg.builder().is_open());
        assert!(agg.on_clock(at(30)).is_empty());
    }

    #[test]
    fn unequal_engineered_late_tick_closes_previous_bar_first() {
        let mut agg = aggregator(BarFormat::UnequalEngineered, 10, Decimal::ZERO);
        feed(&mut agg, trade(dec!(1), dec!(1), 0));

        let bars = feed(&mut agg, trade(dec!(7), dec!(4), 15));

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, dec!(1));
        assert_eq!(bars[0].volume, dec!(1));
        assert_eq!(agg.builder().open(), Some(dec!(7)));
    }

    #[test]
    fn unequal_engineered_ignores_provider_clock() {
        let mut agg = aggregator(BarFormat::UnequalEngineered, 10, Decimal::ZERO);

        // Provider clock a minute behind the gateway.
        agg.on_tick(&trade(dec!(1), dec!(1), -60), at(0));

        assert!(agg.on_clock(at(0) + Duration::milliseconds(250)).is_empty());
        assert!(agg.on_clock(at(9)).is_empty());
        let bars = agg.on_clock(at(10));
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, at(10));
    }

    #[test]
    fn time_window_ignores_provider_clock() {
        let mut agg = aggregator(BarFormat::Time, 60, Decimal::ZERO);

        agg.on_tick(&trade(dec!(100), dec!(1), 3_600), at(5));

        assert!(agg.on_clock(at(59)).is_empty());
        let bars = agg.on_clock(at(60));
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, at(60));
    }

    #[test]
    fn time_tick_after_its_window_closed_is_dropped() {
        let mut agg = aggregator(BarFormat::Time, 60, Decimal::ZERO);
        agg.on_tick(&trade(dec!(100), dec!(1), 5), at(5));

        let closed = agg.on_clock(at(61));
        assert_eq!(closed.len(), 1);
        assert_eq!(
            (closed[0].open, closed[0].close, closed[0].volume),
            (dec!(100), dec!(100), dec!(1))
        );

        assert!(agg.is_late(at(30)));
        assert!(agg.on_tick(&trade(dec!(200), dec!(5), 30), at(30)).is_empty());
        assert_eq!(agg.late_ticks(), 1);
        assert!(!agg.builder().is_open());

        let next = agg.on_clock(at(122));
        assert_eq!(next.len(), 1);
        assert!(next[0].is_bar_copied);
        assert_eq!(next[0].close, dec!(100));
        assert_eq!(next[0].volume, Decimal::ZERO);
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut agg = aggregator(BarFormat::EqualEngineered, 1, Decimal::ZERO);

        let first = feed(&mut agg, trade(dec!(1), dec!(1), 10));
        let second = feed(&mut agg, trade(dec!(1), dec!(1), 5));

        assert_eq!(first[0].timestamp, at(10));
        assert_eq!(second[0].timestamp, at(10));
    }

    #[test]
    fn window_end_is_epoch_aligned() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 17).unwrap();
        assert_eq!(
            window_end_after(ts, 60),
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 31, 0).unwrap()
        );
        let boundary = Utc.with_ymd_and_hms(2024, 3, 1, 14, 31, 0).unwrap();
        assert_eq!(window_end_after(boundary, 60), boundary + Duration::seconds(60));
    }

    fn format_strategy() -> impl Strategy<Value = BarFormat> {
        prop_oneof![
            Just(BarFormat::Time),
            Just(BarFormat::EqualEngineered),
            Just(BarFormat::Displacement),
            Just(BarFormat::UnequalEngineered),
        ]
    }

    proptest! {
        #[test]
        fn bars_respect_ohlc_bounds(
            format in format_strategy(),
            length in 1u32..8,
            prices in prop::collection::vec(1i64..10_000, 1..200),
        ) {
            let mut agg = aggregator(format, length, dec!(0.5));
            let mut bars = Vec::new();

            for (i, cents) in prices.iter().enumerate() {
                let seconds = i64::try_from(i).unwrap() * 3;
                bars.extend(feed(&mut agg, trade(Decimal::new(*cents, 2), dec!(1), seconds)));
                bars.extend(agg.on_clock(at(seconds + 1)));
            }

            for bar in &bars {
                prop_assert!(bar.high >= bar.open.max(bar.close));
                prop_assert!(bar.low <= bar.open.min(bar.close));
            }
            for pair in bars.windows(2) {
                prop_assert!(pair[0].timestamp <= pair[1].timestamp);
            }
        }
    }
}

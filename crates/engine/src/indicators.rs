//! Indicator library
//!
//! One enrichment pass over an immutable candle series attaches RSI, SMA,
//! Bollinger Bands, MACD, OBV and Fibonacci levels to every bar. Readings are
//! `None` until the bar index reaches the indicator's lookback. ATR and the
//! RSI slope angle are computed on demand over arbitrary windows.

use ta::indicators::{
    BollingerBands, MovingAverageConvergenceDivergence, OnBalanceVolume, SimpleMovingAverage,
    TrueRange,
};
use ta::Next;

use crate::config::IndicatorSettings;
use crate::types::{Candle, FibonacciLevels, Indicators};

// ============================================================================
// Enrichment pass
// ============================================================================

/// Return a copy of `candles` with every indicator field filled in
pub fn enrich(candles: &[Candle], settings: &IndicatorSettings) -> Vec<Candle> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let [short, medium, long] = settings.sma_periods;

    let rsi = rsi_series(&closes, settings.rsi_period);
    let sma = sma_series(&closes, short);
    let sma50 = sma_series(&closes, medium);
    let sma200 = sma_series(&closes, long);
    let bands = bollinger_series(&closes, settings.bb_period, settings.bb_multiplier);
    let macd = macd_series(&closes, settings);
    let obv = obv_series(candles);
    let fibonacci = fibonacci_levels(candles);

    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let band = bands[i];
            let m = macd[i];
            Candle {
                indicators: Indicators {
                    rsi: rsi[i],
                    sma: sma[i],
                    sma50: sma50[i],
                    sma200: sma200[i],
                    bb_upper: band.map(|b| b.upper),
                    bb_middle: band.map(|b| b.middle),
                    bb_lower: band.map(|b| b.lower),
                    macd_line: m.map(|m| m.line),
                    signal_line: m.map(|m| m.signal),
                    histogram: m.map(|m| m.histogram),
                    obv: obv[i],
                    fibonacci,
                },
                ..candle.clone()
            }
        })
        .collect()
}

// ============================================================================
// Series
// ============================================================================

/// Simple moving average, defined from index `period - 1`
pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let Ok(mut sma) = SimpleMovingAverage::new(period) else {
        return vec![None; values.len()];
    };
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = sma.next(v);
            (i + 1 >= period).then_some(out)
        })
        .collect()
}

/// Wilder RSI, defined from index `period` (one full window of price changes).
///
/// Average gain and loss are seeded with the simple mean of the first window,
/// then smoothed as `(avg * (period - 1) + change) / period`. A window without
/// losses reads 100.
pub fn rsi_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = values
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip();

    let p = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / p;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / p;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
        avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger Bands over a population standard deviation
pub fn bollinger_series(values: &[f64], period: usize, multiplier: f64) -> Vec<Option<Band>> {
    let Ok(mut bb) = BollingerBands::new(period, multiplier) else {
        return vec![None; values.len()];
    };
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = bb.next(v);
            (i + 1 >= period).then_some(Band {
                upper: out.upper,
                middle: out.average,
                lower: out.lower,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line, signal and histogram, defined once the signal EMA has a full window
pub fn macd_series(values: &[f64], settings: &IndicatorSettings) -> Vec<Option<MacdPoint>> {
    let Ok(mut macd) = MovingAverageConvergenceDivergence::new(
        settings.macd_fast,
        settings.macd_slow,
        settings.macd_signal,
    ) else {
        return vec![None; values.len()];
    };
    let warmup = settings.macd_warmup();
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = macd.next(v);
            (i >= warmup).then_some(MacdPoint {
                line: out.macd,
                signal: out.signal,
                histogram: out.histogram,
            })
        })
        .collect()
}

/// On-balance volume; the first bar contributes its full volume
pub fn obv_series(candles: &[Candle]) -> Vec<Option<f64>> {
    let mut obv = OnBalanceVolume::new();
    candles.iter().map(|c| Some(obv.next(c))).collect()
}

/// Retracements between the highest high and lowest low of the whole series
pub fn fibonacci_levels(candles: &[Candle]) -> Option<FibonacciLevels> {
    if candles.is_empty() {
        return None;
    }
    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range = high - low;
    let level = |ratio: f64| high - range * ratio;
    Some(FibonacciLevels {
        level_236: level(0.236),
        level_382: level(0.382),
        level_500: level(0.5),
        level_618: level(0.618),
        level_786: level(0.786),
    })
}

// ============================================================================
// Windowed helpers
// ============================================================================

/// Wilder-smoothed average true range over a window.
///
/// True ranges start at the second bar. Returns `None` when the window has
/// fewer than `period` true ranges.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let mut tr = TrueRange::new();
    let ranges: Vec<f64> = candles.iter().map(|c| tr.next(c)).skip(1).collect();

    let p = period as f64;
    let seed = ranges[..period].iter().sum::<f64>() / p;
    Some(
        ranges[period..]
            .iter()
            .fold(seed, |atr, &range| (atr * (p - 1.0) + range) / p),
    )
}

/// Slope angle in degrees between the first and last value, one step per sample.
///
/// Clamped to [-90, 90] and rounded to two decimals; `None` for fewer than two values.
pub fn rsi_angle(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let first = values[0];
    let last = values[values.len() - 1];
    let dx = (values.len() - 1) as f64;
    let degrees = (last - first).atan2(dx).to_degrees().clamp(-90.0, 90.0);
    Some((degrees * 100.0).round() / 100.0)
}

/// The last `n` available RSI readings, oldest first
pub fn recent_rsi(candles: &[Candle], n: usize) -> Vec<f64> {
    let mut values: Vec<f64> = candles
        .iter()
        .rev()
        .filter_map(|c| c.indicators.rsi)
        .take(n)
        .collect();
    values.reverse();
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candles(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Candle::new(i as i64 * 3600, p, p + 1.0, p - 1.0, p, 100.0))
            .collect()
    }

    fn trending(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1).collect()
    }

    #[test]
    fn test_sma_warmup_is_masked() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = sma_series(&values, 3);
        assert_eq!(sma[0], None);
        assert_eq!(sma[1], None);
        assert!((sma[2].unwrap() - 2.0).abs() < 1e-9);
        assert!((sma[4].unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        // changes +1, -1, +2: seed gain 0.5 / loss 0.5 -> 50,
        // then gain (0.5 + 2) / 2 = 1.25, loss 0.5 / 2 = 0.25 -> RS 5
        let rsi = rsi_series(&[10.0, 11.0, 10.0, 12.0], 2);
        assert!(rsi[0].is_none() && rsi[1].is_none());
        assert!((rsi[2].unwrap() - 50.0).abs() < 1e-9);
        assert!((rsi[3].unwrap() - 100.0 * 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_without_losses_is_100() {
        let rsi = rsi_series(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(rsi[3], Some(100.0));
        assert_eq!(rsi[4], Some(100.0));
        assert!(rsi_series(&[1.0, 2.0], 3).iter().all(Option::is_none));
    }

    #[test]
    fn test_macd_follows_configured_warmup() {
        let settings = IndicatorSettings::default();
        let macd = macd_series(&trending(60), &settings);
        let warmup = settings.macd_warmup();
        assert!(macd[warmup - 1].is_none());
        let first = macd[warmup].unwrap();
        assert!((first.histogram - (first.line - first.signal)).abs() < 1e-9);
    }

    #[test]
    fn test_bollinger_uses_population_stdev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = bollinger_series(&values, 8, 2.0);
        let last = bands[7].unwrap();
        // mean 5, population sigma 2
        assert!((last.middle - 5.0).abs() < 1e-9);
        assert!((last.upper - 9.0).abs() < 1e-9);
        assert!((last.lower - 1.0).abs() < 1e-9);
        assert!(bands[6].is_none());
    }

    #[test]
    fn test_enrich_availability_boundaries() {
        let candles = make_candles(&trending(250));
        let enriched = enrich(&candles, &IndicatorSettings::default());
        assert_eq!(enriched.len(), 250);

        assert!(enriched[13].indicators.rsi.is_none());
        assert!(enriched[14].indicators.rsi.is_some());
        assert!(enriched[18].indicators.sma.is_none());
        assert!(enriched[19].indicators.sma.is_some());
        assert!(enriched[19].indicators.bb_upper.is_some());
        assert!(enriched[48].indicators.sma50.is_none());
        assert!(enriched[49].indicators.sma50.is_some());
        assert!(enriched[198].indicators.sma200.is_none());
        assert!(enriched[199].indicators.sma200.is_some());
        assert!(enriched[32].indicators.signal_line.is_none());
        assert!(enriched[33].indicators.signal_line.is_some());
        assert!(enriched[0].indicators.obv.is_some());
        assert!(enriched[0].indicators.fibonacci.is_some());

        // raw OHLCV untouched
        assert_eq!(enriched[100].close, candles[100].close);
    }

    #[test]
    fn test_obv_starts_at_first_volume() {
        let mut candles = make_candles(&[10.0, 11.0, 10.5, 10.5]);
        candles[1].volume = 50.0;
        candles[2].volume = 30.0;
        let obv: Vec<f64> = obv_series(&candles).into_iter().flatten().collect();
        assert_eq!(obv, vec![100.0, 150.0, 120.0, 120.0]);
    }

    #[test]
    fn test_fibonacci_levels() {
        let candles = vec![
            Candle::new(0, 50.0, 110.0, 50.0, 100.0, 1.0),
            Candle::new(1, 60.0, 80.0, 10.0, 60.0, 1.0),
        ];
        let fib = fibonacci_levels(&candles).unwrap();
        assert!((fib.level_500 - 60.0).abs() < 1e-9);
        assert!((fib.level_236 - (110.0 - 100.0 * 0.236)).abs() < 1e-9);
        assert!(fibonacci_levels(&[]).is_none());
    }

    #[test]
    fn test_atr_requires_full_window() {
        let candles = make_candles(&[100.0; 14]);
        assert!(atr(&candles, 14).is_none());

        // flat closes, high - low = 2 on every bar
        let candles = make_candles(&[100.0; 15]);
        assert!((atr(&candles, 14).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_wilder_smoothing() {
        let mut candles = make_candles(&[100.0; 4]);
        candles[3].high = 105.0;
        // TRs: 2, 2, 6 -> seed over 2 = 2, then (2 * 1 + 6) / 2 = 4
        assert!((atr(&candles, 2).unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_angle() {
        assert_eq!(rsi_angle(&[25.0]), None);
        assert_eq!(rsi_angle(&[25.0, 35.0]), Some(84.29));
        assert_eq!(rsi_angle(&[50.0, 50.0, 50.0]), Some(0.0));
        assert!(rsi_angle(&[80.0, 20.0]).unwrap() < -89.0);
    }

    #[test]
    fn test_recent_rsi_skips_warmup() {
        let candles = enrich(&make_candles(&trending(20)), &IndicatorSettings::default());
        let values = recent_rsi(&candles, 10);
        assert_eq!(values.len(), 6);
        assert_eq!(values.last().copied(), candles[19].indicators.rsi);
    }
}

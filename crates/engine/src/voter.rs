//! Weighted multi-indicator signal voter
//!
//! Five sub-signals (SMA trend, RSI reversal, Bollinger breach, MACD, OBV)
//! each vote long, short or neutral with a fixed weight. The summed weights are
//! compared against the parameter set's confidence threshold.

use tracing::warn;

use crate::config::IndicatorSettings;
use crate::indicators::rsi_angle;
use crate::types::{Candle, ParameterSet, Signal, SignalDecision};

pub const SMA_WEIGHT: f64 = 0.25;
pub const RSI_WEIGHT: f64 = 0.20;
pub const BOLLINGER_WEIGHT: f64 = 0.25;
pub const MACD_WEIGHT: f64 = 0.15;
pub const OBV_WEIGHT: f64 = 0.15;

/// The individual votes behind a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubSignals {
    pub sma: Signal,
    pub rsi: Signal,
    pub bollinger: Signal,
    pub macd: Signal,
    pub obv: Signal,
}

impl SubSignals {
    fn weighted(&self) -> [(Signal, f64); 5] {
        [
            (self.sma, SMA_WEIGHT),
            (self.rsi, RSI_WEIGHT),
            (self.bollinger, BOLLINGER_WEIGHT),
            (self.macd, MACD_WEIGHT),
            (self.obv, OBV_WEIGHT),
        ]
    }

    /// Sum of weights voting long and short
    pub fn scores(&self) -> (f64, f64) {
        self.weighted()
            .iter()
            .fold((0.0, 0.0), |(long, short), &(signal, weight)| match signal {
                Signal::Long => (long + weight, short),
                Signal::Short => (long, short + weight),
                Signal::Neutral => (long, short),
            })
    }
}

/// Fields the voter cannot do without
struct Required {
    sma50: f64,
    sma200: f64,
    rsi: f64,
    bb_lower: f64,
    bb_upper: f64,
    obv: f64,
    previous_obv: f64,
}

fn required(current: &Candle, previous: &Candle) -> Result<Required, Vec<&'static str>> {
    let ind = &current.indicators;
    let checks = [
        ("sma50", ind.sma50),
        ("sma200", ind.sma200),
        ("rsi", ind.rsi),
        ("bb_lower", ind.bb_lower),
        ("bb_upper", ind.bb_upper),
        ("obv", ind.obv),
        ("previous_obv", previous.indicators.obv),
    ];
    let missing: Vec<&'static str> = checks
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();

    match checks.map(|(_, v)| v) {
        [Some(sma50), Some(sma200), Some(rsi), Some(bb_lower), Some(bb_upper), Some(obv), Some(previous_obv)] => {
            Ok(Required {
                sma50,
                sma200,
                rsi,
                bb_lower,
                bb_upper,
                obv,
                previous_obv,
            })
        }
        _ => Err(missing),
    }
}

/// Vote on `current` given the bar before it.
///
/// Missing indicator readings make the vote fall back to `short`. When both
/// scores clear the threshold, short wins because it is checked last.
pub fn vote(
    current: &Candle,
    previous: &Candle,
    params: &ParameterSet,
    settings: &IndicatorSettings,
) -> SignalDecision {
    let req = match required(current, previous) {
        Ok(req) => req,
        Err(missing) => {
            warn!(
                timestamp = current.timestamp,
                missing = ?missing,
                "Missing indicator data, voting short"
            );
            return SignalDecision {
                signal: Signal::Short,
                ..SignalDecision::neutral()
            };
        }
    };

    let subs = sub_signals(current, previous, &req, params, settings);
    let (long_score, short_score) = subs.scores();

    let mut signal = Signal::Neutral;
    if long_score >= params.confidence_threshold {
        signal = Signal::Long;
    }
    if short_score >= params.confidence_threshold {
        signal = Signal::Short;
    }

    let (stop_loss, take_profit) = match signal {
        Signal::Long => (Some(req.bb_lower), Some(req.bb_upper)),
        Signal::Short => (Some(req.bb_upper), Some(req.bb_lower)),
        Signal::Neutral => (None, None),
    };

    SignalDecision {
        signal,
        stop_loss,
        take_profit,
        long_score,
        short_score,
    }
}

fn sub_signals(
    current: &Candle,
    previous: &Candle,
    req: &Required,
    params: &ParameterSet,
    settings: &IndicatorSettings,
) -> SubSignals {
    let sma = if req.sma50 > req.sma200 {
        Signal::Long
    } else {
        Signal::Short
    };

    let rsi = match previous.indicators.rsi {
        Some(prev) => rsi_reversal(prev, req.rsi, params, settings),
        None => Signal::Neutral,
    };

    let bollinger = if current.close < req.bb_lower {
        Signal::Long
    } else if current.close > req.bb_upper {
        Signal::Short
    } else {
        Signal::Neutral
    };

    let macd = match (current.indicators.macd_line, current.indicators.signal_line) {
        (Some(line), Some(signal)) if line > signal => Signal::Long,
        _ => Signal::Short,
    };

    let obv = if req.obv > req.previous_obv {
        Signal::Long
    } else {
        Signal::Short
    };

    SubSignals {
        sma,
        rsi,
        bollinger,
        macd,
        obv,
    }
}

/// RSI crossing back out of an extreme zone with a steep enough slope
fn rsi_reversal(
    previous: f64,
    current: f64,
    params: &ParameterSet,
    settings: &IndicatorSettings,
) -> Signal {
    let mut signal = Signal::Neutral;

    if previous < params.rsi_oversold && current > previous && current > params.rsi_oversold {
        if let Some(angle) = rsi_angle(&[previous, current]) {
            if angle >= settings.rsi_angle_threshold_long {
                signal = Signal::Long;
            }
        }
    }

    if previous > params.rsi_overbought && current < previous && current < params.rsi_overbought {
        if let Some(angle) = rsi_angle(&[previous, current]) {
            if angle <= settings.rsi_angle_threshold_short {
                signal = Signal::Short;
            }
        }
    }

    signal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Indicators;

    fn bar(close: f64, indicators: Indicators) -> Candle {
        Candle {
            indicators,
            ..Candle::new(0, close, close + 1.0, close - 1.0, close, 100.0)
        }
    }

    /// Every sub-signal neutral or short except the SMA trend
    fn sma_only_long() -> (Candle, Candle) {
        let current = bar(
            100.0,
            Indicators {
                sma50: Some(105.0),
                sma200: Some(100.0),
                rsi: Some(50.0),
                bb_lower: Some(90.0),
                bb_upper: Some(110.0),
                obv: Some(1000.0),
                macd_line: Some(-1.0),
                signal_line: Some(0.0),
                ..Default::default()
            },
        );
        let previous = bar(
            100.0,
            Indicators {
                rsi: Some(50.0),
                obv: Some(1000.0),
                ..Default::default()
            },
        );
        (current, previous)
    }

    fn params(threshold: f64) -> ParameterSet {
        ParameterSet {
            confidence_threshold: threshold,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_fields_vote_short() {
        let current = bar(100.0, Indicators::default());
        let previous = bar(100.0, Indicators::default());
        let decision = vote(&current, &previous, &params(0.4), &IndicatorSettings::default());
        assert_eq!(decision.signal, Signal::Short);
        assert!(decision.stop_loss.is_none());
    }

    #[test]
    fn test_missing_previous_obv_votes_short() {
        let (current, mut previous) = sma_only_long();
        previous.indicators.obv = None;
        let decision = vote(&current, &previous, &params(0.1), &IndicatorSettings::default());
        assert_eq!(decision.signal, Signal::Short);
    }

    #[test]
    fn test_sma_alone_clears_low_threshold() {
        let (current, previous) = sma_only_long();
        let decision = vote(&current, &previous, &params(0.25), &IndicatorSettings::default());
        // MACD and OBV vote short (0.30) which also clears 0.25: short overrides
        assert_eq!(decision.long_score, SMA_WEIGHT);
        assert!((decision.short_score - 0.30).abs() < 1e-9);
        assert_eq!(decision.signal, Signal::Short);
    }

    #[test]
    fn test_sma_long_when_short_side_below_threshold() {
        let (mut current, previous) = sma_only_long();
        // OBV rising and MACD above signal: only neutral votes remain on the short side
        current.indicators.obv = Some(1500.0);
        current.indicators.macd_line = Some(1.0);
        let decision = vote(&current, &previous, &params(0.25), &IndicatorSettings::default());
        assert_eq!(decision.short_score, 0.0);
        assert_eq!(decision.signal, Signal::Long);
        assert_eq!(decision.stop_loss, Some(90.0));
        assert_eq!(decision.take_profit, Some(110.0));
    }

    #[test]
    fn test_short_overrides_long_when_both_clear() {
        // long: sma 0.25 + bollinger 0.25 = 0.50; short: macd 0.15 + obv 0.15 = 0.30
        let (mut current, previous) = sma_only_long();
        current.close = 85.0;
        let decision = vote(&current, &previous, &params(0.3), &IndicatorSettings::default());
        assert!((decision.long_score - 0.5).abs() < 1e-9);
        assert!((decision.short_score - 0.3).abs() < 1e-9);
        assert_eq!(decision.signal, Signal::Short);
        assert_eq!(decision.stop_loss, Some(110.0));
    }

    #[test]
    fn test_neutral_below_threshold() {
        let (current, previous) = sma_only_long();
        let decision = vote(&current, &previous, &params(0.6), &IndicatorSettings::default());
        assert_eq!(decision.signal, Signal::Neutral);
        assert!(decision.take_profit.is_none());
    }

    #[test]
    fn test_rsi_reversal_long_and_short() {
        let settings = IndicatorSettings::default();
        let p = params(0.4);
        assert_eq!(rsi_reversal(25.0, 35.0, &p, &settings), Signal::Long);
        // still below oversold
        assert_eq!(rsi_reversal(20.0, 28.0, &p, &settings), Signal::Neutral);
        assert_eq!(rsi_reversal(78.0, 65.0, &p, &settings), Signal::Short);
        assert_eq!(rsi_reversal(50.0, 55.0, &p, &settings), Signal::Neutral);
    }

    #[test]
    fn test_rsi_angle_gate() {
        let settings = IndicatorSettings {
            rsi_angle_threshold_long: 85.0,
            ..Default::default()
        };
        // atan2(6, 1) is about 80.5 degrees
        assert_eq!(rsi_reversal(27.0, 33.0, &params(0.4), &settings), Signal::Neutral);
    }

    #[test]
    fn test_missing_macd_counts_short() {
        let (mut current, previous) = sma_only_long();
        current.indicators.macd_line = None;
        current.indicators.obv = Some(1500.0);
        let decision = vote(&current, &previous, &params(0.9), &IndicatorSettings::default());
        assert!((decision.short_score - MACD_WEIGHT).abs() < 1e-9);
    }
}

//! Trend snapshot of the latest bar and the weighted recommendation built on it

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::IndicatorSettings;
use crate::evaluation::PeriodResult;
use crate::indicators::{recent_rsi, rsi_angle};
use crate::types::{Candle, Signal};

/// RSI readings used for the trend angle
pub const RSI_TREND_WINDOW: usize = 10;
/// Angle in degrees beyond which RSI counts as trending
pub const RSI_TREND_ANGLE: f64 = 15.0;

const HIGH_VOLUME: f64 = 500.0;
const MEDIUM_VOLUME: f64 = 200.0;

// Recommendation weights
const SMA_WEIGHT: f64 = 0.30;
const RSI_WEIGHT: f64 = 0.15;
const BOLLINGER_WEIGHT: f64 = 0.25;
const VOLUME_WEIGHT: f64 = 0.10;
const MACD_WEIGHT: f64 = 0.10;
const OBV_WEIGHT: f64 = 0.10;

// ============================================================================
// Trend analysis
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

impl Trend {
    fn from_comparison(a: Option<f64>, b: Option<f64>) -> Self {
        match (a, b) {
            (Some(a), Some(b)) if a > b => Trend::Up,
            (Some(a), Some(b)) if a < b => Trend::Down,
            _ => Trend::Neutral,
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trend::Up => "uptrend",
            Trend::Down => "downtrend",
            Trend::Neutral => "neutral",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiTrend {
    Up,
    Down,
    Sideways,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeLevel {
    High,
    Medium,
    Low,
}

impl VolumeLevel {
    pub fn classify(volume: f64) -> Self {
        if volume > HIGH_VOLUME {
            VolumeLevel::High
        } else if volume > MEDIUM_VOLUME {
            VolumeLevel::Medium
        } else {
            VolumeLevel::Low
        }
    }
}

impl fmt::Display for VolumeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VolumeLevel::High => "high",
            VolumeLevel::Medium => "medium",
            VolumeLevel::Low => "low",
        })
    }
}

/// Which Bollinger band the close sits nearer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandPosition {
    NearUpper,
    NearLower,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    /// SMA50 against SMA200
    pub sma_trend: Trend,
    /// MACD line against its signal line
    pub macd_trend: Trend,
    pub volume_level: VolumeLevel,
    /// OBV against the previous bar
    pub obv_trend: Trend,
    pub rsi_trend: RsiTrend,
    pub rsi_angle: Option<f64>,
    pub band_position: Option<BandPosition>,
}

/// Describe the trend at the last candle. `None` for an empty series.
pub fn analyze_trend(candles: &[Candle]) -> Option<TrendAnalysis> {
    let last = candles.last()?;
    let previous = candles.len().checked_sub(2).map(|i| &candles[i]);
    let ind = &last.indicators;

    let obv_trend = match previous {
        Some(prev) => Trend::from_comparison(ind.obv, prev.indicators.obv),
        None => Trend::Neutral,
    };

    let angle = rsi_angle(&recent_rsi(candles, RSI_TREND_WINDOW));
    let rsi_trend = match angle {
        Some(a) if a > RSI_TREND_ANGLE => RsiTrend::Up,
        Some(a) if a < -RSI_TREND_ANGLE => RsiTrend::Down,
        Some(_) => RsiTrend::Sideways,
        None => RsiTrend::Unknown,
    };

    let band_position = match (ind.bb_upper, ind.bb_lower) {
        (Some(upper), Some(lower)) => {
            if (last.close - upper).abs() < (last.close - lower).abs() {
                Some(BandPosition::NearUpper)
            } else {
                Some(BandPosition::NearLower)
            }
        }
        _ => None,
    };

    Some(TrendAnalysis {
        sma_trend: Trend::from_comparison(ind.sma50, ind.sma200),
        macd_trend: Trend::from_comparison(ind.macd_line, ind.signal_line),
        volume_level: VolumeLevel::classify(last.volume),
        obv_trend,
        rsi_trend,
        rsi_angle: angle,
        band_position,
    })
}

// ============================================================================
// Recommendation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub signal: Signal,
    /// Winning side's share of the directional weight
    pub confidence: f64,
    pub up_score: f64,
    pub down_score: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub max_risk: f64,
    pub text: String,
}

/// Mean win rate across evaluated periods, 0.5 when none were evaluated
pub fn average_win_rate(periods: &[PeriodResult]) -> f64 {
    if periods.is_empty() {
        return 0.5;
    }
    periods.iter().map(|p| p.result.win_rate).sum::<f64>() / periods.len() as f64
}

/// Per-indicator direction and weight feeding the recommendation
fn trend_votes(candle: &Candle, analysis: &TrendAnalysis) -> [(&'static str, Trend, f64); 6] {
    let ind = &candle.indicators;
    let rsi = match ind.rsi {
        Some(r) if r < 50.0 => Trend::Down,
        Some(_) => Trend::Up,
        None => Trend::Neutral,
    };
    let bollinger = match ind.bb_middle {
        Some(mid) if candle.close < mid => Trend::Down,
        Some(_) => Trend::Up,
        None => Trend::Neutral,
    };
    let volume = if analysis.volume_level == VolumeLevel::High {
        analysis.sma_trend
    } else {
        Trend::Neutral
    };

    [
        ("SMA", analysis.sma_trend, SMA_WEIGHT),
        ("RSI", rsi, RSI_WEIGHT),
        ("Bollinger", bollinger, BOLLINGER_WEIGHT),
        ("Volume", volume, VOLUME_WEIGHT),
        ("MACD", analysis.macd_trend, MACD_WEIGHT),
        ("OBV", analysis.obv_trend, OBV_WEIGHT),
    ]
}

/// Weighted trend vote on the latest candle.
///
/// Weights are scaled by `1 + avg_win_rate - 0.5`; the side whose share of
/// the directional weight reaches `threshold` wins, long checked first.
pub fn recommend(
    candle: &Candle,
    analysis: &TrendAnalysis,
    avg_win_rate: f64,
    threshold: f64,
    risk_per_trade: f64,
    indicators: &IndicatorSettings,
) -> Recommendation {
    let scale = 1.0 + (avg_win_rate - 0.5);
    let votes = trend_votes(candle, analysis);

    let (up, down) = votes
        .iter()
        .fold((0.0, 0.0), |(up, down), &(_, trend, weight)| match trend {
            Trend::Up => (up + weight * scale, down),
            Trend::Down => (up, down + weight * scale),
            Trend::Neutral => (up, down),
        });

    let total = up + down;
    let (up_ratio, down_ratio) = if total > 0.0 {
        (up / total, down / total)
    } else {
        (0.0, 0.0)
    };

    let ind = &candle.indicators;
    let (signal, confidence, stop_loss, take_profit) = if up_ratio >= threshold {
        (Signal::Long, up_ratio, ind.bb_lower, ind.bb_upper)
    } else if down_ratio >= threshold {
        (Signal::Short, down_ratio, ind.bb_upper, ind.bb_lower)
    } else {
        (Signal::Neutral, up_ratio.max(down_ratio), None, None)
    };

    debug!(
        signal = %signal,
        up_ratio,
        down_ratio,
        threshold,
        "Recommendation scored"
    );

    let mut recommendation = Recommendation {
        signal,
        confidence,
        up_score: up,
        down_score: down,
        stop_loss,
        take_profit,
        max_risk: risk_per_trade,
        text: String::new(),
    };
    recommendation.text = match signal {
        Signal::Neutral => neutral_text(&votes),
        _ => directional_text(candle, analysis, &recommendation, indicators),
    };
    recommendation
}

fn rsi_zone(rsi: Option<f64>, indicators: &IndicatorSettings) -> &'static str {
    match rsi {
        Some(r) if r > indicators.rsi_overbought => "overbought",
        Some(r) if r < indicators.rsi_oversold => "oversold",
        Some(_) => "neutral",
        None => "unavailable",
    }
}

fn fmt_level(level: Option<f64>) -> String {
    level.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
}

fn directional_text(
    candle: &Candle,
    analysis: &TrendAnalysis,
    rec: &Recommendation,
    indicators: &IndicatorSettings,
) -> String {
    let ind = &candle.indicators;
    let long = rec.signal == Signal::Long;
    let (title, sma_check, action) = if long {
        ("LONG signal (buy)", "SMA 50 > SMA 200", "Buy")
    } else {
        ("SHORT signal (sell)", "SMA 50 < SMA 200", "Sell")
    };
    let sma_holds = match (ind.sma50, ind.sma200) {
        (Some(a), Some(b)) => (a > b) == long && a != b,
        _ => false,
    };
    let rsi_angle = analysis
        .rsi_angle
        .map_or_else(|| "n/a".to_string(), |a| format!("{a:.2} deg"));
    let band = match analysis.band_position {
        Some(BandPosition::NearUpper) => "near the upper Bollinger band (resistance)",
        Some(BandPosition::NearLower) => "near the lower Bollinger band (support)",
        None => "without Bollinger context",
    };

    let mut lines = vec![
        format!("*{title}*"),
        format!("Confidence: {:.0}%", rec.confidence * 100.0),
        "Reasons:".to_string(),
        format!("- {sma_check}: {}", if sma_holds { "yes" } else { "no" }),
        format!(
            "- RSI at {} ({})",
            fmt_level(ind.rsi),
            rsi_zone(ind.rsi, indicators)
        ),
        format!("- RSI trend: {:?} ({rsi_angle})", analysis.rsi_trend),
        format!("- Price is {band}"),
        format!("- Volume is {}", analysis.volume_level),
        format!("- MACD shows a {}", analysis.macd_trend),
        format!("- OBV shows a {}", analysis.obv_trend),
        "Plan:".to_string(),
        format!("- {action} with a stop-loss at {} USD", fmt_level(rec.stop_loss)),
        format!("- Take-profit at {} USD", fmt_level(rec.take_profit)),
        format!("- Max risk: {:.1}% of the account", rec.max_risk * 100.0),
    ];
    lines.push(String::new());
    lines.join("\n")
}

fn neutral_text(votes: &[(&'static str, Trend, f64)]) -> String {
    let mut lines = vec![
        "*NEUTRAL (wait)*".to_string(),
        "No clear trend. Indicator support:".to_string(),
    ];
    for (name, trend, _) in votes {
        let support = match trend {
            Trend::Up => "supports uptrend",
            Trend::Down => "supports downtrend",
            Trend::Neutral => "neutral",
        };
        lines.push(format!("  - {name}: {support}"));
    }
    lines.push("Plan: wait for a clear signal.".to_string());
    lines.push(String::new());
    lines.join("\n")
}

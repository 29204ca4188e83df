//! Plain-text rendering of evaluation results

use std::fmt::Write as _;

use crate::config::BacktestSettings;
use crate::evaluation::PeriodResult;
use crate::monte_carlo::MonteCarloSummary;

const RULE_WIDTH: usize = 50;
const SECTION_WIDTH: usize = 30;

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Render every evaluated period, followed by the cost footer
pub fn render_backtest_report(periods: &[PeriodResult], settings: &BacktestSettings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Advanced Backtesting Report ===");
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));

    if periods.is_empty() {
        let _ = writeln!(out, "No period had enough history to evaluate.");
    }

    for PeriodResult { period, result: r } in periods {
        let profit = r.net_profit();
        let profit_pct = if r.initial_capital > 0.0 {
            profit / r.initial_capital * 100.0
        } else {
            0.0
        };
        let avg_rr = if r.total_trades > 0 {
            format!("{:.2}", r.risk_reward_ratio)
        } else {
            "N/A".to_string()
        };

        let _ = writeln!(
            out,
            "\n** {}-Term Performance ({} days) **\n{}",
            capitalize(period),
            r.days.unwrap_or(0),
            "-".repeat(SECTION_WIDTH)
        );
        let _ = writeln!(
            out,
            "Capital: {:.2} -> {:.2} ({:+.2}%)",
            r.initial_capital, r.final_capital, profit_pct
        );
        let _ = writeln!(
            out,
            "Trades: {} (W: {} | L: {}) | Win Rate: {:.1}%",
            r.total_trades,
            r.wins,
            r.losses,
            r.win_rate * 100.0
        );
        let _ = writeln!(
            out,
            "Risk Metrics: Sharpe {:.2} | Max DD {:.1}% | Avg RR {}",
            r.sharpe_ratio,
            r.drawdown_rate * 100.0,
            avg_rr
        );
        let _ = writeln!(
            out,
            "Trade Stats: Avg Profit {:.2} | Best {:.2} | Worst {:.2}",
            r.avg_profit_per_trade, r.best_trade, r.worst_trade
        );
        let _ = writeln!(
            out,
            "Exit Analysis: SL {:.1}% | TP {:.1}% | Manual {:.1}% | Avg Duration {:.0} periods",
            r.stop_loss_rate * 100.0,
            r.take_profit_rate * 100.0,
            r.manual_exit_rate * 100.0,
            r.avg_trade_duration
        );
        if let Some(params) = &r.optimized_params {
            let _ = writeln!(
                out,
                "Tuned: RSI {:.0}/{:.0} | SMA {}/{} | BB {} x{:.1} | Threshold {:.2}",
                params.rsi_overbought,
                params.rsi_oversold,
                params.sma_short,
                params.sma_long,
                params.bb_period,
                params.bb_multiplier,
                params.confidence_threshold
            );
        }
        let _ = writeln!(
            out,
            "\n{} Overall Performance: {:+.2}%",
            if profit_pct >= 0.0 { "[+]" } else { "[-]" },
            profit_pct
        );
    }

    let _ = writeln!(out, "\n{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(
        out,
        "Note: Includes trading fees ({:.2}%) and slippage ({:.2}%)",
        settings.trading_fee * 100.0,
        settings.slippage * 100.0
    );
    out
}

pub fn render_monte_carlo(summary: &MonteCarloSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Monte Carlo ({} paths) ===", summary.iterations);
    let _ = writeln!(
        out,
        "Final capital: median {:.2} | 5% {:.2} | 95% {:.2}",
        summary.median, summary.worst_5pct, summary.best_5pct
    );
    let _ = writeln!(
        out,
        "Probability of profit: {:.1}% | Max run-up {:.2} | Max drawdown {:.2}",
        summary.probability_profit * 100.0,
        summary.max_runup,
        summary.max_drawdown
    );
    out
}

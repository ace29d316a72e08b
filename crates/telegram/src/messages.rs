//! Plain-text renderings of watchlist events and status replies.

use common::{DailyStats, Direction, Outcome, SignalEvent};

/// `BTCUSDT` → `BTC`.
fn coin(symbol: &str) -> &str {
    symbol.strip_suffix("USDT").unwrap_or(symbol)
}

pub fn render(event: &SignalEvent) -> String {
    match event {
        SignalEvent::NewSignal {
            symbol,
            direction,
            entry,
            stop_loss,
            targets,
            sequence_today,
            reward_ratio,
            ..
        } => {
            let badge = match direction {
                Direction::Long => "🟢",
                Direction::Short => "🔴",
            };
            let tps = targets
                .iter()
                .map(|t| format!("{t:.4}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "🤖 Signal #{sequence_today}\n\
                 #{coin} – {direction} {badge}\n\
                 \n\
                 Entry: {entry:.4}\n\
                 Take profit: {tps}\n\
                 Stop-loss: {stop_loss:.4}\n\
                 R:R {reward_ratio:.2}:1\n\
                 \n\
                 ⚠️ Risk at most 1-2% per trade. Signals are for reference only.",
                coin = coin(symbol),
            )
        }

        SignalEvent::SignalResolved {
            symbol,
            outcome,
            profit_percent,
            sequence_today,
            targets_reached,
            ..
        } => match outcome {
            Outcome::Won => format!(
                "🎉 Signal #{sequence_today} hit TP{targets_reached}\n\
                 #{coin} {profit_percent:+.2}%",
                coin = coin(symbol),
            ),
            Outcome::Lost => format!(
                "Signal #{sequence_today} stopped out\n#{coin} {profit_percent:+.2}%",
                coin = coin(symbol),
            ),
        },

        SignalEvent::DailySummary {
            total_signals,
            wins,
            losses,
            profit_percent,
        } => {
            let stats = DailyStats {
                total_signals: *total_signals,
                wins: *wins,
                losses: *losses,
                profit_percent: *profit_percent,
            };
            let verdict = if stats.profit_percent > 0.0 { "✅ yes" } else { "❌ no" };
            format!(
                "📊 Daily summary\n\
                 \n\
                 Signals: {total_signals}\n\
                 Wins: {wins} ({win_rate:.1}%)\n\
                 Losses: {losses}\n\
                 Total profit: {profit_percent:.2}%\n\
                 Average profit: {avg:.2}%\n\
                 Profitable: {verdict}",
                win_rate = stats.win_rate(),
                avg = stats.average_profit(),
            )
        }
    }
}

/// Reply to `/stats`.
pub fn render_stats(stats: &DailyStats, open_signals: usize) -> String {
    format!(
        "📊 Today so far\n\
         \n\
         Signals: {}\n\
         Wins: {} ({:.1}%)\n\
         Losses: {}\n\
         Watching: {open_signals}\n\
         Total profit: {:.2}%",
        stats.total_signals,
        stats.wins,
        stats.win_rate(),
        stats.losses,
        stats.profit_percent,
    )
}

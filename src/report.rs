use crate::pipeline::PredictionResult;
use crate::ranges::RangeKey;
use std::fmt::Write;

/// Price summary plus the trailing bars of the range, as printed by the CLI.
pub fn render(result: &PredictionResult) -> String {
    let mut out = String::new();
    let profile = &result.range;
    let direction = if result.predicted_price >= result.current_price { "▲" } else { "▼" };

    let _ = writeln!(out, "\n╔════════════════════════════════════════════════════════════╗");
    let _ = writeln!(out, "║  {:<58}║", truncate(&format!("{} ({})", result.company_name, result.symbol), 58));
    let _ = writeln!(out, "╠════════════════════════════════════════════════════════════╣");
    let _ = writeln!(out, "║  Range:            {:<40}║", format!("{} ({} @ {})", profile.key, profile.period, profile.interval));
    let _ = writeln!(out, "║  Current price:    {:<40}║", format!("{:.4}", result.current_price));
    let _ = writeln!(
        out,
        "║  Predicted next:   {:<40}║",
        format!("{:.4} {} {:+.2}%", result.predicted_price, direction, result.change_pct())
    );
    let _ = writeln!(out, "║  Accuracy:         {:<40}║", format!("{:.2}%", result.metrics.accuracy));
    let _ = writeln!(out, "║  RMSE:             {:<40}║", format!("{:.4}", result.metrics.rmse));
    let _ = writeln!(out, "║  MAPE:             {:<40}║", format!("{:.2}%", result.metrics.mape));
    let _ = writeln!(out, "╠════════════════════════════════════════════════════════════╣");
    let _ = writeln!(out, "║  {:<16} {:>10} {:>10} {:>10} {:>8} ║", "Time", "Open", "High", "Low", "Close");
    let _ = writeln!(out, "╠════════════════════════════════════════════════════════════╣");

    for candle in result.series.tail(profile.tail) {
        let _ = writeln!(
            out,
            "║  {:<16} {:>10.2} {:>10.2} {:>10.2} {:>8.2} ║",
            candle.date.format(profile.dt_format).to_string(),
            candle.open,
            candle.high,
            candle.low,
            candle.close
        );
    }
    let _ = writeln!(out, "║  {:<16} {:>10} {:>10} {:>10} {:>8.2} ║", "next", "", "", "", result.predicted_price);
    let _ = writeln!(out, "╚════════════════════════════════════════════════════════════╝");
    out.push('\n');
    out.push_str("⚠  Educational use only. Not financial advice.\n");
    out
}

/// One line per range key, for `--list-ranges`.
pub fn render_ranges() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<5} {:<6} {:<9} {:<10} {:>4}", "key", "period", "interval", "format", "tail");
    for key in RangeKey::ALL {
        let p = key.profile();
        let _ = writeln!(out, "{:<5} {:<6} {:<9} {:<10} {:>4}", key, p.period, p.interval, p.dt_format, p.tail);
    }
    out
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max.saturating_sub(1)).chain(std::iter::once('…')).collect()
    }
}

use crate::api::TwinSummary;
use rust_decimal::{Decimal, RoundingStrategy};

/// Render an amount with exactly two decimal places, rounding half away from zero.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.2}", rounded)
}

/// One `key: value` line per summary field, in key order.
pub fn format_summary(summary: &TwinSummary) -> String {
    let mut keys: Vec<&String> = summary.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| match &summary[key] {
            serde_json::Value::String(text) => format!("{}: {}", key, text),
            other => format!("{}: {}", key, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

//! Defensive parsing boundary for exchange responses.
//!
//! Per the error-handling design, these functions are total: they never
//! panic or return an error, only `Option<f64>`, collapsing anything
//! non-finite or unparseable to `None`. Callers apply their own fallback
//! chain (e.g. prefer `size - remaining_size`, else `maker_amount`, else 0).

use serde_json::Value;

/// Parse a JSON value that may be a finite number or a numeric string.
/// Anything else - missing, non-numeric, NaN, infinite - is `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if n.is_finite() {
        Some(n)
    } else {
        None
    }
}

/// Case-insensitive normalization of a raw exchange order status string
/// into the subset this core cares about. Anything unrecognized is treated
/// as "still open" (continue polling) rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedStatus {
    Matched,
    Cancelled,
    OpenOrUnknown,
}

pub fn normalize_status(raw: &str) -> NormalizedStatus {
    match raw.to_ascii_uppercase().as_str() {
        "MATCHED" | "FILLED" => NormalizedStatus::Matched,
        "CANCELLED" | "CANCELED" => NormalizedStatus::Cancelled,
        _ => NormalizedStatus::OpenOrUnknown,
    }
}

/// Compute the filled quantity from a raw order status using the documented
/// fallback chain: prefer `size - remaining_size`, else `maker_amount`, else 0.
/// The result is clamped into `[0, requested_qty]`.
pub fn resolve_filled_qty(
    size: Option<f64>,
    remaining_size: Option<f64>,
    maker_amount: Option<f64>,
    requested_qty: f64,
) -> f64 {
    let raw = match (size, remaining_size) {
        (Some(size), Some(remaining)) => size - remaining,
        _ => maker_amount.unwrap_or(0.0),
    };
    let raw = if raw.is_finite() { raw } else { 0.0 };
    raw.clamp(0.0, requested_qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_number_accepts_number_and_string() {
        assert_eq!(parse_number(&json!(3.5)), Some(3.5));
        assert_eq!(parse_number(&json!("3.5")), Some(3.5));
        assert_eq!(parse_number(&json!("  -5 ")), Some(-5.0));
    }

    #[test]
    fn parse_number_rejects_garbage() {
        assert_eq!(parse_number(&json!("not a number")), None);
        assert_eq!(parse_number(&json!(null)), None);
        assert_eq!(parse_number(&json!({"a": 1})), None);
    }

    #[test]
    fn normalize_status_is_case_insensitive() {
        assert_eq!(normalize_status("filled"), NormalizedStatus::Matched);
        assert_eq!(normalize_status("MATCHED"), NormalizedStatus::Matched);
        assert_eq!(normalize_status("cancelled"), NormalizedStatus::Cancelled);
        assert_eq!(normalize_status("OPEN"), NormalizedStatus::OpenOrUnknown);
        assert_eq!(normalize_status("weird"), NormalizedStatus::OpenOrUnknown);
    }

    #[test]
    fn resolve_filled_qty_clamps_negative_remaining() {
        // boundary case: remainingSize = "-5" on a 10-token order -> clamp to 10
        let qty = resolve_filled_qty(Some(10.0), Some(-5.0), None, 10.0);
        assert_eq!(qty, 10.0);
    }

    #[test]
    fn resolve_filled_qty_falls_back_to_maker_amount() {
        let qty = resolve_filled_qty(None, None, Some(3.5), 10.0);
        assert_eq!(qty, 3.5);
    }

    #[test]
    fn resolve_filled_qty_defaults_to_zero() {
        let qty = resolve_filled_qty(None, None, None, 10.0);
        assert_eq!(qty, 0.0);
    }
}

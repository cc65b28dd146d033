//! Lenient conversions for loosely-typed inbound payload fields
//!
//! Clients send plain JSON mappings whose fields may be missing, null, or of
//! the wrong type. Rather than rejecting such payloads, fields degrade to a
//! default: strings to `""`, numbers to `0`. Validation of the values that
//! actually matter (match id, role) happens in the server's router.

use serde_json::Value;

/// Returns true if the value counts as "present" for defaulting purposes
///
/// Missing, `null`, `false`, `0`, `NaN` and the empty string are all treated
/// as absent, so `{"captureId": ""}` falls back to a generated id exactly like
/// a payload without the field.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Converts a field to a string, with absent values becoming `""`
pub fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(v) if is_truthy(v) => match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        },
        _ => String::new(),
    }
}

/// Converts a field to a number, with absent or non-numeric values becoming `0.0`
///
/// Numeric strings are accepted after trimming surrounding whitespace.
pub fn coerce_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(true)) => Some(1.0),
        _ => None,
    };

    parsed.filter(|f| f.is_finite()).unwrap_or(0.0)
}

/// Integral milliseconds for a coerced timestamp or duration
///
/// `0` means "not supplied" and maps to `None`, as does any value outside the
/// `i64` range. Fractional values are truncated toward zero only here, at the
/// point where they leave the server.
pub fn millis(value: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    if value == 0.0 || !value.is_finite() || value < i64::MIN as f64 || value >= i64::MAX as f64 {
        None
    } else {
        Some(value.trunc() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!([])));
    }

    #[test]
    fn test_coerce_string() {
        assert_eq!(coerce_string(None), "");
        assert_eq!(coerce_string(Some(&Value::Null)), "");
        assert_eq!(coerce_string(Some(&json!(""))), "");
        assert_eq!(coerce_string(Some(&json!(0))), "");
        assert_eq!(coerce_string(Some(&json!("m1"))), "m1");
        assert_eq!(coerce_string(Some(&json!(42))), "42");
        assert_eq!(coerce_string(Some(&json!(true))), "true");
        assert_eq!(coerce_string(Some(&json!([1, 2]))), "[1,2]");
    }

    #[test]
    fn test_coerce_number() {
        assert_approx_eq!(coerce_number(None), 0.0);
        assert_approx_eq!(coerce_number(Some(&json!(12.5))), 12.5);
        assert_approx_eq!(coerce_number(Some(&json!(" 1700000000000 "))), 1_700_000_000_000.0);
        assert_approx_eq!(coerce_number(Some(&json!("not a number"))), 0.0);
        assert_approx_eq!(coerce_number(Some(&json!({"x": 1}))), 0.0);
        assert_approx_eq!(coerce_number(Some(&json!(false))), 0.0);
    }

    #[test]
    fn test_coerce_number_keeps_huge_finite_values() {
        assert_approx_eq!(coerce_number(Some(&json!(-1e300))), -1e300, 1e290);
        assert_approx_eq!(coerce_number(Some(&json!("-1e300"))), -1e300, 1e290);
        assert_approx_eq!(coerce_number(Some(&json!("1e400"))), 0.0);
    }

    #[test]
    fn test_millis() {
        assert_eq!(millis(0.0), None);
        assert_eq!(millis(1500.9), Some(1500));
        assert_eq!(millis(-20.0), Some(-20));
        assert_eq!(millis(0.5), Some(0));
        assert_eq!(millis(-1e300), None);
        assert_eq!(millis(1e19), None);
        assert_eq!(millis(i64::MAX as f64), None);
        assert_eq!(millis(f64::NAN), None);
    }
}

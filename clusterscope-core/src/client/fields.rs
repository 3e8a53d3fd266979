//! Lenient field accessors for API payloads
//!
//! The hypervisor API is inconsistent about types: counters arrive as numbers
//! or numeric strings, flags as booleans, `0`/`1` or `"1"`. These helpers
//! normalise that so callers can build typed records.

use serde_json::Value;

pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub fn string_field(value: &Value, key: &str) -> Option<String> {
    str_field(value, key).map(str::to_string)
}

pub fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn i64_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn f64_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Truthy: `true`, non-zero numbers, `"1"`, or strings starting with `enabled=1`
pub fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => {
            let s = s.trim();
            s == "1" || s.starts_with("1,") || s.starts_with("enabled=1")
        }
        _ => false,
    }
}

/// Load averages arrive as an array of numbers or numeric strings
pub fn f64_list(value: &Value, key: &str) -> Vec<f64> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_numbers_and_flags() {
        let v = json!({
            "uptime": "3600",
            "maxmem": 2048,
            "cpu": 0.25,
            "agent": "enabled=1,fstrim_cloned_disks=1",
            "shared": 1,
            "loadavg": ["0.10", 0.2, "x"]
        });

        assert_eq!(u64_field(&v, "uptime"), Some(3600));
        assert_eq!(u64_field(&v, "maxmem"), Some(2048));
        assert_eq!(f64_field(&v, "cpu"), Some(0.25));
        assert!(bool_field(&v, "agent"));
        assert!(bool_field(&v, "shared"));
        assert!(!bool_field(&v, "missing"));
        assert_eq!(f64_list(&v, "loadavg"), vec![0.10, 0.2]);
    }
}

//! Typed readers for envelope payload fields
//!
//! Devices report numbers as JSON integers, occasionally as strings. Sensor
//! readings are integers scaled by 100, with [`NULL_VALUE`] meaning "no reading".

use std::ops::RangeInclusive;

use serde_json::Value;

use super::CommandData;

/// Reserved value the firmware uses for absent readings
pub const NULL_VALUE: i64 = 99_999;

/// Valid raw band of scaled sensor readings (0.1 ..= 100.0)
pub const SENSOR_RAW_RANGE: RangeInclusive<i64> = 10..=10_000;

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

/// Integer field if present and numeric.
pub fn opt_int_field(data: &CommandData, key: &str) -> Option<i64> {
    data.get(key).and_then(as_int)
}

pub fn int_field(data: &CommandData, key: &str, default: i64) -> i64 {
    opt_int_field(data, key).unwrap_or(default)
}

pub fn bool_field(data: &CommandData, key: &str, default: bool) -> bool {
    opt_int_field(data, key)
        .map(|value| value != 0)
        .unwrap_or(default)
}

/// Integer field restricted to `range`; the sentinel and out-of-range values read as absent.
pub fn ranged_int_field(data: &CommandData, key: &str, range: RangeInclusive<i64>) -> Option<i64> {
    opt_int_field(data, key).filter(|value| *value != NULL_VALUE && range.contains(value))
}

/// Scaled sensor reading, `None` for the sentinel or anything outside 0.1 ..= 100.
pub fn sensor_field(data: &CommandData, key: &str) -> Option<f64> {
    let raw = int_field(data, key, NULL_VALUE);
    if raw == NULL_VALUE || !SENSOR_RAW_RANGE.contains(&raw) {
        return None;
    }

    Some(raw as f64 / 100.0)
}

pub fn string_field(data: &CommandData, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> CommandData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn sentinel_reads_as_absent() {
        let payload = data(json!({ "h0": NULL_VALUE }));
        assert_eq!(sensor_field(&payload, "h0"), None);
        assert_eq!(sensor_field(&payload, "missing"), None);
    }

    #[test]
    fn sensor_range_boundaries() {
        let payload = data(json!({ "low": 10, "high": 10000, "below": 9, "above": 10001 }));
        assert_eq!(sensor_field(&payload, "low"), Some(0.1));
        assert_eq!(sensor_field(&payload, "high"), Some(100.0));
        assert_eq!(sensor_field(&payload, "below"), None);
        assert_eq!(sensor_field(&payload, "above"), None);
    }

    #[test]
    fn ranged_int_boundaries() {
        let payload = data(json!({ "zero": 0, "max": 120, "over": 121, "null": NULL_VALUE }));
        assert_eq!(ranged_int_field(&payload, "zero", 0..=120), Some(0));
        assert_eq!(ranged_int_field(&payload, "max", 0..=120), Some(120));
        assert_eq!(ranged_int_field(&payload, "over", 0..=120), None);
        assert_eq!(ranged_int_field(&payload, "null", 0..=120), None);
    }

    #[test]
    fn numbers_in_strings_are_accepted() {
        let payload = data(json!({ "power": "1", "cadr": " 42 ", "version": 105 }));
        assert!(bool_field(&payload, "power", false));
        assert_eq!(int_field(&payload, "cadr", 0), 42);
        assert_eq!(string_field(&payload, "version"), Some("105".to_string()));
    }
}

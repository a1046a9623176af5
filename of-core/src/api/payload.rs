//! Normalization of firmware response bodies
//!
//! Firmware revisions disagree on nearly everything: values may sit at the
//! top level or under `data`, numbers may be strings, acknowledgements may
//! be JSON or a bare `OK`. These helpers flatten that into plain values.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::constants::limits;
use crate::data::BoardStatus;

const OK_STATUS_VALUES: &[&str] = &["ok", "success", ""];
const OK_TEXT_VALUES: &[&str] = &["OK", "SUCCESS", ""];
const TRUTHY_VALUES: &[&str] = &["true", "1", "yes", "on"];

/// Integer view of a loosely typed JSON value, truncating toward zero
fn coerce_int(value: &Value) -> Option<i64> {
    let float = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    if !float.is_finite() {
        return None;
    }
    Some(float.trunc() as i64)
}

/// String form of a scalar, as firmware flags are compared textually
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "none".to_string(),
        other => other.to_string(),
    }
}

/// True when a write acknowledgement indicates success
///
/// A JSON object whose `status` is missing, empty, `ok` or `success` is
/// accepted, as is a body whose trimmed text is `OK`, `SUCCESS` or empty.
pub fn is_ok_response(json: Option<&Value>, text: &str) -> bool {
    if let Some(Value::Object(obj)) = json {
        let status = obj
            .get("status")
            .map(scalar_text)
            .unwrap_or_default()
            .to_lowercase();
        if OK_STATUS_VALUES.contains(&status.as_str()) {
            return true;
        }
    }
    OK_TEXT_VALUES.contains(&text.trim().to_uppercase().as_str())
}

fn nested_data(obj: &Map<String, Value>) -> Option<&Map<String, Value>> {
    obj.get("data").and_then(Value::as_object)
}

/// `(rpm, pwm_percent)` from a single-fan status body
///
/// Reads the top level when it carries `rpm`, `pwm_percent` or `pwm`,
/// otherwise the `data` object. Missing or garbled numbers count as 0.
pub fn parse_single_status(body: &Value) -> (u32, u8) {
    let empty = Map::new();
    let top = body.as_object().unwrap_or(&empty);
    let container = if ["rpm", "pwm_percent", "pwm"]
        .iter()
        .any(|key| top.contains_key(*key))
    {
        top
    } else {
        nested_data(top).unwrap_or(&empty)
    };

    let rpm = container.get("rpm").and_then(coerce_int).unwrap_or(0);
    let pwm = container
        .get("pwm_percent")
        .or_else(|| container.get("pwm"))
        .or_else(|| container.get("pwm_value"))
        .and_then(coerce_int)
        .unwrap_or(0);

    (
        rpm.clamp(0, i64::from(u32::MAX)) as u32,
        pwm.clamp(0, i64::from(limits::PWM_MAX)) as u8,
    )
}

/// `{index: rpm}` from a multi-fan status body
///
/// Accepts an object keyed by fan index (top level or under `data`) or an
/// array in index order. Keys outside 0-9 or that are not integers are
/// skipped.
pub fn parse_multi_status(body: &Value) -> BTreeMap<u8, u32> {
    let container = match body {
        Value::Object(obj) => match obj.get("data") {
            Some(data @ (Value::Object(_) | Value::Array(_))) => data,
            _ => body,
        },
        other => other,
    };

    let entries: Vec<(i64, &Value)> = match container {
        Value::Object(obj) => obj
            .iter()
            .filter_map(|(key, value)| key.trim().parse::<i64>().ok().map(|i| (i, value)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, value)| (i as i64, value))
            .collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter(|(index, _)| (0..=i64::from(limits::MAX_FAN_INDEX)).contains(index))
        .map(|(index, value)| {
            let rpm = coerce_int(value).unwrap_or(0).clamp(0, i64::from(u32::MAX));
            (index as u8, rpm as u32)
        })
        .collect()
}

/// LED and 12V flags from the board status body
///
/// Returns `None` when the body is not an object.
pub fn parse_board_status(body: &Value) -> Option<BoardStatus> {
    let top = body.as_object()?;
    let container = match top.get("data") {
        Some(data) => data.as_object()?,
        None => top,
    };

    let flag = |key: &str| {
        container
            .get(key)
            .map(|v| scalar_text(v).trim().to_lowercase())
            .is_some_and(|text| TRUTHY_VALUES.contains(&text.as_str()))
    };

    Some(BoardStatus {
        led_on: flag("act_led_enabled"),
        is_12v: flag("fan_is_12v"),
    })
}

//! Conversions between the XML-RPC value tree and native values.
//!
//! The native-value calling convention hands parameters to handlers as
//! [`serde_json::Value`]s and accepts them back; object member order is
//! preserved. Octet payloads travel as base64 strings because native values
//! carry text, not bytes.

use crate::value::{Members, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Number};
use xmlrpc_config::NativeEncodingOptions;

/// Unwraps a typed value into a native value.
pub fn value_to_native(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(v) => json!(v),
        Value::Bool(v) => json!(v),
        Value::String(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::DateTime(v) => json!(v),
        Value::Base64(v) => json!(BASE64.encode(v)),
        Value::Nil => serde_json::Value::Null,
        Value::Array(elements) => {
            serde_json::Value::Array(elements.iter().map(value_to_native).collect())
        }
        Value::Struct(members) => {
            let mut map = Map::new();
            for (name, member) in members.iter() {
                map.insert(name.to_string(), value_to_native(member));
            }
            serde_json::Value::Object(map)
        }
    }
}

/// Encodes a native value into a typed value.
///
/// Integers outside the 32-bit range and all floats become `double`; with
/// `auto_dates` set, strings shaped like ISO-8601 timestamps become
/// `dateTime.iso8601`. Null becomes `nil` when the extension is enabled and
/// the empty string otherwise.
pub fn native_to_value(
    native: &serde_json::Value,
    options: &NativeEncodingOptions,
    nil_extension: bool,
) -> Value {
    match native {
        serde_json::Value::Null => {
            if nil_extension {
                Value::Nil
            } else {
                Value::String(String::new())
            }
        }
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(n) => number_to_value(n),
        serde_json::Value::String(s) => {
            if options.auto_dates && looks_like_iso8601(s) {
                Value::DateTime(s.clone())
            } else {
                Value::String(s.clone())
            }
        }
        serde_json::Value::Array(elements) => Value::Array(
            elements
                .iter()
                .map(|e| native_to_value(e, options, nil_extension))
                .collect(),
        ),
        serde_json::Value::Object(map) => {
            let mut members = Members::new();
            for (name, member) in map {
                members.insert(name.clone(), native_to_value(member, options, nil_extension));
            }
            Value::Struct(members)
        }
    }
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        if let Ok(small) = i32::try_from(i) {
            return Value::Int(small);
        }
        return Value::Double(i as f64);
    }
    Value::Double(n.as_f64().unwrap_or(0.0))
}

/// Recognizes the two timestamp shapes XML-RPC traffic actually carries:
/// the wire format `YYYYMMDDTHH:MM:SS` and the dashed `YYYY-MM-DDTHH:MM:SS`
/// (optionally with a trailing `Z` or numeric offset).
pub fn looks_like_iso8601(s: &str) -> bool {
    let bytes = s.as_bytes();
    let rest = if bytes.len() >= 17 && bytes[8] == b'T' {
        // compact form: 8 digits, T, then HH:MM:SS
        if !bytes[..8].iter().all(u8::is_ascii_digit) {
            return false;
        }
        &bytes[9..]
    } else if bytes.len() >= 19 && bytes[4] == b'-' && bytes[7] == b'-' && bytes[10] == b'T' {
        let date_ok = bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..7].iter().all(u8::is_ascii_digit)
            && bytes[8..10].iter().all(u8::is_ascii_digit);
        if !date_ok {
            return false;
        }
        &bytes[11..]
    } else {
        return false;
    };

    if rest.len() < 8 || rest[2] != b':' || rest[5] != b':' {
        return false;
    }
    let time_ok = rest[..2].iter().all(u8::is_ascii_digit)
        && rest[3..5].iter().all(u8::is_ascii_digit)
        && rest[6..8].iter().all(u8::is_ascii_digit);
    if !time_ok {
        return false;
    }
    match &rest[8..] {
        [] | [b'Z'] => true,
        [sign, tz @ ..] if *sign == b'+' || *sign == b'-' => {
            matches!(tz.len(), 4 | 5) && tz.iter().all(|b| b.is_ascii_digit() || *b == b':')
        }
        _ => false,
    }
}

//! Parameter normalization
//!
//! Dashboards send card parameters in several shapes: a JSON-encoded `params`
//! query argument (sometimes percent- or double-encoded), a JSON or form body
//! with or without a `params` wrapper, or plain query arguments. Everything is
//! normalized into one [`Params`] object.

use axum::http::Method;
use serde_json::{Map, Value};

use crate::context::Params;
use crate::error::{CardError, Result};

/// WebSocket query keys copied into the params object.
const WS_KEYS: [&str; 10] = [
    "url",
    "topic",
    "resumeSeq",
    "subscriptionId",
    "ackPolicy",
    "compression",
    "protocols",
    "reconnectDelay",
    "maxReconnectAttempts",
    "heartbeatInterval",
];

/// WebSocket keys coerced to numbers.
const WS_NUMERIC_KEYS: [&str; 4] = [
    "resumeSeq",
    "reconnectDelay",
    "maxReconnectAttempts",
    "heartbeatInterval",
];

fn looks_like_json(s: &str) -> bool {
    s.starts_with(['{', '[', '"'])
        || matches!(s, "true" | "false" | "null")
        || s.chars().next().is_some_and(|c| c.is_ascii_digit())
}

// Like a form decoder on a single component: `+` is a space and invalid
// UTF-8 turns into U+FFFD.
fn unquote_plus(s: &str) -> String {
    let spaced = s.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Decode a string that may hold JSON, double-encoded JSON or percent-encoded
/// JSON. Anything that does not decode is returned as a JSON string unchanged.
pub fn maybe_decode_json_str(value: &str) -> Value {
    let mut current = value.trim().to_string();
    for _ in 0..3 {
        if looks_like_json(&current) {
            if let Ok(parsed) = serde_json::from_str::<Value>(&current) {
                return parsed;
            }
            if current.len() >= 2 && current.starts_with('"') && current.ends_with('"') {
                if let Ok(parsed) = serde_json::from_str::<Value>(&current[1..current.len() - 1]) {
                    return parsed;
                }
            }
        }
        let unquoted = unquote_plus(&current);
        if unquoted == current {
            break;
        }
        current = unquoted;
    }
    serde_json::from_str(&current).unwrap_or_else(|_| Value::String(value.to_string()))
}

/// Parse an `application/x-www-form-urlencoded` string into ordered pairs.
pub fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(query).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "unreadable query string");
        Vec::new()
    })
}

/// Query arguments as an object: single values as strings, repeated keys as arrays.
pub fn normalize_query(query: &str) -> Params {
    let mut params = Params::new();
    for (key, value) in parse_query_pairs(query) {
        let value = Value::String(value);
        match params.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                params.insert(key, value);
            }
        }
    }
    params
}

fn first_value(query: &Params, key: &str) -> Option<String> {
    match query.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(values) => values.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Turn a decoded `params` payload into an object, unwrapping `{"params": {...}}`.
fn params_object(decoded: Value) -> Params {
    match decoded {
        Value::Object(mut map) => match map.remove("params") {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                map.insert("params".into(), other);
                map
            }
            None => map,
        },
        other => wrap("params", other),
    }
}

fn wrap(key: &str, value: Value) -> Params {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn is_body_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Normalize HTTP request parameters.
///
/// A `params` query argument wins. Otherwise POST/PUT/PATCH/DELETE bodies are
/// read as JSON, then as a form; an empty or unreadable body falls back to the
/// query arguments.
pub fn parse_http_params(
    method: &Method,
    query: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Params> {
    let query = normalize_query(query.unwrap_or_default());

    if let Some(raw) = first_value(&query, "params") {
        let decoded = maybe_decode_json_str(&raw);
        tracing::debug!(raw = %raw, decoded = %decoded, "params from query string");
        return Ok(params_object(decoded));
    }

    if !is_body_method(method) || body.is_empty() {
        return Ok(query);
    }

    let text = std::str::from_utf8(body)
        .map_err(|e| CardError::BadRequest(format!("Request body is not valid UTF-8: {e}")))?;

    let is_form = content_type
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    let body_value = match serde_json::from_str::<Value>(text) {
        Ok(value) if !is_form => value,
        _ => {
            let form = normalize_query(text);
            if form.is_empty() {
                return Ok(query);
            }
            Value::Object(form)
        }
    };

    let params = match body_value {
        Value::Object(mut map) => match map.remove("params") {
            Some(inner) => {
                let decoded = match inner {
                    Value::String(s) => maybe_decode_json_str(&s),
                    other => other,
                };
                match decoded {
                    Value::Object(obj) => obj,
                    other => wrap("params", other),
                }
            }
            None => map,
        },
        Value::Null => return Ok(query),
        Value::String(s) => wrap("params", maybe_decode_json_str(&s)),
        other => wrap("params", other),
    };
    tracing::debug!(keys = params.len(), "params from request body");
    Ok(params)
}

fn coerce_number(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    match raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(raw.to_string()),
    }
}

/// Normalize WebSocket connection parameters from the upgrade query string.
pub fn parse_websocket_params(query: Option<&str>) -> Params {
    let query = normalize_query(query.unwrap_or_default());

    if let Some(raw) = first_value(&query, "params") {
        return params_object(maybe_decode_json_str(&raw));
    }

    let mut payload = Map::new();
    for key in WS_KEYS {
        let Some(raw) = first_value(&query, key) else {
            continue;
        };
        let value = if WS_NUMERIC_KEYS.contains(&key) {
            coerce_number(&raw)
        } else {
            maybe_decode_json_str(&raw)
        };
        payload.insert(key.to_string(), value);
    }

    let headers: Map<String, Value> = query
        .keys()
        .filter_map(|k| k.strip_prefix("headers.").map(|name| (k, name)))
        .filter_map(|(k, name)| first_value(&query, k).map(|v| (name.to_string(), Value::String(v))))
        .collect();
    if !headers.is_empty() {
        payload.insert("headers".into(), Value::Object(headers));
    }

    tracing::debug!(keys = payload.len(), "params from websocket query");
    payload
}

/// Parameters carried by the first client message of a WebSocket connection.
pub fn params_from_initial_message(text: &str) -> Params {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) => match map.remove("params") {
            Some(Value::String(s)) => params_object(maybe_decode_json_str(&s)),
            Some(Value::Object(inner)) => inner,
            Some(other) => wrap("params", other),
            None => map,
        },
        Ok(other) => wrap("initialMessage", other),
        Err(_) => wrap("initialMessage", Value::String(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_plain_double_and_percent_encoded_json() {
        assert_eq!(maybe_decode_json_str(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(maybe_decode_json_str(r#""{\"a\":1}""#), json!("{\"a\":1}"));
        assert_eq!(maybe_decode_json_str("%7B%22a%22%3A1%7D"), json!({"a": 1}));
        assert_eq!(maybe_decode_json_str("42"), json!(42));
        assert_eq!(maybe_decode_json_str("hello world"), json!("hello world"));
    }

    #[test]
    fn query_params_argument_wins_and_unwraps_nesting() {
        let q = "params=%7B%22params%22%3A%7B%22region%22%3A%22eu%22%7D%7D&limit=5";
        let params = parse_http_params(&Method::GET, Some(q), None, b"").unwrap();
        assert_eq!(Value::Object(params), json!({"region": "eu"}));

        let q = "params=%5B1%2C2%5D";
        let params = parse_http_params(&Method::GET, Some(q), None, b"").unwrap();
        assert_eq!(Value::Object(params), json!({"params": [1, 2]}));
    }

    #[test]
    fn plain_query_keeps_repeats_as_arrays() {
        let params = parse_http_params(&Method::GET, Some("a=1&b=x+y&a=2&flag"), None, b"").unwrap();
        assert_eq!(
            Value::Object(params),
            json!({"a": ["1", "2"], "b": "x y", "flag": ""})
        );
    }

    #[test]
    fn invalid_percent_utf8_decodes_lossily() {
        let q = "region=%FF&name=caf%C3%A9&city=S%C3%A3o+Paulo";
        let params = parse_http_params(&Method::GET, Some(q), None, b"").unwrap();
        assert_eq!(
            Value::Object(params),
            json!({"region": "\u{FFFD}", "name": "café", "city": "São Paulo"})
        );
        assert_eq!(maybe_decode_json_str("%FF"), json!("%FF"));
    }

    #[test]
    fn json_body_variants() {
        let post = Method::POST;
        let wrapped = br#"{"params": "{\"limit\": 3}"}"#;
        let p = parse_http_params(&post, None, Some("application/json"), wrapped).unwrap();
        assert_eq!(Value::Object(p), json!({"limit": 3}));

        let direct = br#"{"limit": 4}"#;
        let p = parse_http_params(&post, None, Some("application/json"), direct).unwrap();
        assert_eq!(Value::Object(p), json!({"limit": 4}));

        let list = br#"[1, 2]"#;
        let p = parse_http_params(&post, None, None, list).unwrap();
        assert_eq!(Value::Object(p), json!({"params": [1, 2]}));

        let p = parse_http_params(&post, Some("x=1"), None, b"").unwrap();
        assert_eq!(Value::Object(p), json!({"x": "1"}));
    }

    #[test]
    fn form_body_and_bad_utf8() {
        let p = parse_http_params(
            &Method::POST,
            None,
            Some("application/x-www-form-urlencoded"),
            b"limit=3&region=eu",
        )
        .unwrap();
        assert_eq!(Value::Object(p), json!({"limit": "3", "region": "eu"}));

        let err = parse_http_params(&Method::POST, None, None, &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CardError::BadRequest(_)));
    }

    #[test]
    fn get_ignores_body() {
        let p = parse_http_params(&Method::GET, Some("a=1"), None, br#"{"b":2}"#).unwrap();
        assert_eq!(Value::Object(p), json!({"a": "1"}));
    }

    #[test]
    fn websocket_query_mapping() {
        let q = "topic=sales&resumeSeq=10&reconnectDelay=1.5&maxReconnectAttempts=many&headers.X-Token=abc&ignored=1";
        let p = parse_websocket_params(Some(q));
        assert_eq!(
            Value::Object(p),
            json!({
                "topic": "sales",
                "resumeSeq": 10,
                "reconnectDelay": 1.5,
                "maxReconnectAttempts": "many",
                "headers": {"X-Token": "abc"}
            })
        );

        let p = parse_websocket_params(Some("params=%7B%22topic%22%3A%22x%22%7D"));
        assert_eq!(Value::Object(p), json!({"topic": "x"}));
        assert!(parse_websocket_params(None).is_empty());
    }

    #[test]
    fn initial_message_shapes() {
        assert_eq!(
            Value::Object(params_from_initial_message(r#"{"params": {"a": 1}}"#)),
            json!({"a": 1})
        );
        assert_eq!(
            Value::Object(params_from_initial_message(r#"{"topic": "t"}"#)),
            json!({"topic": "t"})
        );
        assert_eq!(
            Value::Object(params_from_initial_message("[1]")),
            json!({"initialMessage": [1]})
        );
        assert_eq!(
            Value::Object(params_from_initial_message("hi there")),
            json!({"initialMessage": "hi there"})
        );
    }
}

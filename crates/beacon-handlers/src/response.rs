//! The `{success: true, ...}` / `{success: false, error, ...}` envelope every
//! handler response is wrapped in before it crosses the wire.

use serde::Serialize;
use serde_json::Value;

use crate::error::HandlerError;

/// Serialize a handler outcome into the wire envelope.
///
/// On success, `body`'s fields are flattened alongside `"success": true`. On
/// failure, the envelope carries `"success": false` and `"error"`, plus
/// whatever extra context fields the caller supplies (e.g. the path that was
/// rejected).
pub fn envelope<T: Serialize>(result: Result<T, HandlerError>) -> Value {
    match result {
        Ok(body) => ok(body),
        Err(err) => {
            let context = err.context();
            error(&err.to_string(), context)
        },
    }
}

/// Build a success envelope directly, without going through a `Result`.
pub fn ok<T: Serialize>(body: T) -> Value {
    let mut value = serde_json::to_value(body).unwrap_or(Value::Null);
    match &mut value {
        Value::Object(map) => {
            map.insert("success".to_string(), Value::Bool(true));
        },
        other => {
            *other = serde_json::json!({ "success": true, "value": other });
        },
    }
    value
}

/// Build a failure envelope with an error message and optional extra
/// context fields (merged in alongside `success`/`error`).
pub fn error(message: &str, context: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("success".to_string(), Value::Bool(false));
    map.insert("error".to_string(), Value::String(message.to_string()));
    if let Value::Object(extra) = context {
        map.extend(extra);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize as _;

    #[derive(Serialize)]
    struct Body {
        hash: String,
    }

    #[test]
    fn ok_flattens_fields_alongside_success() {
        let v = ok(Body { hash: "abc".into() });
        assert_eq!(v["success"], Value::Bool(true));
        assert_eq!(v["hash"], Value::String("abc".into()));
    }

    #[test]
    fn error_carries_message_and_context() {
        let v = error("not found", serde_json::json!({ "path": "x" }));
        assert_eq!(v["success"], Value::Bool(false));
        assert_eq!(v["error"], Value::String("not found".into()));
        assert_eq!(v["path"], Value::String("x".into()));
    }
}

//! SSE wire framing

use chrono::Utc;
use serde_json::{Value, json};

/// `id` carried by the close sentinel payload
pub const CLOSE_EVENT_ID: &str = "CLOSE";

/// Headers sent with every simulated stream
pub const SSE_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
];

/// Encode one payload as a `data:` frame
pub fn encode_frame(payload: &str) -> String {
    format!("data:{}\n\n", payload)
}

/// Payload of the close sentinel, `{"id":"CLOSE"}`
pub fn close_sentinel() -> String {
    json!({ "id": CLOSE_EVENT_ID }).to_string()
}

/// Whether a parsed payload is the close sentinel
pub fn is_close_sentinel(payload: &Value) -> bool {
    payload.get("id").and_then(Value::as_str) == Some(CLOSE_EVENT_ID)
}

/// Payload of the `n`th live generator event
pub fn generated_event(n: u32) -> String {
    let now = Utc::now();
    json!({
        "id": n,
        "message": format!("Live event {}", n),
        "timestamp": now.to_rfc3339(),
        "data": format!("Generated in simulator at {}", now.timestamp_millis()),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_data_prefixed_and_blank_line_terminated() {
        assert_eq!(encode_frame("{\"id\":1}"), "data:{\"id\":1}\n\n");
        assert_eq!(encode_frame(&close_sentinel()), "data:{\"id\":\"CLOSE\"}\n\n");
    }

    #[test]
    fn recognises_sentinel_only_by_string_id() {
        assert!(is_close_sentinel(&json!({"id": "CLOSE", "extra": 1})));
        assert!(!is_close_sentinel(&json!({"id": "close"})));
        assert!(!is_close_sentinel(&json!({"id": 1})));
        assert!(!is_close_sentinel(&json!("CLOSE")));
    }

    #[test]
    fn generated_events_are_numbered() {
        let value: Value = serde_json::from_str(&generated_event(3)).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["message"], "Live event 3");
        assert!(!is_close_sentinel(&value));
    }
}

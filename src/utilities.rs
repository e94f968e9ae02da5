// Name parsing, identifier construction, canonical request hashing, and
// handler-context assembly shared by the admission pipeline and executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::bus::EventBus;
use crate::model::{ExecutionType, HandlerContext, Priority, SequenceRequest, Timing};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The domain prefix of a sequence name: everything up to the last `.`
/// (`Canvas.drop-symphony` → `Canvas`). Names without a dot are their own
/// symphony.
pub fn extract_symphony_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(index) => &name[..index],
        None => name,
    }
}

/// The resource a request contends on, scoped to the narrowest available
/// object: `data.elementId`, else `data.resourceId`, else the symphony.
pub fn extract_resource_id(name: &str, data: &Value) -> String {
    for key in ["elementId", "resourceId"] {
        match data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Null) | None => {}
            Some(other) => return other.to_string(),
        }
    }
    extract_symphony_name(name).to_string()
}

/// `<name>:<resourceId>:<monotonic counter>`.
pub fn create_sequence_instance_id(name: &str, data: &Value) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}:{}:{}", name, extract_resource_id(name, data), counter)
}

/// Deterministic canonical hash of `(name, data, priority)`.
///
/// The data is rendered in canonical textual form (object keys sorted
/// lexicographically at every level, arrays in order, scalars by lexical
/// form, keys starting with `_` excluded) and folded through a 64-bit
/// FNV-1a mixer. Stable under key reordering of `data`.
pub fn canonical_hash(name: &str, data: &Value, priority: Priority) -> u64 {
    let mut canonical = String::with_capacity(64);
    canonical.push_str(name);
    canonical.push('|');
    canonical_json(data, &mut canonical);
    canonical.push('|');
    canonical.push_str(&priority.to_string());
    fnv1a64(canonical.as_bytes())
}

fn canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push('"');
            for ch in s.chars() {
                if ch == '"' || ch == '\\' {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                canonical_json(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|key| !key.starts_with('_'))
                .collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push('"');
                out.push_str(key);
                out.push_str("\":");
                canonical_json(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Assemble the base handler context for a beat of `request`. The executor
/// fills in the payload snapshot before each invocation.
pub fn create_execution_context(
    request: &SequenceRequest,
    bus: Arc<EventBus>,
    movement_index: usize,
    beat_index: u32,
    timing: Timing,
    payload: Value,
) -> HandlerContext {
    HandlerContext {
        sequence_name: request.sequence_name.clone(),
        symphony_name: request.symphony_name.clone(),
        request_id: request.request_id.clone(),
        instance_id: request.instance_id.clone(),
        resource_id: request.resource_id.clone(),
        priority: request.priority,
        execution_type: match timing {
            Timing::Immediate => ExecutionType::Immediate,
            Timing::AfterBeat | Timing::Delayed(_) => ExecutionType::Consecutive,
        },
        movement_index,
        beat_index,
        payload,
        bus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_symphony_name() {
        assert_eq!(extract_symphony_name("Canvas.drop-symphony"), "Canvas");
        assert_eq!(
            extract_symphony_name("App.Canvas.drop-symphony"),
            "App.Canvas"
        );
        assert_eq!(extract_symphony_name("standalone"), "standalone");
    }

    #[test]
    fn test_extract_resource_id_prefers_element() {
        let name = "Canvas.drop-symphony";
        assert_eq!(
            extract_resource_id(name, &json!({ "elementId": "elem-7" })),
            "elem-7"
        );
        assert_eq!(
            extract_resource_id(name, &json!({ "resourceId": "layer-2" })),
            "layer-2"
        );
        assert_eq!(
            extract_resource_id(
                name,
                &json!({ "elementId": "elem-7", "resourceId": "layer-2" })
            ),
            "elem-7"
        );
        assert_eq!(extract_resource_id(name, &json!({})), "Canvas");
        assert_eq!(extract_resource_id(name, &json!({ "elementId": 12 })), "12");
    }

    #[test]
    fn test_instance_ids_are_monotonic_and_scoped() {
        let a = create_sequence_instance_id("Canvas.drop-symphony", &json!({}));
        let b = create_sequence_instance_id("Canvas.drop-symphony", &json!({}));
        assert!(a.starts_with("Canvas.drop-symphony:Canvas:"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_stable_under_key_reordering() {
        let left = json!({ "a": 1, "b": { "x": true, "y": [1, 2, 3] }, "c": "s" });
        let right = json!({ "c": "s", "b": { "y": [1, 2, 3], "x": true }, "a": 1 });
        assert_eq!(
            canonical_hash("Demo.ping-symphony", &left, Priority::Normal),
            canonical_hash("Demo.ping-symphony", &right, Priority::Normal)
        );
    }

    #[test]
    fn test_hash_varies_with_inputs() {
        let data = json!({ "a": 1 });
        let base = canonical_hash("Demo.ping-symphony", &data, Priority::Normal);
        assert_ne!(
            base,
            canonical_hash("Demo.pong-symphony", &data, Priority::Normal)
        );
        assert_ne!(
            base,
            canonical_hash("Demo.ping-symphony", &json!({ "a": 2 }), Priority::Normal)
        );
        assert_ne!(
            base,
            canonical_hash("Demo.ping-symphony", &data, Priority::High)
        );
    }

    #[test]
    fn test_hash_ignores_underscore_keys() {
        let left = json!({ "a": 1, "_trace": "xyz" });
        let right = json!({ "a": 1, "_trace": "abc" });
        assert_eq!(
            canonical_hash("Demo.ping-symphony", &left, Priority::Normal),
            canonical_hash("Demo.ping-symphony", &right, Priority::Normal)
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(
            canonical_hash("s", &json!({ "k": [1, 2] }), Priority::Normal),
            canonical_hash("s", &json!({ "k": [2, 1] }), Priority::Normal)
        );
    }
}

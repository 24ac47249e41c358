//! Content digest over a conversation's messages, insights and context
//!
//! The digest is computed over a canonical JSON rendering (object keys
//! sorted at every depth, no insignificant whitespace) so that two records
//! with equal content hash identically regardless of map ordering.

use crate::storage::{ConversationContext, ConversationRecord, Insight, Message};
use serde_json::Value;
use sha2::{Digest, Sha256};

const PREFIX: &str = "sha256:";

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Digest of `(messages, insights, context)`, prefixed with `sha256:`
///
/// # Examples
///
/// ```
/// use convsync::storage::{ConversationContext, Message};
/// use convsync::sync::checksum::compute_checksum;
///
/// let messages = vec![Message::user("hi")];
/// let digest = compute_checksum(&messages, &[], &ConversationContext::new());
/// assert!(digest.starts_with("sha256:"));
/// assert_eq!(digest.len(), 7 + 64);
/// ```
pub fn compute_checksum(
    messages: &[Message],
    insights: &[Insight],
    context: &ConversationContext,
) -> String {
    // Serializing these types cannot fail: all map keys are strings.
    let value = serde_json::json!([messages, insights, context]);
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", PREFIX, hex)
}

/// Digest of a record's current content
pub fn record_checksum(record: &ConversationRecord) -> String {
    compute_checksum(&record.messages, &record.insights, &record.context)
}

/// Whether the stored checksum matches the record's content
pub fn verify_checksum(record: &ConversationRecord) -> bool {
    record.checksum == record_checksum(record)
}

//! Candidate validation applied before any write reaches the store

use super::context::CallerContext;
use crate::config::LimitsConfig;
use crate::error::{SyncError, SyncResult};
use crate::storage::ConversationRecord;
use regex::Regex;
use std::sync::OnceLock;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._:-]+$").expect("id pattern is valid"))
}

/// Highest version a candidate may carry; its successor must still fit a
/// signed 64-bit store column.
pub const MAX_OBSERVED_VERSION: u64 = i64::MAX as u64 - 1;

fn invalid(message: impl Into<String>) -> SyncError {
    SyncError::InvalidInput(message.into())
}

/// Check a conversation id against the configured limits
pub fn validate_id(id: &str, limits: &LimitsConfig) -> SyncResult<()> {
    if id.is_empty() {
        return Err(invalid("conversation id must not be empty"));
    }
    if id.len() > limits.max_id_length {
        return Err(invalid(format!(
            "conversation id exceeds {} characters",
            limits.max_id_length
        )));
    }
    if !id_pattern().is_match(id) {
        return Err(invalid(format!(
            "conversation id '{}' may only contain letters, digits, '.', '_', ':' and '-'",
            id
        )));
    }
    Ok(())
}

/// Check the caller's capabilities and the candidate's shape
///
/// # Errors
///
/// - [`SyncError::InvalidInput`] for missing capabilities or malformed content
/// - [`SyncError::OwnerMismatch`] when the candidate names another owner
pub fn validate_candidate(
    ctx: &CallerContext,
    candidate: &ConversationRecord,
    force_overwrite: bool,
    limits: &LimitsConfig,
) -> SyncResult<()> {
    ctx.ensure_owner()?;
    if !ctx.can_write() {
        return Err(invalid("caller is not permitted to write"));
    }
    if force_overwrite && !ctx.can_force_overwrite() {
        return Err(invalid("caller is not permitted to force overwrites"));
    }

    validate_id(&candidate.id, limits)?;

    if candidate.version > MAX_OBSERVED_VERSION {
        return Err(invalid(format!(
            "version {} is out of range (maximum {})",
            candidate.version, MAX_OBSERVED_VERSION
        )));
    }

    if candidate.owner_id.trim().is_empty() {
        return Err(invalid("candidate owner id must not be empty"));
    }
    if candidate.owner_id != ctx.owner_id() {
        return Err(SyncError::OwnerMismatch {
            expected: ctx.owner_id().to_string(),
            actual: candidate.owner_id.clone(),
        });
    }

    if candidate.title.chars().count() > limits.max_title_length {
        return Err(invalid(format!(
            "title exceeds {} characters",
            limits.max_title_length
        )));
    }
    if candidate.messages.len() > limits.max_messages {
        return Err(invalid(format!(
            "conversation exceeds {} messages",
            limits.max_messages
        )));
    }
    if let Some(index) = candidate
        .messages
        .iter()
        .position(|m| m.text.trim().is_empty() && m.images.is_empty())
    {
        return Err(invalid(format!(
            "message {} has neither text nor images",
            index
        )));
    }

    let context_bytes = serde_json::to_vec(&candidate.context)
        .map_err(|e| invalid(format!("context is not serializable: {}", e)))?
        .len();
    if context_bytes > limits.max_context_bytes {
        return Err(invalid(format!(
            "context is {} bytes, limit is {}",
            context_bytes, limits.max_context_bytes
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Message;
    use crate::test_utils::{caller, sample_record};
    use serde_json::json;

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    #[test]
    fn test_valid_candidate_passes() {
        let record = sample_record("c1", "u1");
        assert!(validate_candidate(&caller("u1"), &record, false, &limits()).is_ok());
    }

    #[test]
    fn test_id_charset_and_length() {
        assert!(validate_id("session:2024-01.a_b", &limits()).is_ok());
        assert!(validate_id("has space", &limits()).is_err());
        assert!(validate_id("slash/id", &limits()).is_err());
        assert!(validate_id("", &limits()).is_err());
        let long = "x".repeat(limits().max_id_length + 1);
        assert!(validate_id(&long, &limits()).is_err());
    }

    #[test]
    fn test_foreign_owner_is_mismatch() {
        let record = sample_record("c1", "someone-else");
        let err = validate_candidate(&caller("u1"), &record, false, &limits()).unwrap_err();
        assert!(matches!(err, SyncError::OwnerMismatch { .. }));
    }

    #[test]
    fn test_capabilities_are_enforced() {
        let record = sample_record("c1", "u1");
        let read_only = CallerContext::read_only("u1");
        assert!(validate_candidate(&read_only, &record, false, &limits()).is_err());

        let no_force = CallerContext::new("u1");
        let err = validate_candidate(&no_force, &record, true, &limits()).unwrap_err();
        assert!(err.to_string().contains("force"));
    }

    #[test]
    fn test_empty_message_is_rejected() {
        let mut record = sample_record("c1", "u1");
        record.messages.push(Message::user("   "));
        assert!(validate_candidate(&caller("u1"), &record, false, &limits()).is_err());

        record.messages.pop();
        record.messages.push(Message::user("").with_image("https://img/1.png"));
        assert!(validate_candidate(&caller("u1"), &record, false, &limits()).is_ok());
    }

    #[test]
    fn test_out_of_range_version_is_rejected() {
        let mut record = sample_record("c1", "u1");
        for version in [u64::MAX, i64::MAX as u64 + 1, i64::MAX as u64] {
            record.version = version;
            let err = validate_candidate(&caller("u1"), &record, false, &limits()).unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)), "version {}", version);
        }

        record.version = MAX_OBSERVED_VERSION;
        assert!(validate_candidate(&caller("u1"), &record, false, &limits()).is_ok());
    }

    #[test]
    fn test_oversized_context_and_title() {
        let small = LimitsConfig {
            max_context_bytes: 16,
            max_title_length: 5,
            ..LimitsConfig::default()
        };
        let mut record = sample_record("c1", "u1");
        record.title = "ok".into();
        record.context.insert("notes".into(), json!("far more than sixteen bytes"));
        assert!(validate_candidate(&caller("u1"), &record, false, &small).is_err());

        record.context.clear();
        record.title = "too long".into();
        assert!(validate_candidate(&caller("u1"), &record, false, &small).is_err());
    }
}

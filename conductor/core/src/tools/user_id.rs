//! User id placeholder resolution
//!
//! Models often fill `userId` with a placeholder ("uuid", "user_id") or leave
//! it out. Every tool call is rewritten to carry the authenticated user before
//! it is dispatched or echoed to the client.

use serde_json::{Map, Value};

/// Argument field carrying the user id
pub const USER_ID_FIELD: &str = "userId";

/// Shorter values are treated as placeholders
pub const MIN_USER_ID_LEN: usize = 8;

const PLACEHOLDERS: &[&str] = &[
    "uuid",
    "user_id",
    "userid",
    "user-id",
    "user",
    "<user_id>",
    "{user_id}",
    "{userid}",
];

/// Whether a `userId` value must be replaced
///
/// Absent, non-string, known placeholder words, and strings shorter than
/// [`MIN_USER_ID_LEN`] all count as placeholders.
#[must_use]
pub fn is_placeholder_user_id(value: Option<&Value>) -> bool {
    let Some(Value::String(raw)) = value else {
        return true;
    };
    let trimmed = raw.trim();
    if trimmed.chars().count() < MIN_USER_ID_LEN {
        return true;
    }
    let lower = trimmed.to_lowercase();
    PLACEHOLDERS.contains(&lower.as_str())
}

/// Replace a placeholder `userId` with the authenticated one
///
/// Returns `true` when the argument object was changed.
pub fn resolve_user_id(args: &mut Map<String, Value>, user_id: &str) -> bool {
    if !is_placeholder_user_id(args.get(USER_ID_FIELD)) {
        return false;
    }
    args.insert(USER_ID_FIELD.to_string(), Value::String(user_id.to_string()));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REAL: &str = "3f2b8c1e-4d5a-4b6c-9e7f-0a1b2c3d4e5f";

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_placeholders_detected() {
        for placeholder in ["uuid", "user_id", "user", "USER_ID", " uuid ", "abc"] {
            assert!(
                is_placeholder_user_id(Some(&json!(placeholder))),
                "{placeholder} should be a placeholder"
            );
        }
        assert!(is_placeholder_user_id(None));
        assert!(is_placeholder_user_id(Some(&json!(42))));
        assert!(is_placeholder_user_id(Some(&Value::Null)));
    }

    #[test]
    fn test_real_id_kept() {
        assert!(!is_placeholder_user_id(Some(&json!(REAL))));

        let mut args = object(json!({"userId": REAL, "moodScore": 7}));
        assert!(!resolve_user_id(&mut args, "someone-else-entirely"));
        assert_eq!(args["userId"], REAL);
    }

    #[test]
    fn test_placeholder_rewritten() {
        let mut args = object(json!({"userId": "uuid", "moodScore": 7}));
        assert!(resolve_user_id(&mut args, REAL));
        assert_eq!(args["userId"], REAL);
        assert_eq!(args["moodScore"], 7);
    }

    #[test]
    fn test_missing_user_id_inserted() {
        let mut args = object(json!({"text": "felt proud"}));
        assert!(resolve_user_id(&mut args, REAL));
        assert_eq!(args["userId"], REAL);
    }
}

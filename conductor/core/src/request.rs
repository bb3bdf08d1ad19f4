//! Inbound Request Model
//!
//! A [`StreamingRequest`] is what the transport layer hands to the core for
//! one user turn. It is already deserialized and authenticated; the core never
//! mutates it.

use serde::{Deserialize, Serialize};

use crate::messages::{MessageId, MessageRole, SessionId};

/// Version of the [`RequestContext`] layout understood by this crate
pub const REQUEST_CONTEXT_VERSION: u32 = 1;

/// Default sampling temperature when the client does not send one
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// One user turn to be answered by the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingRequest {
    /// Authenticated user the request belongs to
    pub user_id: String,
    /// The new message typed by the user
    pub user_message: String,
    /// Conversation session
    pub session_id: SessionId,
    /// Identifier for this request's reply
    pub message_id: MessageId,
    /// Prior turns, oldest first
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
    /// Client-side context (time zone, screen, ...)
    #[serde(default)]
    pub current_context: RequestContext,
    /// Conversation mode chosen by the client, if any
    #[serde(default)]
    pub mode: Option<String>,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl StreamingRequest {
    /// Create a request with no history and default context
    pub fn new(
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        session_id: SessionId,
        message_id: MessageId,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_message: user_message.into(),
            session_id,
            message_id,
            conversation_history: Vec::new(),
            current_context: RequestContext::default(),
            mode: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Set conversation history
    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.conversation_history = history;
        self
    }

    /// Set the conversation mode
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set client context
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.current_context = context;
        self
    }

    /// History followed by the new user turn, with adjacent duplicates collapsed
    #[must_use]
    pub fn conversation(&self) -> Vec<HistoryEntry> {
        let mut entries = self.conversation_history.clone();
        entries.push(HistoryEntry::new(MessageRole::User, self.user_message.clone()));
        dedupe_adjacent(entries)
    }
}

/// A prior conversation turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who said it
    pub role: MessageRole,
    /// What was said
    pub content: String,
}

impl HistoryEntry {
    /// Create a history entry
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Shorthand for a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Shorthand for an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Collapse back-to-back entries with the same role and content into one
///
/// Only immediately adjacent repeats are removed; the same message appearing
/// again later in the conversation is kept.
#[must_use]
pub fn dedupe_adjacent(entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    let mut out: Vec<HistoryEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        if out.last() == Some(&entry) {
            continue;
        }
        out.push(entry);
    }
    out
}

/// Client-side context sent with each request
///
/// A closed set of optional fields. Unknown fields sent by older or newer
/// clients are ignored rather than carried along.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    /// Layout version
    pub version: u32,
    /// IANA time zone of the device
    pub timezone: Option<String>,
    /// Local wall-clock time as reported by the device
    pub local_time: Option<String>,
    /// Screen the user was on when sending
    pub screen: Option<String>,
    /// BCP 47 locale
    pub locale: Option<String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            version: REQUEST_CONTEXT_VERSION,
            timezone: None,
            local_time: None,
            screen: None,
            locale: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dedupe_adjacent_collapses_repeats() {
        let entries = vec![
            HistoryEntry::user("hi"),
            HistoryEntry::user("hi"),
            HistoryEntry::assistant("hello"),
            HistoryEntry::user("hi"),
        ];

        assert_eq!(
            dedupe_adjacent(entries),
            vec![
                HistoryEntry::user("hi"),
                HistoryEntry::assistant("hello"),
                HistoryEntry::user("hi"),
            ]
        );
    }

    #[test]
    fn test_dedupe_keeps_same_content_different_role() {
        let entries = vec![HistoryEntry::user("ok"), HistoryEntry::assistant("ok")];
        assert_eq!(dedupe_adjacent(entries.clone()), entries);
    }

    #[test]
    fn test_conversation_appends_user_turn() {
        let request = StreamingRequest::new(
            "user-1234",
            "how was my week?",
            SessionId::from("s"),
            MessageId::from("m"),
        )
        .with_history(vec![HistoryEntry::user("hi"), HistoryEntry::assistant("hey")]);

        let conversation = request.conversation();
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation[2], HistoryEntry::user("how was my week?"));
    }

    #[test]
    fn test_deserialize_camel_case_with_defaults() {
        let json = r#"{
            "userId": "5f0c1c1e-user",
            "userMessage": "hi",
            "sessionId": "s-1",
            "messageId": "m-1",
            "currentContext": {"timezone": "Europe/Oslo", "unknownField": 3}
        }"#;

        let request: StreamingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.user_id, "5f0c1c1e-user");
        assert!(request.conversation_history.is_empty());
        assert!(request.mode.is_none());
        assert!((request.temperature - DEFAULT_TEMPERATURE).abs() < f32::EPSILON);
        assert_eq!(request.current_context.timezone.as_deref(), Some("Europe/Oslo"));
        assert_eq!(request.current_context.version, REQUEST_CONTEXT_VERSION);
    }

    #[test]
    fn test_temperature_clamped() {
        let request =
            StreamingRequest::new("u", "m", SessionId::from("s"), MessageId::from("m"))
                .with_temperature(7.0);
        assert!((request.temperature - 2.0).abs() < f32::EPSILON);
    }
}

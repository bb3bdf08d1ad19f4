//! Prompt Context Collaborators
//!
//! The session needs two things it does not own: a system prompt built from
//! what is known about the user, and a conversation mode when the client did
//! not pick one. Both are pure functions behind traits so the profile store
//! and prompt wording can live outside this crate.
//!
//! The defaults here ([`TemplateContextBuilder`], [`KeywordModeClassifier`])
//! only use what arrives with the request.

use serde::{Deserialize, Serialize};

use crate::request::RequestContext;

/// Version of the [`UserContext`] layout produced by this crate
pub const USER_CONTEXT_VERSION: u32 = 1;

/// Mode used when nothing more specific applies
pub const MODE_CHAT: &str = "chat";
/// Mode for looking back on the day
pub const MODE_REFLECT: &str = "reflect";
/// Mode for emotional support
pub const MODE_SUPPORT: &str = "support";
/// Mode for goals and planning
pub const MODE_PLAN: &str = "plan";

/// Everything the prompt builder knows about the user for one request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserContext {
    /// Layout version
    pub version: u32,
    /// Authenticated user
    pub user_id: String,
    /// Name to address the user by
    pub display_name: Option<String>,
    /// IANA time zone
    pub timezone: Option<String>,
    /// Local wall-clock time
    pub local_time: Option<String>,
    /// Most recent mood scores (1-10), newest last
    pub recent_mood_scores: Vec<u8>,
    /// Most recent stored insights, newest last
    pub recent_insights: Vec<String>,
    /// Goals the user is working on
    pub active_goals: Vec<String>,
}

/// Builds the per-request context and system prompt
///
/// Called once per request. Implementations must not depend on mutable state
/// of the session.
pub trait ContextBuilder: Send + Sync {
    /// Assemble what is known about the user
    fn build_context(&self, user_id: &str, current: &RequestContext) -> UserContext;

    /// Render the system prompt for a context and mode
    fn build_system_prompt(&self, context: &UserContext, mode: &str) -> String;
}

/// Picks a conversation mode for a message
pub trait ModeClassifier: Send + Sync {
    /// Classify a user message into a mode tag
    fn classify(&self, message: &str, context: &UserContext) -> String;
}

/// Context builder that renders a fixed preamble plus whatever the request carries
#[derive(Clone, Debug)]
pub struct TemplateContextBuilder {
    preamble: String,
}

impl Default for TemplateContextBuilder {
    fn default() -> Self {
        Self::new(
            "You are a warm, concise journaling companion. Keep replies short. \
             When the user shares something worth remembering, store it with a tool; \
             when they mention how they feel on a 1-10 scale, log it.",
        )
    }
}

impl TemplateContextBuilder {
    /// Create a builder with a custom preamble
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
        }
    }

    fn mode_guidance(mode: &str) -> &'static str {
        match mode {
            MODE_REFLECT => "Help the user reflect on their day with one open question.",
            MODE_SUPPORT => "Be gentle and validating. Do not rush to fix things.",
            MODE_PLAN => "Help the user turn intentions into one small concrete step.",
            _ => "Keep the conversation light and natural.",
        }
    }
}

impl ContextBuilder for TemplateContextBuilder {
    fn build_context(&self, user_id: &str, current: &RequestContext) -> UserContext {
        UserContext {
            version: USER_CONTEXT_VERSION,
            user_id: user_id.to_string(),
            timezone: current.timezone.clone(),
            local_time: current.local_time.clone(),
            ..Default::default()
        }
    }

    fn build_system_prompt(&self, context: &UserContext, mode: &str) -> String {
        let mut prompt = String::with_capacity(self.preamble.len() + 256);
        prompt.push_str(&self.preamble);
        prompt.push_str("\n\nMode: ");
        prompt.push_str(mode);
        prompt.push('\n');
        prompt.push_str(Self::mode_guidance(mode));

        if let Some(ref name) = context.display_name {
            prompt.push_str("\nThe user's name is ");
            prompt.push_str(name);
            prompt.push('.');
        }
        if let Some(ref local_time) = context.local_time {
            prompt.push_str("\nLocal time: ");
            prompt.push_str(local_time);
            if let Some(ref tz) = context.timezone {
                prompt.push_str(" (");
                prompt.push_str(tz);
                prompt.push(')');
            }
        }
        if !context.recent_mood_scores.is_empty() {
            let scores: Vec<String> = context
                .recent_mood_scores
                .iter()
                .map(ToString::to_string)
                .collect();
            prompt.push_str("\nRecent mood scores: ");
            prompt.push_str(&scores.join(", "));
        }
        if !context.recent_insights.is_empty() {
            prompt.push_str("\nRecent insights:");
            for insight in &context.recent_insights {
                prompt.push_str("\n- ");
                prompt.push_str(insight);
            }
        }
        if !context.active_goals.is_empty() {
            prompt.push_str("\nActive goals:");
            for goal in &context.active_goals {
                prompt.push_str("\n- ");
                prompt.push_str(goal);
            }
        }

        prompt
    }
}

/// Keyword-based mode classifier
///
/// Checks support words first, then planning, then reflection. A recent mood
/// score of 3 or lower also selects support.
#[derive(Clone, Debug)]
pub struct KeywordModeClassifier {
    support: Vec<String>,
    plan: Vec<String>,
    reflect: Vec<String>,
}

impl Default for KeywordModeClassifier {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| (*w).to_string()).collect();
        Self {
            support: words(&[
                "anxious",
                "sad",
                "stressed",
                "overwhelmed",
                "upset",
                "lonely",
                "angry",
                "tired of",
            ]),
            plan: words(&["goal", "plan", "todo", "schedule", "tomorrow", "next week"]),
            reflect: words(&[
                "today", "felt", "proud", "grateful", "learned", "realized", "noticed",
            ]),
        }
    }
}

impl ModeClassifier for KeywordModeClassifier {
    fn classify(&self, message: &str, context: &UserContext) -> String {
        let lower = message.to_lowercase();
        let hit = |words: &[String]| words.iter().any(|w| lower.contains(w.as_str()));

        let low_mood = context
            .recent_mood_scores
            .last()
            .is_some_and(|score| *score <= 3);

        let mode = if hit(&self.support) || low_mood {
            MODE_SUPPORT
        } else if hit(&self.plan) {
            MODE_PLAN
        } else if hit(&self.reflect) {
            MODE_REFLECT
        } else {
            MODE_CHAT
        };
        mode.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_modes() {
        let classifier = KeywordModeClassifier::default();
        let ctx = UserContext::default();

        assert_eq!(classifier.classify("I felt proud today", &ctx), MODE_REFLECT);
        assert_eq!(classifier.classify("So stressed about work", &ctx), MODE_SUPPORT);
        assert_eq!(classifier.classify("My goal for tomorrow", &ctx), MODE_PLAN);
        assert_eq!(classifier.classify("hey", &ctx), MODE_CHAT);
    }

    #[test]
    fn test_low_mood_selects_support() {
        let classifier = KeywordModeClassifier::default();
        let ctx = UserContext {
            recent_mood_scores: vec![7, 2],
            ..Default::default()
        };
        assert_eq!(classifier.classify("hey", &ctx), MODE_SUPPORT);
    }

    #[test]
    fn test_build_context_copies_request_fields() {
        let builder = TemplateContextBuilder::default();
        let current = RequestContext {
            timezone: Some("Europe/Oslo".to_string()),
            local_time: Some("21:30".to_string()),
            ..Default::default()
        };

        let ctx = builder.build_context("user-1234", &current);
        assert_eq!(ctx.version, USER_CONTEXT_VERSION);
        assert_eq!(ctx.user_id, "user-1234");
        assert_eq!(ctx.timezone.as_deref(), Some("Europe/Oslo"));
    }

    #[test]
    fn test_system_prompt_mentions_mode_and_context() {
        let builder = TemplateContextBuilder::new("Base.");
        let ctx = UserContext {
            display_name: Some("Sam".to_string()),
            local_time: Some("08:00".to_string()),
            timezone: Some("UTC".to_string()),
            recent_insights: vec!["walks help".to_string()],
            ..Default::default()
        };

        let prompt = builder.build_system_prompt(&ctx, MODE_REFLECT);
        assert!(prompt.starts_with("Base."));
        assert!(prompt.contains("Mode: reflect"));
        assert!(prompt.contains("The user's name is Sam."));
        assert!(prompt.contains("Local time: 08:00 (UTC)"));
        assert!(prompt.contains("- walks help"));
    }
}

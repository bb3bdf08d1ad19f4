//! Journal and the tools that write to it
//!
//! The journal is the daemon's stand-in for a real datastore: `storeInsight`
//! and `logMood` append to it, and [`JournalContextBuilder`] reads the most
//! recent entries back into the system prompt. Entries can optionally be
//! appended to a JSON-lines file so they survive restarts. Entries are always
//! owned by the authenticated caller, whatever `userId` the model put in the
//! arguments.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chat_conductor_core::{
    ContextBuilder, RequestContext, TemplateContextBuilder, ToolHandler, ToolSchema, UserContext,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// How many entries of each kind are shown to the model
const RECENT_ENTRIES: usize = 5;

/// One stored journal item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Something the user wanted remembered
    Insight {
        /// Owner
        user_id: String,
        /// The insight text
        text: String,
        /// RFC 3339 timestamp
        recorded_at: String,
    },
    /// A mood score from 1 to 10
    Mood {
        /// Owner
        user_id: String,
        /// The score
        score: u8,
        /// Optional note
        note: Option<String>,
        /// RFC 3339 timestamp
        recorded_at: String,
    },
}

impl JournalEntry {
    fn user_id(&self) -> &str {
        match self {
            Self::Insight { user_id, .. } | Self::Mood { user_id, .. } => user_id,
        }
    }
}

/// Shared journal, cheap to clone
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
    file: Option<Arc<tokio::sync::Mutex<File>>>,
}

impl Journal {
    /// Empty, memory-only journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal backed by a JSON-lines file, loading what is already there
    pub async fn open(path: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to open journal: {path:?}"))?;
            for (number, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        tracing::warn!(line = number + 1, error = %e, "Skipping bad journal line");
                    }
                }
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory: {parent:?}"))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open journal for writing: {path:?}"))?;

        tracing::info!(path = ?path, entries = entries.len(), "Journal loaded");
        Ok(Self {
            entries: Arc::new(Mutex::new(entries)),
            file: Some(Arc::new(tokio::sync::Mutex::new(file))),
        })
    }

    /// Append an entry
    pub async fn append(&self, entry: JournalEntry) -> Result<()> {
        if let Some(ref file) = self.file {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            let mut file = file.lock().await;
            file.write_all(&line)
                .await
                .context("Failed to write journal entry")?;
            file.flush().await.context("Failed to flush journal")?;
        }
        self.entries.lock().push(entry);
        Ok(())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Most recent insight texts for a user, oldest first
    pub fn recent_insights(&self, user_id: &str) -> Vec<String> {
        let entries = self.entries.lock();
        let mut texts: Vec<String> = entries
            .iter()
            .rev()
            .filter(|e| e.user_id() == user_id)
            .filter_map(|e| match e {
                JournalEntry::Insight { text, .. } => Some(text.clone()),
                JournalEntry::Mood { .. } => None,
            })
            .take(RECENT_ENTRIES)
            .collect();
        texts.reverse();
        texts
    }

    /// Most recent mood scores for a user, oldest first
    pub fn recent_moods(&self, user_id: &str) -> Vec<u8> {
        let entries = self.entries.lock();
        let mut scores: Vec<u8> = entries
            .iter()
            .rev()
            .filter(|e| e.user_id() == user_id)
            .filter_map(|e| match e {
                JournalEntry::Mood { score, .. } => Some(*score),
                JournalEntry::Insight { .. } => None,
            })
            .take(RECENT_ENTRIES)
            .collect();
        scores.reverse();
        scores
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// =============================================================================
// Tools
// =============================================================================

/// `storeInsight`: remember something the user said
pub struct StoreInsightTool {
    journal: Journal,
}

impl StoreInsightTool {
    /// Tool writing to `journal`
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl ToolHandler for StoreInsightTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "storeInsight",
            "Save a short insight the user shared so it can be recalled later.",
            json!({
                "type": "object",
                "properties": {
                    "userId": {"type": "string", "description": "The user's id"},
                    "text": {"type": "string", "minLength": 1, "description": "The insight, in the user's words"}
                },
                "required": ["text"]
            }),
        )
    }

    async fn call(&self, args: Value, user_id: &str) -> Result<Value> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .context("text is required")?
            .trim()
            .to_string();
        let recorded_at = now_rfc3339();

        self.journal.append(JournalEntry::Insight {
            user_id: user_id.to_string(),
            text,
            recorded_at: recorded_at.clone(),
        })
        .await?;

        Ok(json!({"stored": true, "recordedAt": recorded_at}))
    }
}

/// `logMood`: record a 1-10 mood score
pub struct LogMoodTool {
    journal: Journal,
}

impl LogMoodTool {
    /// Tool writing to `journal`
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl ToolHandler for LogMoodTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "logMood",
            "Record how the user feels on a scale from 1 (awful) to 10 (great).",
            json!({
                "type": "object",
                "properties": {
                    "userId": {"type": "string", "description": "The user's id"},
                    "moodScore": {"type": "integer", "minimum": 1, "maximum": 10},
                    "note": {"type": "string"}
                },
                "required": ["moodScore"]
            }),
        )
    }

    async fn call(&self, args: Value, user_id: &str) -> Result<Value> {
        let score = args
            .get("moodScore")
            .and_then(Value::as_u64)
            .and_then(|s| u8::try_from(s).ok())
            .context("moodScore must be an integer from 1 to 10")?;
        let note = args.get("note").and_then(Value::as_str).map(str::to_string);
        let recorded_at = now_rfc3339();

        self.journal.append(JournalEntry::Mood {
            user_id: user_id.to_string(),
            score,
            note,
            recorded_at: recorded_at.clone(),
        })
        .await?;

        Ok(json!({"logged": true, "moodScore": score, "recordedAt": recorded_at}))
    }
}

// =============================================================================
// Context
// =============================================================================

/// Prompt builder that adds recent journal entries
pub struct JournalContextBuilder {
    template: TemplateContextBuilder,
    journal: Journal,
}

impl JournalContextBuilder {
    /// Builder reading from `journal`
    pub fn new(journal: Journal) -> Self {
        Self {
            template: TemplateContextBuilder::default(),
            journal,
        }
    }
}

impl ContextBuilder for JournalContextBuilder {
    fn build_context(&self, user_id: &str, current: &RequestContext) -> UserContext {
        let mut context = self.template.build_context(user_id, current);
        context.recent_insights = self.journal.recent_insights(user_id);
        context.recent_mood_scores = self.journal.recent_moods(user_id);
        context
    }

    fn build_system_prompt(&self, context: &UserContext, mode: &str) -> String {
        self.template.build_system_prompt(context, mode)
    }
}

/// Default journal location under the user's data directory
pub fn default_journal_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("chat-conductor").join("journal.jsonl"))
}

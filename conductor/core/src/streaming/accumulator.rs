//! Tool-call accumulation
//!
//! Tool calls arrive as fragments keyed by their position in the upstream's
//! parallel tool-call array. Each position gets a [`ToolCallBuffer`] that only
//! ever grows. A call is complete once its argument text is a whole JSON
//! object: an incremental depth tracker notices when the top-level object
//! closes (ignoring braces inside strings) and a full parse confirms it.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use super::types::ToolCallDelta;

/// Partially or fully received tool call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCallBuffer {
    /// Position in the parallel tool-call array
    pub index: usize,
    /// Call id (empty until the upstream sends one)
    pub id: String,
    /// Tool name (empty until the upstream sends one)
    pub name: String,
    /// Concatenated argument fragments
    pub arguments: String,
}

impl ToolCallBuffer {
    /// Empty buffer for a position
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// Identity used for at-most-once bookkeeping
    #[must_use]
    pub fn identity(&self) -> ToolCallIdentity {
        if self.id.is_empty() {
            ToolCallIdentity::Index(self.index)
        } else {
            ToolCallIdentity::Id(self.id.clone())
        }
    }

    /// Arguments as a JSON object, if they are one
    #[must_use]
    pub fn parsed_arguments(&self) -> Option<Map<String, Value>> {
        parse_arguments_object(&self.arguments)
    }
}

/// How a tool call is recognised: by id when known, else by array position
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ToolCallIdentity {
    /// Upstream call id
    Id(String),
    /// Position in the tool-call array
    Index(usize),
}

/// Tool calls already handed to execution
///
/// Both the id and the index of a consumed call are recorded, so a call is
/// recognised even if its id only arrived after it was executed.
#[derive(Clone, Debug, Default)]
pub struct ConsumedSet {
    ids: HashSet<String>,
    indices: HashSet<usize>,
}

impl ConsumedSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the call has been consumed
    #[must_use]
    pub fn contains(&self, buffer: &ToolCallBuffer) -> bool {
        self.indices.contains(&buffer.index)
            || (!buffer.id.is_empty() && self.ids.contains(&buffer.id))
    }

    /// Mark a call consumed; false if it already was
    pub fn insert(&mut self, buffer: &ToolCallBuffer) -> bool {
        if self.contains(buffer) {
            return false;
        }
        self.indices.insert(buffer.index);
        if !buffer.id.is_empty() {
            self.ids.insert(buffer.id.clone());
        }
        true
    }

    /// Number of consumed calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug, Default)]
struct Slot {
    buffer: ToolCallBuffer,
    tracker: JsonDepthTracker,
    complete: bool,
}

/// Per-index tool-call buffers for one response
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: BTreeMap<usize, Slot>,
}

impl ToolCallAccumulator {
    /// Empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into its buffer, creating the buffer if needed
    ///
    /// `id` and `name` are set the first time they arrive non-empty and never
    /// overwritten; argument text is appended.
    pub fn apply_delta(&mut self, delta: &ToolCallDelta) {
        let slot = self.slots.entry(delta.index).or_insert_with(|| Slot {
            buffer: ToolCallBuffer::new(delta.index),
            ..Default::default()
        });

        if let Some(ref id) = delta.id {
            if slot.buffer.id.is_empty() && !id.is_empty() {
                slot.buffer.id.clone_from(id);
            }
        }
        if let Some(ref name) = delta.name {
            if slot.buffer.name.is_empty() && !name.is_empty() {
                slot.buffer.name.clone_from(name);
            }
        }
        if let Some(ref fragment) = delta.arguments_fragment {
            if fragment.is_empty() {
                return;
            }
            slot.buffer.arguments.push_str(fragment);
            slot.tracker.feed(fragment);
            slot.complete =
                slot.tracker.is_closed() && parse_arguments_object(&slot.buffer.arguments).is_some();
        }
    }

    /// Whether the buffer at `index` holds a whole JSON object
    #[must_use]
    pub fn is_complete(&self, index: usize) -> bool {
        self.slots.get(&index).is_some_and(|slot| slot.complete)
    }

    /// Complete, named, not yet consumed calls in index order
    ///
    /// Buffers stay in the accumulator; filtering repeats is the job of
    /// `consumed`.
    #[must_use]
    pub fn drain_complete(&self, consumed: &ConsumedSet) -> Vec<ToolCallBuffer> {
        self.slots
            .values()
            .filter(|slot| slot.complete && !slot.buffer.name.is_empty())
            .filter(|slot| !consumed.contains(&slot.buffer))
            .map(|slot| slot.buffer.clone())
            .collect()
    }

    /// Not yet consumed calls in index order, complete or not
    #[must_use]
    pub fn unconsumed(&self, consumed: &ConsumedSet) -> Vec<ToolCallBuffer> {
        self.slots
            .values()
            .filter(|slot| !consumed.contains(&slot.buffer))
            .map(|slot| slot.buffer.clone())
            .collect()
    }

    /// All buffers in index order
    pub fn buffers(&self) -> impl Iterator<Item = &ToolCallBuffer> {
        self.slots.values().map(|slot| &slot.buffer)
    }

    /// Number of tool calls seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no tool call has been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Parse text as a JSON object
///
/// The trimmed text must start with `{` and end with `}`.
#[must_use]
pub fn parse_arguments_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Tracks object nesting across appended fragments
///
/// Strings are skipped (with escapes), so `"}"` inside a value never closes
/// anything. Anything other than whitespace after the top-level object closes
/// marks the text as not a single object.
#[derive(Debug, Default)]
struct JsonDepthTracker {
    depth: usize,
    started: bool,
    not_object: bool,
    in_string: bool,
    escaped: bool,
    closed: bool,
    trailing: bool,
}

impl JsonDepthTracker {
    fn feed(&mut self, fragment: &str) {
        for c in fragment.chars() {
            if self.not_object || self.trailing {
                return;
            }
            if self.closed {
                if !c.is_whitespace() {
                    self.trailing = true;
                }
                continue;
            }
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
                continue;
            }
            if !self.started {
                if c.is_whitespace() {
                    continue;
                }
                self.started = true;
                if c != '{' {
                    self.not_object = true;
                    return;
                }
            }
            match c {
                '"' => self.in_string = true,
                '{' | '[' => self.depth += 1,
                '}' | ']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        self.closed = true;
                    }
                }
                _ => {}
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed && !self.trailing && !self.not_object
    }
}

//! Upstream event types and the chunk wire format

use serde::Deserialize;

/// A discrete event reconstructed from the upstream byte stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A fragment of assistant text
    ContentDelta {
        /// The text fragment (never empty)
        text: String,
    },
    /// A fragment of a tool call
    ToolCallDelta(ToolCallDelta),
    /// The upstream sent its terminator
    StreamEnd,
}

/// Incremental fragment of one tool call
///
/// `index` is the call's position in the upstream's parallel tool-call array
/// and is the only field present on every fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position in the parallel tool-call array
    pub index: usize,
    /// Call id (usually only on the first fragment)
    pub id: Option<String>,
    /// Tool name (usually only on the first fragment)
    pub name: Option<String>,
    /// Next piece of the JSON argument string
    pub arguments_fragment: Option<String>,
}

impl ToolCallDelta {
    /// Fragment carrying only argument text
    pub fn arguments(index: usize, fragment: impl Into<String>) -> Self {
        Self {
            index,
            arguments_fragment: Some(fragment.into()),
            ..Default::default()
        }
    }

    /// Opening fragment with id and name
    pub fn start(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments_fragment: None,
        }
    }
}

// =============================================================================
// Chat-completion chunk wire format
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ChunkWire {
    pub choices: Vec<ChoiceWire>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ChoiceWire {
    pub delta: DeltaWire,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DeltaWire {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDeltaWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ToolCallDeltaWire {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub function: Option<FunctionDeltaWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FunctionDeltaWire {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ChunkWire {
    /// Flatten into upstream events, content before tool-call deltas
    pub(crate) fn into_events(self, out: &mut Vec<UpstreamEvent>) {
        for choice in self.choices {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    out.push(UpstreamEvent::ContentDelta { text });
                }
            }
            for (position, call) in choice.delta.tool_calls.into_iter().enumerate() {
                let (name, arguments_fragment) = match call.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                out.push(UpstreamEvent::ToolCallDelta(ToolCallDelta {
                    index: call.index.unwrap_or(position),
                    id: call.id,
                    name,
                    arguments_fragment,
                }));
            }
            if let Some(reason) = choice.finish_reason {
                tracing::trace!(finish_reason = %reason, "Upstream choice finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn events(json: &str) -> Vec<UpstreamEvent> {
        let chunk: ChunkWire = serde_json::from_str(json).unwrap();
        let mut out = Vec::new();
        chunk.into_events(&mut out);
        out
    }

    #[test]
    fn test_content_chunk() {
        assert_eq!(
            events(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#),
            vec![UpstreamEvent::ContentDelta {
                text: "Hi".to_string()
            }]
        );
    }

    #[test]
    fn test_role_only_and_empty_content_skipped() {
        assert!(events(r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#).is_empty());
        assert!(events(r#"{"choices":[]}"#).is_empty());
    }

    #[test]
    fn test_tool_call_chunk() {
        let json = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"call_a","type":"function","function":{"name":"logMood","arguments":""}},
            {"index":1,"function":{"arguments":"{\"te"}}
        ]}}]}"#;

        assert_eq!(
            events(json),
            vec![
                UpstreamEvent::ToolCallDelta(ToolCallDelta {
                    index: 0,
                    id: Some("call_a".to_string()),
                    name: Some("logMood".to_string()),
                    arguments_fragment: Some(String::new()),
                }),
                UpstreamEvent::ToolCallDelta(ToolCallDelta::arguments(1, "{\"te")),
            ]
        );
    }

    #[test]
    fn test_missing_index_uses_position() {
        let json = r#"{"choices":[{"delta":{"tool_calls":[
            {"function":{"arguments":"a"}},
            {"function":{"arguments":"b"}}
        ]}}]}"#;

        let indices: Vec<usize> = events(json)
            .into_iter()
            .filter_map(|e| match e {
                UpstreamEvent::ToolCallDelta(d) => Some(d.index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }
}

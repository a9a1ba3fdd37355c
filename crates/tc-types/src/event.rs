//! Events decoded from the agent's `stream-json` output.
//!
//! Every syntactically valid JSON line becomes exactly one [`AgentEvent`].
//! Lines whose `type` is unknown, or whose fields do not match the expected
//! shape, are kept as [`AgentEvent::Unknown`] rather than rejected.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Token usage reported with a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The agent announced its own session id (used for `--resume`).
    Init { correlation_id: String },
    AgentText { text: String },
    ToolInvocation { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
    Completion { result: String, cost_usd: f64, usage: Option<Usage> },
    Error { message: String },
    Unknown { raw: Value },
}

impl AgentEvent {
    /// Decode one line of output. Fails only when the line is not JSON.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<WireEvent>(value.clone()) {
            Ok(wire) => wire.into_event(value),
            Err(_) => Self::Unknown { raw: value },
        }
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::AgentText { .. } => "agent_text",
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::ToolResult { .. } => "tool_result",
            Self::Completion { .. } => "completion",
            Self::Error { .. } => "error",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// String field of a tool invocation's input, if this is one.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        match self {
            Self::ToolInvocation { input, .. } => input.get(key).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Name of the invoked tool, if this is a tool invocation.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolInvocation { name, .. } => Some(name),
            _ => None,
        }
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Init {
        #[serde(default, deserialize_with = "null_as_default")]
        session_id: String,
    },
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        session_id: String,
    },
    Assistant {
        #[serde(default)]
        message: Option<WireMessage>,
    },
    ToolUse {
        #[serde(default, deserialize_with = "null_as_default")]
        id: String,
        #[serde(default, deserialize_with = "null_as_default")]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default, deserialize_with = "null_as_default")]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default, deserialize_with = "null_as_default")]
        is_error: bool,
    },
    Result {
        #[serde(default, deserialize_with = "null_as_default")]
        result: String,
        #[serde(default, alias = "total_cost_usd", deserialize_with = "null_as_default")]
        cost_usd: f64,
        #[serde(default)]
        usage: Option<Usage>,
    },
    Error {
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    content: Vec<WireBlock>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    text: String,
}

/// `null` decodes like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl WireEvent {
    fn into_event(self, raw: Value) -> AgentEvent {
        match self {
            Self::Init { session_id } => AgentEvent::Init {
                correlation_id: session_id,
            },
            Self::System {
                subtype,
                session_id,
            } if subtype.as_deref() == Some("init") => AgentEvent::Init {
                correlation_id: session_id,
            },
            Self::System { .. } => AgentEvent::Unknown { raw },
            Self::Assistant { message } => {
                let text = message
                    .map(|m| {
                        m.content
                            .into_iter()
                            .filter(|b| b.kind == "text")
                            .map(|b| b.text)
                            .collect::<String>()
                    })
                    .unwrap_or_default();
                AgentEvent::AgentText { text }
            }
            Self::ToolUse { id, name, input } => AgentEvent::ToolInvocation { id, name, input },
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => AgentEvent::ToolResult {
                tool_use_id,
                content: content_text(&content),
                is_error,
            },
            Self::Result {
                result,
                cost_usd,
                usage,
            } => AgentEvent::Completion {
                result,
                cost_usd,
                usage,
            },
            Self::Error { error, message } => {
                let message = match (error, message) {
                    (Some(Value::String(s)), _) => s,
                    (Some(Value::Object(obj)), _) => obj
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| Value::Object(obj).to_string()),
                    (_, Some(m)) => m,
                    (Some(other), None) => other.to_string(),
                    (None, None) => "unknown error".to_string(),
                };
                AgentEvent::Error { message }
            }
        }
    }
}

/// Tool results arrive either as a plain string or as a list of content blocks.
fn content_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

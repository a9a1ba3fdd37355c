//! Turning agent events into chat-ready text.

use tc_types::event::AgentEvent;

use crate::approval::policy::truncate;

/// Max command characters shown in a tool-use annotation.
const TOOL_DETAIL_CHARS: usize = 40;

/// Max characters of a failed tool's output shown to the user.
const TOOL_ERROR_CHARS: usize = 200;

/// Renders events for a human reader. Implementations must be cheap and pure.
pub trait Presenter: Send + Sync {
    /// Display text for an event, or `None` when it should not be shown.
    fn render(&self, event: &AgentEvent) -> Option<String>;

    /// Prompt shown when a tool invocation awaits a decision.
    fn approval_prompt(&self, tool_name: &str, reason: &str, command: &str) -> String;
}

/// Plain-text rendering with a small icon per tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainPresenter;

impl Presenter for PlainPresenter {
    fn render(&self, event: &AgentEvent) -> Option<String> {
        match event {
            AgentEvent::AgentText { text } if !text.trim().is_empty() => Some(text.clone()),
            AgentEvent::ToolInvocation { .. } => Some(tool_line(event)),
            AgentEvent::ToolResult {
                content,
                is_error: true,
                ..
            } => {
                let first = content.lines().next().unwrap_or_default();
                Some(format!("⚠️ Tool failed: {}", truncate(first, TOOL_ERROR_CHARS)))
            }
            AgentEvent::Completion { result, .. } if !result.trim().is_empty() => {
                Some(result.clone())
            }
            AgentEvent::Error { message } => Some(format!("❌ Error: {message}")),
            _ => None,
        }
    }

    fn approval_prompt(&self, tool_name: &str, reason: &str, command: &str) -> String {
        format!(
            "🔒 Approval needed\n\nClaude wants to: {reason}\nTool: {} {tool_name}\nCommand: `{command}`",
            tool_icon(tool_name)
        )
    }
}

fn tool_icon(name: &str) -> &'static str {
    match name {
        "Read" => "📁",
        "Write" | "Edit" | "MultiEdit" => "📝",
        "Bash" => "⚡",
        "Grep" | "Glob" => "🔍",
        "WebFetch" | "WebSearch" => "🌐",
        _ => "🔧",
    }
}

/// `[icon detail]` annotation for a tool invocation.
fn tool_line(event: &AgentEvent) -> String {
    let name = event.tool_name().unwrap_or_default();
    let detail = match name {
        "Read" | "Write" | "Edit" | "MultiEdit" => event.input_str("file_path").map(str::to_string),
        "Bash" => event
            .input_str("command")
            .map(|c| truncate(c, TOOL_DETAIL_CHARS)),
        "Grep" | "Glob" => event.input_str("pattern").map(str::to_string),
        "WebFetch" => event.input_str("url").map(domain_of),
        _ => None,
    }
    .unwrap_or_else(|| name.to_string());

    format!("[{} {detail}]", tool_icon(name))
}

/// Host part of a URL, or the input unchanged when it has none.
fn domain_of(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.split(['/', '?', '#'])
        .next()
        .filter(|host| !host.is_empty())
        .unwrap_or(url)
        .to_string()
}

/// Split `text` into chunks of at most `max_len` bytes, preferring to break
/// after a newline (or, failing that, a space) and never inside a character.
pub fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len || max_len == 0 {
        return vec![text];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character wider than max_len.
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        let split_at = if end < text.len() {
            let window = &text[start..end];
            window
                .rfind('\n')
                .or_else(|| window.rfind(' '))
                .map(|i| start + i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..split_at]);
        start = split_at;
    }
    chunks
}

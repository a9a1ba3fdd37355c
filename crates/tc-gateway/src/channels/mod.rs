//! Chat channel plumbing shared by the bridge and the concrete adapters.

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// One inline button: visible label plus the callback data sent back on press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<Button>>;

/// Something a chat user did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message {
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        text: String,
    },
    /// An inline button was pressed.
    Callback {
        callback_id: String,
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        data: String,
    },
}

impl Inbound {
    pub fn user_id(&self) -> i64 {
        match self {
            Self::Message { user_id, .. } | Self::Callback { user_id, .. } => *user_id,
        }
    }
}

/// Outbound side of a chat platform.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Send a message, returning its id.
    async fn send(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Result<i64>;

    /// Replace the text (and keyboard) of an earlier message.
    async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()>;

    /// Acknowledge a button press, optionally with a short toast.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
